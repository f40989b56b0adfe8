use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::Engine;

/// Background task that rewrites the WAL from live state once enough
/// appends have piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            debug!("compaction pass finished");
        }
    }
}

/// One compactor tick. Returns whether a compaction ran.
async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed after {appends} appends: {e}");
            false
        }
    }
}
