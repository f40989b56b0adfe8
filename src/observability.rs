use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bayplan_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bayplan_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bayplan_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bayplan_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bayplan_connections_rejected_total";

/// Counter: startup users that do not name a valid principal.
pub const AUTH_FAILURES_TOTAL: &str = "bayplan_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bayplan_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bayplan_wal_flush_batch_size";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: PENDING → CONFIRMED transitions.
pub const RESERVATIONS_CONFIRMED_TOTAL: &str = "bayplan_reservations_confirmed_total";

/// Counter: pending siblings cancelled by a confirmation.
pub const RESERVATIONS_AUTO_CANCELLED_TOTAL: &str = "bayplan_reservations_auto_cancelled_total";

/// Counter: confirmations rejected because the bay was already taken.
pub const CONFIRMATION_CONFLICTS_TOTAL: &str = "bayplan_confirmation_conflicts_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertGarage { .. } => "insert_garage",
        Command::UpdateGarage { .. } => "update_garage",
        Command::DeleteGarage { .. } => "delete_garage",
        Command::SelectGarages { .. } => "select_garages",
        Command::InsertService { .. } => "insert_service",
        Command::DeleteService { .. } => "delete_service",
        Command::SelectServices { .. } => "select_services",
        Command::InsertBay { .. } => "insert_bay",
        Command::ToggleBay { .. } => "toggle_bay",
        Command::UpdateBay { .. } => "update_bay",
        Command::DeleteBay { .. } => "delete_bay",
        Command::SelectBays { .. } => "select_bays",
        Command::CountBays { .. } => "count_bays",
        Command::SelectAvailableBays { .. } => "select_available_bays",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservationStatus { .. } => "update_reservation_status",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "cancel_reservation",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectReservations { .. } => "select_reservations",
    }
}
