mod availability;
mod bays;
mod directory;
mod error;
mod queries;
mod reservations;
mod rules;

pub use availability::{available_bays, bay_is_free, blocked_bay_ids, blocking_on_bay};
pub use error::EngineError;
pub use reservations::{CancelOutcome, AUTO_CANCEL_NOTE};
pub use rules::can_modify;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedGarageState = Arc<RwLock<GarageState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Exclusive hold on a fresh id until the record that owns it is journaled.
/// Dropping a claim that was not kept frees the id again.
pub(super) struct IdClaim<'a> {
    index: &'a DashMap<Ulid, Ulid>,
    id: Ulid,
    owner: Ulid,
    keep: bool,
}

impl IdClaim<'_> {
    /// The owning record is applied; leave the index entry in place.
    pub(super) fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        if !self.keep {
            let owner = self.owner;
            self.index.remove_if(&self.id, |_, g| *g == owner);
        }
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedGarageState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: bay / service / reservation id → garage id
    pub(super) entity_to_garage: DashMap<Ulid, Ulid>,
    /// Held shared while garages are created or removed, exclusively by compaction.
    pub(super) topology: RwLock<()>,
}

/// Apply an event to a GarageState. The caller holds the lock.
fn apply_to_garage(gs: &mut GarageState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::GarageUpdated { garage } => {
            gs.garage = garage.clone();
        }
        Event::ServiceAdded { service } => {
            gs.services.retain(|s| s.id != service.id);
            gs.services.push(service.clone());
            entity_map.insert(service.id, service.garage_id);
        }
        Event::ServiceRemoved { id, .. } => {
            gs.services.retain(|s| s.id != *id);
            entity_map.remove(id);
        }
        Event::ServicesPurged { .. } => {
            for s in gs.services.drain(..) {
                entity_map.remove(&s.id);
            }
        }
        Event::BaysCreated { garage_id, bays } => {
            for bay in bays {
                gs.upsert_bay(bay.clone());
                entity_map.insert(bay.id, *garage_id);
            }
        }
        Event::BayUpdated { bay } => {
            gs.upsert_bay(bay.clone());
            entity_map.insert(bay.id, bay.garage_id);
        }
        Event::BayDeleted { id, .. } => {
            gs.remove_bay(*id);
            entity_map.remove(id);
        }
        Event::BaysPurged { .. } => {
            for b in gs.bays.drain(..) {
                entity_map.remove(&b.id);
            }
        }
        Event::ReservationPlaced { reservation } | Event::ReservationRevised { reservation } => {
            entity_map.insert(reservation.id, reservation.garage_id);
            gs.upsert_reservation(reservation.clone());
        }
        Event::ReservationConfirmed {
            id,
            confirmed_by,
            superseded,
            note,
            revised,
            ..
        } => {
            if let Some(reservation) = revised {
                gs.upsert_reservation(reservation.clone());
            }
            for sid in superseded {
                if let Some(r) = gs.reservations.get_mut(sid) {
                    r.status = ReservationStatus::Cancelled;
                    r.comment = Some(note.clone());
                }
            }
            if let Some(r) = gs.reservations.get_mut(id) {
                r.status = ReservationStatus::Confirmed;
                r.is_paid = true;
                r.updated_by = Some(*confirmed_by);
            }
        }
        Event::ReservationStatusChanged {
            id, status, updated_by, ..
        } => {
            if let Some(r) = gs.reservations.get_mut(id) {
                r.status = *status;
                if *status == ReservationStatus::Confirmed {
                    r.is_paid = true;
                }
                if updated_by.is_some() {
                    r.updated_by = *updated_by;
                }
            }
        }
        Event::ReservationsPurged { .. } => {
            for id in gs.reservations.keys() {
                entity_map.remove(id);
            }
            gs.clear_reservations();
        }
        // GarageCreated/Deleted are handled at the DashMap level, not here
        Event::GarageCreated { .. } | Event::GarageDeleted { .. } => {}
    }
}

/// Events that recreate one garage and everything it owns.
fn snapshot_garage(gs: &GarageState, out: &mut Vec<Event>) {
    out.push(Event::GarageCreated { garage: gs.garage.clone() });
    if !gs.bays.is_empty() {
        out.push(Event::BaysCreated {
            garage_id: gs.garage.id,
            bays: gs.bays.clone(),
        });
    }
    for s in &gs.services {
        out.push(Event::ServiceAdded { service: s.clone() });
    }
    let mut reservations: Vec<&Reservation> = gs.reservations.values().collect();
    reservations.sort_by_key(|r| r.id);
    for r in reservations {
        out.push(Event::ReservationPlaced { reservation: r.clone() });
    }
}

/// Drop every reverse-index entry still pointing into a garage being removed.
fn unmap_garage(gs: &GarageState, entity_map: &DashMap<Ulid, Ulid>) {
    for b in &gs.bays {
        entity_map.remove(&b.id);
    }
    for s in &gs.services {
        entity_map.remove(&s.id);
    }
    for id in gs.reservations.keys() {
        entity_map.remove(id);
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_garage: DashMap::new(),
            topology: RwLock::new(()),
        };

        // Replay: we're the sole owner of these Arcs, so try_read/try_write
        // always succeed. Never block here; this may run inside a runtime.
        for event in &events {
            match event {
                Event::GarageCreated { garage } => {
                    engine
                        .state
                        .insert(garage.id, Arc::new(RwLock::new(GarageState::new(garage.clone()))));
                }
                Event::GarageDeleted { id } => {
                    if let Some((_, gs)) = engine.state.remove(id)
                        && let Ok(guard) = gs.try_read()
                    {
                        unmap_garage(&guard, &engine.entity_to_garage);
                    }
                }
                other => {
                    if let Some(entry) = engine.state.get(&other.garage_id()) {
                        let gs = entry.clone();
                        drop(entry);
                        if let Ok(mut guard) = gs.try_write() {
                            apply_to_garage(&mut guard, other, &engine.entity_to_garage);
                        }
                    }
                }
            }
        }

        tracing::info!(
            "replayed {} events: {} garages, {} entities",
            events.len(),
            engine.state.len(),
            engine.entity_to_garage.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_garage_state(&self, id: &Ulid) -> Option<SharedGarageState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_garage_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_garage.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        gs: &mut GarageState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_garage(gs, event, &self.entity_to_garage);
        self.notify.send(gs.garage.id, event);
        Ok(())
    }

    /// Acquire a garage's write lock, failing if it was deleted while we waited.
    pub(super) async fn garage_write(
        &self,
        garage_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<GarageState>, EngineError> {
        let gs = self
            .get_garage_state(&garage_id)
            .ok_or(EngineError::NotFound(garage_id))?;
        let guard = gs.write_owned().await;
        if !self.state.contains_key(&garage_id) {
            return Err(EngineError::NotFound(garage_id));
        }
        Ok(guard)
    }

    /// Lookup entity → garage, acquire the garage write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<GarageState>, EngineError> {
        let garage_id = self
            .get_garage_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        self.garage_write(garage_id).await
    }

    /// Reserve `id` for a new record owned by `owner`. Ids are unique across
    /// garages and everything they hold, and two creators of the same id
    /// cannot both get past this point.
    pub(super) fn claim_id(&self, id: Ulid, owner: Ulid) -> Result<IdClaim<'_>, EngineError> {
        match self.entity_to_garage.entry(id) {
            Entry::Occupied(_) => Err(EngineError::bad_request(format!("id {id} already in use"))),
            Entry::Vacant(slot) => {
                if self.state.contains_key(&id) {
                    return Err(EngineError::bad_request(format!("id {id} already in use")));
                }
                slot.insert(owner);
                Ok(IdClaim {
                    index: &self.entity_to_garage,
                    id,
                    owner,
                    keep: false,
                })
            }
        }
    }

    // ── Compaction ───────────────────────────────────────

    /// Rewrite the WAL from live state.
    ///
    /// Garage creation is paused and every garage write lock is held across
    /// snapshot and swap, so no append can land in the old file and be lost.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _topology = self.topology.write().await;
        let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(gs) = self.get_garage_state(&id) {
                guards.push(gs.write_owned().await);
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            snapshot_garage(guard, &mut events);
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
