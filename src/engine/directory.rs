use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::rules::{validate_bay_hours, validate_name};
use super::{unmap_garage, Engine, EngineError};

/// Hours given to bays of a garage that declares none.
fn default_bay_hours() -> (ClockTime, ClockTime) {
    (ClockTime::MIDNIGHT, ClockTime::LAST_MINUTE)
}

impl Engine {
    // ── Garages ──────────────────────────────────────────

    /// Create a garage and its `bay_count` numbered bays.
    pub async fn create_garage(
        &self,
        id: Ulid,
        name: String,
        hours: Option<OpeningHours>,
        bay_count: u32,
    ) -> Result<(Garage, Vec<RepairBay>), EngineError> {
        validate_name(&name)?;
        if bay_count == 0 || bay_count > MAX_BAYS_PER_GARAGE {
            return Err(EngineError::bad_request(format!(
                "bay count must be between 1 and {MAX_BAYS_PER_GARAGE}"
            )));
        }
        if let Some(h) = hours {
            validate_bay_hours(h.open, h.close)?;
        }

        let garage = {
            let _topology = self.topology.read().await;
            if self.state.len() >= MAX_GARAGES {
                return Err(EngineError::LimitExceeded("too many garages"));
            }
            // Released once the garage is in `state`.
            let _claim = self.claim_id(id, id)?;
            let garage = Garage {
                id,
                name,
                hours,
                bay_count,
            };
            let event = Event::GarageCreated { garage: garage.clone() };
            self.wal_append(&event).await?;
            self.state
                .insert(id, Arc::new(RwLock::new(GarageState::new(garage.clone()))));
            self.notify.send(id, &event);
            garage
        };

        let (open, close) = hours.map_or_else(default_bay_hours, |h| (h.open, h.close));
        let bays = self.create_bays_for_garage(id, bay_count, open, close).await?;
        info!("garage {id} created with {} bays", bays.len());
        Ok((garage, bays))
    }

    /// Rename or re-hour a garage. Existing bays keep their own hours.
    pub async fn update_garage(&self, id: Ulid, patch: GaragePatch) -> Result<Garage, EngineError> {
        let mut guard = self.garage_write(id).await?;
        let mut garage = guard.garage.clone();
        if let Some(name) = patch.name {
            validate_name(&name)?;
            garage.name = name;
        }
        if let Some(h) = patch.hours {
            validate_bay_hours(h.open, h.close)?;
            garage.hours = Some(h);
        }
        let event = Event::GarageUpdated { garage: garage.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(garage)
    }

    /// Cascade: reservations, services, bays, then the garage itself.
    ///
    /// Each step is journaled on its own and nothing is rolled back, so a
    /// failure part-way leaves the earlier steps applied.
    pub async fn delete_garage(&self, id: Ulid) -> Result<(), EngineError> {
        let _topology = self.topology.read().await;
        if !self.state.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let reservations = self.delete_all_reservations(id).await?;
        let services = self.delete_all_services(id).await?;
        let bays = self.delete_all_bays(id).await?;

        let guard = self.garage_write(id).await?;
        let event = Event::GarageDeleted { id };
        if let Err(e) = self.wal_append(&event).await {
            warn!("garage {id} emptied but not removed: {e}");
            return Err(e);
        }
        unmap_garage(&guard, &self.entity_to_garage);
        self.state.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        drop(guard);

        info!("garage {id} deleted ({reservations} reservations, {services} services, {bays} bays)");
        Ok(())
    }

    // ── Service catalog ──────────────────────────────────

    pub async fn add_service(
        &self,
        id: Ulid,
        garage_id: Ulid,
        service_type: ServiceType,
        average_cost: u64,
        estimated_minutes: u32,
    ) -> Result<ServiceOffering, EngineError> {
        if estimated_minutes == 0 {
            return Err(EngineError::bad_request("estimated duration must be at least 1 minute"));
        }
        let claim = self.claim_id(id, garage_id)?;
        let mut guard = self.garage_write(garage_id).await?;
        if guard.services.len() >= MAX_SERVICES_PER_GARAGE {
            return Err(EngineError::LimitExceeded("too many services in garage"));
        }
        if guard.service_by_type(service_type).is_some() {
            return Err(EngineError::ServiceExists {
                garage_id,
                service_type,
            });
        }

        let service = ServiceOffering {
            id,
            garage_id,
            service_type,
            average_cost,
            estimated_minutes,
        };
        let event = Event::ServiceAdded { service: service.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.keep();
        Ok(service)
    }

    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        if guard.service(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ServiceRemoved {
            id,
            garage_id: guard.garage.id,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_all_services(&self, garage_id: Ulid) -> Result<usize, EngineError> {
        let mut guard = self.garage_write(garage_id).await?;
        let n = guard.services.len();
        if n == 0 {
            return Ok(0);
        }
        let event = Event::ServicesPurged { garage_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(n)
    }
}
