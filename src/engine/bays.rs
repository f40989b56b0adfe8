use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::rules::{validate_bay_hours, validate_name};
use super::{Engine, EngineError};

/// Sequentially numbered bays `1..=count`, all active.
fn numbered_bays(garage_id: Ulid, count: u32, open: ClockTime, close: ClockTime) -> Vec<RepairBay> {
    (1..=count)
        .map(|number| RepairBay {
            id: Ulid::new(),
            garage_id,
            number,
            name: format!("Bay {number}"),
            open,
            close,
            active: true,
        })
        .collect()
}

impl Engine {
    /// Bulk-create bays `1..=count` inheriting the given hours. One WAL record.
    pub async fn create_bays_for_garage(
        &self,
        garage_id: Ulid,
        count: u32,
        open: ClockTime,
        close: ClockTime,
    ) -> Result<Vec<RepairBay>, EngineError> {
        if count == 0 || count > MAX_BAYS_PER_GARAGE {
            return Err(EngineError::bad_request(format!(
                "bay count must be between 1 and {MAX_BAYS_PER_GARAGE}"
            )));
        }
        validate_bay_hours(open, close)?;
        let mut guard = self.garage_write(garage_id).await?;
        if guard.bays.len() + count as usize > MAX_BAYS_PER_GARAGE as usize {
            return Err(EngineError::LimitExceeded("too many bays in garage"));
        }
        if let Some(taken) = (1..=count).find(|n| guard.bay_by_number(*n).is_some()) {
            return Err(EngineError::BayNumberTaken { garage_id, number: taken });
        }

        let bays = numbered_bays(garage_id, count, open, close);
        let event = Event::BaysCreated {
            garage_id,
            bays: bays.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("created {count} bays for garage {garage_id}");
        Ok(bays)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_bay(
        &self,
        id: Ulid,
        garage_id: Ulid,
        number: u32,
        name: String,
        open: ClockTime,
        close: ClockTime,
        active: bool,
    ) -> Result<RepairBay, EngineError> {
        if number == 0 {
            return Err(EngineError::bad_request("bay number must be at least 1"));
        }
        validate_name(&name)?;
        validate_bay_hours(open, close)?;
        let claim = self.claim_id(id, garage_id)?;
        let mut guard = self.garage_write(garage_id).await?;
        if guard.bays.len() >= MAX_BAYS_PER_GARAGE as usize {
            return Err(EngineError::LimitExceeded("too many bays in garage"));
        }
        if guard.bay_by_number(number).is_some() {
            return Err(EngineError::BayNumberTaken { garage_id, number });
        }

        let bay = RepairBay {
            id,
            garage_id,
            number,
            name,
            open,
            close,
            active,
        };
        let event = Event::BaysCreated {
            garage_id,
            bays: vec![bay.clone()],
        };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.keep();
        Ok(bay)
    }

    pub async fn toggle_bay(&self, id: Ulid) -> Result<RepairBay, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let mut bay = guard.bay(id).cloned().ok_or(EngineError::NotFound(id))?;
        bay.active = !bay.active;
        let event = Event::BayUpdated { bay: bay.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(bay)
    }

    pub async fn update_bay(&self, id: Ulid, patch: BayPatch) -> Result<RepairBay, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let mut bay = guard.bay(id).cloned().ok_or(EngineError::NotFound(id))?;

        if let Some(number) = patch.number {
            if number == 0 {
                return Err(EngineError::bad_request("bay number must be at least 1"));
            }
            if guard.bay_by_number(number).is_some_and(|other| other.id != id) {
                return Err(EngineError::BayNumberTaken {
                    garage_id: bay.garage_id,
                    number,
                });
            }
            bay.number = number;
        }
        if let Some(name) = patch.name {
            validate_name(&name)?;
            bay.name = name;
        }
        bay.open = patch.open.unwrap_or(bay.open);
        bay.close = patch.close.unwrap_or(bay.close);
        validate_bay_hours(bay.open, bay.close)?;
        if let Some(active) = patch.active {
            bay.active = active;
        }

        let event = Event::BayUpdated { bay: bay.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(bay)
    }

    /// Reservations pointing at the bay keep the dangling reference.
    pub async fn delete_bay(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let garage_id = guard.garage.id;
        if guard.bay(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BayDeleted { id, garage_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_all_bays(&self, garage_id: Ulid) -> Result<usize, EngineError> {
        let mut guard = self.garage_write(garage_id).await?;
        let n = guard.bays.len();
        if n == 0 {
            return Ok(0);
        }
        let event = Event::BaysPurged { garage_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(n)
    }
}
