use std::cmp::Reverse;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::available_bays;
use super::{Engine, EngineError, SharedGarageState};

/// Resolve garage name and bay for display. A deleted bay resolves to `None`.
pub(super) fn reservation_view(gs: &GarageState, r: &Reservation) -> ReservationView {
    ReservationView {
        reservation: r.clone(),
        garage_name: gs.garage.name.clone(),
        bay: gs.bay(r.bay_id).map(|b| BaySummary {
            id: b.id,
            number: b.number,
            name: b.name.clone(),
        }),
    }
}

impl Engine {
    fn garage_state(&self, id: Ulid) -> Result<SharedGarageState, EngineError> {
        self.get_garage_state(&id).ok_or(EngineError::NotFound(id))
    }

    fn entity_garage_state(&self, entity_id: Ulid) -> Result<SharedGarageState, EngineError> {
        let garage_id = self
            .get_garage_for_entity(&entity_id)
            .ok_or(EngineError::NotFound(entity_id))?;
        self.garage_state(garage_id)
    }

    // ── Garages & services ───────────────────────────────

    pub async fn get_garage(&self, id: Ulid) -> Result<Garage, EngineError> {
        let gs = self.garage_state(id)?;
        let guard = gs.read().await;
        Ok(guard.garage.clone())
    }

    pub async fn list_garages(&self) -> Vec<Garage> {
        let all: Vec<SharedGarageState> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut garages = Vec::with_capacity(all.len());
        for gs in all {
            garages.push(gs.read().await.garage.clone());
        }
        garages.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        garages
    }

    pub async fn list_services(&self, garage_id: Ulid) -> Result<Vec<ServiceOffering>, EngineError> {
        let gs = self.garage_state(garage_id)?;
        let guard = gs.read().await;
        let mut services = guard.services.clone();
        services.sort_by_key(|s| s.service_type);
        Ok(services)
    }

    /// Catalog entries of the garage matching `types`. Unknown types are
    /// simply absent from the result.
    pub async fn find_services(
        &self,
        garage_id: Ulid,
        types: &[ServiceType],
    ) -> Result<Vec<ServiceOffering>, EngineError> {
        let gs = self.garage_state(garage_id)?;
        let guard = gs.read().await;
        Ok(guard.find_services(types).cloned().collect())
    }

    // ── Bays ─────────────────────────────────────────────

    /// Sorted by bay number.
    pub async fn list_bays(&self, garage_id: Ulid) -> Result<Vec<RepairBay>, EngineError> {
        let gs = self.garage_state(garage_id)?;
        let guard = gs.read().await;
        Ok(guard.bays.clone())
    }

    pub async fn get_bay(&self, id: Ulid) -> Result<RepairBay, EngineError> {
        let gs = self.entity_garage_state(id)?;
        let guard = gs.read().await;
        guard.bay(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn count_bays(&self, garage_id: Ulid) -> Result<usize, EngineError> {
        let gs = self.garage_state(garage_id)?;
        let guard = gs.read().await;
        Ok(guard.bays.len())
    }

    /// Active bays with no confirmed, in-progress or completed reservation
    /// overlapping the window on that day.
    pub async fn available_bays(
        &self,
        garage_id: Ulid,
        date: NaiveDate,
        window: TimeWindow,
    ) -> Result<Vec<RepairBay>, EngineError> {
        if window.start >= window.end {
            return Err(EngineError::bad_request(format!(
                "start time {} must be before end time {}",
                window.start, window.end
            )));
        }
        let gs = self.garage_state(garage_id)?;
        let guard = gs.read().await;
        Ok(available_bays(&guard, date, &window, None))
    }

    // ── Reservations ─────────────────────────────────────

    pub async fn get_reservation(&self, id: Ulid, principal: &Principal) -> Result<ReservationView, EngineError> {
        let gs = self.entity_garage_state(id)?;
        let guard = gs.read().await;
        let r = guard.reservations.get(&id).ok_or(EngineError::NotFound(id))?;
        if !principal.is_operator() && r.user_id != principal.user_id {
            return Err(EngineError::Forbidden("not your reservation"));
        }
        Ok(reservation_view(&guard, r))
    }

    /// Newest first (date, then start time). Plain users only ever see their
    /// own reservations, whatever user filter they pass.
    pub async fn list_reservations(
        &self,
        filter: ReservationFilter,
        page: Option<u32>,
        limit: Option<u32>,
        principal: &Principal,
    ) -> Result<Page<ReservationView>, EngineError> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err(EngineError::bad_request("page must be at least 1"));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(EngineError::bad_request(format!("limit must be between 1 and {MAX_PAGE_SIZE}")));
        }

        let user_id = if principal.is_operator() {
            filter.user_id
        } else {
            Some(principal.user_id)
        };

        let garages: Vec<SharedGarageState> = match filter.garage_id {
            Some(gid) => self.get_garage_state(&gid).into_iter().collect(),
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };

        let mut matched = Vec::new();
        for gs in garages {
            let guard = gs.read().await;
            for r in guard.reservations.values() {
                if user_id.is_some_and(|u| r.user_id != u) || filter.status.is_some_and(|s| r.status != s) {
                    continue;
                }
                matched.push(reservation_view(&guard, r));
            }
        }
        matched.sort_by_key(|v| {
            let r = &v.reservation;
            (Reverse(r.date), Reverse(r.window.start), r.id)
        });

        let total = matched.len();
        let total_pages = total.div_ceil(limit as usize) as u32;
        let skip = (page as usize - 1).saturating_mul(limit as usize);
        let items = matched.into_iter().skip(skip).take(limit as usize).collect();
        Ok(Page {
            items,
            total,
            page,
            limit,
            total_pages,
        })
    }
}
