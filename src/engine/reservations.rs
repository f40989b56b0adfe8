use chrono::{DateTime, Utc};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{available_bays, bay_is_free};
use super::queries::reservation_view;
use super::rules::{
    can_modify, confirmation_conflict, now, pending_siblings, price_services, validate_comment,
    validate_hours, validate_not_past, validate_window,
};
use super::{Engine, EngineError};

/// Comment stamped on pending reservations displaced by a confirmation.
pub const AUTO_CANCEL_NOTE: &str = "Cancelled automatically: the bay was confirmed for another reservation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    pub message: String,
    pub reservation: ReservationView,
}

/// Owner-or-operator gate shared by edit and cancel. Operators skip the
/// two-day notice.
fn check_modify_access(
    principal: &Principal,
    reservation: &Reservation,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if principal.is_operator() {
        return Ok(());
    }
    if principal.user_id != reservation.user_id {
        return Err(EngineError::Forbidden("not your reservation"));
    }
    if !can_modify(reservation.date, now) {
        return Err(EngineError::Forbidden(
            "reservations can only be changed more than 2 days in advance",
        ));
    }
    Ok(())
}

/// Build the event moving `current` to `next`, enforcing the transition table
/// and, for confirmations, bay exclusivity. Pure: nothing is written.
fn status_event(
    gs: &GarageState,
    current: &Reservation,
    next: ReservationStatus,
    actor: Ulid,
) -> Result<Event, EngineError> {
    if next == current.status {
        return Err(EngineError::bad_request(format!("reservation is already {next}")));
    }
    if !current.status.can_transition_to(next) {
        return Err(EngineError::InvalidTransition {
            from: current.status,
            to: next,
        });
    }

    if current.status == ReservationStatus::Pending && next == ReservationStatus::Confirmed {
        if gs.bay(current.bay_id).is_none() {
            return Err(EngineError::NotFound(current.bay_id));
        }
        if let Some(other) = confirmation_conflict(gs, current) {
            metrics::counter!(observability::CONFIRMATION_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::ConfirmationConflict(other));
        }
        return Ok(Event::ReservationConfirmed {
            id: current.id,
            garage_id: current.garage_id,
            confirmed_by: actor,
            superseded: pending_siblings(gs, current),
            note: AUTO_CANCEL_NOTE.to_string(),
            revised: None,
        });
    }

    Ok(Event::ReservationStatusChanged {
        id: current.id,
        garage_id: current.garage_id,
        status: next,
        updated_by: Some(actor),
    })
}

impl Engine {
    /// Book the first free bay for the requested window. The owner is always
    /// the caller.
    pub async fn create_reservation(
        &self,
        req: NewReservation,
        principal: &Principal,
    ) -> Result<ReservationView, EngineError> {
        validate_comment(req.comment.as_deref())?;
        let claim = self.claim_id(req.id, req.garage_id)?;
        let mut guard = self.garage_write(req.garage_id).await?;
        validate_not_past(req.date, now())?;
        validate_window(&req.window)?;
        validate_hours(&guard.garage, &req.window)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_GARAGE {
            return Err(EngineError::LimitExceeded("too many reservations in garage"));
        }

        let bay = available_bays(&guard, req.date, &req.window, None)
            .into_iter()
            .next()
            .ok_or(EngineError::NoAvailability {
                date: req.date,
                window: req.window,
            })?;
        let total_amount = price_services(&guard, &req.services)?;

        let reservation = Reservation {
            id: req.id,
            user_id: principal.user_id,
            garage_id: req.garage_id,
            bay_id: bay.id,
            date: req.date,
            window: req.window,
            services: req.services,
            status: ReservationStatus::Pending,
            comment: req.comment,
            is_paid: false,
            total_amount,
            updated_by: None,
        };
        let event = Event::ReservationPlaced {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.keep();
        debug!("reservation {} placed on bay {} ({})", reservation.id, bay.number, reservation.window);
        Ok(reservation_view(&guard, &reservation))
    }

    /// Operator-only status change. PENDING → CONFIRMED cancels every
    /// overlapping pending sibling on the same bay in the same record.
    pub async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
        principal: &Principal,
    ) -> Result<ReservationView, EngineError> {
        if !principal.is_operator() {
            return Err(EngineError::Forbidden("only garage operators can change reservation status"));
        }
        let mut guard = self.resolve_entity_write(&id).await?;
        let current = guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        let event = status_event(&guard, &current, status, principal.user_id)?;
        self.persist_and_apply(&mut guard, &event).await?;
        record_status_event(&event);

        let updated = guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        Ok(reservation_view(&guard, &updated))
    }

    /// Edit window, services or comment. A status in the patch is ignored for
    /// plain users and goes through the transition table for operators.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        principal: &Principal,
    ) -> Result<ReservationView, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let current = guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        check_modify_access(principal, &current, now())?;
        if current.status.is_terminal() {
            return Err(EngineError::bad_request(format!(
                "reservation is {} and can no longer be changed",
                current.status
            )));
        }

        let mut next = current.clone();
        if patch.start.is_some() || patch.end.is_some() {
            let window = TimeWindow::new(
                patch.start.unwrap_or(current.window.start),
                patch.end.unwrap_or(current.window.end),
            );
            validate_window(&window)?;
            validate_hours(&guard.garage, &window)?;
            if window != current.window {
                if !bay_is_free(&guard, current.bay_id, current.date, &window, Some(id)) {
                    let bay = available_bays(&guard, current.date, &window, Some(id))
                        .into_iter()
                        .next()
                        .ok_or(EngineError::NoAvailability {
                            date: current.date,
                            window,
                        })?;
                    debug!("reservation {id} moves to bay {}", bay.number);
                    next.bay_id = bay.id;
                }
                next.window = window;
            }
        }
        if let Some(services) = &patch.services {
            next.total_amount = price_services(&guard, services)?;
            next.services = services.clone();
        }
        if let Some(comment) = patch.comment {
            validate_comment(comment.as_deref())?;
            next.comment = comment;
        }

        // Plan the status change against the revised record before writing
        // anything, so a rejected confirmation leaves the reservation as it was.
        let status_change = match patch.status {
            Some(status) if principal.is_operator() && status != next.status => {
                Some(status_event(&guard, &next, status, principal.user_id)?)
            }
            _ => None,
        };

        // The edit and the status change land in a single record.
        let event = match status_change {
            Some(Event::ReservationConfirmed {
                id,
                garage_id,
                confirmed_by,
                superseded,
                note,
                ..
            }) => Some(Event::ReservationConfirmed {
                id,
                garage_id,
                confirmed_by,
                superseded,
                note,
                revised: (next != current).then_some(next),
            }),
            Some(Event::ReservationStatusChanged { status, updated_by, .. }) => {
                next.status = status;
                next.updated_by = updated_by;
                Some(Event::ReservationRevised { reservation: next })
            }
            Some(other) => Some(other),
            None if next != current => Some(Event::ReservationRevised { reservation: next }),
            None => None,
        };
        if let Some(event) = event {
            self.persist_and_apply(&mut guard, &event).await?;
            record_status_event(&event);
        }

        let updated = guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        Ok(reservation_view(&guard, &updated))
    }

    /// Soft cancel. Owners may cancel only pending reservations.
    pub async fn cancel_reservation(&self, id: Ulid, principal: &Principal) -> Result<CancelOutcome, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let current = guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        check_modify_access(principal, &current, now())?;
        if current.status == ReservationStatus::Cancelled {
            return Err(EngineError::bad_request("reservation is already cancelled"));
        }
        if !principal.is_operator() && current.status != ReservationStatus::Pending {
            return Err(EngineError::Forbidden("only pending reservations can be cancelled"));
        }
        if !current.status.can_transition_to(ReservationStatus::Cancelled) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: ReservationStatus::Cancelled,
            });
        }

        let event = Event::ReservationStatusChanged {
            id,
            garage_id: current.garage_id,
            status: ReservationStatus::Cancelled,
            updated_by: principal.is_operator().then_some(principal.user_id),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let updated = guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        Ok(CancelOutcome {
            message: "Reservation cancelled".to_string(),
            reservation: reservation_view(&guard, &updated),
        })
    }

    /// Hard delete, first step of the garage removal cascade.
    pub async fn delete_all_reservations(&self, garage_id: Ulid) -> Result<usize, EngineError> {
        let mut guard = self.garage_write(garage_id).await?;
        let n = guard.reservations.len();
        if n == 0 {
            return Ok(0);
        }
        let event = Event::ReservationsPurged { garage_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(n)
    }
}

fn record_status_event(event: &Event) {
    if let Event::ReservationConfirmed { id, superseded, .. } = event {
        metrics::counter!(observability::RESERVATIONS_CONFIRMED_TOTAL).increment(1);
        metrics::counter!(observability::RESERVATIONS_AUTO_CANCELLED_TOTAL).increment(superseded.len() as u64);
        info!("reservation {id} confirmed, {} pending siblings cancelled", superseded.len());
    }
}
