use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn validate_window(window: &TimeWindow) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::bad_request(format!(
            "start time {} must be before end time {}",
            window.start, window.end
        )));
    }
    if window.duration_minutes() < MIN_RESERVATION_MINUTES as i32 {
        return Err(EngineError::bad_request(format!(
            "reservation must last at least {MIN_RESERVATION_MINUTES} minutes"
        )));
    }
    Ok(())
}

pub(crate) fn validate_hours(garage: &Garage, window: &TimeWindow) -> Result<(), EngineError> {
    match garage.hours {
        Some(hours) if !hours.contains(window) => Err(EngineError::bad_request(format!(
            "{window} is outside opening hours {}-{}",
            hours.open, hours.close
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn validate_not_past(date: NaiveDate, now: DateTime<Utc>) -> Result<(), EngineError> {
    if date < now.date_naive() {
        return Err(EngineError::bad_request(format!("date {date} is in the past")));
    }
    Ok(())
}

/// Owners may edit or cancel only while strictly more than two days remain
/// before the reservation day starts (midnight UTC).
pub fn can_modify(date: NaiveDate, now: DateTime<Utc>) -> bool {
    let starts = date.and_time(chrono::NaiveTime::MIN).and_utc();
    starts - now > TimeDelta::days(MODIFY_NOTICE_DAYS)
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::bad_request("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_comment(comment: Option<&str>) -> Result<(), EngineError> {
    if comment.is_some_and(|c| c.len() > MAX_COMMENT_LEN) {
        return Err(EngineError::LimitExceeded("comment too long"));
    }
    Ok(())
}

pub(crate) fn validate_bay_hours(open: ClockTime, close: ClockTime) -> Result<(), EngineError> {
    if open >= close {
        return Err(EngineError::bad_request(format!(
            "opening time {open} must be before closing time {close}"
        )));
    }
    Ok(())
}

/// Check requested services against the garage catalog and total their cost.
pub(crate) fn price_services(gs: &GarageState, requested: &[ServiceType]) -> Result<u64, EngineError> {
    if requested.len() > MAX_SERVICES_PER_RESERVATION {
        return Err(EngineError::bad_request(format!(
            "at most {MAX_SERVICES_PER_RESERVATION} services per reservation"
        )));
    }
    let repeated = requested
        .iter()
        .enumerate()
        .find_map(|(i, st)| requested[..i].contains(st).then_some(st));
    if let Some(st) = repeated {
        return Err(EngineError::InvalidService(format!("{st} requested twice")));
    }
    let offered: Vec<&ServiceOffering> = gs.find_services(requested).collect();
    if let Some(missing) = requested
        .iter()
        .find(|st| !offered.iter().any(|s| s.service_type == **st))
    {
        return Err(EngineError::InvalidService(format!("{missing} is not offered by this garage")));
    }
    Ok(offered.iter().fold(0u64, |total, s| total.saturating_add(s.average_cost)))
}

/// Another reservation already holding the same bay for an overlapping window.
pub(crate) fn confirmation_conflict(gs: &GarageState, target: &Reservation) -> Option<Ulid> {
    gs.reservations_on(target.bay_id, target.date)
        .find(|r| {
            r.id != target.id
                && matches!(r.status, ReservationStatus::Confirmed | ReservationStatus::InProgress)
                && r.window.overlaps(&target.window)
        })
        .map(|r| r.id)
}

/// Pending reservations displaced when `target` is confirmed.
pub(crate) fn pending_siblings(gs: &GarageState, target: &Reservation) -> Vec<Ulid> {
    let mut ids: Vec<Ulid> = gs
        .reservations_on(target.bay_id, target.date)
        .filter(|r| {
            r.id != target.id
                && r.status == ReservationStatus::Pending
                && r.window.overlaps(&target.window)
        })
        .map(|r| r.id)
        .collect();
    ids.sort();
    ids
}
