use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Reservations on `bay_id` that hold the bay during `window` on `date`.
/// Only CONFIRMED, IN_PROGRESS and COMPLETED reservations block; pending and
/// cancelled ones never do. `exclude` skips a reservation that is being moved.
pub fn blocking_on_bay<'a>(
    gs: &'a GarageState,
    bay_id: Ulid,
    date: NaiveDate,
    window: &'a TimeWindow,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = &'a Reservation> + 'a {
    gs.reservations_on(bay_id, date).filter(move |r| {
        Some(r.id) != exclude && r.status.blocks_availability() && r.window.overlaps(window)
    })
}

/// Ids of every bay held by a blocking reservation overlapping the window.
pub fn blocked_bay_ids(
    gs: &GarageState,
    date: NaiveDate,
    window: &TimeWindow,
    exclude: Option<Ulid>,
) -> HashSet<Ulid> {
    gs.reservations
        .values()
        .filter(|r| r.date == date && Some(r.id) != exclude)
        .filter(|r| r.status.blocks_availability() && r.window.overlaps(window))
        .map(|r| r.bay_id)
        .collect()
}

/// Active bays not held during `window` on `date`, in bay-number order.
pub fn available_bays(
    gs: &GarageState,
    date: NaiveDate,
    window: &TimeWindow,
    exclude: Option<Ulid>,
) -> Vec<RepairBay> {
    let blocked = blocked_bay_ids(gs, date, window, exclude);
    gs.bays
        .iter()
        .filter(|b| b.active && !blocked.contains(&b.id))
        .cloned()
        .collect()
}

/// Whether `bay_id` is active and free for the window.
pub fn bay_is_free(
    gs: &GarageState,
    bay_id: Ulid,
    date: NaiveDate,
    window: &TimeWindow,
    exclude: Option<Ulid>,
) -> bool {
    gs.bay(bay_id).is_some_and(|b| b.active)
        && blocking_on_bay(gs, bay_id, date, window, exclude).next().is_none()
}
