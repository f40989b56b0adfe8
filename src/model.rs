use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// Failures when reading a domain value from its textual form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("invalid time {0:?}: expected HH:MM")]
    Time(String),
    #[error("invalid date {0:?}: expected YYYY-MM-DD")]
    Date(String),
    #[error("invalid status: {0}")]
    Status(String),
    #[error("unknown service type: {0}")]
    ServiceType(String),
}

// ── Clock time ───────────────────────────────────────────────────

/// Time of day on a 24h clock, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime(0);
    pub const LAST_MINUTE: ClockTime = ClockTime(23 * 60 + 59);

    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self(hour * 60 + minute))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl FromStr for ClockTime {
    type Err = ModelError;

    /// Accepts `H:MM` or `HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ModelError::Time(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(bad)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(bad());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let hour: u16 = h.parse().map_err(|_| bad())?;
        let minute: u16 = m.parse().map_err(|_| bad())?;
        ClockTime::new(hour, minute).ok_or_else(bad)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Half-open window `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeWindow {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> i32 {
        self.end.minutes() as i32 - self.start.minutes() as i32
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningHours {
    pub open: ClockTime,
    pub close: ClockTime,
}

impl OpeningHours {
    pub fn contains(&self, window: &TimeWindow) -> bool {
        self.open <= window.start && window.end <= self.close
    }
}

/// Calendar day of a reservation. Accepts `YYYY-MM-DD` or a full RFC 3339
/// timestamp, in which case the UTC calendar date is kept.
pub fn parse_date(s: &str) -> Result<NaiveDate, ModelError> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc).date_naive()))
        .map_err(|_| ModelError::Date(s.to_string()))
}

// ── Principals ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    /// Garage staff; may confirm, edit and cancel any reservation.
    Operator,
}

/// Authenticated caller, supplied by the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Ulid,
    pub role: Role,
}

impl Principal {
    pub fn user(user_id: Ulid) -> Self {
        Self { user_id, role: Role::User }
    }

    pub fn operator(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Operator }
    }

    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }
}

// ── Status ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::InProgress => "IN_PROGRESS",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    /// Statuses that hold the bay for other reservations.
    pub fn blocks_availability(self) -> bool {
        matches!(
            self,
            ReservationStatus::Confirmed | ReservationStatus::InProgress | ReservationStatus::Completed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Completed | ReservationStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Cancelled)
                | (InProgress, Completed)
        )
    }
}

impl FromStr for ReservationStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "IN_PROGRESS" => Ok(ReservationStatus::InProgress),
            "COMPLETED" => Ok(ReservationStatus::Completed),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            _ => Err(ModelError::Status(s.to_string())),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Service catalog ──────────────────────────────────────────────

macro_rules! service_types {
    ($($variant:ident => $label:literal),+ $(,)?) => {
        /// Closed list of services a garage can offer.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum ServiceType {
            $($variant),+
        }

        impl ServiceType {
            pub const ALL: &'static [ServiceType] = &[$(ServiceType::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(ServiceType::$variant => $label),+
                }
            }
        }

        impl FromStr for ServiceType {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($label => Ok(ServiceType::$variant),)+
                    _ => Err(ModelError::ServiceType(s.to_string())),
                }
            }
        }
    };
}

service_types! {
    OilChange => "oil_change",
    TechnicalInspection => "technical_inspection",
    TireRepair => "tire_repair",
    TireReplacement => "tire_replacement",
    Brakes => "brakes",
    Battery => "battery",
    AirConditioning => "air_conditioning",
    Exhaust => "exhaust",
    FullService => "full_service",
    Diagnostics => "diagnostics",
    Bodywork => "bodywork",
    Paint => "paint",
    Windshield => "windshield",
    Suspension => "suspension",
    Clutch => "clutch",
    Transmission => "transmission",
    FuelInjection => "fuel_injection",
    Cooling => "cooling",
    Starter => "starter",
    CarWash => "car_wash",
    WheelBalancing => "wheel_balancing",
    WheelAlignment => "wheel_alignment",
    Electrical => "electrical",
    AirFilter => "air_filter",
    OilFilter => "oil_filter",
    BrakePads => "brake_pads",
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Garage {
    pub id: Ulid,
    pub name: String,
    pub hours: Option<OpeningHours>,
    /// Number of bays requested at creation.
    pub bay_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: Ulid,
    pub garage_id: Ulid,
    pub service_type: ServiceType,
    /// Minor currency units.
    pub average_cost: u64,
    pub estimated_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairBay {
    pub id: Ulid,
    pub garage_id: Ulid,
    pub number: u32,
    pub name: String,
    pub open: ClockTime,
    pub close: ClockTime,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub garage_id: Ulid,
    pub bay_id: Ulid,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub services: Vec<ServiceType>,
    pub status: ReservationStatus,
    pub comment: Option<String>,
    pub is_paid: bool,
    pub total_amount: u64,
    /// Who last confirmed or cancelled it on the garage side.
    pub updated_by: Option<Ulid>,
}

/// Everything owned by one garage. Guarded by a single lock.
#[derive(Debug, Clone)]
pub struct GarageState {
    pub garage: Garage,
    pub services: Vec<ServiceOffering>,
    /// Sorted by `number`.
    pub bays: Vec<RepairBay>,
    pub reservations: HashMap<Ulid, Reservation>,
    /// (bay, day) → reservation ids, for overlap scans.
    by_bay_day: HashMap<(Ulid, NaiveDate), Vec<Ulid>>,
}

impl GarageState {
    pub fn new(garage: Garage) -> Self {
        Self {
            garage,
            services: Vec::new(),
            bays: Vec::new(),
            reservations: HashMap::new(),
            by_bay_day: HashMap::new(),
        }
    }

    pub fn bay(&self, id: Ulid) -> Option<&RepairBay> {
        self.bays.iter().find(|b| b.id == id)
    }

    pub fn bay_by_number(&self, number: u32) -> Option<&RepairBay> {
        self.bays
            .binary_search_by_key(&number, |b| b.number)
            .ok()
            .map(|pos| &self.bays[pos])
    }

    /// Insert or replace a bay, keeping number order.
    pub fn upsert_bay(&mut self, bay: RepairBay) {
        self.remove_bay(bay.id);
        let pos = self
            .bays
            .binary_search_by_key(&bay.number, |b| b.number)
            .unwrap_or_else(|e| e);
        self.bays.insert(pos, bay);
    }

    pub fn remove_bay(&mut self, id: Ulid) -> Option<RepairBay> {
        let pos = self.bays.iter().position(|b| b.id == id)?;
        Some(self.bays.remove(pos))
    }

    pub fn service(&self, id: Ulid) -> Option<&ServiceOffering> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn service_by_type(&self, service_type: ServiceType) -> Option<&ServiceOffering> {
        self.services.iter().find(|s| s.service_type == service_type)
    }

    /// Catalog entries matching `types`, in catalog order. Types the garage
    /// does not offer are absent.
    pub fn find_services<'a>(&'a self, types: &'a [ServiceType]) -> impl Iterator<Item = &'a ServiceOffering> + 'a {
        self.services.iter().filter(move |s| types.contains(&s.service_type))
    }

    /// Insert or replace a reservation, keeping the (bay, day) index current.
    pub fn upsert_reservation(&mut self, reservation: Reservation) {
        self.unindex(reservation.id);
        self.by_bay_day
            .entry((reservation.bay_id, reservation.date))
            .or_default()
            .push(reservation.id);
        self.reservations.insert(reservation.id, reservation);
    }

    pub fn clear_reservations(&mut self) -> usize {
        let n = self.reservations.len();
        self.reservations.clear();
        self.by_bay_day.clear();
        n
    }

    fn unindex(&mut self, id: Ulid) {
        let Some(old) = self.reservations.get(&id) else { return };
        let key = (old.bay_id, old.date);
        if let Some(ids) = self.by_bay_day.get_mut(&key) {
            ids.retain(|r| *r != id);
            if ids.is_empty() {
                self.by_bay_day.remove(&key);
            }
        }
    }

    /// All reservations assigned to `bay_id` on `date`, any status.
    pub fn reservations_on(&self, bay_id: Ulid, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        self.by_bay_day
            .get(&(bay_id, date))
            .into_iter()
            .flatten()
            .filter_map(|id| self.reservations.get(id))
    }
}

// ── Event log ────────────────────────────────────────────────────

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    GarageCreated {
        garage: Garage,
    },
    GarageUpdated {
        garage: Garage,
    },
    GarageDeleted {
        id: Ulid,
    },
    ServiceAdded {
        service: ServiceOffering,
    },
    ServiceRemoved {
        id: Ulid,
        garage_id: Ulid,
    },
    ServicesPurged {
        garage_id: Ulid,
    },
    BaysCreated {
        garage_id: Ulid,
        bays: Vec<RepairBay>,
    },
    BayUpdated {
        bay: RepairBay,
    },
    BayDeleted {
        id: Ulid,
        garage_id: Ulid,
    },
    BaysPurged {
        garage_id: Ulid,
    },
    ReservationPlaced {
        reservation: Reservation,
    },
    ReservationRevised {
        reservation: Reservation,
    },
    /// Confirmation plus the pending siblings it displaced, applied as one unit.
    /// `revised` carries an edit made in the same operator update.
    ReservationConfirmed {
        id: Ulid,
        garage_id: Ulid,
        confirmed_by: Ulid,
        superseded: Vec<Ulid>,
        note: String,
        revised: Option<Reservation>,
    },
    ReservationStatusChanged {
        id: Ulid,
        garage_id: Ulid,
        status: ReservationStatus,
        updated_by: Option<Ulid>,
    },
    ReservationsPurged {
        garage_id: Ulid,
    },
}

impl Event {
    pub fn garage_id(&self) -> Ulid {
        match self {
            Event::GarageCreated { garage } | Event::GarageUpdated { garage } => garage.id,
            Event::GarageDeleted { id } => *id,
            Event::ServiceAdded { service } => service.garage_id,
            Event::BayUpdated { bay } => bay.garage_id,
            Event::ReservationPlaced { reservation } | Event::ReservationRevised { reservation } => {
                reservation.garage_id
            }
            Event::ServiceRemoved { garage_id, .. }
            | Event::ServicesPurged { garage_id }
            | Event::BaysCreated { garage_id, .. }
            | Event::BayDeleted { garage_id, .. }
            | Event::BaysPurged { garage_id }
            | Event::ReservationConfirmed { garage_id, .. }
            | Event::ReservationStatusChanged { garage_id, .. }
            | Event::ReservationsPurged { garage_id } => *garage_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaySummary {
    pub id: Ulid,
    pub number: u32,
    pub name: String,
}

/// A reservation with its garage and bay resolved for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationView {
    pub reservation: Reservation,
    pub garage_name: String,
    /// `None` once the bay has been deleted.
    pub bay: Option<BaySummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub user_id: Option<Ulid>,
    pub garage_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub garage_id: Ulid,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub services: Vec<ServiceType>,
    pub comment: Option<String>,
}

/// Partial edit of a reservation. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub start: Option<ClockTime>,
    pub end: Option<ClockTime>,
    pub services: Option<Vec<ServiceType>>,
    /// `Some(None)` clears the comment.
    pub comment: Option<Option<String>>,
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BayPatch {
    pub number: Option<u32>,
    pub name: Option<String>,
    pub open: Option<ClockTime>,
    pub close: Option<ClockTime>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GaragePatch {
    pub name: Option<String>,
    pub hours: Option<OpeningHours>,
}
