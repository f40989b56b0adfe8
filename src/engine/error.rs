use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{ModelError, ReservationStatus, ServiceType, TimeWindow};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("cannot change reservation status from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("bay number {number} already exists in garage {garage_id}")]
    BayNumberTaken { garage_id: Ulid, number: u32 },
    #[error("service {service_type} already exists in garage {garage_id}")]
    ServiceExists {
        garage_id: Ulid,
        service_type: ServiceType,
    },
    #[error("bay is already confirmed for reservation {0} in this time window")]
    ConfirmationConflict(Ulid),
    #[error("no repair bay available on {date} for {window}")]
    NoAvailability { date: NaiveDate, window: TimeWindow },
    #[error("invalid service: {0}")]
    InvalidService(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub(crate) fn bad_request(msg: impl Into<String>) -> Self {
        EngineError::BadRequest(msg.into())
    }
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Status(s) => EngineError::InvalidStatus(s),
            ModelError::ServiceType(s) => EngineError::InvalidService(format!("unknown service type {s}")),
            other => EngineError::BadRequest(other.to_string()),
        }
    }
}
