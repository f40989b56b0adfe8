/// Hard caps applied at the engine boundary. Exceeding one yields
/// `EngineError::LimitExceeded`, except where a business rule says otherwise.

pub const MAX_GARAGES: usize = 100_000;
pub const MAX_BAYS_PER_GARAGE: u32 = 10;
pub const MAX_SERVICES_PER_GARAGE: usize = 64;
pub const MAX_SERVICES_PER_RESERVATION: usize = 5;
pub const MAX_RESERVATIONS_PER_GARAGE: usize = 200_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_COMMENT_LEN: usize = 1_000;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Shortest bookable window, in minutes.
pub const MIN_RESERVATION_MINUTES: u16 = 30;

/// Owners can edit or cancel only while strictly more than this many days remain.
pub const MODIFY_NOTICE_DAYS: i64 = 2;
