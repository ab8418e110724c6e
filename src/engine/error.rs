use ulid::Ulid;

use crate::model::{Ms, MovieId};

#[derive(Debug)]
pub enum EngineError {
    /// The movie failed verification, or the lookup itself failed or timed out.
    InvalidMovie(MovieId),
    InvalidTime(String),
    PastBooking { start: Ms, now: Ms },
    /// Carries the id of the caller's own reservation that is in the way.
    SlotConflict(Ulid),
    NotFound(Ulid),
    Forbidden(Ulid),
    AlreadyStarted(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidMovie(id) => write!(f, "movie {id} does not exist"),
            EngineError::InvalidTime(input) => write!(f, "invalid start time: {input:?}"),
            EngineError::PastBooking { start, now } => {
                write!(f, "cannot book in the past: start {start} is before now {now}")
            }
            EngineError::SlotConflict(id) => {
                write!(f, "slot overlaps your reservation {id}")
            }
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::Forbidden(id) => write!(f, "access denied to reservation {id}"),
            EngineError::AlreadyStarted(id) => {
                write!(f, "reservation {id} has already started")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidMovie(_) => "invalid_movie",
            EngineError::InvalidTime(_) => "invalid_time",
            EngineError::PastBooking { .. } => "past_booking",
            EngineError::SlotConflict(_) => "slot_conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::AlreadyStarted(_) => "already_started",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}
