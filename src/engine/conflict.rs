use chrono::{DateTime, FixedOffset, NaiveDateTime};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse a caller-supplied start time.
///
/// Accepts RFC 3339, a zone-less date-time read in `offset`, or raw Unix
/// milliseconds.
pub(crate) fn parse_start_time(input: &str, offset: FixedOffset) -> Result<Ms, EngineError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_TIME_INPUT_LEN {
        return Err(EngineError::InvalidTime(input.to_string()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return naive
                .and_local_timezone(offset)
                .single()
                .map(|dt| dt.timestamp_millis())
                .ok_or_else(|| EngineError::InvalidTime(input.to_string()));
        }
    }
    trimmed
        .parse::<Ms>()
        .map_err(|_| EngineError::InvalidTime(input.to_string()))
}

pub(crate) fn check_not_past(start: Ms, now: Ms) -> Result<(), EngineError> {
    if start < now {
        return Err(EngineError::PastBooking { start, now });
    }
    Ok(())
}

pub(crate) fn validate_start(start: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS - SLOT_DURATION_MS).contains(&start) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Fails with the first of the user's reservations that overlaps `span`.
pub(crate) fn check_no_conflict(calendar: &UserCalendar, span: &Span) -> Result<(), EngineError> {
    match calendar.overlapping(span).next() {
        Some(existing) => Err(EngineError::SlotConflict(existing.id)),
        None => Ok(()),
    }
}
