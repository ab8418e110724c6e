use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::model::*;

// ── Daily window ──────────────────────────────────────────────────

pub const WINDOW_OPEN_HOUR: u32 = 10;
pub const WINDOW_CLOSE_HOUR: u32 = 22;

/// Where the slot cursor resumes after an existing reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotAlignment {
    /// At the reservation's end.
    #[default]
    FollowReservation,
    /// At the first 2-hour boundary, counted from the window open, at or after
    /// the reservation's end.
    Grid,
}

/// `[10:00, 22:00)` of `day`, read in `offset`.
pub fn day_window(day: NaiveDate, offset: FixedOffset) -> Option<Span> {
    let at = |hour| {
        day.and_hms_opt(hour, 0, 0)?
            .and_local_timezone(offset)
            .single()
            .map(|dt| dt.timestamp_millis())
    };
    Some(Span::new(at(WINDOW_OPEN_HOUR)?, at(WINDOW_CLOSE_HOUR)?))
}

/// `YYYY-MM-DD`, or the calendar day (in `offset`) of an RFC 3339 timestamp.
pub fn parse_day(input: &str, offset: FixedOffset) -> Option<NaiveDate> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok().or_else(|| {
        DateTime::parse_from_rfc3339(trimmed)
            .ok()
            .map(|dt| dt.with_timezone(&offset).date_naive())
    })
}

// ── Slot grid ─────────────────────────────────────────────────────

/// Bookable slots inside `window` that avoid every span in `booked`.
///
/// `booked` must be sorted by start. Gaps are filled with back-to-back slots
/// from the cursor; the cursor starts at the window open and only moves forward.
pub fn free_slots(window: &Span, booked: &[Span], alignment: SlotAlignment) -> Vec<Span> {
    let mut slots = Vec::new();
    let mut cursor = window.start;

    // Each reservation, then a sentinel at the window close.
    let boundaries = booked.iter().map(Some).chain(std::iter::once(None));
    for next in boundaries {
        let gap_end = next.map_or(window.end, |b| b.start.min(window.end));
        while cursor + SLOT_DURATION_MS <= gap_end {
            slots.push(Span::slot(cursor));
            cursor += SLOT_DURATION_MS;
        }
        if let Some(reserved) = next {
            cursor = cursor.max(reserved.end);
            if alignment == SlotAlignment::Grid {
                cursor = align_up(cursor, window.start);
            }
        }
    }

    slots
}

/// Round `t` up to the next multiple of the slot length past `origin`.
fn align_up(t: Ms, origin: Ms) -> Ms {
    let rem = (t - origin).rem_euclid(SLOT_DURATION_MS);
    if rem == 0 { t } else { t + SLOT_DURATION_MS - rem }
}
