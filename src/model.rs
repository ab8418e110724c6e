use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Catalog identifier of a movie (TMDB numbering).
pub type MovieId = i64;

pub const HOUR_MS: Ms = 3_600_000;

/// Every reservation occupies exactly one slot of this length.
pub const SLOT_DURATION_MS: Ms = 2 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// The slot beginning at `start`.
    pub fn slot(start: Ms) -> Self {
        Self::new(start, start + SLOT_DURATION_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Login name of the user owning a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A booked screening. `span.end` is always `span.start + SLOT_DURATION_MS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub movie_title: String,
    pub span: Span,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// One user's reservations, kept sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct UserCalendar {
    pub user_id: UserId,
    pub reservations: Vec<Reservation>,
}

impl UserCalendar {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations whose span overlaps the query window, in start order.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        id: Ulid,
        user_id: UserId,
        movie_id: MovieId,
        movie_title: String,
        span: Span,
        created_at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        user_id: UserId,
    },
}

impl Event {
    pub fn user_id(&self) -> &UserId {
        match self {
            Event::ReservationCreated { user_id, .. }
            | Event::ReservationCancelled { user_id, .. } => user_id,
        }
    }
}
