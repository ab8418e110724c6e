use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{day_window, free_slots, parse_day};
use super::{Engine, EngineError};

impl Engine {
    /// The user's reservations, ordered by start. Unknown users have none.
    pub async fn list_reservations(&self, user_id: &UserId) -> Vec<Reservation> {
        let Some(calendar) = self.get_calendar(user_id) else {
            return Vec::new();
        };
        let guard = calendar.read().await;
        guard.reservations.clone()
    }

    /// A single reservation. Existence is checked before ownership.
    pub async fn get_reservation(
        &self,
        id: Ulid,
        requester: &UserId,
    ) -> Result<Reservation, EngineError> {
        let owner = self.owner_of(&id).ok_or(EngineError::NotFound(id))?;
        let calendar = self.get_calendar(&owner).ok_or(EngineError::NotFound(id))?;
        let guard = calendar.read().await;
        let reservation = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if reservation.user_id != *requester {
            return Err(EngineError::Forbidden(id));
        }
        Ok(reservation.clone())
    }

    /// Free 2-hour slots in the user's 10:00–22:00 window on `day`.
    ///
    /// An unparseable day yields no slots rather than an error.
    pub async fn available_slots(
        &self,
        user_id: &UserId,
        day: &str,
    ) -> Result<Vec<Span>, EngineError> {
        match parse_day(day, self.policy.utc_offset) {
            Some(date) => self.available_slots_on(user_id, date).await,
            None => {
                tracing::debug!("unparseable day {day:?}, returning no slots");
                Ok(Vec::new())
            }
        }
    }

    pub async fn available_slots_on(
        &self,
        user_id: &UserId,
        day: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let Some(window) = day_window(day, self.policy.utc_offset) else {
            return Ok(Vec::new());
        };
        let booked: Vec<Span> = match self.get_calendar(user_id) {
            Some(calendar) => {
                let guard = calendar.read().await;
                guard.overlapping(&window).map(|r| r.span).collect()
            }
            None => Vec::new(),
        };
        Ok(free_slots(&window, &booked, self.policy.alignment))
    }
}
