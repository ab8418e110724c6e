use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::movies::{LookupError, MovieRecord};
use crate::observability::{
    MOVIE_LOOKUP_FAILURES_TOTAL, RESERVATIONS_CANCELLED_TOTAL, RESERVATIONS_CREATED_TOTAL,
    RESERVATIONS_REJECTED_TOTAL,
};

use super::conflict::{check_no_conflict, check_not_past, parse_start_time, validate_start};
use super::{CancellationPolicy, Engine, EngineError, WalCommand};

impl Engine {
    /// Book a 2-hour screening for `user_id`.
    ///
    /// The movie must verify against the catalog, the start must not be in the
    /// past, and the slot must not overlap any of the user's other reservations.
    /// Check and insert happen under the user's write lock, so concurrent
    /// requests from the same user cannot both pass the overlap check.
    pub async fn create_reservation(
        &self,
        user_id: &UserId,
        movie_id: MovieId,
        movie_title: &str,
        start_time: &str,
    ) -> Result<Reservation, EngineError> {
        let result = self
            .try_create_reservation(user_id, movie_id, movie_title, start_time)
            .await;
        match &result {
            Ok(r) => {
                metrics::counter!(RESERVATIONS_CREATED_TOTAL).increment(1);
                tracing::info!(
                    "reservation {} created for {} (movie {}, start {})",
                    r.id,
                    r.user_id,
                    r.movie_id,
                    r.span.start
                );
            }
            Err(e) => {
                metrics::counter!(RESERVATIONS_REJECTED_TOTAL, "reason" => e.kind()).increment(1);
                tracing::debug!("reservation for {user_id} rejected: {e}");
            }
        }
        result
    }

    async fn try_create_reservation(
        &self,
        user_id: &UserId,
        movie_id: MovieId,
        movie_title: &str,
        start_time: &str,
    ) -> Result<Reservation, EngineError> {
        if user_id.as_str().len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("user id too long"));
        }
        if movie_title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("movie title too long"));
        }

        // Outside the user lock: a slow catalog must not stall the user's other requests.
        self.verify_movie(movie_id).await?;

        let start = parse_start_time(start_time, self.policy.utc_offset)?;
        let now = self.clock.now_ms();
        check_not_past(start, now)?;
        validate_start(start)?;
        let span = Span::slot(start);

        let _gate = self.compaction_gate.read().await;
        let calendar = self.calendar_for(user_id);
        let mut guard = calendar.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_USER {
            return Err(EngineError::LimitExceeded("too many reservations for user"));
        }
        check_no_conflict(&guard, &span)?;

        let reservation = Reservation {
            id: Ulid::new(),
            user_id: user_id.clone(),
            movie_id,
            movie_title: movie_title.to_string(),
            span,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ReservationCreated {
            id: reservation.id,
            user_id: reservation.user_id.clone(),
            movie_id,
            movie_title: reservation.movie_title.clone(),
            span,
            created_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reservation)
    }

    /// Verify the movie within the lookup timeout. Every failure, including
    /// an unreachable catalog, reads as an invalid movie.
    async fn verify_movie(&self, movie_id: MovieId) -> Result<MovieRecord, EngineError> {
        let lookup = self.movies.get_movie(movie_id);
        let cause = match tokio::time::timeout(self.policy.lookup_timeout, lookup).await {
            Ok(Ok(movie)) => return Ok(movie),
            Ok(Err(LookupError::NotFound(_))) => "not_found",
            Ok(Err(e)) => {
                tracing::warn!("movie lookup for {movie_id} failed: {e}");
                match e {
                    LookupError::Decode(_) => "decode",
                    _ => "transport",
                }
            }
            Err(_) => {
                tracing::warn!(
                    "movie lookup for {movie_id} timed out after {:?}",
                    self.policy.lookup_timeout
                );
                "timeout"
            }
        };
        metrics::counter!(MOVIE_LOOKUP_FAILURES_TOTAL, "cause" => cause).increment(1);
        Err(EngineError::InvalidMovie(movie_id))
    }

    /// Cancel a reservation owned by `requester`. Returns the removed record.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        requester: &UserId,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (owner, mut guard) = self.resolve_reservation_write(&id).await?;
        // Cancelled between the owner lookup and taking the lock.
        let reservation = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        if owner != *requester {
            return Err(EngineError::Forbidden(id));
        }
        if self.policy.cancellation == CancellationPolicy::BeforeStart
            && reservation.span.start < self.clock.now_ms()
        {
            return Err(EngineError::AlreadyStarted(id));
        }

        let event = Event::ReservationCancelled {
            id,
            user_id: owner,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(RESERVATIONS_CANCELLED_TOTAL).increment(1);
        tracing::info!("reservation {id} cancelled by {requester}");
        Ok(reservation)
    }

    /// Rewrite the WAL with one creation event per live reservation.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive: no mutation is between its WAL append and its apply.
        let _gate = self.compaction_gate.write().await;

        let calendars: Vec<_> = self
            .state
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut events = Vec::new();
        let mut idle = Vec::new();
        for (user_id, calendar) in calendars {
            let guard = calendar.read().await;
            if guard.reservations.is_empty() {
                idle.push(user_id);
                continue;
            }
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                id: r.id,
                user_id: r.user_id.clone(),
                movie_id: r.movie_id,
                movie_title: r.movie_title.clone(),
                span: r.span,
                created_at: r.created_at,
            }));
        }

        // Writers only reach a calendar under the gate, so none holds an idle one now.
        for user_id in &idle {
            self.state.remove_if(user_id, |_, cal| {
                cal.try_read().is_ok_and(|c| c.reservations.is_empty())
            });
        }

        let live = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(
            "WAL compacted to {live} live reservations, {} idle calendars dropped",
            idle.len()
        );
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
