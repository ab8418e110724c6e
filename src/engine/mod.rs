mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{SlotAlignment, day_window, free_slots, parse_day};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::movies::MovieLookup;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<UserCalendar>>;

/// Whether a reservation may be cancelled once its screening has begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancellationPolicy {
    #[default]
    Anytime,
    /// Reject cancellation once `start` is in the past.
    BeforeStart,
}

#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// Upper bound on a single movie lookup. Expiry rejects the booking.
    pub lookup_timeout: Duration,
    /// Offset in which calendar days and zone-less start times are read.
    pub utc_offset: FixedOffset,
    pub cancellation: CancellationPolicy,
    pub alignment: SlotAlignment,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(5),
            utc_offset: Utc.fix(),
            cancellation: CancellationPolicy::default(),
            alignment: SlotAlignment::default(),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends into the same batch.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Reservation engine: one lock-guarded calendar per user.
pub struct Engine {
    pub state: DashMap<UserId, SharedCalendar>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → owning user.
    pub(super) owners: DashMap<Ulid, UserId>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes matches everything already in the log.
    pub(super) compaction_gate: RwLock<()>,
    pub(super) movies: Arc<dyn MovieLookup>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) policy: BookingPolicy,
}

/// Apply an event to its calendar. Caller holds the calendar's write lock.
fn apply_to_calendar(cal: &mut UserCalendar, event: &Event, owners: &DashMap<Ulid, UserId>) {
    match event {
        Event::ReservationCreated {
            id,
            user_id,
            movie_id,
            movie_title,
            span,
            created_at,
        } => {
            cal.insert_reservation(Reservation {
                id: *id,
                user_id: user_id.clone(),
                movie_id: *movie_id,
                movie_title: movie_title.clone(),
                span: *span,
                created_at: *created_at,
                updated_at: *created_at,
            });
            owners.insert(*id, user_id.clone());
        }
        Event::ReservationCancelled { id, .. } => {
            cal.remove_reservation(*id);
            owners.remove(id);
        }
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        movies: Arc<dyn MovieLookup>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            owners: DashMap::new(),
            compaction_gate: RwLock::new(()),
            movies,
            clock,
            policy,
        };

        // Nobody else holds these Arcs yet, so try_write never contends. Never
        // blocking_write here: this may run inside an async context.
        for event in &events {
            let calendar = engine.calendar_for(event.user_id());
            let Ok(mut guard) = calendar.try_write() else {
                return Err(io::Error::other("calendar locked during replay"));
            };
            apply_to_calendar(&mut guard, event, &engine.owners);
        }
        tracing::info!(
            "replayed {} events into {} calendars from {}",
            events.len(),
            engine.state.len(),
            wal_path.display()
        );

        Ok(engine)
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Write an event through the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_calendar(&self, user_id: &UserId) -> Option<SharedCalendar> {
        self.state.get(user_id).map(|e| e.value().clone())
    }

    /// Get or lazily create the user's calendar.
    pub(super) fn calendar_for(&self, user_id: &UserId) -> SharedCalendar {
        self.state
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(UserCalendar::new(user_id.clone()))))
            .value()
            .clone()
    }

    pub fn owner_of(&self, reservation_id: &Ulid) -> Option<UserId> {
        self.owners.get(reservation_id).map(|e| e.value().clone())
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        cal: &mut UserCalendar,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_calendar(cal, event, &self.owners);
        Ok(())
    }

    /// Lookup reservation → owner, then acquire the owner's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<(UserId, tokio::sync::OwnedRwLockWriteGuard<UserCalendar>), EngineError> {
        let owner = self.owner_of(id).ok_or(EngineError::NotFound(*id))?;
        let calendar = self
            .get_calendar(&owner)
            .ok_or(EngineError::NotFound(*id))?;
        let guard = calendar.write_owned().await;
        Ok((owner, guard))
    }
}
