use super::*;
use crate::clock::FixedClock;
use crate::limits::*;
use crate::movies::{LookupError, MovieRecord, StaticCatalog};

use async_trait::async_trait;
use chrono::NaiveDate;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms

// 2025-04-01T00:00:00Z
const APR_1: Ms = 1_743_465_600_000;
// 2025-04-15T00:00:00Z
const APR_15: Ms = 1_744_675_200_000;

const TITANIC: MovieId = 597;
const ALIEN: MovieId = 348;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("matinee_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn catalog() -> Arc<dyn MovieLookup> {
    Arc::new(StaticCatalog::new([(TITANIC, "Titanic"), (ALIEN, "Alien")]))
}

fn engine_at(name: &str, now: Ms) -> (Engine, Arc<FixedClock>) {
    engine_with(name, now, catalog(), BookingPolicy::default())
}

fn engine_with(
    name: &str,
    now: Ms,
    movies: Arc<dyn MovieLookup>,
    policy: BookingPolicy,
) -> (Engine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(now));
    let engine = Engine::new(test_wal_path(name), movies, clock.clone(), policy).unwrap();
    (engine, clock)
}

fn apr15() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 4, 15).unwrap()
}

/// Never answers within any reasonable timeout.
struct StalledLookup;

#[async_trait]
impl MovieLookup for StalledLookup {
    async fn get_movie(&self, _id: MovieId) -> Result<MovieRecord, LookupError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(LookupError::Transport("unreachable".into()))
    }
}

/// Catalog outage.
struct BrokenLookup;

#[async_trait]
impl MovieLookup for BrokenLookup {
    async fn get_movie(&self, _id: MovieId) -> Result<MovieRecord, LookupError> {
        Err(LookupError::Transport("connection refused".into()))
    }
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn empty_calendar_has_six_slots() {
    let (engine, _) = engine_at("six_slots.wal", APR_1);
    let u = UserId::from("u");

    let slots = engine.available_slots(&u, "2025-04-15").await.unwrap();
    assert_eq!(slots.len(), 6);
    assert_eq!(slots[0], Span::new(APR_15 + 10 * H, APR_15 + 12 * H));
    assert_eq!(slots[5], Span::new(APR_15 + 20 * H, APR_15 + 22 * H));
}

#[tokio::test]
async fn invalid_day_yields_no_slots() {
    let (engine, _) = engine_at("invalid_day.wal", APR_1);
    let u = UserId::from("u");
    assert!(engine.available_slots(&u, "someday").await.unwrap().is_empty());
    assert!(engine.available_slots(&u, "").await.unwrap().is_empty());
    assert!(engine.available_slots(&u, "2025-02-30").await.unwrap().is_empty());
}

#[tokio::test]
async fn booked_slot_is_not_offered() {
    let (engine, _) = engine_at("booked_not_offered.wal", APR_1);
    let u = UserId::from("u");
    engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();

    let slots = engine.available_slots_on(&u, apr15()).await.unwrap();
    let starts: Vec<Ms> = slots.iter().map(|s| (s.start - APR_15) / H).collect();
    assert_eq!(starts, vec![10, 12, 16, 18, 20]);
}

#[tokio::test]
async fn unaligned_booking_never_overlaps_offered_slot() {
    let (engine, _) = engine_at("unaligned_booking.wal", APR_1);
    let u = UserId::from("u");
    let r = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T13:00:00Z")
        .await
        .unwrap();

    let slots = engine.available_slots_on(&u, apr15()).await.unwrap();
    assert!(slots.iter().all(|s| !s.overlaps(&r.span)));
    let starts: Vec<Ms> = slots.iter().map(|s| (s.start - APR_15) / H).collect();
    assert_eq!(starts, vec![10, 15, 17, 19]);
}

#[tokio::test]
async fn grid_alignment_keeps_two_hour_boundaries() {
    let policy = BookingPolicy {
        alignment: SlotAlignment::Grid,
        ..BookingPolicy::default()
    };
    let (engine, _) = engine_with("grid_alignment.wal", APR_1, catalog(), policy);
    let u = UserId::from("u");
    engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T13:00:00Z")
        .await
        .unwrap();

    let slots = engine.available_slots_on(&u, apr15()).await.unwrap();
    let starts: Vec<Ms> = slots.iter().map(|s| (s.start - APR_15) / H).collect();
    assert_eq!(starts, vec![10, 16, 18, 20]);
}

#[tokio::test]
async fn previous_evening_booking_does_not_block_window() {
    let (engine, _) = engine_at("prev_evening.wal", APR_1);
    let u = UserId::from("u");
    // 2025-04-14 21:00 → 23:00, entirely before the 15th's window
    engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-14T21:00:00Z")
        .await
        .unwrap();
    assert_eq!(engine.available_slots_on(&u, apr15()).await.unwrap().len(), 6);
}

#[tokio::test]
async fn availability_is_per_user() {
    let (engine, _) = engine_at("per_user_slots.wal", APR_1);
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");
    engine
        .create_reservation(&alice, TITANIC, "Titanic", "2025-04-15T10:00:00Z")
        .await
        .unwrap();
    assert_eq!(engine.available_slots_on(&alice, apr15()).await.unwrap().len(), 5);
    assert_eq!(engine.available_slots_on(&bob, apr15()).await.unwrap().len(), 6);
}

#[tokio::test]
async fn day_follows_configured_offset() {
    let policy = BookingPolicy {
        utc_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
        ..BookingPolicy::default()
    };
    let (engine, _) = engine_with("offset_day.wal", APR_1, catalog(), policy);
    let u = UserId::from("u");
    let slots = engine.available_slots(&u, "2025-04-15").await.unwrap();
    // 10:00 at +02:00 is 08:00Z
    assert_eq!(slots[0].start, APR_15 + 8 * H);
}

// ── CreateReservation ────────────────────────────────────

#[tokio::test]
async fn create_then_overlap_conflicts() {
    let (engine, _) = engine_at("create_conflict.wal", APR_1);
    let u = UserId::from("u");

    let first = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();
    assert_eq!(first.span.start, APR_15 + 14 * H);
    assert_eq!(first.span.end, APR_15 + 16 * H);
    assert_eq!(first.user_id, u);
    assert_eq!(first.created_at, APR_1);
    assert_eq!(first.updated_at, APR_1);

    let second = engine
        .create_reservation(&u, ALIEN, "Alien", "2025-04-15T15:00:00Z")
        .await;
    assert!(matches!(second, Err(EngineError::SlotConflict(id)) if id == first.id));
    assert_eq!(engine.list_reservations(&u).await.len(), 1);
}

#[tokio::test]
async fn back_to_back_is_not_a_conflict() {
    let (engine, _) = engine_at("back_to_back.wal", APR_1);
    let u = UserId::from("u");
    engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();
    engine
        .create_reservation(&u, ALIEN, "Alien", "2025-04-15T16:00:00Z")
        .await
        .unwrap();
    engine
        .create_reservation(&u, ALIEN, "Alien", "2025-04-15T12:00:00Z")
        .await
        .unwrap();
    assert_eq!(engine.list_reservations(&u).await.len(), 3);
}

#[tokio::test]
async fn other_users_do_not_conflict() {
    let (engine, _) = engine_at("other_users.wal", APR_1);
    for name in ["alice", "bob", "carol"] {
        engine
            .create_reservation(&UserId::from(name), TITANIC, "Titanic", "2025-04-15T14:00:00Z")
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn past_booking_rejected_and_not_persisted() {
    let (engine, _) = engine_at("past_booking.wal", APR_1);
    let u = UserId::from("u");

    let result = engine
        .create_reservation(&u, TITANIC, "Titanic", "2023-04-01T14:00:00Z")
        .await;
    assert!(matches!(result, Err(EngineError::PastBooking { now, .. }) if now == APR_1));
    assert!(engine.list_reservations(&u).await.is_empty());
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn start_exactly_now_is_allowed() {
    let (engine, _) = engine_at("start_now.wal", APR_15 + 10 * H);
    let u = UserId::from("u");
    engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T10:00:00Z")
        .await
        .unwrap();
}

#[tokio::test]
async fn past_check_uses_injected_clock() {
    let (engine, clock) = engine_at("injected_clock.wal", APR_1);
    let u = UserId::from("u");
    clock.set(APR_15 + 15 * H);

    assert!(matches!(
        engine
            .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
            .await,
        Err(EngineError::PastBooking { .. })
    ));
    engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T16:00:00Z")
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_movie_rejected_and_not_persisted() {
    let (engine, _) = engine_at("unknown_movie.wal", APR_1);
    let u = UserId::from("u");

    let result = engine
        .create_reservation(&u, 999_999, "Nope", "2025-04-15T14:00:00Z")
        .await;
    assert!(matches!(result, Err(EngineError::InvalidMovie(999_999))));
    assert!(engine.list_reservations(&u).await.is_empty());
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn movie_checked_before_time() {
    let (engine, _) = engine_at("movie_first.wal", APR_1);
    let u = UserId::from("u");
    let result = engine.create_reservation(&u, 999_999, "Nope", "garbage").await;
    assert!(matches!(result, Err(EngineError::InvalidMovie(_))));
}

#[tokio::test]
async fn lookup_outage_is_invalid_movie() {
    let (engine, _) = engine_with(
        "lookup_outage.wal",
        APR_1,
        Arc::new(BrokenLookup),
        BookingPolicy::default(),
    );
    let u = UserId::from("u");
    let result = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await;
    assert!(matches!(result, Err(EngineError::InvalidMovie(TITANIC))));
    assert!(engine.list_reservations(&u).await.is_empty());
}

#[tokio::test]
async fn lookup_timeout_fails_closed() {
    let policy = BookingPolicy {
        lookup_timeout: std::time::Duration::from_millis(50),
        ..BookingPolicy::default()
    };
    let (engine, _) = engine_with("lookup_timeout.wal", APR_1, Arc::new(StalledLookup), policy);
    let u = UserId::from("u");

    let started = std::time::Instant::now();
    let result = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await;
    assert!(matches!(result, Err(EngineError::InvalidMovie(TITANIC))));
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert!(engine.list_reservations(&u).await.is_empty());
}

#[tokio::test]
async fn stalled_lookup_does_not_block_reads() {
    let policy = BookingPolicy {
        lookup_timeout: std::time::Duration::from_millis(200),
        ..BookingPolicy::default()
    };
    let (engine, _) = engine_with("stalled_reads.wal", APR_1, Arc::new(StalledLookup), policy);
    let engine = Arc::new(engine);
    let u = UserId::from("u");

    let writer = {
        let engine = engine.clone();
        let u = u.clone();
        tokio::spawn(async move {
            engine
                .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    // Calendar lock is not held while the lookup is pending.
    let read = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        engine.available_slots_on(&u, apr15()),
    )
    .await;
    assert!(read.is_ok());
    assert!(writer.await.unwrap().is_err());
}

#[tokio::test]
async fn unparsable_time_rejected() {
    let (engine, _) = engine_at("bad_time.wal", APR_1);
    let u = UserId::from("u");
    for input in ["tomorrow at noon", "", "2025-04-15"] {
        let result = engine.create_reservation(&u, TITANIC, "Titanic", input).await;
        assert!(
            matches!(result, Err(EngineError::InvalidTime(_))),
            "{input:?} should be InvalidTime"
        );
    }
}

#[tokio::test]
async fn naive_and_millis_start_times() {
    let (engine, _) = engine_at("time_formats.wal", APR_1);
    let u = UserId::from("u");
    let a = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15 10:00:00")
        .await
        .unwrap();
    assert_eq!(a.span.start, APR_15 + 10 * H);
    let b = engine
        .create_reservation(&u, TITANIC, "Titanic", &(APR_15 + 12 * H).to_string())
        .await
        .unwrap();
    assert_eq!(b.span.start, APR_15 + 12 * H);
}

#[tokio::test]
async fn title_length_limit() {
    let (engine, _) = engine_at("title_limit.wal", APR_1);
    let u = UserId::from("u");
    let long = "x".repeat(MAX_TITLE_LEN + 1);
    assert!(matches!(
        engine
            .create_reservation(&u, TITANIC, &long, "2025-04-15T14:00:00Z")
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn derived_end_and_no_overlap_after_many_creates() {
    let (engine, _) = engine_at("many_creates.wal", APR_1);
    let u = UserId::from("u");

    // Every 30 minutes across two days; most attempts collide.
    let mut accepted = 0;
    for i in 0..96 {
        let start = APR_15 + i * 30 * M;
        match engine
            .create_reservation(&u, TITANIC, "Titanic", &start.to_string())
            .await
        {
            Ok(_) => accepted += 1,
            Err(EngineError::SlotConflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(accepted, 24);

    let list = engine.list_reservations(&u).await;
    for r in &list {
        assert_eq!(r.span.end, r.span.start + SLOT_DURATION_MS);
    }
    for (i, a) in list.iter().enumerate() {
        for b in &list[i + 1..] {
            assert!(!a.span.overlaps(&b.span), "{a:?} overlaps {b:?}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_creates_admit_exactly_one() {
    let (engine, _) = engine_at("concurrent_creates.wal", APR_1);
    let engine = Arc::new(engine);
    let u = UserId::from("u");

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        let u = u.clone();
        // All within 14:00–15:15, pairwise overlapping.
        let start = APR_15 + 14 * H + i * 5 * M;
        handles.push(tokio::spawn(async move {
            engine
                .create_reservation(&u, TITANIC, "Titanic", &start.to_string())
                .await
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::SlotConflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.list_reservations(&u).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_users_all_succeed() {
    let (engine, _) = engine_at("concurrent_users.wal", APR_1);
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let u = UserId::new(format!("user-{i}"));
            engine
                .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.state.len(), 32);
}

// ── ListByUser / GetOne ──────────────────────────────────

#[tokio::test]
async fn list_is_sorted_and_repeatable() {
    let (engine, _) = engine_at("list_sorted.wal", APR_1);
    let u = UserId::from("u");
    for hour in [18, 10, 14] {
        let start = APR_15 + hour * H;
        engine
            .create_reservation(&u, TITANIC, "Titanic", &start.to_string())
            .await
            .unwrap();
    }

    let first = engine.list_reservations(&u).await;
    let starts: Vec<Ms> = first.iter().map(|r| (r.span.start - APR_15) / H).collect();
    assert_eq!(starts, vec![10, 14, 18]);
    assert_eq!(engine.list_reservations(&u).await, first);
    assert!(engine.list_reservations(&UserId::from("nobody")).await.is_empty());
}

#[tokio::test]
async fn ownership_gate() {
    let (engine, _) = engine_at("ownership.wal", APR_1);
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");
    let r = engine
        .create_reservation(&alice, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();
    let missing = Ulid::new();

    // Order of probing doesn't change the outcome.
    assert!(matches!(engine.get_reservation(missing, &bob).await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.get_reservation(r.id, &bob).await, Err(EngineError::Forbidden(_))));
    assert!(matches!(engine.get_reservation(missing, &alice).await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.get_reservation(r.id, &bob).await, Err(EngineError::Forbidden(_))));
    assert_eq!(engine.get_reservation(r.id, &alice).await.unwrap(), r);
}

// ── Cancel ───────────────────────────────────────────────

#[tokio::test]
async fn cancel_then_get_is_not_found() {
    let (engine, _) = engine_at("cancel.wal", APR_1);
    let u = UserId::from("u");
    let r = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();

    let removed = engine.cancel_reservation(r.id, &u).await.unwrap();
    assert_eq!(removed, r);
    assert!(matches!(engine.get_reservation(r.id, &u).await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.cancel_reservation(r.id, &u).await, Err(EngineError::NotFound(_))));
    assert!(engine.list_reservations(&u).await.is_empty());

    // The slot is bookable again.
    engine
        .create_reservation(&u, ALIEN, "Alien", "2025-04-15T15:00:00Z")
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_foreign_reservation_forbidden() {
    let (engine, _) = engine_at("cancel_foreign.wal", APR_1);
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");
    let r = engine
        .create_reservation(&alice, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();

    assert!(matches!(engine.cancel_reservation(r.id, &bob).await, Err(EngineError::Forbidden(_))));
    assert_eq!(engine.list_reservations(&alice).await, vec![r]);
    assert!(matches!(
        engine.cancel_reservation(Ulid::new(), &bob).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn started_reservation_cancellable_by_default() {
    let (engine, clock) = engine_at("cancel_started_default.wal", APR_1);
    let u = UserId::from("u");
    let r = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();
    clock.set(APR_15 + 15 * H);
    engine.cancel_reservation(r.id, &u).await.unwrap();
}

#[tokio::test]
async fn before_start_policy_rejects_started() {
    let policy = BookingPolicy {
        cancellation: CancellationPolicy::BeforeStart,
        ..BookingPolicy::default()
    };
    let (engine, clock) = engine_with("cancel_before_start.wal", APR_1, catalog(), policy);
    let u = UserId::from("u");
    let early = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();
    let late = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T18:00:00Z")
        .await
        .unwrap();

    clock.set(APR_15 + 14 * H + 30 * M);
    assert!(matches!(
        engine.cancel_reservation(early.id, &u).await,
        Err(EngineError::AlreadyStarted(_))
    ));
    engine.cancel_reservation(late.id, &u).await.unwrap();
    assert_eq!(engine.list_reservations(&u).await, vec![early]);
}

#[tokio::test]
async fn before_start_policy_allows_cancel_at_start_instant() {
    let policy = BookingPolicy {
        cancellation: CancellationPolicy::BeforeStart,
        ..BookingPolicy::default()
    };
    let (engine, clock) = engine_with("cancel_at_start.wal", APR_1, catalog(), policy);
    let u = UserId::from("u");
    let r = engine
        .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();

    clock.set(r.span.start);
    engine.cancel_reservation(r.id, &u).await.unwrap();
    assert!(engine.list_reservations(&u).await.is_empty());
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_reservations() {
    let path = test_wal_path("replay.wal");
    let clock = Arc::new(FixedClock::new(APR_1));
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");

    let (kept, cancelled) = {
        let engine =
            Engine::new(path.clone(), catalog(), clock.clone(), BookingPolicy::default()).unwrap();
        let kept = engine
            .create_reservation(&alice, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
            .await
            .unwrap();
        let cancelled = engine
            .create_reservation(&bob, ALIEN, "Alien", "2025-04-15T10:00:00Z")
            .await
            .unwrap();
        engine.cancel_reservation(cancelled.id, &bob).await.unwrap();
        (kept, cancelled)
    };

    let engine = Engine::new(path, catalog(), clock, BookingPolicy::default()).unwrap();
    assert_eq!(engine.list_reservations(&alice).await, vec![kept.clone()]);
    assert!(engine.list_reservations(&bob).await.is_empty());
    assert_eq!(engine.get_reservation(kept.id, &alice).await.unwrap(), kept);
    assert!(matches!(
        engine.get_reservation(cancelled.id, &bob).await,
        Err(EngineError::NotFound(_))
    ));
    // Conflicts still detected against replayed state.
    assert!(matches!(
        engine
            .create_reservation(&alice, ALIEN, "Alien", "2025-04-15T15:00:00Z")
            .await,
        Err(EngineError::SlotConflict(_))
    ));
}

#[tokio::test]
async fn compaction_keeps_live_reservations() {
    let path = test_wal_path("compaction.wal");
    let clock = Arc::new(FixedClock::new(APR_1));
    let u = UserId::from("u");

    let live = {
        let engine =
            Engine::new(path.clone(), catalog(), clock.clone(), BookingPolicy::default()).unwrap();
        for _ in 0..10 {
            let r = engine
                .create_reservation(&u, TITANIC, "Titanic", "2025-04-15T20:00:00Z")
                .await
                .unwrap();
            engine.cancel_reservation(r.id, &u).await.unwrap();
        }
        let live = engine
            .create_reservation(&u, ALIEN, "Alien", "2025-04-15T12:00:00Z")
            .await
            .unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 21);

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before);
        live
    };

    let engine = Engine::new(path, catalog(), clock, BookingPolicy::default()).unwrap();
    assert_eq!(engine.list_reservations(&u).await, vec![live]);
}

#[tokio::test]
async fn compaction_drops_idle_calendars() {
    let (engine, _clock) = engine_at("compaction_idle.wal", APR_1);
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");

    let gone = engine
        .create_reservation(&alice, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();
    engine.cancel_reservation(gone.id, &alice).await.unwrap();
    let kept = engine
        .create_reservation(&bob, ALIEN, "Alien", "2025-04-15T14:00:00Z")
        .await
        .unwrap();
    assert_eq!(engine.state.len(), 2);
    assert!(engine.list_reservations(&alice).await.is_empty());

    engine.compact_wal().await.unwrap();
    assert!(engine.get_calendar(&alice).is_none());
    assert_eq!(engine.state.len(), 1);
    assert_eq!(engine.list_reservations(&bob).await, vec![kept]);

    // The user can book again after their calendar was dropped.
    engine
        .create_reservation(&alice, TITANIC, "Titanic", "2025-04-15T14:00:00Z")
        .await
        .unwrap();
    assert_eq!(engine.list_reservations(&alice).await.len(), 1);
}
