use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "matinee_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "matinee_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservations admitted.
pub const RESERVATIONS_CREATED_TOTAL: &str = "matinee_reservations_created_total";

/// Counter: reservation attempts refused. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "matinee_reservations_rejected_total";

/// Counter: reservations cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "matinee_reservations_cancelled_total";

/// Counter: movie lookups that did not verify. Labels: cause.
pub const MOVIE_LOOKUP_FAILURES_TOTAL: &str = "matinee_movie_lookup_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "matinee_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "matinee_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "matinee_connections_rejected_total";

/// Gauge: users with a loaded calendar.
pub const CALENDARS_ACTIVE: &str = "matinee_calendars_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "matinee_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "matinee_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "matinee_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SelectReservations { id: None } => "list_reservations",
        Command::SelectReservations { id: Some(_) } => "get_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectAvailableSlots { .. } => "select_available_slots",
    }
}
