use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        metrics::gauge!(crate::observability::CALENDARS_ACTIVE).set(engine.state.len() as f64);
        if compact_if_due(&engine, threshold).await {
            info!("compacted WAL after reaching {threshold} appends");
        }
    }
}

/// Compact when at least `threshold` appends landed since the last compaction.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}
