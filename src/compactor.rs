use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that compacts the log once enough transactions pile up
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    // `interval` panics on a zero period.
    let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            info!("log compaction finished");
        }
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let pending = engine.wal_frames_since_compact().await;
    if pending < threshold.max(1) {
        debug!(pending, threshold, "compaction not due");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("compaction failed, will retry: {e}");
            false
        }
    }
}
