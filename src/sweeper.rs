use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that periodically cancels past-due pending/approved
/// appointments. The due check re-runs inside the engine under each
/// record's write lock, so overlapping passes are harmless.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let now = chrono::Local::now().naive_local();
        let cancelled = engine.sweep_past_due(now).await;
        if cancelled > 0 {
            info!("swept {cancelled} past-due appointments");
        }
    }
}
