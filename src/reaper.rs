//! Background reclamation of expired send-rate records.

use crate::store::MailboxCache;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodically sweep the store until shutdown is requested.
///
/// `window` must be the same window the record path uses, or the two paths
/// disagree about which events are still live.
pub async fn run_reaper(
    store: Arc<MailboxCache>,
    window: Duration,
    interval: Duration,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Reaper stopped");
                return;
            }
            _ = tokio::time::sleep(interval) => {
                let removed = store.sweep(Utc::now(), window);
                if removed > 0 {
                    debug!("Swept {removed} idle mailboxes");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[tokio::test(start_paused = true)]
    async fn reaper_sweeps_until_cancelled() {
        let store = Arc::new(MailboxCache::new());
        // One stale record, well outside a 30 minute window.
        let hour_ago = Utc::now() - TimeDelta::hours(1);
        store.record_send("bob@example.com", "A1", hour_ago, 100, Duration::from_secs(1800));
        assert_eq!(store.len(), 1);

        let token = CancellationToken::new();
        let reaper = tokio::spawn(run_reaper(
            store.clone(),
            Duration::from_secs(1800),
            Duration::from_secs(60),
            token.clone(),
        ));

        // Paused time auto-advances past the first sleep.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.is_empty());

        token.cancel();
        reaper.await.unwrap();
    }
}
