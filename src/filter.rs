//! Callback contract for the mail-filter front end.
//!
//! The milter (or any other protocol front end) calls
//! [`MessageFilter::message_observed`] exactly once per outbound message,
//! once the envelope sender and queue id are known. The filter answers the
//! only question the front end has (should this message be held) and owns
//! the side effect of parking a just-blocked sender's queued mail.

use crate::{
    hold::HoldDispatcher,
    local::MailboxLookup,
    store::{MailboxCache, RecordOutcome},
};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tracing::warn;

/// Per-message decision point for outbound mail.
pub struct MessageFilter {
    store: Arc<MailboxCache>,
    lookup: Arc<dyn MailboxLookup>,
    hold: HoldDispatcher,
    limit: usize,
    window: Duration,
}

impl MessageFilter {
    pub fn new(
        store: Arc<MailboxCache>,
        lookup: Arc<dyn MailboxLookup>,
        hold: HoldDispatcher,
        limit: usize,
        window: Duration,
    ) -> Self {
        Self {
            store,
            lookup,
            hold,
            limit,
            window,
        }
    }

    /// Consume one outbound message at the point its headers are finalized.
    ///
    /// Returns whether the message should be held. Senders the membership
    /// lookup does not recognize are never tracked. When this message is the
    /// one that trips the sender's limit, the queued mail recorded for the
    /// sender is dispatched to the hold action, after the store lock has
    /// been released and without waiting for it.
    pub fn message_observed(&self, sender: &str, queue_id: &str) -> bool {
        self.message_observed_at(sender, queue_id, Utc::now())
    }

    /// Clock-explicit variant of [`Self::message_observed`].
    pub fn message_observed_at(
        &self,
        sender: &str,
        queue_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.lookup.is_local(sender) {
            return false;
        }

        match self
            .store
            .record_send(sender, queue_id, now, self.limit, self.window)
        {
            RecordOutcome::Allowed => false,
            RecordOutcome::AlreadyBlocked => true,
            RecordOutcome::NewlyBlocked(queue_ids) => {
                warn!(
                    "Mailbox {sender} exceeded {} sends per {}, holding {} queued messages",
                    self.limit,
                    humantime::format_duration(self.window),
                    queue_ids.len()
                );
                self.hold.dispatch(queue_ids);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hold::{HoldAction, HoldError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Membership double: a fixed set of local names.
    struct StaticLookup(Vec<&'static str>);

    impl MailboxLookup for StaticLookup {
        fn is_local(&self, name: &str) -> bool {
            self.0.contains(&name)
        }
    }

    /// Hold double that records every invocation.
    struct CountingHold {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl HoldAction for CountingHold {
        async fn hold(&self, queue_ids: &[String]) -> Result<(), HoldError> {
            self.calls.lock().unwrap().push(queue_ids.to_vec());
            Ok(())
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap()
    }

    fn filter_fixture(limit: usize) -> (MessageFilter, Arc<MailboxCache>, Arc<CountingHold>) {
        let store = Arc::new(MailboxCache::new());
        let counting = Arc::new(CountingHold {
            calls: Mutex::new(Vec::new()),
        });
        let filter = MessageFilter::new(
            store.clone(),
            Arc::new(StaticLookup(vec!["alice@example.com"])),
            HoldDispatcher::new(counting.clone()),
            limit,
            Duration::from_secs(600),
        );
        (filter, store, counting)
    }

    #[tokio::test]
    async fn foreign_senders_are_not_tracked() {
        let (filter, store, _) = filter_fixture(1);

        // Not local: always deliverable, and no record is ever created.
        assert!(!filter.message_observed_at("mallory@other.net", "A1", at(0)));
        assert!(!filter.message_observed_at("mallory@other.net", "B2", at(1)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn local_sender_is_held_at_the_limit() {
        let (filter, _, _) = filter_fixture(3);

        assert!(!filter.message_observed_at("alice@example.com", "A1", at(0)));
        assert!(!filter.message_observed_at("alice@example.com", "B2", at(2)));
        assert!(filter.message_observed_at("alice@example.com", "C3", at(5)));
        // Once blocked, every later message is held without a fresh record.
        assert!(filter.message_observed_at("alice@example.com", "D4", at(6)));
    }

    #[tokio::test]
    async fn hold_fires_once_with_the_tracked_queue_ids() {
        let (filter, _, counting) = filter_fixture(2);

        filter.message_observed_at("alice@example.com", "A1", at(0));
        filter.message_observed_at("alice@example.com", "B2", at(1));
        filter.message_observed_at("alice@example.com", "C3", at(2));

        // Let the dispatched task run.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let calls = counting.calls.lock().unwrap();
        assert_eq!(*calls, vec![vec!["A1".to_owned(), "B2".to_owned()]]);
    }
}
