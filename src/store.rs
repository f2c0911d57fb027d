//! Concurrency-safe cache of per-mailbox send-rate state.
//!
//! One mutex covers every read and write of the map and the records inside
//! it, so operations on the same mailbox are linearized and a sweep is
//! atomic with respect to concurrent checks. Nothing blocks or performs I/O
//! while the lock is held; callers supply `now`, the store never reads the
//! clock.

use crate::mailbox::{Mailbox, SendEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Mutex, time::Duration};

/// Outcome of recording one outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Below the limit; the message may be delivered.
    Allowed,
    /// The mailbox was blocked before this message arrived; its history is
    /// frozen and was not touched.
    AlreadyBlocked,
    /// This message tripped the limit. Carries the queue ids of every send
    /// tracked for the mailbox, for the caller to place on hold after the
    /// store lock is released.
    NewlyBlocked(Vec<String>),
}

impl RecordOutcome {
    /// Whether the message should be held back from delivery.
    pub fn is_blocked(&self) -> bool {
        !matches!(self, RecordOutcome::Allowed)
    }
}

/// Per-mailbox entry in the status report.
#[derive(Clone, Debug, Serialize)]
pub struct MailboxSummary {
    pub name: String,
    pub blocked: bool,
    pub count: usize,
}

/// Status report: approximate cache footprint in bytes plus per-mailbox
/// summaries, sorted by name so unchanged state serializes byte-identically.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub cache: u64,
    pub mailboxes: Vec<MailboxSummary>,
}

/// In-memory map of mailbox name to send-rate state.
#[derive(Debug, Default)]
pub struct MailboxCache {
    inner: Mutex<HashMap<String, Mailbox>>,
}

impl MailboxCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outbound message and decide whether the mailbox may send.
    ///
    /// A blocked mailbox short-circuits without touching its history. An
    /// unblocked mailbox has expired events dropped, the new event appended,
    /// and trips the block when the log holds `limit` events inside the
    /// window. The event just recorded counts, so with limit N the Nth
    /// message in the window is the one that gets blocked.
    pub fn record_send(
        &self,
        name: &str,
        queue_id: &str,
        now: DateTime<Utc>,
        limit: usize,
        window: Duration,
    ) -> RecordOutcome {
        let mut map = self.inner.lock().unwrap();
        let mailbox = map
            .entry(name.to_owned())
            .or_insert_with(|| Mailbox::new(name));

        if mailbox.blocked {
            return RecordOutcome::AlreadyBlocked;
        }

        mailbox.discard_expired(now, window);
        mailbox.sent_log.push(SendEvent {
            sent_at: now,
            queue_id: queue_id.to_owned(),
        });

        if mailbox.sent_log.len() >= limit {
            mailbox.blocked = true;
            let queue_ids = mailbox
                .sent_log
                .iter()
                .map(|event| event.queue_id.clone())
                .collect();
            RecordOutcome::NewlyBlocked(queue_ids)
        } else {
            RecordOutcome::Allowed
        }
    }

    /// Reclaim state for mailboxes that have gone quiet.
    ///
    /// Blocked mailboxes are never touched; they stay blocked until an
    /// explicit unblock, however long they idle. Unblocked mailboxes have
    /// expired events dropped and are removed entirely once their log is
    /// empty. Returns the number of records removed.
    pub fn sweep(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut map = self.inner.lock().unwrap();
        let before = map.len();
        map.retain(|_, mailbox| {
            if mailbox.blocked {
                return true;
            }
            mailbox.discard_expired(now, window);
            !mailbox.sent_log.is_empty()
        });
        before - map.len()
    }

    /// Administrative block/unblock override.
    ///
    /// Blocking an unknown mailbox creates a blocked record with an empty
    /// log. Returns whether the call changed anything: unblocking an
    /// unknown or already-unblocked mailbox reports `false`.
    pub fn set_blocked(&self, name: &str, value: bool) -> bool {
        let mut map = self.inner.lock().unwrap();
        match map.get_mut(name) {
            Some(mailbox) => {
                let changed = mailbox.blocked != value;
                mailbox.blocked = value;
                changed
            }
            None if value => {
                let mut mailbox = Mailbox::new(name);
                mailbox.blocked = true;
                map.insert(name.to_owned(), mailbox);
                true
            }
            None => false,
        }
    }

    /// Names of all currently blocked mailboxes, in no particular order.
    pub fn blocked_mailboxes(&self) -> Vec<String> {
        let map = self.inner.lock().unwrap();
        map.values()
            .filter(|mailbox| mailbox.blocked)
            .map(|mailbox| mailbox.name.clone())
            .collect()
    }

    /// Build the status report. Runs under the lock but performs no I/O.
    pub fn status(&self) -> StatusReport {
        let map = self.inner.lock().unwrap();
        let cache = map.values().map(Mailbox::approx_size).sum();
        let mut mailboxes: Vec<MailboxSummary> = map
            .values()
            .map(|mailbox| MailboxSummary {
                name: mailbox.name.clone(),
                blocked: mailbox.blocked,
                count: mailbox.sent_log.len(),
            })
            .collect();
        mailboxes.sort_by(|a, b| a.name.cmp(&b.name));
        StatusReport { cache, mailboxes }
    }

    /// Clone the full state, sorted by name, for the snapshot writer. The
    /// lock is held only for the copy.
    pub fn export(&self) -> Vec<Mailbox> {
        let map = self.inner.lock().unwrap();
        let mut mailboxes: Vec<Mailbox> = map.values().cloned().collect();
        mailboxes.sort_by(|a, b| a.name.cmp(&b.name));
        mailboxes
    }

    /// Replace the full state from a snapshot. Only called at startup,
    /// before the store is exposed to concurrent callers.
    pub fn replace(&self, mailboxes: Vec<Mailbox>) {
        let mut map = self.inner.lock().unwrap();
        map.clear();
        map.extend(
            mailboxes
                .into_iter()
                .map(|mailbox| (mailbox.name.clone(), mailbox)),
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
