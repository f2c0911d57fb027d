//! Per-mailbox send history and the trailing-window retention rule.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One recorded outbound message: when it was accepted, and the queue id the
/// upstream mail system assigned to it. The queue id is opaque here; it is
/// only ever handed back to the hold action.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SendEvent {
    pub sent_at: DateTime<Utc>,
    pub queue_id: String,
}

/// Send-rate state for one local mailbox.
///
/// `blocked` is sticky: it moves false→true when the limit trips and is only
/// reset by an explicit administrative unblock. While blocked, `sent_log` is
/// frozen at whatever it held at the moment of blocking.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Mailbox {
    pub name: String,
    pub blocked: bool,
    #[serde(default)]
    pub sent_log: Vec<SendEvent>,
}

impl Mailbox {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            blocked: false,
            sent_log: Vec::new(),
        }
    }

    /// Approximate memory consumed by this record, in bytes.
    pub fn approx_size(&self) -> u64 {
        let events: usize = self
            .sent_log
            .iter()
            .map(|event| 12 + event.queue_id.len())
            .sum();
        (self.name.len() + events + 1) as u64
    }

    /// Drop events that have aged out of the window, preserving insertion
    /// order. An event exactly `window` old is expired.
    pub fn discard_expired(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = window_cutoff(now, window);
        self.sent_log.retain(|event| event.sent_at > cutoff);
    }
}

/// Oldest timestamp still inside the trailing window ending at `now`.
pub fn window_cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
    now.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap()
    }

    fn event(minute: u32, queue_id: &str) -> SendEvent {
        SendEvent {
            sent_at: at(minute),
            queue_id: queue_id.to_owned(),
        }
    }

    #[test]
    fn discard_expired_keeps_strictly_newer_events() {
        let mut mailbox = Mailbox::new("alice@example.com");
        mailbox.sent_log = vec![event(0, "A1"), event(5, "B2"), event(10, "C3")];

        // Window of 10 minutes at t=15: the event at t=5 is exactly on the
        // cutoff and must be dropped along with t=0.
        mailbox.discard_expired(at(15), Duration::from_secs(600));

        assert_eq!(mailbox.sent_log, vec![event(10, "C3")]);
    }

    #[test]
    fn discard_expired_preserves_order() {
        let mut mailbox = Mailbox::new("alice@example.com");
        mailbox.sent_log = vec![event(3, "A1"), event(1, "B2"), event(4, "C3")];

        mailbox.discard_expired(at(5), Duration::from_secs(600));

        let ids: Vec<&str> = mailbox
            .sent_log
            .iter()
            .map(|e| e.queue_id.as_str())
            .collect();
        assert_eq!(ids, vec!["A1", "B2", "C3"]);
    }

    #[test]
    fn approx_size_grows_with_log() {
        let mut mailbox = Mailbox::new("alice@example.com");
        let empty = mailbox.approx_size();

        mailbox.sent_log.push(event(0, "A1B2C3D4E5"));
        assert!(mailbox.approx_size() > empty);
    }

    #[test]
    fn window_cutoff_handles_oversized_windows() {
        // A window far larger than the representable time range saturates
        // instead of panicking, retaining everything.
        let cutoff = window_cutoff(at(0), Duration::from_secs(u64::MAX));
        assert_eq!(cutoff, DateTime::<Utc>::MIN_UTC);
    }
}
