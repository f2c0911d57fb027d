//! Rate-limiting core for outbound mail.
//!
//! Tracks how many messages each local mailbox has sent over a trailing
//! window, blocks mailboxes that exceed the limit, and places their
//! already-queued messages on administrative hold. Blocked state is sticky
//! and survives restarts via a disk snapshot; only an explicit admin
//! unblock clears it.

pub mod filter;
pub mod hold;
pub mod local;
pub mod mailbox;
pub mod persist;
pub mod reaper;
pub mod service;
pub mod store;

mod admin;

pub use filter::MessageFilter;
pub use service::{Service, ServiceConfig};
pub use store::{MailboxCache, RecordOutcome};
