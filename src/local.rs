//! Local-mailbox membership lookup.

use std::path::PathBuf;

/// Read-only lookup deciding whether a sender is a local mailbox this
/// service should track.
///
/// Implementations must fail open: any lookup failure means `false`, and an
/// unknown sender is simply not tracked.
pub trait MailboxLookup: Send + Sync {
    fn is_local(&self, name: &str) -> bool;
}

/// Lookup keyed on the on-disk mailbox layout: a sender is local when a
/// directory named after it exists under the configured root.
pub struct MaildirLookup {
    mailboxes_dir: PathBuf,
}

impl MaildirLookup {
    pub fn new(mailboxes_dir: PathBuf) -> Self {
        Self { mailboxes_dir }
    }
}

impl MailboxLookup for MaildirLookup {
    fn is_local(&self, name: &str) -> bool {
        // Names that could escape the mailbox root are never local.
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return false;
        }
        self.mailboxes_dir.join(name).is_dir()
    }
}
