//! Snapshot persistence for the mailbox cache.
//!
//! The snapshot is a single versioned JSON file written wholesale and read
//! wholesale. It is richer than the status report: every record keeps its
//! full ordered event log, timestamps and queue ids included, so blocked
//! state and in-window history survive restarts.

use crate::{mailbox::Mailbox, store::MailboxCache};
use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path};

/// Current snapshot format version. Snapshots carrying any other version are
/// rejected rather than guessed at.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize)]
struct Snapshot {
    version: u32,
    mailboxes: Vec<Mailbox>,
}

/// Error type for snapshot save/load.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Snapshot file could not be read or written.
    #[error("snapshot io: {0}")]
    Io(#[from] io::Error),
    /// Snapshot contents did not parse.
    #[error("snapshot did not parse: {0}")]
    Corrupt(#[from] serde_json::Error),
    /// Snapshot was written by an unknown format version.
    #[error("unsupported snapshot version {0} (expected {SNAPSHOT_VERSION})")]
    UnsupportedVersion(u32),
}

impl PersistError {
    /// True when loading failed only because no snapshot exists yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistError::Io(err) if err.kind() == io::ErrorKind::NotFound)
    }
}

/// Write the full cache state to `path`.
///
/// State is copied out under the store lock; encoding and file I/O happen
/// outside it. The bytes go to a temp file in the same directory and are
/// renamed into place, so a crash mid-write leaves the previous snapshot
/// intact.
pub fn save(store: &MailboxCache, path: &Path) -> Result<(), PersistError> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        mailboxes: store.export(),
    };
    let bytes = serde_json::to_vec(&snapshot)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a snapshot from `path`. Nothing is mutated on failure; the caller
/// decides whether to start empty.
pub fn load(path: &Path) -> Result<Vec<Mailbox>, PersistError> {
    let bytes = fs::read(path)?;
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(PersistError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot.mailboxes)
}
