//! Service wiring: configuration and the object that owns the store.

use crate::{
    filter::MessageFilter,
    hold::{HoldAction, HoldDispatcher},
    local::{MaildirLookup, MailboxLookup},
    persist::{self, PersistError},
    reaper,
    store::MailboxCache,
};
use conf::Conf;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Configuration for the rate-limiting service.
#[derive(Clone, Conf, Debug)]
pub struct ServiceConfig {
    /// Maximum messages a mailbox may send within the rate window before it is blocked
    #[conf(long, env, default_value = "200")]
    pub rate_limit: usize,
    /// Trailing window over which sends are counted
    #[conf(long, env, default_value = "30m", value_parser = humantime::parse_duration)]
    pub rate_window: Duration,
    /// Interval between background sweeps of expired send records
    #[conf(long, env, default_value = "1m", value_parser = humantime::parse_duration)]
    pub sweep_interval: Duration,
    /// Directory containing one subdirectory per local mailbox
    #[conf(long, env, default_value = "/home/vmail/mail")]
    pub mailboxes_dir: PathBuf,
    /// File used to persist send-rate state across restarts
    #[conf(long, env, default_value = "/var/lib/postguard/state.json")]
    pub snapshot_path: PathBuf,
    /// Command queue ids are piped to, one per line, when a mailbox is blocked
    #[conf(long, env, default_value = "/usr/bin/sudo /usr/sbin/postsuper -h -")]
    pub hold_command: String,
}

/// Owns the store and the collaborators around it.
///
/// Constructed once at startup and passed by handle to everything that needs
/// it: the milter front end drives [`Service::filter`], the admin listener
/// drives `handle_http_request`, and the binary supervises the
/// load → serve → save lifecycle around [`Service::run`].
pub struct Service {
    config: ServiceConfig,
    store: Arc<MailboxCache>,
    lookup: Arc<dyn MailboxLookup>,
    filter: MessageFilter,
    token: CancellationToken,
}

impl Service {
    /// Create a new service. `hold` is the action invoked with the queue ids
    /// of a mailbox that just became blocked.
    pub fn new(config: ServiceConfig, hold: Arc<dyn HoldAction>, token: CancellationToken) -> Self {
        let store = Arc::new(MailboxCache::new());
        let lookup: Arc<dyn MailboxLookup> =
            Arc::new(MaildirLookup::new(config.mailboxes_dir.clone()));
        let filter = MessageFilter::new(
            store.clone(),
            lookup.clone(),
            HoldDispatcher::new(hold),
            config.rate_limit,
            config.rate_window,
        );
        Self {
            config,
            store,
            lookup,
            filter,
            token,
        }
    }

    /// The per-message callback contract for the milter front end.
    pub fn filter(&self) -> &MessageFilter {
        &self.filter
    }

    pub(crate) fn store(&self) -> &MailboxCache {
        &self.store
    }

    pub(crate) fn lookup(&self) -> &dyn MailboxLookup {
        self.lookup.as_ref()
    }

    /// Load the snapshot, if any, replacing store contents.
    ///
    /// Called once at startup, before concurrent access begins. A corrupt or
    /// unreadable snapshot leaves the store empty (fail open to "nothing
    /// blocked") and is never fatal.
    pub fn load_state(&self) {
        match persist::load(&self.config.snapshot_path) {
            Ok(mailboxes) => {
                info!(
                    "Loaded {} mailboxes from {}",
                    mailboxes.len(),
                    self.config.snapshot_path.display()
                );
                self.store.replace(mailboxes);
            }
            Err(err) if err.is_not_found() => {
                info!(
                    "No snapshot at {}, starting empty",
                    self.config.snapshot_path.display()
                );
            }
            Err(err) => {
                warn!(
                    "Ignoring snapshot at {}: {err}",
                    self.config.snapshot_path.display()
                );
            }
        }
    }

    /// Write the snapshot. The store lock is held only while state is copied
    /// out; file I/O runs on the blocking pool.
    pub async fn save_state(&self) -> Result<(), PersistError> {
        let store = self.store.clone();
        let path = self.config.snapshot_path.clone();
        tokio::task::spawn_blocking(move || persist::save(&store, &path))
            .await
            .expect("snapshot writer panicked")
    }

    /// Run the reaper until shutdown is requested.
    pub async fn run(&self) {
        reaper::run_reaper(
            self.store.clone(),
            self.config.rate_window,
            self.config.sweep_interval,
            self.token.clone(),
        )
        .await;
    }
}
