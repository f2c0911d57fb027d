//! Hold dispatch for the queued mail of a just-blocked mailbox.
//!
//! Blocking a mailbox stops future sends, but the messages it already got
//! accepted are still sitting in the upstream queue. The hold action reaches
//! outside the process to park those messages; it is best-effort and must
//! never slow down or fail the decision path that triggered it.

use async_trait::async_trait;
use std::{process::Stdio, sync::Arc};
use tokio::{io::AsyncWriteExt, process::Command, task::JoinHandle};
use tracing::{error, info};

/// Error type for hold actions.
#[derive(Debug, thiserror::Error)]
pub enum HoldError {
    /// No hold command is configured.
    #[error("hold command is empty")]
    NoCommand,
    /// The hold command could not be started.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// Queue ids could not be written to the command's stdin.
    #[error("failed to write queue ids: {0}")]
    Stdin(std::io::Error),
    /// The hold command could not be awaited.
    #[error("failed to wait for hold command: {0}")]
    Wait(std::io::Error),
    /// The hold command ran but reported failure.
    #[error("{command} exited with {status}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
    },
}

/// External action that places already-queued messages on hold.
#[async_trait]
pub trait HoldAction: Send + Sync {
    async fn hold(&self, queue_ids: &[String]) -> Result<(), HoldError>;
}

/// Holds queued messages by piping their queue ids, one per line, to a
/// `postsuper -h -` style command.
pub struct PostsuperHold {
    command: Vec<String>,
}

impl PostsuperHold {
    /// Build from a whitespace-separated command line, e.g.
    /// `/usr/bin/sudo /usr/sbin/postsuper -h -`.
    pub fn new(command_line: &str) -> Self {
        Self {
            command: command_line.split_whitespace().map(str::to_owned).collect(),
        }
    }
}

#[async_trait]
impl HoldAction for PostsuperHold {
    async fn hold(&self, queue_ids: &[String]) -> Result<(), HoldError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(HoldError::NoCommand);
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| HoldError::Spawn {
                command: program.clone(),
                source,
            })?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(HoldError::Stdin(std::io::Error::other(
                "child stdin was not piped",
            )));
        };
        for queue_id in queue_ids {
            stdin
                .write_all(queue_id.as_bytes())
                .await
                .map_err(HoldError::Stdin)?;
            stdin.write_all(b"\n").await.map_err(HoldError::Stdin)?;
        }
        // Close stdin so the command sees end of input.
        drop(stdin);

        let status = child.wait().await.map_err(HoldError::Wait)?;
        if !status.success() {
            return Err(HoldError::Failed {
                command: program.clone(),
                status,
            });
        }
        Ok(())
    }
}

/// Fire-and-forget wrapper around a [`HoldAction`].
///
/// Dispatch happens on a spawned task: the caller has just released the
/// store lock and must not wait on an external process. Failures are logged
/// and go nowhere else.
#[derive(Clone)]
pub struct HoldDispatcher {
    action: Arc<dyn HoldAction>,
}

impl HoldDispatcher {
    pub fn new(action: Arc<dyn HoldAction>) -> Self {
        Self { action }
    }

    /// Hold the given queued messages, asynchronously.
    ///
    /// An empty list is a no-op that never invokes the action: there is
    /// nothing to hold and no reason to start an external process. Returns
    /// the task handle for callers that want to observe completion.
    pub fn dispatch(&self, queue_ids: Vec<String>) -> Option<JoinHandle<()>> {
        if queue_ids.is_empty() {
            return None;
        }

        let action = self.action.clone();
        Some(tokio::spawn(async move {
            match action.hold(&queue_ids).await {
                Ok(()) => info!("Held {} queued messages", queue_ids.len()),
                Err(err) => error!("Failed to hold {} queued messages: {err}", queue_ids.len()),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Test double that records every invocation.
    struct CountingHold {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl CountingHold {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HoldAction for CountingHold {
        async fn hold(&self, queue_ids: &[String]) -> Result<(), HoldError> {
            self.calls.lock().unwrap().push(queue_ids.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_list_never_invokes_the_action() {
        let counting = CountingHold::new();
        let dispatcher = HoldDispatcher::new(counting.clone());

        assert!(dispatcher.dispatch(Vec::new()).is_none());
        tokio::task::yield_now().await;
        assert!(counting.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_passes_queue_ids_through() {
        let counting = CountingHold::new();
        let dispatcher = HoldDispatcher::new(counting.clone());

        let handle = dispatcher
            .dispatch(vec!["A1".into(), "B2".into()])
            .expect("non-empty dispatch spawns a task");
        handle.await.unwrap();

        assert_eq!(
            *counting.calls.lock().unwrap(),
            vec![vec!["A1".to_owned(), "B2".to_owned()]]
        );
    }

    #[tokio::test]
    async fn dispatch_survives_action_failure() {
        struct FailingHold;

        #[async_trait]
        impl HoldAction for FailingHold {
            async fn hold(&self, _queue_ids: &[String]) -> Result<(), HoldError> {
                Err(HoldError::NoCommand)
            }
        }

        let dispatcher = HoldDispatcher::new(Arc::new(FailingHold));
        let handle = dispatcher.dispatch(vec!["A1".into()]).unwrap();
        // The failure is logged inside the task; nothing propagates.
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn postsuper_hold_pipes_ids_to_the_command() {
        // `cat` consumes stdin and exits 0, standing in for postsuper.
        let hold = PostsuperHold::new("cat");
        hold.hold(&["A1".into(), "B2".into()]).await.unwrap();
    }

    #[tokio::test]
    async fn postsuper_hold_reports_spawn_failure() {
        let hold = PostsuperHold::new("/nonexistent/postsuper-test-binary -h -");
        let err = hold.hold(&["A1".into()]).await.unwrap_err();
        assert!(matches!(err, HoldError::Spawn { .. }));
    }

    #[tokio::test]
    async fn postsuper_hold_reports_nonzero_exit() {
        let hold = PostsuperHold::new("false");
        let err = hold.hold(&["A1".into()]).await.unwrap_err();
        assert!(matches!(err, HoldError::Failed { .. }));
    }

    #[tokio::test]
    async fn empty_command_is_an_error() {
        let hold = PostsuperHold::new("   ");
        let err = hold.hold(&["A1".into()]).await.unwrap_err();
        assert!(matches!(err, HoldError::NoCommand));
    }
}
