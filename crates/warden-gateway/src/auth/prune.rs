//! Background removal of expired revocations and single-use tokens.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::AuthError;
use super::revocation::RevocationStore;
use super::single_use::SingleUseTokenStore;

/// Counts from one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Revocation records removed.
    pub revocations: usize,
    /// Single-use tokens removed.
    pub single_use_tokens: usize,
}

/// Run one prune pass over both stores.
///
/// # Errors
///
/// Returns error if storage fails.
pub fn prune_once(
    revocations: &RevocationStore,
    single_use: &SingleUseTokenStore,
    now: DateTime<Utc>,
) -> Result<PruneReport, AuthError> {
    Ok(PruneReport {
        revocations: revocations.prune_expired(now)?,
        single_use_tokens: single_use.prune_expired(now)?,
    })
}

/// Handle to a running prune task.
#[derive(Debug)]
pub struct Pruner {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Pruner {
    /// Spawn a task that prunes both stores every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        revocations: Arc<RevocationStore>,
        single_use: Arc<SingleUseTokenStore>,
        interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        match prune_once(&revocations, &single_use, Utc::now()) {
                            Ok(report) if report != PruneReport::default() => {
                                tracing::info!(
                                    revocations = report.revocations,
                                    single_use_tokens = report.single_use_tokens,
                                    "Pruned expired auth records"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "Prune pass failed"),
                        }
                    }
                }
            }

            tracing::debug!("Pruner stopped");
        });

        Self { stop_tx, handle }
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Pruner task failed");
        }
    }
}
