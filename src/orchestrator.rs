//! Account cycling
//!
//! A pass walks the stored credentials in order through the account workflow.
//! A credential whose workflow fails is removed from the store, a replacement
//! is minted from the session bound to its slot and appended to the pass's
//! work queue, so every live slot gets processed once per pass.

use crate::clock::Clock;
use crate::config::Timings;
use crate::error::StorageError;
use crate::refresher::CredentialRefresher;
use crate::stats::{StatsEvent, StatsReporter};
use crate::store::CredentialStore;
use crate::types::{Credential, SessionHandle};
use crate::workflow::{AccountWorkflow, WorkflowOutcome};
use anyhow::{Context, Result};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const COUNTDOWN_STEP: Duration = Duration::from_secs(60);

/// User name when the credential decodes, else its redacted form
fn account_label(credential: &Credential) -> String {
    credential
        .decode()
        .map(|account| account.user_name)
        .unwrap_or_else(|_| credential.to_string())
}

/// Totals for one pass over the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub completed: usize,
    pub soft_stopped: usize,
    pub failed: usize,
    pub replaced: usize,
}

pub struct Orchestrator {
    store: CredentialStore,
    handles: Vec<SessionHandle>,
    refresher: Arc<dyn CredentialRefresher>,
    workflow: AccountWorkflow,
    reporter: StatsReporter,
    clock: Arc<dyn Clock>,
    timings: Timings,
}

impl Orchestrator {
    pub fn new(
        store: CredentialStore,
        handles: Vec<SessionHandle>,
        refresher: Arc<dyn CredentialRefresher>,
        workflow: AccountWorkflow,
        reporter: StatsReporter,
        clock: Arc<dyn Clock>,
        timings: Timings,
    ) -> Self {
        Self {
            store,
            handles,
            refresher,
            workflow,
            reporter,
            clock,
            timings,
        }
    }

    pub fn reporter(&self) -> &StatsReporter {
        &self.reporter
    }

    /// Session bound to a store slot. Slots wrap around the handle list.
    pub fn handle_for(&self, slot: usize) -> Option<&SessionHandle> {
        if self.handles.is_empty() {
            None
        } else {
            Some(&self.handles[slot % self.handles.len()])
        }
    }

    /// Cycle forever. Only storage failures end the loop.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Cycling {} with {} session(s)",
            self.store.path().display(),
            self.handles.len()
        );

        loop {
            if !self.reporter.is_active().await {
                self.clock.sleep(self.timings.inactive_poll).await;
                continue;
            }

            let summary = self.run_pass().await.context("Credential pass aborted")?;
            info!(
                "Pass finished: {} completed, {} skipped, {} failed, {} replaced",
                summary.completed, summary.soft_stopped, summary.failed, summary.replaced
            );

            self.cool_down().await;
        }
    }

    /// Refresh every session and append the results to the store
    pub async fn populate(&self) -> Result<usize, StorageError> {
        if self.handles.is_empty() {
            warn!("No session files found, cannot fetch credentials");
            return Ok(0);
        }

        let mut added = 0;
        for handle in &self.handles {
            match self.refresher.refresh(handle).await {
                Ok(credential) => {
                    if self.store.append(credential).await? {
                        info!("Stored new credential from session {}", handle);
                        added += 1;
                    }
                }
                Err(e) => {
                    error!("Failed to fetch credential from session {}: {}", handle, e);
                    self.reporter
                        .update(StatsEvent::error(format!("refresh {}", handle), &e))
                        .await;
                }
            }
        }
        Ok(added)
    }

    /// One pass over the store, replacing dead credentials as it goes
    pub async fn run_pass(&self) -> Result<PassSummary, StorageError> {
        let mut credentials = self.store.load().await?;
        if credentials.is_empty() {
            info!("No credentials found, fetching from sessions");
            self.populate().await?;
            credentials = self.store.load().await?;
        }

        let mut queue: VecDeque<(usize, Credential)> = credentials.into_iter().enumerate().collect();
        let mut requeued: HashSet<usize> = HashSet::new();
        let mut summary = PassSummary::default();

        while let Some((slot, credential)) = queue.pop_front() {
            match self.workflow.run(slot, &credential).await {
                Ok(WorkflowOutcome::Completed { rounds }) => {
                    info!("Account {} done after {} round(s)", slot + 1, rounds);
                    summary.completed += 1;
                }
                Ok(WorkflowOutcome::SoftStopped { boost }) => {
                    info!("Account {} skipped after {} upgrade", slot + 1, boost);
                    summary.soft_stopped += 1;
                }
                Err(e) => {
                    error!("Account {} ({}) failed: {}", slot + 1, account_label(&credential), e);
                    summary.failed += 1;

                    if let Some(replacement) = self.replace(slot, &credential).await? {
                        summary.replaced += 1;
                        if requeued.insert(slot) {
                            queue.push_back((slot, replacement));
                        }
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Drop a dead credential and mint a replacement for its slot
    async fn replace(&self, slot: usize, dead: &Credential) -> Result<Option<Credential>, StorageError> {
        if self.store.remove(dead).await?.is_none() {
            warn!("Dead credential {} was already gone from the store", dead);
        }

        let Some(handle) = self.handle_for(slot) else {
            warn!("No sessions available, dropped dead credential in slot {}", slot + 1);
            return Ok(None);
        };

        let fresh = match self.refresher.refresh(handle).await {
            Ok(fresh) => fresh,
            Err(e) => {
                error!("Failed to refresh slot {} from session {}: {}", slot + 1, handle, e);
                self.reporter
                    .update(StatsEvent::error(format!("refresh {}", handle), &e))
                    .await;
                return Ok(None);
            }
        };

        if !self.store.insert_at(slot, fresh.clone()).await? {
            return Ok(None);
        }
        info!("Replaced dead credential in slot {} from session {}", slot + 1, handle);
        Ok(Some(fresh))
    }

    /// Wait out the cycle cooldown, logging the remaining minutes
    async fn cool_down(&self) {
        let mut remaining = self.timings.cycle_cooldown;
        while !remaining.is_zero() {
            let minutes = remaining.as_secs().div_ceil(60);
            info!("All accounts done, next cycle in {} minute(s)", minutes);
            let step = remaining.min(COUNTDOWN_STEP);
            self.clock.sleep(step).await;
            remaining -= step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefreshError;
    use crate::services::metrics::Metrics;
    use crate::stats::StatusChannel;
    use crate::test_support::{credential, ManualClock, RecordingChannel, RecordingRefresher, ScriptedGameApi};
    use crate::workflow::UpgradeOptions;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: CredentialStore,
        api: Arc<ScriptedGameApi>,
        refresher: Arc<RecordingRefresher>,
        clock: Arc<ManualClock>,
        channel: Arc<RecordingChannel>,
        reporter: StatsReporter,
        orchestrator: Orchestrator,
    }

    fn handles(names: &[&str]) -> Vec<SessionHandle> {
        names
            .iter()
            .map(|n| SessionHandle::new(*n, format!("session/session_{}.session", n)))
            .collect()
    }

    fn harness(
        api: ScriptedGameApi,
        handles: Vec<SessionHandle>,
        refreshed: Vec<Result<Credential, RefreshError>>,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("data.txt"));
        let api = Arc::new(api);
        let refresher = Arc::new(RecordingRefresher::new(refreshed));
        let clock = Arc::new(ManualClock::new());
        let channel = Arc::new(RecordingChannel::new());
        let timings = Timings::default();
        let reporter = StatsReporter::new(
            Some(channel.clone() as Arc<dyn StatusChannel>),
            clock.clone(),
            Metrics::new(),
            timings.update_interval,
        );
        let workflow = AccountWorkflow::new(
            api.clone(),
            reporter.clone(),
            clock.clone(),
            timings.clone(),
            UpgradeOptions::default(),
        );
        let orchestrator = Orchestrator::new(
            store.clone(),
            handles,
            refresher.clone(),
            workflow,
            reporter.clone(),
            clock.clone(),
            timings,
        );
        Harness {
            _dir: dir,
            store,
            api,
            refresher,
            clock,
            channel,
            reporter,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_handle_binding_wraps() {
        let h = harness(ScriptedGameApi::new(), handles(&["a", "b"]), Vec::new());
        let names: Vec<_> = (0..5)
            .map(|slot| h.orchestrator.handle_for(slot).unwrap().name.clone())
            .collect();
        assert_eq!(names, ["a", "b", "a", "b", "a"]);

        let empty = harness(ScriptedGameApi::new(), Vec::new(), Vec::new());
        assert!(empty.orchestrator.handle_for(0).is_none());
    }

    #[tokio::test]
    async fn test_dead_credential_replaced_in_place() {
        let (a, b, c, d) = (credential(1, "a"), credential(2, "b"), credential(3, "c"), credential(4, "d"));
        let api = ScriptedGameApi::new().failing_for(&b);
        let h = harness(api, handles(&["h0", "h1"]), vec![Ok(d.clone())]);
        h.store.persist(&[a.clone(), b.clone(), c.clone()]).await.unwrap();

        let summary = h.orchestrator.run_pass().await.unwrap();

        assert_eq!(h.store.load().await.unwrap(), vec![a.clone(), d.clone(), c.clone()]);
        assert_eq!(h.refresher.requested(), ["h1"]);
        // The replacement is processed in the same pass, after the rest
        assert_eq!(h.api.accounts(), vec![a, b, c, d]);
        assert_eq!(
            summary,
            PassSummary {
                completed: 3,
                soft_stopped: 0,
                failed: 1,
                replaced: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_replacement_is_requeued_once_per_slot() {
        let (a, b, d, e) = (credential(1, "a"), credential(2, "b"), credential(4, "d"), credential(5, "e"));
        let api = ScriptedGameApi::new().failing_for(&b).failing_for(&d);
        let h = harness(api, handles(&["h0", "h1"]), vec![Ok(d.clone()), Ok(e.clone())]);
        h.store.persist(&[a.clone(), b.clone()]).await.unwrap();

        let summary = h.orchestrator.run_pass().await.unwrap();

        assert_eq!(h.api.accounts(), vec![a.clone(), b, d]);
        assert_eq!(h.refresher.requested(), ["h1", "h1"]);
        // The second replacement waits for the next pass
        assert_eq!(h.store.load().await.unwrap(), vec![a, e]);
        assert_eq!(summary.failed, 2);
    }

    #[tokio::test]
    async fn test_dead_credential_dropped_without_sessions() {
        let (a, b, c) = (credential(1, "a"), credential(2, "b"), credential(3, "c"));
        let api = ScriptedGameApi::new().failing_for(&b);
        let h = harness(api, Vec::new(), Vec::new());
        h.store.persist(&[a.clone(), b.clone(), c.clone()]).await.unwrap();

        let summary = h.orchestrator.run_pass().await.unwrap();

        assert_eq!(h.store.load().await.unwrap(), vec![a, c]);
        assert!(h.refresher.requested().is_empty());
        assert_eq!(summary.replaced, 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_slot_empty() {
        let (a, b) = (credential(1, "a"), credential(2, "b"));
        let api = ScriptedGameApi::new().failing_for(&a);
        let h = harness(
            api,
            handles(&["h0"]),
            vec![Err(RefreshError::Timeout(120))],
        );
        h.store.persist(&[a.clone(), b.clone()]).await.unwrap();

        h.orchestrator.run_pass().await.unwrap();

        assert_eq!(h.store.load().await.unwrap(), vec![b]);
        // One from the dead account's daily check, one from the refresh
        assert_eq!(h.reporter.stats().await.errors_logged, 2);
    }

    #[tokio::test]
    async fn test_empty_store_is_populated_and_processed() {
        let a = credential(1, "a");
        let h = harness(ScriptedGameApi::new(), handles(&["h0"]), vec![Ok(a.clone())]);
        h.reporter.start(7).await;
        let pushes_before = h.channel.push_count();
        h.clock.advance(Duration::from_secs(301));

        let summary = h.orchestrator.run_pass().await.unwrap();

        assert_eq!(h.refresher.requested(), ["h0"]);
        assert_eq!(h.store.load().await.unwrap(), vec![a.clone()]);
        assert_eq!(h.api.accounts(), vec![a]);
        assert_eq!(summary.completed, 1);
        assert_eq!(h.channel.push_count() - pushes_before, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_pass() {
        let h = harness(ScriptedGameApi::new(), Vec::new(), Vec::new());
        let broken = Orchestrator::new(
            CredentialStore::new(h._dir.path()),
            Vec::new(),
            h.refresher.clone(),
            AccountWorkflow::new(
                h.api.clone(),
                h.reporter.clone(),
                h.clock.clone(),
                Timings::default(),
                UpgradeOptions::default(),
            ),
            h.reporter.clone(),
            h.clock.clone(),
            Timings::default(),
        );
        assert!(matches!(broken.run_pass().await, Err(StorageError::Read { .. })));
    }

    #[test]
    fn test_account_label_prefers_user_name() {
        assert_eq!(account_label(&credential(2, "bob")), "bob");

        let garbage = Credential::new("garbage");
        assert_eq!(account_label(&garbage), garbage.to_string());
    }

    #[tokio::test]
    async fn test_inactive_reporter_only_polls() {
        let a = credential(1, "a");
        let h = harness(ScriptedGameApi::new(), handles(&["h0"]), Vec::new());
        h.store.persist(&[a]).await.unwrap();

        let run = tokio::time::timeout(Duration::from_millis(30), h.orchestrator.run()).await;
        assert!(run.is_err());

        assert!(h.api.calls().is_empty());
        assert!(h.refresher.requested().is_empty());
        let sleeps = h.clock.sleeps();
        assert!(!sleeps.is_empty());
        assert!(sleeps.iter().all(|d| *d == Timings::default().inactive_poll));
    }

    #[tokio::test]
    async fn test_active_run_cools_down_between_passes() {
        let a = credential(1, "a");
        let h = harness(ScriptedGameApi::new(), handles(&["h0"]), Vec::new());
        h.store.persist(&[a.clone()]).await.unwrap();
        h.reporter.activate().await;

        let run = tokio::time::timeout(Duration::from_millis(30), h.orchestrator.run()).await;
        assert!(run.is_err());

        let accounts = h.api.accounts();
        assert!(accounts.len() >= 2);
        assert!(accounts.iter().all(|c| *c == a));

        // One price sample wait per pass, then the five minute countdown
        let timings = Timings::default();
        let mut pass = vec![timings.sample_interval];
        pass.extend([COUNTDOWN_STEP; 5]);
        assert_eq!(h.clock.sleeps()[..6], pass[..]);
    }

    #[tokio::test]
    async fn test_cool_down_counts_down_by_minute() {
        let h = harness(ScriptedGameApi::new(), Vec::new(), Vec::new());
        h.orchestrator.cool_down().await;
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(60); 5]);
    }
}
