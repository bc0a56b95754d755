//! Distribution orchestrator
//!
//! Compiles the active configuration for every target, saves the payloads,
//! records compile-stage state and asks the host to reload. Reloads are
//! single-flight per target: concurrent requests for one target share one
//! host call and one outcome. Failures are recorded and returned, never
//! retried here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cb_compiler::{advanced_rule_set, compile, compile_disabled, group_rules, ActiveConfig, CompilationResult};
use cb_core::target::DistributionTarget;
use cb_core::types::{DistributionState, ErrorKind, FilterSet, Provenance};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;

use crate::debounce::Debouncer;
use crate::error::SyncError;
use crate::host::{ContentBlockerHost, RulesStorage};
use crate::status::{ProtectionSummary, TargetStatus};
use crate::store::ExtensionStateStore;

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    pub target: DistributionTarget,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReloadOutcome {
    fn success(target: DistributionTarget) -> Self {
        Self {
            target,
            succeeded: true,
            error: None,
        }
    }

    fn failure(target: DistributionTarget, error: &SyncError) -> Self {
        Self {
            target,
            succeeded: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateOutcome {
    pub outcomes: Vec<ReloadOutcome>,
    pub failure_count: usize,
}

impl AggregateOutcome {
    fn from_outcomes(outcomes: Vec<ReloadOutcome>) -> Self {
        let failure_count = outcomes.iter().filter(|outcome| !outcome.succeeded).count();
        Self {
            outcomes,
            failure_count,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }
}

/// One target's share of a distribution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub target: DistributionTarget,
    pub applied_count: usize,
    pub source_count: usize,
    pub discarded_count: usize,
    pub error_count: usize,
    pub over_limit: bool,
    pub payload_saved: bool,
    pub state_saved: bool,
    /// `None` when the payload was unchanged and the last reload succeeded
    pub reload: Option<ReloadOutcome>,
}

impl TargetReport {
    fn failed(&self) -> bool {
        !self.payload_saved
            || !self.state_saved
            || self.reload.as_ref().is_some_and(|reload| !reload.succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    pub targets: Vec<TargetReport>,
    pub failure_count: usize,
}

impl DistributionReport {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

type OutcomeReceiver = watch::Receiver<Option<ReloadOutcome>>;

struct InflightReload {
    receiver: OutcomeReceiver,
    /// Payload saves completed before the host was asked to reload.
    saves_seen: u64,
}

struct Inner {
    store: Arc<ExtensionStateStore>,
    host: Arc<dyn ContentBlockerHost>,
    storage: Arc<dyn RulesStorage>,
    inflight: Mutex<HashMap<DistributionTarget, InflightReload>>,
    saves: AtomicU64,
}

#[derive(Clone)]
pub struct DistributionOrchestrator {
    inner: Arc<Inner>,
}

impl DistributionOrchestrator {
    pub fn new(
        store: Arc<ExtensionStateStore>,
        host: Arc<dyn ContentBlockerHost>,
        storage: Arc<dyn RulesStorage>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                host,
                storage,
                inflight: Mutex::new(HashMap::new()),
                saves: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<ExtensionStateStore> {
        &self.inner.store
    }

    /// Reload one target, joining a reload already in flight.
    ///
    /// The reload runs on its own task: dropping this future does not
    /// cancel it, and its outcome is still recorded.
    pub async fn request_reload(&self, target: DistributionTarget) -> ReloadOutcome {
        self.reload_after(target, 0).await
    }

    /// Reload one target so that the host sees every payload saved up to
    /// save number `saved`. A reload in flight that started earlier may have
    /// loaded an older payload: wait for it, then start a fresh one.
    async fn reload_after(&self, target: DistributionTarget, saved: u64) -> ReloadOutcome {
        loop {
            let (mut receiver, current) = {
                let mut inflight = self.inner.inflight.lock().unwrap_or_else(PoisonError::into_inner);
                match inflight.get(&target) {
                    Some(reload) if reload.saves_seen >= saved => {
                        log::debug!("{}: joining reload in flight", target);
                        (reload.receiver.clone(), true)
                    }
                    Some(reload) => {
                        log::debug!("{}: reload in flight predates the saved payload", target);
                        (reload.receiver.clone(), false)
                    }
                    None => {
                        let (sender, receiver) = watch::channel(None);
                        inflight.insert(
                            target,
                            InflightReload {
                                receiver: receiver.clone(),
                                saves_seen: self.inner.saves.load(Ordering::SeqCst),
                            },
                        );
                        self.inner.store.set_in_progress(target, true);

                        let inner = self.inner.clone();
                        tokio::spawn(async move { inner.run_reload(target, sender).await });
                        (receiver, true)
                    }
                }
            };

            let outcome = match receiver.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            };
            match outcome {
                Some(outcome) if current => return outcome,
                Some(_) => continue,
                None => return ReloadOutcome::failure(target, &SyncError::ReloadAborted(target)),
            }
        }
    }

    /// Reload every target concurrently. One target's failure does not
    /// affect the others.
    pub async fn request_reload_all(&self) -> AggregateOutcome {
        let outcomes = join_all(
            DistributionTarget::ALL
                .into_iter()
                .map(|target| self.request_reload(target)),
        )
        .await;

        let aggregate = AggregateOutcome::from_outcomes(outcomes);
        log::info!(
            "Reloaded {} targets, {} failed",
            aggregate.outcomes.len(),
            aggregate.failure_count
        );
        aggregate
    }

    /// One full pass: compile every target, save payloads and state, and
    /// reload the targets whose payload changed or whose last reload failed.
    pub async fn distribute(&self, config: &ActiveConfig) -> DistributionReport {
        let results = compile_all(config);

        let mut reports = Vec::with_capacity(results.len());
        let mut pending = Vec::new();
        for result in &results {
            let (report, needs_reload, saved) = self.inner.save_compiled(result).await;
            if needs_reload {
                pending.push((result.target, saved));
            }
            reports.push(report);
        }

        let outcomes = join_all(
            pending
                .into_iter()
                .map(|(target, saved)| self.reload_after(target, saved)),
        )
        .await;
        for outcome in outcomes {
            if let Some(report) = reports.iter_mut().find(|report| report.target == outcome.target) {
                report.reload = Some(outcome);
            }
        }

        let failure_count = reports.iter().filter(|report| report.failed()).count();
        if failure_count > 0 {
            log::warn!("Distribution finished with {} failed targets", failure_count);
        } else {
            log::info!("Distribution finished");
        }

        DistributionReport {
            targets: reports,
            failure_count,
        }
    }

    pub fn status(&self, target: DistributionTarget) -> TargetStatus {
        let store = &self.inner.store;
        TargetStatus::derive(target, store.is_in_progress(target), store.get_state(target).as_ref())
    }

    pub fn protection_summary(&self, protection_enabled: bool) -> ProtectionSummary {
        let statuses: Vec<(DistributionTarget, TargetStatus)> = DistributionTarget::ALL
            .into_iter()
            .map(|target| (target, self.status(target)))
            .collect();
        ProtectionSummary::derive(protection_enabled, &statuses)
    }

    /// Debounced recompilation: configuration changes notified within
    /// `period` of each other collapse into one distribution pass.
    pub fn spawn_recompiler(&self, period: Duration) -> Debouncer<ActiveConfig> {
        let orchestrator = self.clone();
        Debouncer::spawn(period, move |config: ActiveConfig| {
            let orchestrator = orchestrator.clone();
            async move {
                let report = orchestrator.distribute(&config).await;
                log::debug!("Recompiled {} targets", report.targets.len());
            }
        })
    }
}

impl Inner {
    async fn run_reload(&self, target: DistributionTarget, sender: watch::Sender<Option<ReloadOutcome>>) {
        log::debug!("{}: reload started", target);

        // The scripted target has no rule list for the host to load
        let result = if target.is_content() {
            self.host.reload(target).await
        } else {
            Ok(())
        };
        let outcome = match &result {
            Ok(()) => ReloadOutcome::success(target),
            Err(e) => {
                log::warn!("{}: reload failed: {}", target, e);
                ReloadOutcome::failure(target, e)
            }
        };

        let succeeded = outcome.succeeded;
        self.store
            .update_with(target, |state| state.with_reload_outcome(succeeded))
            .await;

        {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            inflight.remove(&target);
            self.store.set_in_progress(target, false);
        }
        log::info!("{}: reload {}", target, if succeeded { "succeeded" } else { "failed" });
        sender.send_replace(Some(outcome));
    }

    /// Save the payload and compile-stage state. Returns whether the target
    /// needs a reload, and the save number its reload must follow.
    async fn save_compiled(&self, result: &CompilationResult) -> (TargetReport, bool, u64) {
        let target = result.target;
        let previous = self.store.get_state(target);

        let payload_saved = match self.storage.save_payload(target, &result.payload).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("{}: failed to save payload: {}", target, e);
                false
            }
        };
        let saved = if payload_saved {
            self.saves.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.saves.load(Ordering::SeqCst)
        };

        let last_error = if !payload_saved {
            Some(ErrorKind::PersistenceFailure)
        } else if result.over_limit {
            Some(ErrorKind::CompilationOverLimit)
        } else {
            None
        };
        let fingerprint = result.fingerprint;
        let state_saved = self
            .store
            .update_with(target, |state| DistributionState {
                last_applied_rule_count: result.applied_count,
                last_applied_over_limit: result.over_limit,
                last_reload_succeeded: state.last_reload_succeeded,
                last_error,
                payload_fingerprint: if payload_saved {
                    Some(fingerprint)
                } else {
                    state.payload_fingerprint
                },
            })
            .await;

        let unchanged = payload_saved
            && previous.is_some_and(|state| {
                state.payload_fingerprint == Some(fingerprint) && state.last_reload_succeeded
            });
        if unchanged {
            log::debug!("{}: payload unchanged, skipping reload", target);
        }

        let report = TargetReport {
            target,
            applied_count: result.applied_count,
            source_count: result.source_count,
            discarded_count: result.discarded_count,
            error_count: result.error_count,
            over_limit: result.over_limit,
            payload_saved,
            state_saved,
            reload: None,
        };
        (report, !unchanged, saved)
    }
}

/// Compile every target for `config`, content targets first.
pub fn compile_all(config: &ActiveConfig) -> Vec<CompilationResult> {
    if !config.protection_enabled {
        log::info!("Protection is off, distributing empty payloads");
        return DistributionTarget::ALL.into_iter().map(compile_disabled).collect();
    }

    let grouped = group_rules(config);
    let mut results: Vec<CompilationResult> = DistributionTarget::CONTENT
        .into_iter()
        .map(|target| match grouped.get(&target) {
            Some(rules) => compile(rules, target),
            None => compile(&FilterSet::empty(Provenance::Merged), target),
        })
        .collect();

    let advanced = if config.advanced_rules_enabled {
        compile(&advanced_rule_set(&results), DistributionTarget::Advanced)
    } else {
        compile_disabled(DistributionTarget::Advanced)
    };
    results.push(advanced);
    results
}
