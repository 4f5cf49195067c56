//! [`Orchestrator`]: turns findings into persisted, ordered intended actions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use logwarden_core::{Finding, FindingId, IntendedAction};

use crate::error::PersistenceError;
use crate::playbooks::PlaybookTableHandle;
use crate::render::TemplateRenderer;
use crate::retry::RetryPolicy;
use crate::store::FindingStore;

/// Terminal processing state recorded with a finding's commit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// No playbook handles the finding type. A normal outcome.
    NoPlaybook,
    Complete {
        playbook_id: String,
        actions: usize,
    },
    /// Some steps failed to render; they are stored with an error marker.
    Partial {
        playbook_id: String,
        actions: usize,
        failed_steps: Vec<String>,
    },
}

impl CommitOutcome {
    pub fn is_partial(&self) -> bool {
        matches!(self, CommitOutcome::Partial { .. })
    }

    pub fn playbook_id(&self) -> Option<&str> {
        match self {
            CommitOutcome::NoPlaybook => None,
            CommitOutcome::Complete { playbook_id, .. }
            | CommitOutcome::Partial { playbook_id, .. } => Some(playbook_id),
        }
    }
}

/// Rendered actions for one finding, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlan {
    pub finding_id: FindingId,
    pub playbook_id: Option<String>,
    /// One action per step, in ascending step order.
    pub actions: Vec<IntendedAction>,
}

impl ActionPlan {
    pub fn failed_steps(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|a| !a.is_rendered())
            .map(|a| a.playbook_step_id.clone())
            .collect()
    }

    pub fn outcome(&self) -> CommitOutcome {
        let Some(playbook_id) = self.playbook_id.clone() else {
            return CommitOutcome::NoPlaybook;
        };
        let failed_steps = self.failed_steps();
        if failed_steps.is_empty() {
            CommitOutcome::Complete {
                playbook_id,
                actions: self.actions.len(),
            }
        } else {
            CommitOutcome::Partial {
                playbook_id,
                actions: self.actions.len(),
                failed_steps,
            }
        }
    }
}

/// What happened to one finding in [`Orchestrator::handle_finding`].
#[derive(Debug, Clone, PartialEq)]
pub struct HandleReport {
    pub finding_id: FindingId,
    pub outcome: CommitOutcome,
    /// False when the store kept failing; the finding is then held in
    /// [`Orchestrator::unpersisted`].
    pub persisted: bool,
    /// The finding was already committed and nothing was written.
    pub already_complete: bool,
    /// Store attempts used for this finding.
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub findings_handled: u64,
    pub no_playbook: u64,
    pub complete: u64,
    pub partial: u64,
    pub render_failures: u64,
    pub duplicates: u64,
    pub persist_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    findings_handled: AtomicU64,
    no_playbook: AtomicU64,
    complete: AtomicU64,
    partial: AtomicU64,
    render_failures: AtomicU64,
    duplicates: AtomicU64,
    persist_failures: AtomicU64,
}

/// Matches findings to playbooks and persists the rendered actions.
///
/// Stateless apart from counters and the unpersisted list, so one instance
/// can be shared (`Arc`) by several shard workers.
pub struct Orchestrator {
    store: Arc<dyn FindingStore>,
    playbooks: PlaybookTableHandle,
    renderer: Arc<TemplateRenderer>,
    retry: RetryPolicy,
    unpersisted: Mutex<Vec<Finding>>,
    counters: Counters,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn FindingStore>, playbooks: PlaybookTableHandle) -> Self {
        Self {
            store,
            playbooks,
            renderer: Arc::new(TemplateRenderer::new()),
            retry: RetryPolicy::default(),
            unpersisted: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn playbooks(&self) -> &PlaybookTableHandle {
        &self.playbooks
    }

    pub fn renderer(&self) -> &Arc<TemplateRenderer> {
        &self.renderer
    }

    pub fn store(&self) -> &Arc<dyn FindingStore> {
        &self.store
    }

    /// Render the actions for `finding` against the current playbook table.
    ///
    /// Pure: the same finding and playbook always yield the same actions,
    /// ids and timestamps included.
    pub fn plan(&self, finding: &Finding) -> ActionPlan {
        let table = self.playbooks.snapshot();
        let Some(playbook) = table.get(&finding.finding_type) else {
            return ActionPlan {
                finding_id: finding.id,
                playbook_id: None,
                actions: Vec::new(),
            };
        };

        let actions = playbook
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let (rendered_command, render_error) =
                    match self.renderer.render(&step.command_template, finding) {
                        Ok(command) => (Some(command), None),
                        Err(e) => {
                            warn!(
                                finding_id = %finding.id,
                                playbook_id = %playbook.id,
                                step_id = %step.id,
                                error = %e,
                                "step failed to render"
                            );
                            (None, Some(e.to_string()))
                        }
                    };
                IntendedAction {
                    id: action_id(finding.id, &step.id),
                    finding_id: finding.id,
                    playbook_step_id: step.id.clone(),
                    step_order: step.order,
                    timestamp: finding.timestamp
                        + chrono::Duration::microseconds(index as i64),
                    action_type: step.action_type.clone(),
                    rendered_command,
                    render_error,
                }
            })
            .collect();

        ActionPlan {
            finding_id: finding.id,
            playbook_id: Some(playbook.id.clone()),
            actions,
        }
    }

    /// Plan and persist one finding: finding first, then its actions, then
    /// the commit record. A finding with a final commit is skipped; a
    /// `Partial` one is planned again against the current playbooks.
    pub async fn handle_finding(&self, finding: &Finding) -> HandleReport {
        self.counters.findings_handled.fetch_add(1, Ordering::Relaxed);

        match self.store.outcome(finding.id).await {
            Ok(Some(outcome)) if outcome.is_partial() => {
                debug!(finding_id = %finding.id, "replanning partially rendered finding");
            }
            Ok(Some(outcome)) => {
                debug!(finding_id = %finding.id, "finding already processed");
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                self.forget_unpersisted(finding.id);
                return HandleReport {
                    finding_id: finding.id,
                    outcome,
                    persisted: true,
                    already_complete: true,
                    attempts: 0,
                };
            }
            Ok(None) => {}
            Err(e) => {
                warn!(finding_id = %finding.id, error = %e, "could not check finding state, processing anyway");
            }
        }

        let plan = self.plan(finding);
        let outcome = plan.outcome();
        match &outcome {
            CommitOutcome::NoPlaybook => {
                self.counters.no_playbook.fetch_add(1, Ordering::Relaxed);
                info!(
                    finding_id = %finding.id,
                    finding_type = %finding.finding_type,
                    "no playbook for finding type"
                );
            }
            CommitOutcome::Complete { playbook_id, actions } => {
                self.counters.complete.fetch_add(1, Ordering::Relaxed);
                info!(
                    finding_id = %finding.id,
                    playbook_id = %playbook_id,
                    actions,
                    "actions rendered"
                );
            }
            CommitOutcome::Partial {
                playbook_id,
                actions,
                failed_steps,
            } => {
                self.counters.partial.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .render_failures
                    .fetch_add(failed_steps.len() as u64, Ordering::Relaxed);
                warn!(
                    finding_id = %finding.id,
                    playbook_id = %playbook_id,
                    actions,
                    failed = failed_steps.len(),
                    "actions partially rendered"
                );
            }
        }

        let result = self
            .retry
            .run("persist_finding", || self.persist(finding, &plan, &outcome))
            .await;

        match result {
            Ok(((), attempts)) => {
                self.forget_unpersisted(finding.id);
                HandleReport {
                    finding_id: finding.id,
                    outcome,
                    persisted: true,
                    already_complete: false,
                    attempts,
                }
            }
            Err((e, attempts)) => {
                self.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    finding_id = %finding.id,
                    attempts,
                    error = %e,
                    "finding could not be persisted"
                );
                self.hold_unpersisted(finding);
                HandleReport {
                    finding_id: finding.id,
                    outcome,
                    persisted: false,
                    already_complete: false,
                    attempts,
                }
            }
        }
    }

    async fn persist(
        &self,
        finding: &Finding,
        plan: &ActionPlan,
        outcome: &CommitOutcome,
    ) -> Result<(), PersistenceError> {
        self.store.append_finding(finding).await?;
        if !plan.actions.is_empty() {
            self.store.append_actions(finding.id, &plan.actions).await?;
        }
        self.store.commit(finding.id, outcome).await
    }

    /// Finish findings the store holds without a commit record, then retry
    /// those committed as `Partial`.
    pub async fn recover(&self) -> Result<Vec<HandleReport>, PersistenceError> {
        let pending = self.store.pending().await?;
        let partial = self.store.partial().await?;
        if pending.is_empty() && partial.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            pending = pending.len(),
            partial = partial.len(),
            "recovering unfinished findings"
        );
        let mut reports = Vec::with_capacity(pending.len() + partial.len());
        for finding in pending.iter().chain(&partial) {
            reports.push(self.handle_finding(finding).await);
        }
        Ok(reports)
    }

    /// Try again every finding whose persistence was given up on.
    pub async fn retry_unpersisted(&self) -> Vec<HandleReport> {
        let findings = std::mem::take(&mut *self.unpersisted.lock().expect("unpersisted lock poisoned"));
        let mut reports = Vec::with_capacity(findings.len());
        for finding in &findings {
            reports.push(self.handle_finding(finding).await);
        }
        reports
    }

    /// Findings that exhausted their retries and are not in the store.
    pub fn unpersisted(&self) -> Vec<Finding> {
        self.unpersisted.lock().expect("unpersisted lock poisoned").clone()
    }

    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.counters;
        OrchestratorStats {
            findings_handled: c.findings_handled.load(Ordering::Relaxed),
            no_playbook: c.no_playbook.load(Ordering::Relaxed),
            complete: c.complete.load(Ordering::Relaxed),
            partial: c.partial.load(Ordering::Relaxed),
            render_failures: c.render_failures.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            persist_failures: c.persist_failures.load(Ordering::Relaxed),
        }
    }

    fn hold_unpersisted(&self, finding: &Finding) {
        let mut held = self.unpersisted.lock().expect("unpersisted lock poisoned");
        if held.iter().all(|f| f.id != finding.id) {
            held.push(finding.clone());
        }
    }

    fn forget_unpersisted(&self, finding_id: FindingId) {
        self.unpersisted
            .lock()
            .expect("unpersisted lock poisoned")
            .retain(|f| f.id != finding_id);
    }
}

/// Stable action id for a (finding, step) pair.
pub fn action_id(finding_id: FindingId, step_id: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(finding_id.as_bytes());
    hasher.update(step_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}
