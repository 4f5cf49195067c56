//! End-to-end tests for finding handling against in-memory and file stores.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use logwarden_core::{Finding, FindingId, IntendedAction, Playbook, PlaybookStep, Severity, SourceType};
use logwarden_orchestrator::{
    CommitOutcome, FindingStore, JsonlStore, MemoryStore, Orchestrator, PersistenceError,
    PlaybookTable, PlaybookTableHandle, RetryPolicy, TemplateRenderer,
};

fn finding(finding_type: &str) -> Finding {
    let mut details = serde_json::Map::new();
    details.insert("ip".into(), "192.168.1.50".into());
    details.insert("hostname".into(), "router1".into());
    details.insert("user".into(), "root".into());
    Finding {
        id: Uuid::new_v4(),
        agent_domain: SourceType::Security,
        rule_id: "ssh-auth-fail-flood".to_string(),
        timestamp: Utc.with_ymd_and_hms(2025, 10, 18, 12, 0, 20).unwrap(),
        subject_key: "router1|192.168.1.50".to_string(),
        severity: Severity::High,
        finding_type: finding_type.to_string(),
        message: "SSH brute force: 5 matching events".to_string(),
        details,
    }
}

fn step(id: &str, order: u32, template: &str) -> PlaybookStep {
    PlaybookStep {
        id: id.to_string(),
        order,
        action_type: "ssh".to_string(),
        command_template: template.to_string(),
        description: None,
    }
}

fn brute_force_playbook() -> Playbook {
    Playbook {
        id: "block-brute-force".to_string(),
        finding_type: "AUTH_FAIL_FLOOD".to_string(),
        name: "Block brute force source".to_string(),
        description: None,
        steps: vec![
            step("log-finding", 2, "logger -t logwarden {{ finding_type | lower }} {{ subject_key | shell_quote }}"),
            step("block-source", 1, "nft add element inet fw4 blocklist { {{ ip }} }"),
        ],
    }
}

fn handle(playbooks: &[Playbook]) -> PlaybookTableHandle {
    PlaybookTableHandle::new(PlaybookTable::build(playbooks, &TemplateRenderer::new(), 1))
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        min_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        multiplier: 2,
        max_attempts,
    }
}

#[tokio::test]
async fn two_step_playbook_persists_two_ordered_actions() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(store.clone(), handle(&[brute_force_playbook()]));
    let f = finding("AUTH_FAIL_FLOOD");

    let report = orchestrator.handle_finding(&f).await;
    assert!(report.persisted);
    assert_eq!(
        report.outcome,
        CommitOutcome::Complete {
            playbook_id: "block-brute-force".to_string(),
            actions: 2
        }
    );

    let actions = store.actions_for(f.id).await.unwrap();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0].playbook_step_id, "block-source");
    assert_eq!(actions[0].step_order, 1);
    assert_eq!(
        actions[0].rendered_command.as_deref(),
        Some("nft add element inet fw4 blocklist { 192.168.1.50 }")
    );
    assert_eq!(actions[1].playbook_step_id, "log-finding");
    assert_eq!(
        actions[1].rendered_command.as_deref(),
        Some("logger -t logwarden auth_fail_flood 'router1|192.168.1.50'")
    );
    assert!(actions[0].timestamp < actions[1].timestamp);
    assert!(actions.iter().all(|a| a.finding_id == f.id));
    assert!(store.is_complete(f.id).await.unwrap());
}

#[tokio::test]
async fn finding_without_playbook_is_persisted_alone() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(store.clone(), handle(&[brute_force_playbook()]));
    let f = finding("UNKNOWN_TYPE");

    let report = orchestrator.handle_finding(&f).await;
    assert!(report.persisted);
    assert_eq!(report.outcome, CommitOutcome::NoPlaybook);
    assert_eq!(store.finding(f.id).await.unwrap(), Some(f.clone()));
    assert!(store.actions_for(f.id).await.unwrap().is_empty());
    assert!(store.pending().await.unwrap().is_empty());
    assert_eq!(orchestrator.stats().no_playbook, 1);
}

#[tokio::test]
async fn replaying_a_finding_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(store.clone(), handle(&[brute_force_playbook()]));
    let f = finding("AUTH_FAIL_FLOOD");

    let first_plan = orchestrator.plan(&f);
    orchestrator.handle_finding(&f).await;
    let second = orchestrator.handle_finding(&f).await;

    assert!(second.already_complete);
    assert_eq!(orchestrator.plan(&f), first_plan);
    assert_eq!(store.actions_for(f.id).await.unwrap(), first_plan.actions);
    assert_eq!(store.finding_count().await.unwrap(), 1);
    assert_eq!(orchestrator.stats().duplicates, 1);
}

#[tokio::test]
async fn unrenderable_step_does_not_discard_siblings() {
    let mut playbook = brute_force_playbook();
    playbook.steps.push(step("kick-client", 3, "hostapd_cli deauthenticate {{ mac }}"));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(store.clone(), handle(&[playbook]));
    let f = finding("AUTH_FAIL_FLOOD");

    let report = orchestrator.handle_finding(&f).await;
    assert!(report.persisted);
    assert!(report.outcome.is_partial());

    let actions = store.actions_for(f.id).await.unwrap();
    assert_eq!(actions.len(), 3);
    assert!(actions[0].is_rendered());
    assert!(actions[1].is_rendered());
    assert!(!actions[2].is_rendered());
    assert!(actions[2].render_error.as_deref().unwrap().contains("mac"));
    assert!(store.pending().await.unwrap().is_empty());
    assert_eq!(orchestrator.stats().render_failures, 1);
}

/// Wraps a [`MemoryStore`] and fails the first `failures` finding writes.
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl FindingStore for FlakyStore {
    async fn append_finding(&self, finding: &Finding) -> Result<(), PersistenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(PersistenceError::Unavailable("connection refused".into()));
        }
        self.inner.append_finding(finding).await
    }

    async fn append_actions(
        &self,
        finding_id: FindingId,
        actions: &[IntendedAction],
    ) -> Result<(), PersistenceError> {
        self.inner.append_actions(finding_id, actions).await
    }

    async fn commit(&self, finding_id: FindingId, outcome: &CommitOutcome) -> Result<(), PersistenceError> {
        self.inner.commit(finding_id, outcome).await
    }

    async fn is_complete(&self, finding_id: FindingId) -> Result<bool, PersistenceError> {
        self.inner.is_complete(finding_id).await
    }

    async fn outcome(&self, finding_id: FindingId) -> Result<Option<CommitOutcome>, PersistenceError> {
        self.inner.outcome(finding_id).await
    }

    async fn finding(&self, finding_id: FindingId) -> Result<Option<Finding>, PersistenceError> {
        self.inner.finding(finding_id).await
    }

    async fn pending(&self) -> Result<Vec<Finding>, PersistenceError> {
        self.inner.pending().await
    }

    async fn partial(&self) -> Result<Vec<Finding>, PersistenceError> {
        self.inner.partial().await
    }

    async fn actions_for(&self, finding_id: FindingId) -> Result<Vec<IntendedAction>, PersistenceError> {
        self.inner.actions_for(finding_id).await
    }

    async fn finding_count(&self) -> Result<usize, PersistenceError> {
        self.inner.finding_count().await
    }
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let store = Arc::new(FlakyStore::new(2));
    let orchestrator =
        Orchestrator::new(store.clone(), handle(&[brute_force_playbook()])).with_retry(fast_retry(5));
    let f = finding("AUTH_FAIL_FLOOD");

    let report = orchestrator.handle_finding(&f).await;
    assert!(report.persisted);
    assert_eq!(report.attempts, 3);
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.actions_for(f.id).await.unwrap().len(), 2);
    assert!(orchestrator.unpersisted().is_empty());
}

#[tokio::test]
async fn exhausted_finding_is_held_not_dropped() {
    let store = Arc::new(FlakyStore::new(3));
    let orchestrator =
        Orchestrator::new(store.clone(), handle(&[brute_force_playbook()])).with_retry(fast_retry(2));
    let f = finding("AUTH_FAIL_FLOOD");

    let report = orchestrator.handle_finding(&f).await;
    assert!(!report.persisted);
    assert_eq!(report.attempts, 2);
    assert_eq!(orchestrator.unpersisted(), vec![f.clone()]);
    assert_eq!(orchestrator.stats().persist_failures, 1);

    // One failure left: the first retry attempt fails, the second succeeds.
    let reports = orchestrator.retry_unpersisted().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].persisted);
    assert!(orchestrator.unpersisted().is_empty());
    assert!(store.is_complete(f.id).await.unwrap());
}

#[tokio::test]
async fn recover_finishes_partial_writes_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("findings.jsonl");
    let f = finding("AUTH_FAIL_FLOOD");

    // Simulate a crash between the finding and its actions.
    {
        let store = JsonlStore::open(&path).await.unwrap();
        store.append_finding(&f).await.unwrap();
    }

    let store = Arc::new(JsonlStore::open(&path).await.unwrap());
    assert_eq!(store.pending().await.unwrap().len(), 1);

    let orchestrator = Orchestrator::new(store.clone(), handle(&[brute_force_playbook()]));
    let reports = orchestrator.recover().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].persisted);
    assert!(store.pending().await.unwrap().is_empty());
    assert_eq!(store.finding_count().await.unwrap(), 1);

    let actions = store.actions_for(f.id).await.unwrap();
    let orders: Vec<u32> = actions.iter().map(|a| a.step_order).collect();
    assert_eq!(orders, vec![1, 2]);
}

#[tokio::test]
async fn playbook_reload_applies_to_next_finding() {
    let store = Arc::new(MemoryStore::new());
    let playbooks = PlaybookTableHandle::default();
    let orchestrator = Orchestrator::new(store.clone(), playbooks.clone());

    let before = orchestrator.handle_finding(&finding("AUTH_FAIL_FLOOD")).await;
    assert_eq!(before.outcome, CommitOutcome::NoPlaybook);

    playbooks.reload(&[brute_force_playbook()], orchestrator.renderer());
    let after = orchestrator.handle_finding(&finding("AUTH_FAIL_FLOOD")).await;
    assert_eq!(after.outcome.playbook_id(), Some("block-brute-force"));
}

#[tokio::test]
async fn fixed_playbook_completes_partially_rendered_finding() {
    let mut broken = brute_force_playbook();
    broken.steps.push(step("kick-client", 3, "hostapd_cli deauthenticate {{ mac }}"));
    let store = Arc::new(MemoryStore::new());
    let playbooks = handle(&[broken]);
    let orchestrator = Orchestrator::new(store.clone(), playbooks.clone());
    let f = finding("AUTH_FAIL_FLOOD");

    let first = orchestrator.handle_finding(&f).await;
    assert!(first.outcome.is_partial());
    let before = store.actions_for(f.id).await.unwrap();
    assert!(!before[2].is_rendered());

    // Same playbook: planned again, still partial, nothing new stored.
    let unchanged = orchestrator.handle_finding(&f).await;
    assert!(!unchanged.already_complete);
    assert!(unchanged.outcome.is_partial());
    assert_eq!(store.actions_for(f.id).await.unwrap(), before);

    let mut fixed = brute_force_playbook();
    fixed.steps.push(step("kick-client", 3, "hostapd_cli deauthenticate {{ hostname }}"));
    playbooks.reload(&[fixed], orchestrator.renderer());

    let second = orchestrator.handle_finding(&f).await;
    assert!(second.persisted);
    assert!(!second.already_complete);
    assert!(matches!(second.outcome, CommitOutcome::Complete { actions: 3, .. }));
    assert_eq!(store.outcome(f.id).await.unwrap(), Some(second.outcome.clone()));

    let after = store.actions_for(f.id).await.unwrap();
    assert_eq!(after.len(), 3);
    assert!(after.iter().all(|a| a.is_rendered()));
    let ids = |actions: &[IntendedAction]| actions.iter().map(|a| a.id).collect::<Vec<_>>();
    assert_eq!(ids(&after), ids(&before));
    assert_eq!(
        after[2].rendered_command.as_deref(),
        Some("hostapd_cli deauthenticate router1")
    );
    assert!(store.partial().await.unwrap().is_empty());

    // Complete is final.
    let third = orchestrator.handle_finding(&f).await;
    assert!(third.already_complete);
}

#[tokio::test]
async fn recover_replans_partial_findings_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("findings.jsonl");
    let f = finding("AUTH_FAIL_FLOOD");

    {
        let mut broken = brute_force_playbook();
        broken.steps.push(step("kick-client", 3, "hostapd_cli deauthenticate {{ mac }}"));
        let store = Arc::new(JsonlStore::open(&path).await.unwrap());
        let orchestrator = Orchestrator::new(store, handle(&[broken]));
        assert!(orchestrator.handle_finding(&f).await.outcome.is_partial());
    }

    let store = Arc::new(JsonlStore::open(&path).await.unwrap());
    assert!(store.pending().await.unwrap().is_empty());
    assert_eq!(store.partial().await.unwrap(), vec![f.clone()]);

    let mut fixed = brute_force_playbook();
    fixed.steps.push(step("kick-client", 3, "hostapd_cli deauthenticate {{ hostname }}"));
    let orchestrator = Orchestrator::new(store.clone(), handle(&[fixed]));
    let reports = orchestrator.recover().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0].outcome, CommitOutcome::Complete { .. }));
    drop(orchestrator);
    drop(store);

    let reopened = JsonlStore::open(&path).await.unwrap();
    assert!(reopened.partial().await.unwrap().is_empty());
    assert!(matches!(
        reopened.outcome(f.id).await.unwrap(),
        Some(CommitOutcome::Complete { .. })
    ));
    let actions = reopened.actions_for(f.id).await.unwrap();
    assert_eq!(actions.len(), 3);
    assert!(actions.iter().all(|a| a.is_rendered()));
    assert_eq!(reopened.finding_count().await.unwrap(), 1);
}
