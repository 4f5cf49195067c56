//! Append-only persistence for findings and their intended actions.
//!
//! A finding is processed in three writes: the finding itself, its actions,
//! then a commit record carrying the [`CommitOutcome`]. A finding without a
//! commit record is a partial write and is returned by
//! [`FindingStore::pending`] so recovery can finish it. A finding committed
//! as [`CommitOutcome::Partial`] is returned by [`FindingStore::partial`]
//! until a later commit supersedes it. Every write is idempotent: repeating
//! it with the same data leaves the store unchanged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use logwarden_core::{Finding, FindingId, IntendedAction};

use crate::error::PersistenceError;
use crate::orchestrator::CommitOutcome;

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[async_trait]
pub trait FindingStore: Send + Sync {
    async fn append_finding(&self, finding: &Finding) -> Result<()>;

    /// Append actions for an already stored finding. Actions whose id is
    /// already present are skipped, unless the stored one failed to render
    /// and the new one did.
    async fn append_actions(&self, finding_id: FindingId, actions: &[IntendedAction])
        -> Result<()>;

    /// Record the finding's outcome. `NoPlaybook` and `Complete` are final;
    /// a `Partial` outcome is replaced by any later, different one.
    async fn commit(&self, finding_id: FindingId, outcome: &CommitOutcome) -> Result<()>;

    /// Whether the finding has a commit record of any kind.
    async fn is_complete(&self, finding_id: FindingId) -> Result<bool>;

    async fn outcome(&self, finding_id: FindingId) -> Result<Option<CommitOutcome>>;

    async fn finding(&self, finding_id: FindingId) -> Result<Option<Finding>>;

    /// Stored findings without a commit record, in storage order.
    async fn pending(&self) -> Result<Vec<Finding>>;

    /// Findings whose latest commit is `Partial`, in storage order.
    async fn partial(&self) -> Result<Vec<Finding>>;

    /// Actions of a finding in ascending step order.
    async fn actions_for(&self, finding_id: FindingId) -> Result<Vec<IntendedAction>>;

    /// Number of stored findings.
    async fn finding_count(&self) -> Result<usize>;
}

// ── Shared index ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct StoreIndex {
    order: Vec<FindingId>,
    findings: HashMap<FindingId, Finding>,
    actions: HashMap<FindingId, Vec<IntendedAction>>,
    commits: HashMap<FindingId, CommitOutcome>,
}

impl StoreIndex {
    fn has_finding(&self, id: FindingId) -> bool {
        self.findings.contains_key(&id)
    }

    fn insert_finding(&mut self, finding: Finding) -> bool {
        if self.findings.contains_key(&finding.id) {
            return false;
        }
        self.order.push(finding.id);
        self.findings.insert(finding.id, finding);
        true
    }

    /// Actions from `actions` that would change what is stored for `finding_id`.
    fn new_actions(&self, finding_id: FindingId, actions: &[IntendedAction]) -> Vec<IntendedAction> {
        let existing = self.actions.get(&finding_id);
        actions
            .iter()
            .filter(|a| {
                let stored = existing.and_then(|list| list.iter().find(|e| e.id == a.id));
                replaces(stored, a)
            })
            .cloned()
            .collect()
    }

    fn insert_actions(&mut self, finding_id: FindingId, actions: Vec<IntendedAction>) {
        let list = self.actions.entry(finding_id).or_default();
        for action in actions {
            match list.iter().position(|e| e.id == action.id) {
                Some(pos) if replaces(Some(&list[pos]), &action) => list[pos] = action,
                Some(_) => {}
                None => list.push(action),
            }
        }
        list.sort_by_key(|a| a.step_order);
    }

    fn accepts_commit(&self, finding_id: FindingId, outcome: &CommitOutcome) -> bool {
        match self.commits.get(&finding_id) {
            None => true,
            Some(stored) => stored.is_partial() && stored != outcome,
        }
    }

    fn insert_commit(&mut self, finding_id: FindingId, outcome: CommitOutcome) -> bool {
        if !self.accepts_commit(finding_id, &outcome) {
            return false;
        }
        self.commits.insert(finding_id, outcome);
        true
    }

    fn pending(&self) -> Vec<Finding> {
        self.order
            .iter()
            .filter(|id| !self.commits.contains_key(*id))
            .filter_map(|id| self.findings.get(id).cloned())
            .collect()
    }

    fn partial(&self) -> Vec<Finding> {
        self.order
            .iter()
            .filter(|id| self.commits.get(*id).is_some_and(CommitOutcome::is_partial))
            .filter_map(|id| self.findings.get(id).cloned())
            .collect()
    }

    fn actions_for(&self, finding_id: FindingId) -> Vec<IntendedAction> {
        self.actions.get(&finding_id).cloned().unwrap_or_default()
    }

    fn apply(&mut self, record: StoreRecord) {
        match record {
            StoreRecord::Finding { finding } => {
                self.insert_finding(finding);
            }
            StoreRecord::Actions {
                finding_id,
                actions,
            } => self.insert_actions(finding_id, actions),
            StoreRecord::Commit {
                finding_id,
                outcome,
                ..
            } => {
                self.insert_commit(finding_id, outcome);
            }
        }
    }
}

/// A stored action is only overwritten by a rendered version of a step
/// that previously failed to render.
fn replaces(stored: Option<&IntendedAction>, incoming: &IntendedAction) -> bool {
    match stored {
        None => true,
        Some(stored) => !stored.is_rendered() && incoming.is_rendered(),
    }
}

// ── In-memory store ───────────────────────────────────────────

/// Volatile store for tests and runs without a `STORE_PATH`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<StoreIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FindingStore for MemoryStore {
    async fn append_finding(&self, finding: &Finding) -> Result<()> {
        self.index
            .write()
            .expect("store lock poisoned")
            .insert_finding(finding.clone());
        Ok(())
    }

    async fn append_actions(
        &self,
        finding_id: FindingId,
        actions: &[IntendedAction],
    ) -> Result<()> {
        let mut index = self.index.write().expect("store lock poisoned");
        if !index.has_finding(finding_id) {
            return Err(PersistenceError::UnknownFinding(finding_id));
        }
        index.insert_actions(finding_id, actions.to_vec());
        Ok(())
    }

    async fn commit(&self, finding_id: FindingId, outcome: &CommitOutcome) -> Result<()> {
        let mut index = self.index.write().expect("store lock poisoned");
        if !index.has_finding(finding_id) {
            return Err(PersistenceError::UnknownFinding(finding_id));
        }
        index.insert_commit(finding_id, outcome.clone());
        Ok(())
    }

    async fn is_complete(&self, finding_id: FindingId) -> Result<bool> {
        Ok(self
            .index
            .read()
            .expect("store lock poisoned")
            .commits
            .contains_key(&finding_id))
    }

    async fn outcome(&self, finding_id: FindingId) -> Result<Option<CommitOutcome>> {
        Ok(self
            .index
            .read()
            .expect("store lock poisoned")
            .commits
            .get(&finding_id)
            .cloned())
    }

    async fn finding(&self, finding_id: FindingId) -> Result<Option<Finding>> {
        Ok(self
            .index
            .read()
            .expect("store lock poisoned")
            .findings
            .get(&finding_id)
            .cloned())
    }

    async fn pending(&self) -> Result<Vec<Finding>> {
        Ok(self.index.read().expect("store lock poisoned").pending())
    }

    async fn partial(&self) -> Result<Vec<Finding>> {
        Ok(self.index.read().expect("store lock poisoned").partial())
    }

    async fn actions_for(&self, finding_id: FindingId) -> Result<Vec<IntendedAction>> {
        Ok(self
            .index
            .read()
            .expect("store lock poisoned")
            .actions_for(finding_id))
    }

    async fn finding_count(&self) -> Result<usize> {
        Ok(self.index.read().expect("store lock poisoned").order.len())
    }
}

// ── JSON-lines store ──────────────────────────────────────────

/// One line of the JSON-lines file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum StoreRecord {
    Finding {
        finding: Finding,
    },
    Actions {
        finding_id: FindingId,
        actions: Vec<IntendedAction>,
    },
    Commit {
        finding_id: FindingId,
        outcome: CommitOutcome,
        committed_at: DateTime<Utc>,
    },
}

/// Writes one record per line. After a write that may have left a
/// fragment behind, the next record starts on a fresh line.
struct LineWriter<W> {
    inner: W,
    needs_newline: bool,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    fn new(inner: W, needs_newline: bool) -> Self {
        Self {
            inner,
            needs_newline,
        }
    }

    async fn append(&mut self, record: &StoreRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut line = String::with_capacity(json.len() + 2);
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(&json);
        line.push('\n');

        self.needs_newline = true;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        self.needs_newline = false;
        Ok(())
    }
}

/// Append-only JSON-lines file, replayed into an in-memory index on open.
///
/// Corrupt lines (for example a record cut short by a crash or a full
/// disk) are skipped with a warning; the records around them still load.
pub struct JsonlStore {
    path: PathBuf,
    file: Mutex<LineWriter<tokio::fs::File>>,
    index: RwLock<StoreIndex>,
}

impl JsonlStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut index = StoreIndex::default();
        let mut needs_newline = false;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                needs_newline = !bytes.is_empty() && !bytes.ends_with(b"\n");
                let data = String::from_utf8_lossy(&bytes);
                for (i, line) in data.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StoreRecord>(line) {
                        Ok(record) => index.apply(record),
                        Err(e) => {
                            warn!(
                                file = %path.display(),
                                line = i + 1,
                                error = %e,
                                "skipping corrupt store line"
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(
            path = %path.display(),
            findings = index.order.len(),
            pending = index.pending().len(),
            "finding store opened"
        );

        Ok(Self {
            path,
            file: Mutex::new(LineWriter::new(file, needs_newline)),
            index: RwLock::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FindingStore for JsonlStore {
    async fn append_finding(&self, finding: &Finding) -> Result<()> {
        let mut file = self.file.lock().await;
        if self.index.read().expect("store lock poisoned").has_finding(finding.id) {
            return Ok(());
        }
        let record = StoreRecord::Finding {
            finding: finding.clone(),
        };
        file.append(&record).await?;
        self.index.write().expect("store lock poisoned").apply(record);
        Ok(())
    }

    async fn append_actions(
        &self,
        finding_id: FindingId,
        actions: &[IntendedAction],
    ) -> Result<()> {
        let mut file = self.file.lock().await;
        let fresh = {
            let index = self.index.read().expect("store lock poisoned");
            if !index.has_finding(finding_id) {
                return Err(PersistenceError::UnknownFinding(finding_id));
            }
            index.new_actions(finding_id, actions)
        };
        if fresh.is_empty() {
            return Ok(());
        }
        let record = StoreRecord::Actions {
            finding_id,
            actions: fresh,
        };
        file.append(&record).await?;
        self.index.write().expect("store lock poisoned").apply(record);
        Ok(())
    }

    async fn commit(&self, finding_id: FindingId, outcome: &CommitOutcome) -> Result<()> {
        let mut file = self.file.lock().await;
        {
            let index = self.index.read().expect("store lock poisoned");
            if !index.has_finding(finding_id) {
                return Err(PersistenceError::UnknownFinding(finding_id));
            }
            if !index.accepts_commit(finding_id, outcome) {
                return Ok(());
            }
        }
        let record = StoreRecord::Commit {
            finding_id,
            outcome: outcome.clone(),
            committed_at: Utc::now(),
        };
        file.append(&record).await?;
        self.index.write().expect("store lock poisoned").apply(record);
        Ok(())
    }

    async fn is_complete(&self, finding_id: FindingId) -> Result<bool> {
        Ok(self
            .index
            .read()
            .expect("store lock poisoned")
            .commits
            .contains_key(&finding_id))
    }

    async fn outcome(&self, finding_id: FindingId) -> Result<Option<CommitOutcome>> {
        Ok(self
            .index
            .read()
            .expect("store lock poisoned")
            .commits
            .get(&finding_id)
            .cloned())
    }

    async fn finding(&self, finding_id: FindingId) -> Result<Option<Finding>> {
        Ok(self
            .index
            .read()
            .expect("store lock poisoned")
            .findings
            .get(&finding_id)
            .cloned())
    }

    async fn pending(&self) -> Result<Vec<Finding>> {
        Ok(self.index.read().expect("store lock poisoned").pending())
    }

    async fn partial(&self) -> Result<Vec<Finding>> {
        Ok(self.index.read().expect("store lock poisoned").partial())
    }

    async fn actions_for(&self, finding_id: FindingId) -> Result<Vec<IntendedAction>> {
        Ok(self
            .index
            .read()
            .expect("store lock poisoned")
            .actions_for(finding_id))
    }

    async fn finding_count(&self) -> Result<usize> {
        Ok(self.index.read().expect("store lock poisoned").order.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_core::{Severity, SourceType};
    use uuid::Uuid;

    fn finding() -> Finding {
        Finding {
            id: Uuid::new_v4(),
            agent_domain: SourceType::Security,
            rule_id: "ssh-auth-fail-flood".to_string(),
            timestamp: Utc::now(),
            subject_key: "router1".to_string(),
            severity: Severity::High,
            finding_type: "AUTH_FAIL_FLOOD".to_string(),
            message: "flood".to_string(),
            details: serde_json::Map::new(),
        }
    }

    fn action(finding_id: FindingId, step: &str, order: u32) -> IntendedAction {
        IntendedAction {
            id: Uuid::new_v4(),
            finding_id,
            playbook_step_id: step.to_string(),
            step_order: order,
            timestamp: Utc::now(),
            action_type: "ssh".to_string(),
            rendered_command: Some(format!("echo {}", step)),
            render_error: None,
        }
    }

    fn complete() -> CommitOutcome {
        CommitOutcome::Complete {
            playbook_id: "pb".to_string(),
            actions: 2,
        }
    }

    #[tokio::test]
    async fn memory_store_tracks_pending_until_commit() {
        let store = MemoryStore::new();
        let f = finding();
        store.append_finding(&f).await.unwrap();
        store.append_finding(&f).await.unwrap();
        assert_eq!(store.finding_count().await.unwrap(), 1);
        assert_eq!(store.pending().await.unwrap().len(), 1);
        assert!(!store.is_complete(f.id).await.unwrap());

        store.commit(f.id, &complete()).await.unwrap();
        assert!(store.is_complete(f.id).await.unwrap());
        assert!(store.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn actions_are_deduplicated_and_ordered() {
        let store = MemoryStore::new();
        let f = finding();
        store.append_finding(&f).await.unwrap();
        let second = action(f.id, "log", 2);
        let first = action(f.id, "block", 1);
        store
            .append_actions(f.id, &[second.clone(), first.clone()])
            .await
            .unwrap();
        store.append_actions(f.id, &[first.clone()]).await.unwrap();

        let stored = store.actions_for(f.id).await.unwrap();
        assert_eq!(stored, vec![first, second]);
    }

    #[tokio::test]
    async fn actions_for_unknown_finding_are_rejected() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let err = store.append_actions(id, &[action(id, "a", 1)]).await.unwrap_err();
        assert!(matches!(err, PersistenceError::UnknownFinding(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn jsonl_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.jsonl");

        let done = finding();
        let partial = finding();
        {
            let store = JsonlStore::open(&path).await.unwrap();
            store.append_finding(&done).await.unwrap();
            store
                .append_actions(done.id, &[action(done.id, "block", 1), action(done.id, "log", 2)])
                .await
                .unwrap();
            store.commit(done.id, &complete()).await.unwrap();
            store.append_finding(&partial).await.unwrap();
        }

        let store = JsonlStore::open(&path).await.unwrap();
        assert_eq!(store.finding_count().await.unwrap(), 2);
        assert!(store.is_complete(done.id).await.unwrap());
        assert_eq!(store.outcome(done.id).await.unwrap(), Some(complete()));
        assert_eq!(store.actions_for(done.id).await.unwrap().len(), 2);

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, partial.id);
    }

    #[tokio::test]
    async fn jsonl_store_skips_truncated_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.jsonl");

        let f = finding();
        {
            let store = JsonlStore::open(&path).await.unwrap();
            store.append_finding(&f).await.unwrap();
        }
        let mut raw = tokio::fs::read(&path).await.unwrap();
        raw.extend_from_slice(br#"{"record":"commit","finding_id":"#);
        tokio::fs::write(&path, &raw).await.unwrap();

        let store = JsonlStore::open(&path).await.unwrap();
        assert_eq!(store.pending().await.unwrap().len(), 1);

        // The next record starts on a fresh line and loads after reopening.
        store.commit(f.id, &complete()).await.unwrap();
        drop(store);
        let store = JsonlStore::open(&path).await.unwrap();
        assert!(store.is_complete(f.id).await.unwrap());
    }

    #[tokio::test]
    async fn partial_commit_is_superseded_by_rerendered_actions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.jsonl");
        let f = finding();
        let block = action(f.id, "block", 1);
        let failed = IntendedAction {
            rendered_command: None,
            render_error: Some("unresolved placeholder: mac".to_string()),
            ..action(f.id, "log", 2)
        };
        let fixed = IntendedAction {
            rendered_command: Some("logger router1".to_string()),
            render_error: None,
            ..failed.clone()
        };
        let partial = CommitOutcome::Partial {
            playbook_id: "pb".to_string(),
            actions: 2,
            failed_steps: vec!["log".to_string()],
        };

        {
            let store = JsonlStore::open(&path).await.unwrap();
            store.append_finding(&f).await.unwrap();
            store.append_actions(f.id, &[block.clone(), failed.clone()]).await.unwrap();
            store.commit(f.id, &partial).await.unwrap();
            assert_eq!(store.partial().await.unwrap().len(), 1);
            assert!(store.pending().await.unwrap().is_empty());

            // A failed step never overwrites a rendered one.
            store.append_actions(f.id, &[fixed.clone(), failed.clone()]).await.unwrap();
            store.commit(f.id, &complete()).await.unwrap();
            assert!(store.partial().await.unwrap().is_empty());
        }

        let store = JsonlStore::open(&path).await.unwrap();
        assert_eq!(store.outcome(f.id).await.unwrap(), Some(complete()));
        assert!(store.partial().await.unwrap().is_empty());
        assert_eq!(store.actions_for(f.id).await.unwrap(), vec![block, fixed]);
    }

    /// Accepts `budget` bytes, fails the next write, then accepts everything.
    struct ShortWriter {
        written: Vec<u8>,
        budget: Option<usize>,
    }

    impl AsyncWrite for ShortWriter {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            data: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            let n = match self.budget {
                None => data.len(),
                Some(0) => {
                    self.budget = None;
                    return std::task::Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "no space left on device",
                    )));
                }
                Some(budget) => budget.min(data.len()),
            };
            if let Some(budget) = self.budget.as_mut() {
                *budget -= n;
            }
            self.written.extend_from_slice(&data[..n]);
            std::task::Poll::Ready(Ok(n))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn record_after_failed_write_starts_on_fresh_line() {
        let f = finding();
        let mut writer = LineWriter::new(
            ShortWriter {
                written: Vec::new(),
                budget: Some(20),
            },
            false,
        );

        let lost = StoreRecord::Actions {
            finding_id: f.id,
            actions: vec![action(f.id, "block", 1)],
        };
        let err = writer.append(&lost).await.unwrap_err();
        assert!(err.is_transient());

        let retried = StoreRecord::Commit {
            finding_id: f.id,
            outcome: complete(),
            committed_at: Utc::now(),
        };
        writer.append(&retried).await.unwrap();

        let text = String::from_utf8(writer.inner.written).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 20);
        assert!(serde_json::from_str::<StoreRecord>(lines[0]).is_err());
        assert!(matches!(
            serde_json::from_str::<StoreRecord>(lines[1]).unwrap(),
            StoreRecord::Commit { .. }
        ));
    }

    #[tokio::test]
    async fn final_commit_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("s.jsonl")).await.unwrap();
        let f = finding();
        store.append_finding(&f).await.unwrap();
        store.commit(f.id, &CommitOutcome::NoPlaybook).await.unwrap();
        store.commit(f.id, &complete()).await.unwrap();
        assert_eq!(store.outcome(f.id).await.unwrap(), Some(CommitOutcome::NoPlaybook));
    }
}
