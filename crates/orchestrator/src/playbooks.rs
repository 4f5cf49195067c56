//! Playbooks keyed by finding type, published as immutable snapshots.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use logwarden_core::Playbook;

use crate::render::TemplateRenderer;

/// One immutable generation of the playbook set.
#[derive(Debug, Default)]
pub struct PlaybookTable {
    generation: u64,
    by_finding_type: HashMap<String, Playbook>,
    /// (playbook id, reason) for every playbook left out of this table.
    rejected: Vec<(String, String)>,
}

impl PlaybookTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate `playbooks` and index them by finding type.
    ///
    /// Playbooks are considered in id order, so when two claim the same
    /// finding type the lexicographically smaller id wins regardless of the
    /// order they were loaded in. A playbook with a structural error or a
    /// step template that does not parse is rejected as a whole.
    pub fn build(playbooks: &[Playbook], renderer: &TemplateRenderer, generation: u64) -> Self {
        let mut sorted: Vec<&Playbook> = playbooks.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut by_finding_type: HashMap<String, Playbook> = HashMap::new();
        let mut rejected = Vec::new();

        for playbook in sorted {
            let validated = match playbook.clone().validated() {
                Ok(p) => p,
                Err(e) => {
                    warn!(playbook_id = %playbook.id, error = %e, "rejecting playbook");
                    rejected.push((playbook.id.clone(), e.to_string()));
                    continue;
                }
            };

            let bad_template = validated.steps.iter().find_map(|step| {
                renderer
                    .validate(&step.command_template)
                    .err()
                    .map(|e| format!("step '{}': {}", step.id, e))
            });
            if let Some(reason) = bad_template {
                warn!(playbook_id = %validated.id, error = %reason, "rejecting playbook");
                rejected.push((validated.id.clone(), reason));
                continue;
            }

            if let Some(existing) = by_finding_type.get(&validated.finding_type) {
                let reason = format!(
                    "finding type '{}' already handled by playbook '{}'",
                    validated.finding_type, existing.id
                );
                warn!(playbook_id = %validated.id, error = %reason, "rejecting playbook");
                rejected.push((validated.id.clone(), reason));
                continue;
            }

            by_finding_type.insert(validated.finding_type.clone(), validated);
        }

        Self {
            generation,
            by_finding_type,
            rejected,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, finding_type: &str) -> Option<&Playbook> {
        self.by_finding_type.get(finding_type)
    }

    pub fn rejected(&self) -> &[(String, String)] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.by_finding_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_finding_type.is_empty()
    }

    /// Finding types with a playbook, sorted.
    pub fn finding_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.by_finding_type.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Shared pointer to the current [`PlaybookTable`]. Readers clone the inner
/// `Arc` and never observe a partially built table.
#[derive(Debug, Clone)]
pub struct PlaybookTableHandle {
    inner: Arc<RwLock<Arc<PlaybookTable>>>,
}

impl PlaybookTableHandle {
    pub fn new(table: PlaybookTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    pub fn snapshot(&self) -> Arc<PlaybookTable> {
        self.inner.read().expect("playbook table lock poisoned").clone()
    }

    pub fn store(&self, table: PlaybookTable) {
        *self.inner.write().expect("playbook table lock poisoned") = Arc::new(table);
    }

    /// Build and publish the next generation. Returns its number.
    pub fn reload(&self, playbooks: &[Playbook], renderer: &TemplateRenderer) -> u64 {
        let mut guard = self.inner.write().expect("playbook table lock poisoned");
        let generation = guard.generation() + 1;
        let table = PlaybookTable::build(playbooks, renderer, generation);
        info!(
            generation,
            playbooks = table.len(),
            rejected = table.rejected().len(),
            "playbook table reloaded"
        );
        *guard = Arc::new(table);
        generation
    }
}

impl Default for PlaybookTableHandle {
    fn default() -> Self {
        Self::new(PlaybookTable::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_core::PlaybookStep;

    fn step(id: &str, order: u32, template: &str) -> PlaybookStep {
        PlaybookStep {
            id: id.to_string(),
            order,
            action_type: "ssh".to_string(),
            command_template: template.to_string(),
            description: None,
        }
    }

    fn playbook(id: &str, finding_type: &str, steps: Vec<PlaybookStep>) -> Playbook {
        Playbook {
            id: id.to_string(),
            finding_type: finding_type.to_string(),
            name: id.to_string(),
            description: None,
            steps,
        }
    }

    #[test]
    fn indexes_by_finding_type_with_sorted_steps() {
        let renderer = TemplateRenderer::new();
        let table = PlaybookTable::build(
            &[playbook(
                "block",
                "AUTH_FAIL_FLOOD",
                vec![step("log", 2, "logger {{ ip }}"), step("block", 1, "drop {{ ip }}")],
            )],
            &renderer,
            1,
        );
        let pb = table.get("AUTH_FAIL_FLOOD").unwrap();
        assert_eq!(pb.steps[0].id, "block");
        assert_eq!(table.generation(), 1);
        assert!(table.get("PORT_SCAN").is_none());
    }

    #[test]
    fn duplicate_finding_type_keeps_smallest_id() {
        let renderer = TemplateRenderer::new();
        let pbs = [
            playbook("zeta", "AUTH_FAIL_FLOOD", vec![step("a", 1, "echo z")]),
            playbook("alpha", "AUTH_FAIL_FLOOD", vec![step("a", 1, "echo a")]),
        ];
        let table = PlaybookTable::build(&pbs, &renderer, 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("AUTH_FAIL_FLOOD").unwrap().id, "alpha");
        assert_eq!(table.rejected().len(), 1);
        assert_eq!(table.rejected()[0].0, "zeta");
    }

    #[test]
    fn rejects_bad_template_and_bad_structure() {
        let renderer = TemplateRenderer::new();
        let pbs = [
            playbook("broken", "A", vec![step("a", 1, "echo {{ ip ")]),
            playbook("dup-order", "B", vec![step("a", 1, "x"), step("b", 1, "y")]),
            playbook("ok", "C", vec![step("a", 1, "echo {{ ip }}")]),
        ];
        let table = PlaybookTable::build(&pbs, &renderer, 1);
        assert_eq!(table.finding_types(), vec!["C"]);
        let ids: Vec<&str> = table.rejected().iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["broken", "dup-order"]);
    }

    #[test]
    fn handle_reload_bumps_generation_and_old_snapshot_survives() {
        let renderer = TemplateRenderer::new();
        let handle = PlaybookTableHandle::default();
        let before = handle.snapshot();

        let generation =
            handle.reload(&[playbook("p", "X", vec![step("a", 1, "echo")])], &renderer);
        assert_eq!(generation, 1);
        assert!(before.is_empty());
        assert_eq!(handle.snapshot().len(), 1);
    }
}
