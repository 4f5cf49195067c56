//! Pushes reloaded configuration into live rule and playbook tables.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use logwarden_core::{Playbook, Rule};
use logwarden_orchestrator::{PlaybookTableHandle, TemplateRenderer};
use logwarden_rules::{ConfigLoader, RuleTableHandle};

/// Rebuilds every table from a fresh snapshot. Engines and orchestrator
/// shards pick the new generation up on their next item without pausing.
#[derive(Debug, Clone)]
pub struct ConfigReloader {
    rule_tables: Vec<RuleTableHandle>,
    playbooks: PlaybookTableHandle,
    renderer: Arc<TemplateRenderer>,
}

impl ConfigReloader {
    pub fn new(
        rule_tables: Vec<RuleTableHandle>,
        playbooks: PlaybookTableHandle,
        renderer: Arc<TemplateRenderer>,
    ) -> Self {
        Self {
            rule_tables,
            playbooks,
            renderer,
        }
    }

    /// Returns the number of rules rejected across all domains.
    pub fn reload_rules(&self, rules: &[Rule]) -> usize {
        let mut invalid = 0;
        for handle in &self.rule_tables {
            let generation = handle.reload(rules);
            let table = handle.snapshot();
            for (rule_id, err) in table.invalid() {
                warn!(domain = %table.domain(), rule_id = %rule_id, error = %err, "rule rejected");
            }
            invalid += table.invalid().len();
            info!(
                domain = %table.domain(),
                generation,
                active = table.active().len(),
                invalid = table.invalid().len(),
                "rules reloaded"
            );
        }
        invalid
    }

    pub fn reload_playbooks(&self, playbooks: &[Playbook]) -> u64 {
        self.playbooks.reload(playbooks, &self.renderer)
    }

    /// Follow both loaders' generation channels until `shutdown` turns true.
    pub async fn follow(
        &self,
        rules: &ConfigLoader,
        playbooks: &ConfigLoader,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut rules_rx = rules.subscribe();
        let mut playbooks_rx = playbooks.subscribe();
        loop {
            tokio::select! {
                changed = rules_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.reload_rules(&rules.rules());
                }
                changed = playbooks_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.reload_playbooks(&playbooks.playbooks());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
