//! Immutable rule table snapshot and the handle that swaps it.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use logwarden_core::{Rule, SourceType};

use super::pattern::{CompiledRule, InvalidRuleError};

/// Compiled rules for one domain at one configuration generation.
#[derive(Debug, Clone)]
pub struct RuleTable {
    domain: SourceType,
    generation: u64,
    active: Vec<CompiledRule>,
    disabled: Vec<String>,
    invalid: Vec<(String, InvalidRuleError)>,
}

impl RuleTable {
    pub fn empty(domain: SourceType) -> Self {
        Self {
            domain,
            generation: 0,
            active: Vec::new(),
            disabled: Vec::new(),
            invalid: Vec::new(),
        }
    }

    /// Compile the rules of `domain`; rules of other domains are ignored.
    ///
    /// A rule that fails to compile is recorded as invalid and excluded;
    /// its siblings are unaffected.
    pub fn build(domain: SourceType, rules: &[Rule], generation: u64) -> Self {
        let mut table = Self::empty(domain);
        table.generation = generation;
        let mut seen = HashSet::new();

        for rule in rules.iter().filter(|r| r.agent_domain == domain) {
            if !seen.insert(rule.id.as_str()) {
                let err = InvalidRuleError::DuplicateId {
                    rule: rule.id.clone(),
                };
                warn!(domain = %domain, rule_id = %rule.id, error = %err, "rule marked invalid");
                table.invalid.push((rule.id.clone(), err));
                continue;
            }
            if !rule.enabled {
                table.disabled.push(rule.id.clone());
                continue;
            }
            match CompiledRule::compile(rule) {
                Ok(compiled) => table.active.push(compiled),
                Err(err) => {
                    warn!(domain = %domain, rule_id = %rule.id, error = %err, "rule marked invalid");
                    table.invalid.push((rule.id.clone(), err));
                }
            }
        }

        info!(
            domain = %domain,
            generation,
            active = table.active.len(),
            disabled = table.disabled.len(),
            invalid = table.invalid.len(),
            "built rule table"
        );
        table
    }

    pub fn domain(&self) -> SourceType {
        self.domain
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active(&self) -> &[CompiledRule] {
        &self.active
    }

    pub fn disabled(&self) -> &[String] {
        &self.disabled
    }

    pub fn invalid(&self) -> &[(String, InvalidRuleError)] {
        &self.invalid
    }

    pub fn get(&self, rule_id: &str) -> Option<&CompiledRule> {
        self.active.iter().find(|r| r.id() == rule_id)
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.disabled.len() + self.invalid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared pointer to the current [`RuleTable`].
///
/// Readers take a cheap `Arc` snapshot and never observe a half-built
/// table; writers replace the whole snapshot.
#[derive(Debug, Clone)]
pub struct RuleTableHandle {
    inner: Arc<RwLock<Arc<RuleTable>>>,
}

impl RuleTableHandle {
    pub fn new(table: RuleTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleTable> {
        Arc::clone(&self.inner.read().expect("rule table lock poisoned"))
    }

    /// Swap in a new table, returning the previous one.
    pub fn store(&self, table: RuleTable) -> Arc<RuleTable> {
        let mut guard = self.inner.write().expect("rule table lock poisoned");
        std::mem::replace(&mut *guard, Arc::new(table))
    }

    /// Compile `rules` for this handle's domain as the next generation and swap it in.
    pub fn reload(&self, rules: &[Rule]) -> u64 {
        let current = self.snapshot();
        let generation = current.generation() + 1;
        self.store(RuleTable::build(current.domain(), rules, generation));
        generation
    }
}
