use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PlaybookError;
use crate::finding::FindingId;

/// One response step. `order` defines render order within the playbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub id: String,
    pub order: u32,
    pub action_type: String,
    pub command_template: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Ordered response steps for exactly one finding type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub finding_type: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<PlaybookStep>,
}

impl Playbook {
    /// Check step invariants and return the playbook with steps sorted by `order`.
    pub fn validated(mut self) -> Result<Self, PlaybookError> {
        if self.finding_type.trim().is_empty() {
            return Err(PlaybookError::EmptyFindingType(self.id));
        }
        if self.steps.is_empty() {
            return Err(PlaybookError::NoSteps(self.id));
        }

        let mut orders = HashSet::new();
        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.order == 0 {
                return Err(PlaybookError::ZeroOrder {
                    playbook: self.id.clone(),
                    step: step.id.clone(),
                });
            }
            if !orders.insert(step.order) {
                return Err(PlaybookError::DuplicateOrder {
                    playbook: self.id.clone(),
                    order: step.order,
                });
            }
            if !ids.insert(step.id.as_str()) {
                return Err(PlaybookError::DuplicateStepId {
                    playbook: self.id.clone(),
                    step: step.id.clone(),
                });
            }
        }

        self.steps.sort_by_key(|s| s.order);
        Ok(self)
    }
}

/// A rendered, not-yet-executed command derived from one playbook step.
///
/// Exactly one of `rendered_command` / `render_error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntendedAction {
    pub id: Uuid,
    pub finding_id: FindingId,
    pub playbook_step_id: String,
    pub step_order: u32,
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_error: Option<String>,
}

impl IntendedAction {
    pub fn is_rendered(&self) -> bool {
        self.rendered_command.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, order: u32) -> PlaybookStep {
        PlaybookStep {
            id: id.to_string(),
            order,
            action_type: "ssh".to_string(),
            command_template: "echo {{ subject_key }}".to_string(),
            description: None,
        }
    }

    fn playbook(steps: Vec<PlaybookStep>) -> Playbook {
        Playbook {
            id: "pb-1".to_string(),
            finding_type: "AUTH_FAIL_FLOOD".to_string(),
            name: "Block brute force".to_string(),
            description: None,
            steps,
        }
    }

    #[test]
    fn validated_sorts_steps_by_order() {
        let pb = playbook(vec![step("b", 2), step("c", 10), step("a", 1)])
            .validated()
            .unwrap();
        let ids: Vec<_> = pb.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn validated_rejects_duplicate_order() {
        let err = playbook(vec![step("a", 1), step("b", 1)]).validated().unwrap_err();
        assert_eq!(
            err,
            PlaybookError::DuplicateOrder {
                playbook: "pb-1".to_string(),
                order: 1
            }
        );
    }

    #[test]
    fn validated_rejects_zero_order_and_empty_steps() {
        assert!(matches!(
            playbook(vec![step("a", 0)]).validated(),
            Err(PlaybookError::ZeroOrder { .. })
        ));
        assert!(matches!(
            playbook(vec![]).validated(),
            Err(PlaybookError::NoSteps(_))
        ));
    }
}
