//! `Playbook` documents.

use serde::{Deserialize, Serialize};

use logwarden_core::{Playbook, PlaybookError, PlaybookStep};

use super::CommonMetadata;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlaybookDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: CommonMetadata,
    pub finding_type: String,
    pub steps: Vec<StepDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StepDocument {
    pub id: String,
    pub order: u32,
    pub action_type: String,
    /// Jinja-style template rendered against the triggering finding.
    #[serde(alias = "command_template")]
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl PlaybookDocument {
    /// Convert to a validated [`Playbook`] with steps sorted by order.
    pub fn to_playbook(&self) -> Result<Playbook, PlaybookError> {
        Playbook {
            id: self.metadata.id.clone(),
            finding_type: self.finding_type.clone(),
            name: self.metadata.name.clone(),
            description: self.metadata.description.clone(),
            steps: self
                .steps
                .iter()
                .map(|s| PlaybookStep {
                    id: s.id.clone(),
                    order: s.order,
                    action_type: s.action_type.clone(),
                    command_template: s.command.clone(),
                    description: s.description.clone(),
                })
                .collect(),
        }
        .validated()
    }
}
