//! Multi-kind document container and accessors.

use logwarden_core::{Playbook, Rule};

use super::{CommonMetadata, ConfigKind, DetectionRuleDocument, PlaybookDocument};

/// A fully deserialized configuration document of any supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigDocument {
    Detection(DetectionRuleDocument),
    Playbook(PlaybookDocument),
}

impl ConfigDocument {
    pub fn metadata(&self) -> &CommonMetadata {
        match self {
            ConfigDocument::Detection(doc) => &doc.metadata,
            ConfigDocument::Playbook(doc) => &doc.metadata,
        }
    }

    pub fn kind(&self) -> ConfigKind {
        match self {
            ConfigDocument::Detection(_) => ConfigKind::DetectionRule,
            ConfigDocument::Playbook(_) => ConfigKind::Playbook,
        }
    }

    pub fn as_rule(&self) -> Option<Rule> {
        match self {
            ConfigDocument::Detection(doc) => Some(doc.to_rule()),
            _ => None,
        }
    }

    /// Playbooks are validated during parsing, so conversion only fails for
    /// documents built by hand.
    pub fn as_playbook(&self) -> Option<Playbook> {
        match self {
            ConfigDocument::Playbook(doc) => doc.to_playbook().ok(),
            _ => None,
        }
    }

    /// Disabled playbooks are skipped; disabled rules are kept so the engine
    /// can report them.
    pub fn is_enabled(&self) -> bool {
        self.metadata().enabled
    }
}
