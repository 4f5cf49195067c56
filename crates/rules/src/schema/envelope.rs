//! Envelope for lightweight first-pass deserialization.

use serde::{Deserialize, Serialize};

use super::{CommonMetadata, ConfigDocument, ConfigKind, DetectionRuleDocument, PlaybookDocument};

/// Reads only the header fields; the rest is kept as raw YAML.
///
/// Used during two-pass loading: first extract `kind` to determine the
/// concrete type, then deserialize the full document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEnvelope {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: CommonMetadata,
    #[serde(flatten)]
    pub rest: serde_yaml::Value,
}

impl ConfigEnvelope {
    pub fn config_kind(&self) -> std::result::Result<ConfigKind, String> {
        self.kind.parse()
    }

    /// Second pass: reconstruct the full YAML and deserialize into the concrete type.
    pub fn parse_full(&self) -> std::result::Result<ConfigDocument, String> {
        let kind = self.config_kind()?;
        let yaml = serde_yaml::to_string(self).map_err(|e| e.to_string())?;
        match kind {
            ConfigKind::DetectionRule => {
                let doc: DetectionRuleDocument =
                    serde_yaml::from_str(&yaml).map_err(|e| e.to_string())?;
                Ok(ConfigDocument::Detection(doc))
            }
            ConfigKind::Playbook => {
                let doc: PlaybookDocument =
                    serde_yaml::from_str(&yaml).map_err(|e| e.to_string())?;
                doc.to_playbook().map_err(|e| e.to_string())?;
                Ok(ConfigDocument::Playbook(doc))
            }
        }
    }
}
