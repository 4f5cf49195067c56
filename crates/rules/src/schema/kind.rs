//! Document kind enum for two-pass deserialization dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigKind {
    DetectionRule,
    Playbook,
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigKind::DetectionRule => write!(f, "DetectionRule"),
            ConfigKind::Playbook => write!(f, "Playbook"),
        }
    }
}

impl FromStr for ConfigKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DetectionRule" => Ok(ConfigKind::DetectionRule),
            "Playbook" => Ok(ConfigKind::Playbook),
            other => Err(format!("unknown document kind: '{}'", other)),
        }
    }
}
