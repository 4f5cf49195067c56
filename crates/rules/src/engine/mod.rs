//! Per-domain rule evaluation engine.
//!
//! One [`RuleEngine`] owns the sliding-window state of every (rule, subject)
//! pair for a single source type. Rules live in an immutable [`RuleTable`]
//! snapshot that is swapped through a [`RuleTableHandle`] on reload.

mod core;
mod health;
mod pattern;
mod state;
mod subject;
mod table;


pub use self::core::RuleEngine;
pub use self::health::{EngineHealth, InvalidRuleStatus};
pub use self::pattern::{CompiledRule, InvalidRuleError};
pub use self::state::RuleState;
pub use self::subject::subject_key;
pub use self::table::{RuleTable, RuleTableHandle};
