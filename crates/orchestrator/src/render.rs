//! Minijinja rendering of playbook step command templates.
//!
//! Templates see the finding's `details` at the top level plus a fixed set
//! of well-known fields (`subject_key`, `severity`, `timestamp`,
//! `finding_type`, `rule_id`, `finding_id`, `agent_domain`). Undefined
//! behaviour is strict, so a placeholder the finding cannot fill is a
//! [`RenderError`], never an empty string in a command line.

use chrono::SecondsFormat;
use minijinja::{Environment, UndefinedBehavior, Value};
use serde_json::Map;

use logwarden_core::Finding;

use crate::error::RenderError;

#[derive(Debug)]
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        // `lower` and `upper` are built-in with the "builtins" feature,
        // but we register explicit versions to guarantee availability.
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_filter("shell_quote", shell_quote_filter);

        Self { env }
    }

    /// Render `template` against `finding`.
    ///
    /// # Errors
    ///
    /// [`RenderError::Unresolved`] when a placeholder has no value (null
    /// detail values count as missing), [`RenderError::Syntax`] for malformed
    /// templates.
    pub fn render(&self, template: &str, finding: &Finding) -> Result<String, RenderError> {
        let ctx = Value::from_serialize(&finding_context(finding));
        Ok(self.env.render_str(template, ctx)?)
    }

    /// Check syntax only; nothing is evaluated.
    pub fn validate(&self, template: &str) -> Result<(), RenderError> {
        self.env.template_from_str(template)?;
        Ok(())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the template context for a finding.
pub fn finding_context(finding: &Finding) -> Map<String, serde_json::Value> {
    let details: Map<String, serde_json::Value> = finding
        .details
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut ctx = details.clone();
    ctx.insert("subject_key".into(), finding.subject_key.clone().into());
    ctx.insert("severity".into(), finding.severity.as_str().into());
    ctx.insert(
        "timestamp".into(),
        finding
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .into(),
    );
    ctx.insert("finding_type".into(), finding.finding_type.clone().into());
    ctx.insert("rule_id".into(), finding.rule_id.clone().into());
    ctx.insert("finding_id".into(), finding.id.to_string().into());
    ctx.insert("agent_domain".into(), finding.agent_domain.as_str().into());
    ctx.insert("details".into(), serde_json::Value::Object(details));
    ctx
}

fn lower_filter(value: &Value) -> String {
    value.to_string().to_lowercase()
}

fn upper_filter(value: &Value) -> String {
    value.to_string().to_uppercase()
}

/// POSIX single-quote a value for use as one shell word.
fn shell_quote_filter(value: &Value) -> String {
    format!("'{}'", value.to_string().replace('\'', r"'\''"))
}
