//! Rule compilation: pattern specs into matchers.

use std::borrow::Cow;

use regex::Regex;
use thiserror::Error;

use logwarden_core::{ClassifiedEvent, PatternSpec, Rule};

/// A rule that cannot be evaluated. Only that rule is skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRuleError {
    #[error("rule '{rule}' has no patterns")]
    NoPatterns { rule: String },

    #[error("rule '{rule}' pattern {index}: exactly one of `regex` or `contains` must be set")]
    AmbiguousPattern { rule: String, index: usize },

    #[error("rule '{rule}' pattern {index}: invalid regex: {message}")]
    BadRegex {
        rule: String,
        index: usize,
        message: String,
    },

    #[error("rule '{rule}' pattern {index}: empty `contains` needle")]
    EmptyNeedle { rule: String, index: usize },

    #[error("rule '{rule}' has threshold 0")]
    ZeroThreshold { rule: String },

    #[error("rule '{rule}' has an empty finding_type")]
    EmptyFindingType { rule: String },

    #[error("rule '{rule}' has an empty field name")]
    EmptyFieldName { rule: String },

    #[error("rule id '{rule}' is declared more than once")]
    DuplicateId { rule: String },
}

#[derive(Debug, Clone)]
enum Matcher {
    Regex(Regex),
    /// Lowercased needle.
    Contains(String),
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    field: String,
    matcher: Matcher,
}

impl CompiledPattern {
    fn compile(rule: &Rule, index: usize, spec: &PatternSpec) -> Result<Self, InvalidRuleError> {
        let field = spec.target_field().trim();
        if field.is_empty() {
            return Err(InvalidRuleError::EmptyFieldName {
                rule: rule.id.clone(),
            });
        }

        let matcher = match (&spec.regex, &spec.contains) {
            (Some(expr), None) => Regex::new(expr)
                .map(Matcher::Regex)
                .map_err(|e| InvalidRuleError::BadRegex {
                    rule: rule.id.clone(),
                    index,
                    message: e.to_string(),
                })?,
            (None, Some(needle)) if needle.is_empty() => {
                return Err(InvalidRuleError::EmptyNeedle {
                    rule: rule.id.clone(),
                    index,
                })
            }
            (None, Some(needle)) => Matcher::Contains(needle.to_lowercase()),
            _ => {
                return Err(InvalidRuleError::AmbiguousPattern {
                    rule: rule.id.clone(),
                    index,
                })
            }
        };

        Ok(Self {
            field: field.to_string(),
            matcher,
        })
    }

    fn is_match(&self, event: &ClassifiedEvent) -> bool {
        let Some(value) = field_text(event, &self.field) else {
            return false;
        };
        match &self.matcher {
            Matcher::Regex(re) => re.is_match(&value),
            Matcher::Contains(needle) => value.to_lowercase().contains(needle.as_str()),
        }
    }
}

/// Borrow the message body; everything else goes through `lookup`.
fn field_text<'a>(event: &'a ClassifiedEvent, field: &str) -> Option<Cow<'a, str>> {
    if field == "message" {
        Some(Cow::Borrowed(event.message.as_str()))
    } else {
        event.lookup(field).map(Cow::Owned)
    }
}

/// A validated rule with its patterns compiled once per reload.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    patterns: Vec<CompiledPattern>,
}

impl CompiledRule {
    pub fn compile(rule: &Rule) -> Result<Self, InvalidRuleError> {
        if rule.threshold == 0 {
            return Err(InvalidRuleError::ZeroThreshold {
                rule: rule.id.clone(),
            });
        }
        if rule.finding_type.trim().is_empty() {
            return Err(InvalidRuleError::EmptyFindingType {
                rule: rule.id.clone(),
            });
        }
        if rule.subject_fields.iter().any(|f| f.trim().is_empty()) {
            return Err(InvalidRuleError::EmptyFieldName {
                rule: rule.id.clone(),
            });
        }
        if rule.patterns.is_empty() {
            return Err(InvalidRuleError::NoPatterns {
                rule: rule.id.clone(),
            });
        }

        let patterns = rule
            .patterns
            .iter()
            .enumerate()
            .map(|(index, spec)| CompiledPattern::compile(rule, index, spec))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rule: rule.clone(),
            patterns,
        })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    /// True when any pattern matches.
    pub fn matches(&self, event: &ClassifiedEvent) -> bool {
        self.patterns.iter().any(|p| p.is_match(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use indexmap::IndexMap;
    use logwarden_core::{FieldValue, Severity, SourceType, WindowPolicy};
    use uuid::Uuid;

    fn rule(patterns: Vec<PatternSpec>) -> Rule {
        Rule {
            id: "r1".to_string(),
            agent_domain: SourceType::Security,
            name: "test".to_string(),
            description: None,
            finding_type: "TEST".to_string(),
            patterns,
            severity: Severity::Low,
            threshold: 1,
            window_seconds: 60,
            cooldown_seconds: 0,
            subject_fields: Vec::new(),
            window_policy: WindowPolicy::Clear,
            enabled: true,
        }
    }

    fn event(message: &str) -> ClassifiedEvent {
        let mut fields = IndexMap::new();
        fields.insert("user".to_string(), FieldValue::from("root"));
        ClassifiedEvent {
            id: Uuid::new_v4(),
            arrival_time: Utc::now(),
            source_address: "10.0.0.1".to_string(),
            original_timestamp: None,
            hostname: Some("router1".to_string()),
            process_name: Some("dropbear".to_string()),
            message: message.to_string(),
            source_type: SourceType::Security,
            fields,
        }
    }

    #[test]
    fn contains_is_case_insensitive() {
        let compiled = CompiledRule::compile(&rule(vec![PatternSpec::contains("Bad Password")])).unwrap();
        assert!(compiled.matches(&event("bad password attempt")));
        assert!(!compiled.matches(&event("login succeeded")));
    }

    #[test]
    fn any_pattern_matches() {
        let compiled = CompiledRule::compile(&rule(vec![
            PatternSpec::regex(r"^Failed password"),
            PatternSpec::contains("root").on_field("user"),
        ]))
        .unwrap();
        assert!(compiled.matches(&event("session opened")));
    }

    #[test]
    fn pattern_on_missing_field_never_matches() {
        let compiled =
            CompiledRule::compile(&rule(vec![PatternSpec::contains("x").on_field("mac")])).unwrap();
        assert!(!compiled.matches(&event("x x x")));
    }

    #[test]
    fn bad_regex_is_reported_with_index() {
        let err = CompiledRule::compile(&rule(vec![
            PatternSpec::contains("ok"),
            PatternSpec::regex("(unclosed"),
        ]))
        .unwrap_err();
        assert!(matches!(err, InvalidRuleError::BadRegex { index: 1, .. }));
    }

    #[test]
    fn pattern_needs_exactly_one_matcher() {
        let both = PatternSpec {
            field: None,
            regex: Some("a".to_string()),
            contains: Some("a".to_string()),
        };
        assert!(matches!(
            CompiledRule::compile(&rule(vec![both])),
            Err(InvalidRuleError::AmbiguousPattern { index: 0, .. })
        ));
        assert!(matches!(
            CompiledRule::compile(&rule(vec![PatternSpec::default()])),
            Err(InvalidRuleError::AmbiguousPattern { .. })
        ));
    }

    #[test]
    fn structural_checks() {
        let mut r = rule(vec![PatternSpec::contains("a")]);
        r.threshold = 0;
        assert!(matches!(CompiledRule::compile(&r), Err(InvalidRuleError::ZeroThreshold { .. })));

        let r = rule(Vec::new());
        assert!(matches!(CompiledRule::compile(&r), Err(InvalidRuleError::NoPatterns { .. })));

        let mut r = rule(vec![PatternSpec::contains("a")]);
        r.subject_fields = vec!["hostname".to_string(), " ".to_string()];
        assert!(matches!(CompiledRule::compile(&r), Err(InvalidRuleError::EmptyFieldName { .. })));
    }
}
