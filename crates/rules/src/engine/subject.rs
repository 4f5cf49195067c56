//! Subject key derivation.

use logwarden_core::{ClassifiedEvent, Rule};

const MISSING: &str = "-";

/// Join the rule's subject fields with `|`.
///
/// A missing hostname falls back to the transport source address; any other
/// missing field renders as `-`.
pub fn subject_key(rule: &Rule, event: &ClassifiedEvent) -> String {
    rule.subject_fields()
        .into_iter()
        .map(|field| match field {
            "hostname" | "host" => event
                .hostname
                .clone()
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| event.source_address.clone()),
            other => event
                .lookup(other)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| MISSING.to_string()),
        })
        .collect::<Vec<_>>()
        .join("|")
}
