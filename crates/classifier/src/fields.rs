//! Field extraction from message bodies.
//!
//! Extractors only add keys that are not already present, so preamble
//! fields (`pid`, `facility`, ...) always win over message content.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use logwarden_core::FieldValue;

/// Upper bound on `key=value` pairs taken from one message.
const MAX_KV_PAIRS: usize = 32;

static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})\b").expect("valid mac regex")
});

static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b((?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3})(?::(\d{1,5}))?\b",
    )
    .expect("valid ipv4 regex")
});

static PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bport (\d{1,5})\b").expect("valid port regex"));

static USER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bfor\s+(?:invalid user\s+)?'?([A-Za-z0-9._@-]+)'?\s+from\b")
        .expect("valid user regex")
});

static INTERFACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z][a-z0-9_-]*\d(?:[.-][a-z0-9]+)?):\s").expect("valid interface regex")
});

static KV_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b([A-Za-z_][A-Za-z0-9_]*)=("[^"]*"|[^\s"]+)"#).expect("valid key=value regex")
});

/// Extract well-known fields from `message` into `fields`.
pub fn extract_fields(message: &str, fields: &mut IndexMap<String, FieldValue>) {
    if let Some(caps) = INTERFACE_RE.captures(message) {
        insert_new(fields, "interface", FieldValue::from(&caps[1]));
    }

    if let Some(caps) = MAC_RE.captures(message) {
        insert_new(fields, "mac", FieldValue::from(caps[1].to_ascii_lowercase()));
    }

    if let Some(caps) = IPV4_RE.captures(message) {
        insert_new(fields, "ip", FieldValue::from(&caps[1]));
        if let Some(port) = caps.get(2).and_then(|m| m.as_str().parse::<i64>().ok()) {
            insert_new(fields, "port", FieldValue::Integer(port));
        }
    }

    if let Some(port) = PORT_RE
        .captures(message)
        .and_then(|caps| caps[1].parse::<i64>().ok())
    {
        insert_new(fields, "port", FieldValue::Integer(port));
    }

    if let Some(caps) = USER_RE.captures(message) {
        insert_new(fields, "user", FieldValue::from(&caps[1]));
    }

    for caps in KV_RE.captures_iter(message).take(MAX_KV_PAIRS) {
        let key = caps[1].to_ascii_lowercase();
        let raw = caps[2].trim_matches('"');
        insert_new(fields, &key, scalar(raw));
    }
}

fn insert_new(fields: &mut IndexMap<String, FieldValue>, key: &str, value: FieldValue) {
    if !fields.contains_key(key) {
        fields.insert(key.to_string(), value);
    }
}

/// Integers stay integers; everything else is text.
fn scalar(raw: &str) -> FieldValue {
    raw.parse::<i64>()
        .map(FieldValue::Integer)
        .unwrap_or_else(|_| FieldValue::from(raw))
}
