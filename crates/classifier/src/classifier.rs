//! [`Classifier`]: raw bytes plus transport metadata in, [`ClassifiedEvent`] out.

use indexmap::IndexMap;
use tracing::debug;
use uuid::Uuid;

use logwarden_core::{ClassifiedEvent, FieldValue, SourceType, TransportMeta};

use crate::error::ClassificationError;
use crate::fields::extract_fields;
use crate::preamble::parse_preamble;
use crate::table::SourceTypeTable;

/// Default cap on line length; longer lines are truncated, not rejected.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8192;

/// Turns raw log lines into structured events.
///
/// Malformed text never fails: unparseable lines keep their salvaged text
/// in `message` and are labelled [`SourceType::Generic`].
#[derive(Debug, Clone)]
pub struct Classifier {
    table: SourceTypeTable,
    max_line_bytes: usize,
}

impl Classifier {
    pub fn new(table: SourceTypeTable) -> Self {
        Self {
            table,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max.max(1);
        self
    }

    pub fn table(&self) -> &SourceTypeTable {
        &self.table
    }

    /// Classify one raw line.
    ///
    /// # Errors
    ///
    /// [`ClassificationError::EmptyPayload`] when nothing but whitespace or
    /// NULs arrived, [`ClassificationError::Undecodable`] when no character
    /// of the payload survives lossy UTF-8 decoding.
    pub fn classify(
        &self,
        raw: &[u8],
        meta: &TransportMeta,
    ) -> Result<ClassifiedEvent, ClassificationError> {
        let truncated = raw.len() > self.max_line_bytes;
        let bytes = if truncated { &raw[..self.max_line_bytes] } else { raw };

        if bytes.iter().all(|b| b.is_ascii_whitespace() || *b == 0) {
            return Err(ClassificationError::EmptyPayload {
                source_address: meta.source_address.clone(),
            });
        }

        let line = salvage_text(bytes);
        if line.chars().all(|c| c == char::REPLACEMENT_CHARACTER || c.is_whitespace()) {
            return Err(ClassificationError::Undecodable {
                source_address: meta.source_address.clone(),
                len: raw.len(),
            });
        }

        let mut fields = IndexMap::new();
        fields.insert("protocol".to_string(), FieldValue::from(meta.protocol.as_str()));
        if truncated {
            fields.insert("truncated".to_string(), FieldValue::Boolean(true));
        }

        let event = match parse_preamble(&line, meta.arrival_time) {
            Some(preamble) => {
                fields.insert(
                    "syslog_format".to_string(),
                    FieldValue::from(preamble.format.as_str()),
                );
                if let Some(pid) = preamble.pid {
                    fields.insert("pid".to_string(), FieldValue::Integer(i64::from(pid)));
                }
                if let Some(facility) = preamble.facility {
                    fields.insert("facility".to_string(), FieldValue::from(facility));
                }
                if let Some(severity) = preamble.severity {
                    fields.insert("severity".to_string(), FieldValue::from(severity));
                }
                extract_fields(&preamble.message, &mut fields);

                let source_type = self
                    .table
                    .classify(preamble.process.as_deref(), &preamble.message);

                ClassifiedEvent {
                    id: Uuid::new_v4(),
                    arrival_time: meta.arrival_time,
                    source_address: meta.source_address.clone(),
                    original_timestamp: preamble.timestamp,
                    hostname: preamble.hostname,
                    process_name: preamble.process,
                    message: preamble.message,
                    source_type,
                    fields,
                }
            }
            None => {
                debug!(source = %meta.source_address, "no syslog preamble, classifying as generic");
                extract_fields(&line, &mut fields);
                ClassifiedEvent {
                    id: Uuid::new_v4(),
                    arrival_time: meta.arrival_time,
                    source_address: meta.source_address.clone(),
                    original_timestamp: None,
                    hostname: None,
                    process_name: None,
                    message: line,
                    source_type: SourceType::Generic,
                    fields,
                }
            }
        };

        Ok(event)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(SourceTypeTable::default())
    }
}

/// Lossy UTF-8 decode, with control characters other than tab replaced by
/// spaces and surrounding whitespace/NULs trimmed.
fn salvage_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .map(|c| if c.is_control() && c != '\t' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}
