//! Raw log line classification.
//!
//! This crate provides:
//! - Tolerant syslog preamble parsing (RFC 3164, RFC 5424, OpenWrt `logread`)
//! - A priority-ordered source-type table (first match wins)
//! - Field extraction (MAC, IPv4, port, user, interface, `key=value`)
//!
//! Classification is pure: the same bytes and transport metadata always
//! produce the same event apart from its generated id.

pub mod classifier;
pub mod error;
pub mod fields;
pub mod preamble;
pub mod table;

pub use classifier::Classifier;
pub use error::ClassificationError;
pub use preamble::{Preamble, SyslogFormat};
pub use table::{ClassificationRule, SourceTypeTable};
