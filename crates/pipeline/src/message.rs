use logwarden_core::{Protocol, TransportMeta};

/// One raw line as delivered by a transport, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    pub bytes: Vec<u8>,
    pub meta: TransportMeta,
}

impl RawLine {
    pub fn new(bytes: impl Into<Vec<u8>>, meta: TransportMeta) -> Self {
        Self {
            bytes: bytes.into(),
            meta,
        }
    }

    /// Line received now from `source_address`.
    pub fn received(bytes: impl Into<Vec<u8>>, source_address: impl Into<String>, protocol: Protocol) -> Self {
        Self::new(bytes, TransportMeta::new(source_address, protocol))
    }
}
