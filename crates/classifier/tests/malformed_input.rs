//! Malformed transport input must never panic the classifier.

use chrono::{TimeZone, Utc};

use logwarden_classifier::{ClassificationError, Classifier};
use logwarden_core::{Protocol, SourceType, TransportMeta};

fn meta() -> TransportMeta {
    TransportMeta::new("10.0.0.7:40000", Protocol::Udp)
        .at(Utc.with_ymd_and_hms(2025, 10, 18, 8, 0, 0).unwrap())
}

#[test]
fn non_utf8_garbage_is_generic_with_salvaged_text() {
    let raw = b"\xff\xfe\x00garbled \xc3\x28 payload \x80\x81 end";
    let event = Classifier::default().classify(raw, &meta()).unwrap();

    assert_eq!(event.source_type, SourceType::Generic);
    assert!(event.message.contains("garbled"));
    assert!(event.message.contains("payload"));
    assert!(event.message.contains("end"));
    assert!(event.original_timestamp.is_none());
}

#[test]
fn garbage_before_a_preamble_degrades_to_generic() {
    let raw = b"\x9b\x9b<38>Oct 18 07:59:00 router1 dropbear[1]: Bad password attempt for 'root' from 1.2.3.4:5";
    let event = Classifier::default().classify(raw, &meta()).unwrap();
    assert_eq!(event.source_type, SourceType::Generic);
    // Field extraction still runs on the salvaged text.
    assert_eq!(event.lookup("ip").as_deref(), Some("1.2.3.4"));
}

#[test]
fn invalid_bytes_inside_a_message_keep_the_preamble() {
    let raw = b"<38>Oct 18 07:59:00 router1 dropbear[1]: Bad password attempt \xff for 'root' from 1.2.3.4:5";
    let event = Classifier::default().classify(raw, &meta()).unwrap();
    assert_eq!(event.source_type, SourceType::Security);
    assert_eq!(event.hostname.as_deref(), Some("router1"));
    assert!(event.message.contains('\u{FFFD}'));
}

#[test]
fn payload_with_nothing_decodable_is_rejected() {
    let raw = [0xffu8, 0xfe, 0xfd, 0x80, 0x81];
    let err = Classifier::default().classify(&raw, &meta()).unwrap_err();
    assert_eq!(
        err,
        ClassificationError::Undecodable {
            source_address: "10.0.0.7:40000".to_string(),
            len: 5
        }
    );
}

#[test]
fn arbitrary_byte_soup_never_panics() {
    let classifier = Classifier::default().with_max_line_bytes(64);
    for seed in 0u32..512 {
        let bytes: Vec<u8> = (0..(seed % 97))
            .map(|i| (seed.wrapping_mul(31).wrapping_add(i * 17) % 256) as u8)
            .collect();
        let _ = classifier.classify(&bytes, &meta());
    }
}
