use super::*;

#[test]
fn test_wire_round_trip_preserves_all_fields() {
    let envelope = Envelope::new("UserRegistered", b"{\"name\":\"Ann\"}".to_vec())
        .with_metadata(CORRELATION_ID_KEY, "abc")
        .with_metadata("source", "test");

    let bytes = envelope.to_bytes().unwrap();
    let parsed = Envelope::from_bytes(&bytes).unwrap();

    assert_eq!(parsed, envelope);
    assert_eq!(parsed.to_bytes().unwrap(), bytes);
}

#[test]
fn test_payload_is_base64_on_the_wire() {
    let envelope = Envelope::new("Binary", vec![0, 159, 146, 150]);
    let json: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

    assert_eq!(json["payload"], "AJ+Slg==");
    assert_eq!(json["type_name"], "Binary");
}

#[test]
fn test_invalid_base64_is_rejected() {
    let raw = br#"{"id":"6f9619ff-8b86-d011-b42d-00c04fc964ff","type_name":"X","payload":"***"}"#;
    assert!(Envelope::from_bytes(raw).is_err());
}

#[test]
fn test_missing_metadata_defaults_to_empty() {
    let raw = br#"{"id":"6f9619ff-8b86-d011-b42d-00c04fc964ff","type_name":"X","payload":""}"#;
    let envelope = Envelope::from_bytes(raw).unwrap();

    assert!(envelope.metadata.is_empty());
    assert!(envelope.payload.is_empty());
}

#[test]
fn test_metadata_is_ordered() {
    let envelope = Envelope::new("X", vec![])
        .with_metadata("zeta", "1")
        .with_metadata("alpha", "2");

    let keys: Vec<_> = envelope.metadata.keys().cloned().collect();
    assert_eq!(keys, vec!["alpha", "zeta"]);
    assert_eq!(envelope.metadata_value("alpha"), Some("2"));
    assert_eq!(envelope.metadata_value("missing"), None);
}
