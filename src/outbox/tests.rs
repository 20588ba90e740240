use serde::{Deserialize, Serialize};

use super::*;
use crate::storage::{MockOutboxConnection, MockOutboxStore, OutboxStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
}

fn codec() -> EnvelopeCodec {
    let mut codec = EnvelopeCodec::new();
    codec.register::<OrderPlaced>().unwrap();
    codec
}

#[tokio::test]
async fn test_append_event_writes_encoded_row() {
    let store = MockOutboxStore::new();
    let mut conn = MockOutboxConnection::new();
    let event = OrderPlaced {
        order_id: "o-1".to_string(),
    };

    append_event(&mut conn, &codec(), DEFAULT_OUTBOX_TOPIC, "events", &event)
        .await
        .unwrap();
    conn.commit_into(&store).await;

    let records = store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].topic, DEFAULT_OUTBOX_TOPIC);
    assert_eq!(records[0].destination, "events");
    assert_eq!(records[0].envelope.type_name, "OrderPlaced");
    assert_eq!(
        codec().decode_as::<OrderPlaced>(&records[0].envelope).unwrap(),
        event
    );
}

#[tokio::test]
async fn test_append_event_surfaces_storage_failure() {
    let mut conn = MockOutboxConnection::failing();
    let event = OrderPlaced {
        order_id: "o-1".to_string(),
    };

    let result = append_event(&mut conn, &codec(), DEFAULT_OUTBOX_TOPIC, "events", &event).await;

    assert!(matches!(result, Err(OutboxError::Storage(_))));
}

#[tokio::test]
async fn test_tx_publisher_records_destination() {
    let store = MockOutboxStore::new();
    let mut conn = MockOutboxConnection::new();

    {
        let publisher = TxPublisher::new(&mut conn, DEFAULT_OUTBOX_TOPIC);
        publisher
            .publish("events", Envelope::new("OrderPlaced", b"{}".to_vec()))
            .await
            .unwrap();
        publisher
            .publish("audit", Envelope::new("OrderPlaced", b"{}".to_vec()))
            .await
            .unwrap();
    }
    assert_eq!(conn.pending_count(), 2);
    conn.commit_into(&store).await;

    let destinations: Vec<_> = store
        .fetch_after(DEFAULT_OUTBOX_TOPIC, OutboxPosition::ZERO, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.destination)
        .collect();
    assert_eq!(destinations, vec!["events", "audit"]);
}

#[tokio::test]
async fn test_tx_publisher_failure_is_not_transient() {
    let mut conn = MockOutboxConnection::failing();
    let publisher = TxPublisher::new(&mut conn, DEFAULT_OUTBOX_TOPIC);

    let err = publisher
        .publish("events", Envelope::new("OrderPlaced", vec![]))
        .await
        .unwrap_err();

    assert!(matches!(err, BusError::Outbox(_)));
    assert!(!err.is_transient());
}

#[test]
fn test_outbox_config_default() {
    let config = OutboxConfig::default();
    assert_eq!(config.topic, "events_to_forward");
    assert_eq!(config.destination, "events");
    assert_eq!(config.consumer_id, "outbox-relay");
    assert_eq!(config.poll_interval(), Duration::from_millis(500));
    assert!(!config.purge_delivered);
}
