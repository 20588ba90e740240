use crate::envelope::Envelope;
use crate::storage::{CursorStore, NewOutboxRecord, OutboxAppend, OutboxPosition, OutboxStore};

use super::*;

#[tokio::test]
async fn test_mock_outbox_fetch_after_respects_topic_and_limit() {
    let store = MockOutboxStore::new();
    store.push("a", "events", Envelope::new("One", vec![])).await;
    store.push("b", "events", Envelope::new("Two", vec![])).await;
    store.push("a", "events", Envelope::new("Three", vec![])).await;
    store.push("a", "events", Envelope::new("Four", vec![])).await;

    let page = store.fetch_after("a", OutboxPosition::ZERO, 2).await.unwrap();
    let names: Vec<_> = page.iter().map(|r| r.envelope.type_name.as_str()).collect();
    assert_eq!(names, vec!["One", "Three"]);

    let rest = store
        .fetch_after("a", OutboxPosition::at_sequence(3), 10)
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].envelope.type_name, "Four");
}

#[tokio::test]
async fn test_mock_outbox_purge_through() {
    let store = MockOutboxStore::new();
    for _ in 0..3 {
        store.push("a", "events", Envelope::new("E", vec![])).await;
    }
    store.push("b", "events", Envelope::new("E", vec![])).await;

    let removed = store
        .purge_through("a", OutboxPosition::at_sequence(2))
        .await
        .unwrap();

    assert_eq!(removed, 2);
    assert_eq!(store.count("a").await.unwrap(), 1);
    assert_eq!(store.count("b").await.unwrap(), 1);
}

#[tokio::test]
async fn test_mock_connection_holds_rows_until_commit() {
    let store = MockOutboxStore::new();
    let mut conn = MockOutboxConnection::new();
    let envelope = Envelope::new("E", vec![]);

    conn.append(NewOutboxRecord {
        topic: "a",
        destination: "events",
        envelope: &envelope,
    })
    .await
    .unwrap();

    assert_eq!(store.count("a").await.unwrap(), 0);
    let positions = conn.commit_into(&store).await;
    assert_eq!(positions, vec![OutboxPosition::at_sequence(1)]);
    assert_eq!(store.records().await[0].envelope.id, envelope.id);
}

#[tokio::test]
async fn test_mock_cursor_store_records_history() {
    let store = MockCursorStore::new();
    store.put("c", "t", OutboxPosition::at_sequence(1)).await.unwrap();
    store.put("c", "t", OutboxPosition::at_sequence(2)).await.unwrap();

    assert_eq!(store.get("c", "t").await.unwrap(), Some(OutboxPosition::at_sequence(2)));
    assert_eq!(
        store.history().await,
        vec![OutboxPosition::at_sequence(1), OutboxPosition::at_sequence(2)]
    );

    store.set_fail_on_put(true).await;
    assert!(store.put("c", "t", OutboxPosition::at_sequence(3)).await.is_err());

    store.delete("c", "t").await.unwrap();
    assert_eq!(store.get("c", "t").await.unwrap(), None);
}
