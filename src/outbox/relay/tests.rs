use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::bus::MockPublisher;
use crate::envelope::Envelope;
use crate::storage::{MockCursorStore, MockOutboxStore};
use crate::utils::shutdown;

const TOPIC: &str = "events_to_forward";

struct Fixture {
    outbox: Arc<MockOutboxStore>,
    cursors: Arc<MockCursorStore>,
    publisher: Arc<MockPublisher>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            outbox: Arc::new(MockOutboxStore::new()),
            cursors: Arc::new(MockCursorStore::new()),
            publisher: Arc::new(MockPublisher::new()),
        }
    }

    fn relay(&self, config: RelayConfig) -> OutboxRelay {
        OutboxRelay::new(
            self.outbox.clone(),
            self.cursors.clone(),
            self.publisher.clone(),
            config,
        )
    }

    async fn push(&self, type_name: &str) -> OutboxPosition {
        self.outbox
            .push(TOPIC, "events", Envelope::new(type_name, vec![]))
            .await
    }
}

fn config() -> RelayConfig {
    RelayConfig {
        retry: RetryConfig::immediate(2),
        poll_interval: Duration::from_millis(5),
        ..RelayConfig::default()
    }
}

#[tokio::test]
async fn test_relays_in_order_and_persists_cursor() {
    let fixture = Fixture::new();
    for name in ["A", "B", "C"] {
        fixture.push(name).await;
    }
    let relay = fixture.relay(config());
    let (_trigger, shutdown) = shutdown::channel();

    let delivered = relay.relay_batch(&shutdown).await.unwrap();

    assert_eq!(delivered, 3);
    let published = fixture.publisher.published().await;
    let names: Vec<_> = published.iter().map(|(_, e)| e.type_name.as_str()).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
    assert!(published.iter().all(|(topic, _)| topic == "events"));
    assert_eq!(relay.cursor().await.unwrap(), Some(OutboxPosition::at_sequence(3)));
    // Cursor advances once per record.
    assert_eq!(
        fixture.cursors.history().await,
        vec![
            OutboxPosition::ZERO,
            OutboxPosition::at_sequence(1),
            OutboxPosition::at_sequence(2),
            OutboxPosition::at_sequence(3),
        ]
    );
}

#[tokio::test]
async fn test_ensure_cursor_creates_zero_once() {
    let fixture = Fixture::new();
    let relay = fixture.relay(config());

    assert_eq!(relay.ensure_cursor().await.unwrap(), OutboxPosition::ZERO);
    relay.reset_cursor(OutboxPosition::at_sequence(4)).await.unwrap();
    assert_eq!(
        relay.ensure_cursor().await.unwrap(),
        OutboxPosition::at_sequence(4)
    );
}

#[tokio::test]
async fn test_failed_publish_blocks_queue() {
    let fixture = Fixture::new();
    for name in ["A", "B", "C"] {
        fixture.push(name).await;
    }
    fixture.publisher.fail_after(1).await;
    let relay = fixture.relay(config());
    let (_trigger, shutdown) = shutdown::channel();

    let err = relay.relay_batch(&shutdown).await.unwrap_err();

    match err {
        RelayError::Publish { position, .. } => {
            assert_eq!(position, OutboxPosition::at_sequence(2))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fixture.publisher.published_count().await, 1);
    assert_eq!(relay.cursor().await.unwrap(), Some(OutboxPosition::at_sequence(1)));
    // One attempt plus two retries on the stuck record.
    assert_eq!(fixture.publisher.attempts(), 1 + 3);
}

#[tokio::test]
async fn test_restart_resumes_after_last_confirmed() {
    let fixture = Fixture::new();
    for name in ["A", "B", "C"] {
        fixture.push(name).await;
    }
    fixture.publisher.fail_after(1).await;
    let (_trigger, shutdown) = shutdown::channel();
    assert!(fixture.relay(config()).relay_batch(&shutdown).await.is_err());

    // A fresh relay over the same cursor store picks up at B.
    let fresh_publisher = Arc::new(MockPublisher::new());
    let relay = OutboxRelay::new(
        fixture.outbox.clone(),
        fixture.cursors.clone(),
        fresh_publisher.clone(),
        config(),
    );
    assert_eq!(relay.relay_batch(&shutdown).await.unwrap(), 2);

    let names: Vec<_> = fresh_publisher
        .published()
        .await
        .into_iter()
        .map(|(_, e)| e.type_name)
        .collect();
    assert_eq!(names, vec!["B", "C"]);
    assert_eq!(relay.cursor().await.unwrap(), Some(OutboxPosition::at_sequence(3)));
}

#[tokio::test]
async fn test_batch_size_limits_delivery() {
    let fixture = Fixture::new();
    for name in ["A", "B", "C"] {
        fixture.push(name).await;
    }
    let relay = fixture.relay(RelayConfig {
        batch_size: 2,
        ..config()
    });
    let (_trigger, shutdown) = shutdown::channel();

    assert_eq!(relay.relay_batch(&shutdown).await.unwrap(), 2);
    assert_eq!(relay.relay_batch(&shutdown).await.unwrap(), 1);
    assert_eq!(relay.relay_batch(&shutdown).await.unwrap(), 0);
}

#[tokio::test]
async fn test_purge_delivered_removes_rows() {
    let fixture = Fixture::new();
    for name in ["A", "B"] {
        fixture.push(name).await;
    }
    let relay = fixture.relay(RelayConfig {
        purge_delivered: true,
        ..config()
    });
    let (_trigger, shutdown) = shutdown::channel();

    relay.relay_batch(&shutdown).await.unwrap();

    assert_eq!(fixture.outbox.count(TOPIC).await.unwrap(), 0);
}

#[tokio::test]
async fn test_reset_cursor_skips_rows() {
    let fixture = Fixture::new();
    for name in ["A", "B", "C"] {
        fixture.push(name).await;
    }
    let relay = fixture.relay(config());
    let (_trigger, shutdown) = shutdown::channel();

    relay.reset_cursor(OutboxPosition::at_sequence(2)).await.unwrap();
    relay.relay_batch(&shutdown).await.unwrap();

    let published = fixture.publisher.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].1.type_name, "C");
}

#[tokio::test]
async fn test_cursor_write_failure_stops_batch() {
    let fixture = Fixture::new();
    fixture.push("A").await;
    fixture.push("B").await;
    let relay = fixture.relay(config());
    relay.ensure_cursor().await.unwrap();
    fixture.cursors.set_fail_on_put(true).await;
    let (_trigger, shutdown) = shutdown::channel();

    let err = relay.relay_batch(&shutdown).await.unwrap_err();

    assert!(matches!(err, RelayError::Storage(_)));
    // A was published but not confirmed; it will be sent again.
    assert_eq!(fixture.publisher.published_count().await, 1);
    assert_eq!(relay.cursor().await.unwrap(), Some(OutboxPosition::ZERO));
}

#[tokio::test]
async fn test_run_drains_and_stops_on_shutdown() {
    let fixture = Fixture::new();
    for name in ["A", "B", "C"] {
        fixture.push(name).await;
    }
    let relay = Arc::new(fixture.relay(config()));
    let (trigger, shutdown) = shutdown::channel();

    let task = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.run(shutdown).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while fixture.publisher.published_count().await < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Rows appended while running are picked up on a later poll.
    fixture.push("D").await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while fixture.publisher.published_count().await < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(relay.cursor().await.unwrap(), Some(OutboxPosition::at_sequence(4)));
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff() {
    let fixture = Fixture::new();
    fixture.push("A").await;
    fixture.publisher.set_fail_on_publish(true).await;
    let relay = Arc::new(fixture.relay(RelayConfig {
        retry: RetryConfig {
            min_delay_ms: 60_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
            jitter: false,
        },
        ..config()
    }));
    let (trigger, shutdown) = shutdown::channel();

    let task = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.run(shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    trigger.trigger();

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(relay.cursor().await.unwrap(), Some(OutboxPosition::ZERO));
}
