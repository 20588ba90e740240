use super::*;
use std::time::Duration;

fn envelope(type_name: &str) -> Envelope {
    Envelope::new(type_name, b"{}".to_vec())
}

async fn next_within(subscription: &mut Box<dyn Subscription>, ms: u64) -> Option<Delivery> {
    tokio::time::timeout(Duration::from_millis(ms), subscription.next())
        .await
        .ok()
        .map(|result| result.unwrap().unwrap())
}

#[tokio::test]
async fn test_publish_without_subscribers_is_retained() {
    let broker = ChannelBroker::new();
    broker.publish("events", envelope("A")).await.unwrap();

    assert_eq!(broker.messages("events").len(), 1);
    assert!(broker.messages("other").is_empty());
}

#[tokio::test]
async fn test_new_group_starts_from_oldest() {
    let broker = ChannelBroker::new();
    broker.publish("events", envelope("A")).await.unwrap();
    broker.publish("events", envelope("B")).await.unwrap();

    let mut subscription = broker.subscribe("events", "late").await.unwrap();

    let first = next_within(&mut subscription, 100).await.unwrap();
    assert_eq!(first.envelope().type_name, "A");
    first.ack().unwrap();

    let second = next_within(&mut subscription, 100).await.unwrap();
    assert_eq!(second.envelope().type_name, "B");
    second.ack().unwrap();

    assert_eq!(broker.committed_offset("events", "late"), Some(2));
}

#[tokio::test]
async fn test_waiting_subscriber_wakes_on_publish() {
    let broker = ChannelBroker::new();
    let mut subscription = broker.subscribe("events", "g").await.unwrap();

    let publisher = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish("events", envelope("Late")).await.unwrap();
    });

    let delivery = next_within(&mut subscription, 500).await.unwrap();
    assert_eq!(delivery.envelope().type_name, "Late");
}

#[tokio::test]
async fn test_nack_redelivers_same_message() {
    let broker = ChannelBroker::new();
    broker.publish("events", envelope("A")).await.unwrap();
    broker.publish("events", envelope("B")).await.unwrap();
    let mut subscription = broker.subscribe("events", "g").await.unwrap();

    let first = next_within(&mut subscription, 100).await.unwrap();
    let id = first.envelope().id;
    first.nack().unwrap();

    let again = next_within(&mut subscription, 100).await.unwrap();
    assert_eq!(again.envelope().id, id);
    assert_eq!(broker.committed_offset("events", "g"), Some(0));
}

#[tokio::test]
async fn test_dropped_delivery_is_redelivered() {
    let broker = ChannelBroker::new();
    broker.publish("events", envelope("A")).await.unwrap();
    let mut subscription = broker.subscribe("events", "g").await.unwrap();

    let first = next_within(&mut subscription, 100).await.unwrap();
    let id = first.envelope().id;
    drop(first);

    let again = next_within(&mut subscription, 100).await.unwrap();
    assert_eq!(again.envelope().id, id);
}

#[tokio::test]
async fn test_single_in_flight_per_group() {
    let broker = ChannelBroker::new();
    broker.publish("events", envelope("A")).await.unwrap();
    broker.publish("events", envelope("B")).await.unwrap();

    let mut first_member = broker.subscribe("events", "g").await.unwrap();
    let mut second_member = broker.subscribe("events", "g").await.unwrap();

    let held = next_within(&mut first_member, 100).await.unwrap();
    assert!(next_within(&mut second_member, 50).await.is_none());

    held.ack().unwrap();
    let next = next_within(&mut second_member, 100).await.unwrap();
    assert_eq!(next.envelope().type_name, "B");
}

#[tokio::test]
async fn test_groups_are_independent() {
    let broker = ChannelBroker::new();
    broker.publish("events", envelope("A")).await.unwrap();

    let mut alpha = broker.subscribe("events", "alpha").await.unwrap();
    let mut beta = broker.subscribe("events", "beta").await.unwrap();

    next_within(&mut alpha, 100).await.unwrap().ack().unwrap();
    let held = next_within(&mut beta, 100).await.unwrap();

    assert_eq!(broker.committed_offset("events", "alpha"), Some(1));
    assert_eq!(broker.committed_offset("events", "beta"), Some(0));
    assert_eq!(broker.pending("events", "beta"), 1);
    held.nack().unwrap();
}

#[tokio::test]
async fn test_unknown_group_has_no_offset() {
    let broker = ChannelBroker::new();
    assert_eq!(broker.committed_offset("events", "nobody"), None);
}
