use super::*;

#[test]
fn test_messaging_config_default() {
    let config = MessagingConfig::default();
    assert_eq!(config.messaging_type, MessagingType::Channel);
    assert_eq!(config.kafka.bootstrap_servers, "localhost:9092");
}

#[test]
fn test_messaging_config_from_yaml() {
    let config: MessagingConfig = serde_yaml::from_str(
        r#"
type: kafka
kafka:
  bootstrap_servers: "broker-1:9092,broker-2:9092"
  security_protocol: SASL_SSL
"#,
    )
    .unwrap();

    assert_eq!(config.messaging_type, MessagingType::Kafka);
    assert_eq!(config.kafka.bootstrap_servers, "broker-1:9092,broker-2:9092");
    assert_eq!(config.kafka.security_protocol.as_deref(), Some("SASL_SSL"));
    assert!(config.kafka.sasl_username.is_none());
}

#[test]
fn test_topic_naming_shared() {
    let naming = TopicNaming::Shared("events".to_string());
    assert_eq!(naming.topic_for("UserRegistered"), "events");
    assert_eq!(naming.topic_for("UserEmailUpdated"), "events");
}

#[test]
fn test_topic_naming_per_type() {
    assert_eq!(TopicNaming::PerType.topic_for("UserRegistered"), "UserRegistered");
}

#[test]
fn test_topic_naming_prefixed() {
    let naming = TopicNaming::Prefixed("users".to_string());
    assert_eq!(naming.topic_for("UserRegistered"), "users.UserRegistered");
}

#[test]
fn test_transient_classification() {
    assert!(BusError::Publish("timeout".to_string()).is_transient());
    assert!(BusError::Connection("refused".to_string()).is_transient());
    assert!(!BusError::Outbox("constraint".to_string()).is_transient());
    assert!(!BusError::Subscribe("bad group".to_string()).is_transient());
}

#[tokio::test]
async fn test_init_broker_channel() {
    let broker = init_broker(&MessagingConfig::default()).await.unwrap();

    broker
        .publisher
        .publish("events", Envelope::new("Ping", b"{}".to_vec()))
        .await
        .unwrap();

    let mut subscription = broker.subscriber.subscribe("events", "g").await.unwrap();
    let delivery = subscription.next().await.unwrap().unwrap();
    assert_eq!(delivery.envelope().type_name, "Ping");
    delivery.ack().unwrap();
}

#[tokio::test]
async fn test_arc_publisher_delegates() {
    let mock = Arc::new(MockPublisher::new());
    let publisher: Arc<dyn Publisher> = mock.clone();

    publisher
        .publish("t", Envelope::new("Ping", vec![]))
        .await
        .unwrap();

    assert_eq!(mock.published_count().await, 1);
}
