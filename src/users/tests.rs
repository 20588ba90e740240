use super::*;
use crate::storage::sqlite::{connect_in_memory, init_stores};
use crate::storage::{OutboxPosition, OutboxStore};

async fn service() -> (UserService, Arc<dyn OutboxStore>) {
    let pool = connect_in_memory().await.unwrap();
    let stores = init_stores(pool.clone()).await.unwrap();
    let codec = Arc::new(event_codec().unwrap());
    let service = UserService::new(pool, codec, &OutboxConfig::default());
    service.init().await.unwrap();
    (service, stores.outbox)
}

#[tokio::test]
async fn test_register_stores_user_and_event() {
    let (service, outbox) = service().await;

    let user = service.register("Ann", "ann@example.com").await.unwrap();

    assert_eq!(service.get(user.id).await.unwrap().unwrap().email, "ann@example.com");

    let rows = outbox
        .fetch_after("events_to_forward", OutboxPosition::ZERO, 10)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].destination, "events");
    assert_eq!(rows[0].envelope.type_name, "UserRegistered");

    let event: UserRegistered = event_codec().unwrap().decode_as(&rows[0].envelope).unwrap();
    assert_eq!(event.user_id, user.id);
    assert_eq!(event.name, "Ann");
}

#[tokio::test]
async fn test_register_rejects_empty_input() {
    let (service, outbox) = service().await;

    let err = service.register("", "ann@example.com").await.unwrap_err();

    assert!(matches!(err, UserError::InvalidInput(_)));
    assert_eq!(outbox.count("events_to_forward").await.unwrap(), 0);
}

#[tokio::test]
async fn test_change_email_appends_update_event() {
    let (service, outbox) = service().await;
    let user = service.register("Ann", "old@example.com").await.unwrap();

    service.change_email(user.id, "new@example.com").await.unwrap();

    assert_eq!(service.get(user.id).await.unwrap().unwrap().email, "new@example.com");

    let rows = outbox
        .fetch_after("events_to_forward", OutboxPosition::ZERO, 10)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let event: UserEmailUpdated = event_codec().unwrap().decode_as(&rows[1].envelope).unwrap();
    assert_eq!(event.old_email, "old@example.com");
    assert_eq!(event.new_email, "new@example.com");
}

#[tokio::test]
async fn test_change_email_of_unknown_user_writes_nothing() {
    let (service, outbox) = service().await;
    let id = Uuid::now_v7();

    let err = service.change_email(id, "new@example.com").await.unwrap_err();

    assert!(matches!(err, UserError::NotFound(missing) if missing == id));
    assert_eq!(outbox.count("events_to_forward").await.unwrap(), 0);
}

#[tokio::test]
async fn test_get_unknown_user() {
    let (service, _outbox) = service().await;
    assert_eq!(service.get(Uuid::now_v7()).await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_outbox_append_rolls_back_user() {
    // No outbox table: the append fails after the users insert.
    let pool = connect_in_memory().await.unwrap();
    let codec = Arc::new(event_codec().unwrap());
    let service = UserService::new(pool.clone(), codec, &OutboxConfig::default());
    service.init().await.unwrap();

    let err = service.register("Ann", "ann@example.com").await.unwrap_err();

    assert!(matches!(err, UserError::Publish(_)));
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(users, 0);
}
