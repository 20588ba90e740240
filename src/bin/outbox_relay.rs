//! outbox-relay: outbox forwarder and event router
//!
//! Drains committed outbox rows to the broker and runs the router that
//! splits them into per-type topics and feeds the user handlers.
//!
//! ## Architecture
//! ```text
//! [users + outbox_messages] --(relay)--> events --(splitter)--> <TypeName>
//!                                                                  |
//!                                                                  v
//!                                                         typed handlers
//! ```
//!
//! ## Configuration
//! - OUTBOX_RELAY_CONFIG: Path to the YAML config file (default: config.yaml)
//! - OUTBOX_RELAY__<SECTION>__<KEY>: Override any config value
//! - OUTBOX_RELAY_LOG: Log filter (default: info)

use std::sync::Arc;

use tracing::{error, info, warn};

use outbox_relay::bus::{init_broker, TopicNaming};
use outbox_relay::config::Config;
use outbox_relay::cqrs::EventProcessor;
use outbox_relay::outbox::{OutboxRelay, RelayConfig};
use outbox_relay::router::{Instrument, Recoverer, Router};
use outbox_relay::runtime;
use outbox_relay::storage::{init_storage, sqlite, StorageType};
use outbox_relay::users::clients::{HttpCrmClient, HttpEmailSender};
use outbox_relay::users::{event_codec, handlers, UserService};
use outbox_relay::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load(None)?;
    init_tracing(&config.log);

    let codec = Arc::new(event_codec()?);

    let stores = match config.storage.storage_type {
        StorageType::Sqlite => {
            let pool = sqlite::connect(&config.storage).await?;
            let stores = sqlite::init_stores(pool.clone()).await?;
            UserService::new(pool, codec.clone(), &config.outbox).init().await?;
            stores
        }
        StorageType::Postgres => {
            warn!("User tables are SQLite-only; relaying existing outbox rows");
            init_storage(&config.storage).await?
        }
    };

    let broker = init_broker(&config.messaging).await?;

    let mut router = Router::new(broker.subscriber.clone(), config.router.clone());
    router.add_middleware(Recoverer).add_middleware(Instrument);
    router.add_splitter(broker.publisher.clone())?;

    let processor = EventProcessor::new(codec, TopicNaming::PerType);
    handlers::register_handlers(
        &processor,
        &mut router,
        Arc::new(HttpEmailSender::new(&config.collaborators)?),
        Arc::new(HttpCrmClient::new(&config.collaborators)?),
    )?;

    let relay = OutboxRelay::from_stores(
        &stores,
        broker.publisher.clone(),
        RelayConfig::from(&config.outbox),
    );

    info!(
        outbox_topic = %config.outbox.topic,
        events_topic = %config.router.events_topic,
        "outbox-relay starting"
    );

    runtime::run(router, relay, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    info!("outbox-relay stopped");
    Ok(())
}
