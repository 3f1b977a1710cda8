use anyhow::Result;
use booking_service::api::{self, AppState};
use booking_service::auth::SessionIssuer;
use booking_service::config::{Config, StoreBackend};
use booking_service::outbox::{EventPublisher, KafkaPublisher, LogPublisher, OutboxProcessor};
use booking_service::reconcile::Reconciler;
use booking_service::store::{memory::InMemoryStore, postgres::PgStore, RecordStore};
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

async fn open_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    match config.store {
        StoreBackend::Memory => {
            warn!("Using the in-memory store, nothing will survive a restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Postgres => {
            info!("Running database migrations...");
            let mut conn = PgConnection::establish(&config.database_url)?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
            info!("Migrations completed successfully");

            let manager = diesel_async::pooled_connection::AsyncDieselConnectionManager::<
                AsyncPgConnection,
            >::new(&config.database_url);
            let pool = Pool::builder().build(manager).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

fn publisher(config: &Config) -> Result<Arc<dyn EventPublisher>> {
    let Some(brokers) = &config.kafka_brokers else {
        warn!("KAFKA_BROKERS not set, lease events will only be logged");
        return Ok(Arc::new(LogPublisher));
    };

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "5000")
        .create()?;
    Ok(Arc::new(KafkaPublisher::new(producer, config.lease_topic.clone())))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let config = Config::parse();

    let store = open_store(&config).await?;

    let outbox_processor =
        OutboxProcessor::new(store.clone(), publisher(&config)?, config.outbox_interval());
    tokio::spawn(async move {
        outbox_processor.run().await;
    });

    let app_state = AppState::new(
        store,
        config.policy(),
        SessionIssuer::new(&config.jwt_secret, config.session_ttl()),
        config.bcrypt_cost,
        config.admin_key.clone(),
    );
    if app_state.admin_key.is_none() {
        warn!("ADMIN_KEY not set, admin routes are disabled");
    }

    if let Some(every) = config.reconcile_interval() {
        let reconciler = Reconciler::new(app_state.orchestrator.ledger().clone(), every);
        tokio::spawn(async move {
            reconciler.run().await;
        });
    }

    let app = api::create_router(app_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    info!("Booking service started on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
