mod schema;
mod models;
mod error;
mod store;
mod gate;
mod window;
mod signature;
mod user_limit;
mod inventory;
mod handlers;
mod outbox;
mod config;
mod api;

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use diesel::PgConnection;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

use anyhow::Result;
use clap::Parser;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use diesel::Connection;
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use tracing::info;
use crate::config::Args;
use crate::handlers::PurchaseHandler;
use crate::store::keyed::RedisStore;
use crate::store::postgres::PgSaleStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let settings = args.settings();

    // Run migrations first
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&args.database_url)?;
    conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let config = diesel_async::pooled_connection::AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
    let pool = Pool::builder().build(config).await?;

    let keyed = RedisStore::connect(&args.redis_url).await?;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &args.kafka_brokers)
        .set("message.timeout.ms", "5000")
        .create()?;

    let sales = PgSaleStore::new(pool.clone());

    let handler = PurchaseHandler::new(
        Arc::new(sales.clone()),
        Arc::new(keyed),
        &settings,
    )
    .map_err(|e| anyhow::anyhow!("Invalid token secret: {}", e))?;

    let outbox_processor = outbox::OutboxProcessor::new(
        Arc::new(sales),
        Arc::new(outbox::KafkaPublisher::new(producer, args.order_topic.clone())),
    );
    tokio::spawn(async move {
        outbox_processor.run().await;
    });

    let app = api::create_router(api::AppState {
        handler: Arc::new(handler),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!(
        port = args.port,
        strategy = ?settings.strategy,
        token_policy = ?settings.token.policy,
        admission_rate = settings.admission.permits_per_second,
        "Flash sale service ready"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
