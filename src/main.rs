//! OpenSASE Storefront - order and stock service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_storefront::config::{Config, LogFormat};
use opensase_storefront::http::{router, AppState};
use opensase_storefront::publisher::EventBus;
use opensase_storefront::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Text => tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer().json()).init(),
    }

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(config.db_max_connections).connect(url).await?;
            if config.run_migrations { sqlx::migrate!("./migrations").run(&db).await?; }
            Arc::new(PgStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let events = EventBus::connect(config.nats_url.as_deref()).await;

    let app = router(AppState::new(store, events)).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    let addr = config.bind_address();
    tracing::info!("OpenSASE Storefront listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
