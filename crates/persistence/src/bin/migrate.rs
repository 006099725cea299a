//! Applies the database migrations and exits.

use persistence::{PersistenceConfig, PgDatabase};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    let config = PersistenceConfig::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database = PgDatabase::connect(&config)
        .await
        .expect("failed to connect to database");
    tracing::info!(max_connections = config.max_connections, "connected");

    database
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("migrations applied");
}
