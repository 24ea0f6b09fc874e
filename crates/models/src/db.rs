use std::time::Duration;

use configs::DatabaseConfig;
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;

/// Connect with pool settings from the `[database]` section.
///
/// In-memory sqlite is private to a single connection, so the pool is pinned
/// to one connection for `sqlite::memory:` URLs.
pub async fn connect_with_config(cfg: &DatabaseConfig) -> anyhow::Result<DatabaseConnection> {
    let mut opts = ConnectOptions::new(cfg.url.clone());
    let (min, max) = if cfg.url.contains(":memory:") { (1, 1) } else { (cfg.min_connections, cfg.max_connections) };
    opts.max_connections(max)
        .min_connections(min)
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
        .sqlx_logging(cfg.sqlx_logging);
    let db = Database::connect(opts).await?;
    Ok(db)
}

/// Connect and bring the schema up to date.
pub async fn connect_and_migrate(cfg: &DatabaseConfig) -> anyhow::Result<DatabaseConnection> {
    let db = connect_with_config(cfg).await?;
    migration::Migrator::up(&db, None).await?;
    info!(event = "db_migrated", "database schema up to date");
    Ok(db)
}

/// Fresh in-memory database with all migrations applied.
pub async fn connect_memory() -> anyhow::Result<DatabaseConnection> {
    let cfg = DatabaseConfig { url: "sqlite::memory:".into(), ..DatabaseConfig::default() };
    connect_and_migrate(&cfg).await
}
