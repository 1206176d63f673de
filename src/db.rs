use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{error, info};

use crate::error::{AppError, AppResult};

const SCHEMA: &str = include_str!("../migrations/0001_delivery_schema.sql");
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the pool, verify one connection and apply the schema.
pub async fn init_pool(database_url: &str, max_connections: usize) -> AppResult<Pool> {
    let pg_config: PgConfig = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(manager)
        .max_size(max_connections)
        .build()
        .map_err(|e| AppError::Config(format!("db pool: {e}")))?;

    match tokio::time::timeout(CONNECT_TIMEOUT, run_migrations(&pool)).await {
        Ok(Ok(())) => {
            info!(max_connections, "database pool ready");
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(error = %e, "database verification failed");
            Err(e)
        }
        Err(_) => {
            error!(timeout_secs = CONNECT_TIMEOUT.as_secs(), "database connection timed out");
            Err(AppError::Database("connection timeout".into()))
        }
    }
}

async fn run_migrations(pool: &Pool) -> AppResult<()> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    Ok(())
}
