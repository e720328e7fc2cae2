use std::time::Duration;

use eyre::{Result, WrapErr};
use sea_orm::{ConnectOptions, Database, DbConn};
use tracing::instrument;

/// Pool sizing shared by the writer and reader pools. Both point at the same
/// primary; the split keeps long read queries from starving writes.
const MIN_CONNECTIONS: u32 = 2;
const MAX_CONNECTIONS: u32 = 20;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Open one connection pool against the primary.
#[instrument(skip(url))]
pub async fn connect_pool(url: &str, label: &str) -> Result<DbConn> {
    let mut options = ConnectOptions::new(url.to_string());
    options
        .min_connections(MIN_CONNECTIONS)
        .max_connections(MAX_CONNECTIONS)
        .connect_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .sqlx_logging(false);
    Database::connect(options)
        .await
        .wrap_err_with(|| format!("connecting {label} pool"))
}
