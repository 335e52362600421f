//! PostgreSQL durable-store adapters for orderflow.
//!
//! The durable store is the authoritative record for orders, items,
//! payments, inventory counters, and the processed-events ledger. It also
//! supplies the row-locked reservation fallback used whenever the fast
//! inventory cache is unavailable.
//!
//! Each concern gets its own store struct over a shared [`sqlx::PgPool`]:
//! [`PgProductStore`], [`PgOrderStore`], [`PgInventoryStore`], and
//! [`PgEventLedger`].

mod catalog;
mod inventory;
mod ledger;
mod orders;

pub use catalog::PgProductStore;
pub use inventory::PgInventoryStore;
pub use ledger::PgEventLedger;
pub use orders::{PgOrderStore, find_payment};

use orderflow_core::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Acquire deadline for every pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Connect a pool to the durable store.
///
/// # Errors
///
/// Returns [`Error::Backend`] when the database is unreachable.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(|e| Error::Backend(format!("failed to connect to postgres: {e}")))?;

    tracing::info!("connected durable store");
    Ok(pool)
}

/// Apply the embedded schema migrations.
///
/// # Errors
///
/// Returns [`Error::Backend`] when a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Backend(format!("migration failed: {e}")))?;

    tracing::info!("durable store migrations applied");
    Ok(())
}

pub(crate) fn backend_err(e: sqlx::Error) -> Error {
    Error::Backend(e.to_string())
}
