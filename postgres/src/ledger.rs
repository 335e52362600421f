//! Processed-events ledger.
//!
//! Append-only set of event ids; a row means "the effects of this event have
//! been applied". The insert is the commit point of each event handler, so
//! it is only issued after every per-item inventory call succeeded.

use crate::backend_err;
use orderflow_core::Result;
use orderflow_core::ports::EventLedger;
use sqlx::PgPool;
use uuid::Uuid;

/// Ledger over the `processed_events` table.
pub struct PgEventLedger {
    pool: PgPool,
}

impl PgEventLedger {
    /// Create a ledger over the shared pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl EventLedger for PgEventLedger {
    async fn is_processed(&self, event_id: Uuid) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            r"
            SELECT 1
            FROM processed_events
            WHERE event_id = $1
            ",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(row.is_some())
    }

    async fn mark_processed(&self, event_id: Uuid, event_type: &str) -> Result<()> {
        // Conflict-do-nothing tolerates concurrent duplicate deliveries.
        sqlx::query(
            r"
            INSERT INTO processed_events (event_id, event_type)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        metrics::counter!("orderflow.events.processed", "event_type" => event_type.to_string())
            .increment(1);
        Ok(())
    }
}
