//! Inventory counters with the row-locked reservation fallback.
//!
//! `reserve_stock` is the correctness backstop of the whole system: when the
//! fast cache is unreachable, every reservation decision serializes on the
//! product's row lock, so oversell stays impossible under arbitrary
//! concurrency.

use crate::backend_err;
use orderflow_core::Result;
use orderflow_core::domain::{InventoryLevel, ProductId};
use orderflow_core::ports::InventoryStore;
use sqlx::{PgPool, Row};

/// Durable inventory counters in the `inventory` table.
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    /// Create a store over the shared pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_level(row: &sqlx::postgres::PgRow) -> InventoryLevel {
    InventoryLevel {
        product_id: ProductId::new(row.get("product_id")),
        available: row.get("available"),
        reserved: row.get("reserved"),
        updated_at: row.get("updated_at"),
    }
}

impl InventoryStore for PgInventoryStore {
    async fn reserve_stock(&self, product_id: ProductId, quantity: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let row = sqlx::query(
            r"
            SELECT available
            FROM inventory
            WHERE product_id = $1
            FOR UPDATE
            ",
        )
        .bind(product_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend_err)?;

        let Some(row) = row else {
            tracing::warn!(product_id = %product_id, "no inventory row for reservation");
            tx.rollback().await.map_err(backend_err)?;
            return Ok(false);
        };

        let available: i64 = row.get("available");
        if available < quantity {
            tx.rollback().await.map_err(backend_err)?;
            return Ok(false);
        }

        sqlx::query(
            r"
            UPDATE inventory
            SET available = available - $2,
                reserved = reserved + $2,
                updated_at = now()
            WHERE product_id = $1
            ",
        )
        .bind(product_id.get())
        .bind(quantity)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;

        metrics::counter!("orderflow.store.reserved").increment(1);
        Ok(true)
    }

    async fn release_stock(&self, product_id: ProductId, quantity: i64) -> Result<()> {
        // Guarded by `reserved >= quantity`: a replayed release (event
        // redelivery after a crash) matches zero rows instead of driving
        // `reserved` negative into the check constraint.
        let result = sqlx::query(
            r"
            UPDATE inventory
            SET available = available + $2,
                reserved = reserved - $2,
                updated_at = now()
            WHERE product_id = $1 AND reserved >= $2
            ",
        )
        .bind(product_id.get())
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                product_id = %product_id,
                quantity = quantity,
                "release matched no inventory row; counters repaired by reconciliation"
            );
        } else {
            metrics::counter!("orderflow.store.released").increment(1);
        }
        Ok(())
    }

    async fn commit_stock(&self, product_id: ProductId, quantity: i64) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE inventory
            SET reserved = reserved - $2,
                updated_at = now()
            WHERE product_id = $1 AND reserved >= $2
            ",
        )
        .bind(product_id.get())
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                product_id = %product_id,
                quantity = quantity,
                "commit matched no inventory row; counters repaired by reconciliation"
            );
        } else {
            metrics::counter!("orderflow.store.committed").increment(1);
        }
        Ok(())
    }

    async fn levels(&self) -> Result<Vec<InventoryLevel>> {
        let rows = sqlx::query(
            r"
            SELECT product_id, available, reserved, updated_at
            FROM inventory
            ORDER BY product_id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(rows.iter().map(row_to_level).collect())
    }

    async fn level(&self, product_id: ProductId) -> Result<Option<InventoryLevel>> {
        let row = sqlx::query(
            r"
            SELECT product_id, available, reserved, updated_at
            FROM inventory
            WHERE product_id = $1
            ",
        )
        .bind(product_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(row.as_ref().map(row_to_level))
    }
}
