//! Product catalog reads.

use crate::backend_err;
use orderflow_core::Result;
use orderflow_core::domain::{Money, Product, ProductId};
use orderflow_core::ports::ProductStore;
use sqlx::{PgPool, Row};

/// Read-only access to the `products` table. Catalog rows are created
/// out-of-band and never mutated by the service.
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    /// Create a store over the shared pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ProductStore for PgProductStore {
    async fn find_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query(
            r"
            SELECT id, sku, name, price_cents
            FROM products
            WHERE id = ANY($1)
            ",
        )
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(rows
            .iter()
            .map(|row| Product {
                id: ProductId::new(row.get("id")),
                sku: row.get("sku"),
                name: row.get("name"),
                price: Money::from_cents(row.get("price_cents")),
            })
            .collect())
    }
}
