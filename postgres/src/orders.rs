//! Orders, order items, and payments.

use crate::backend_err;
use orderflow_core::domain::{
    Money, NewOrder, NewOrderItem, Order, OrderId, OrderItem, OrderStatus, Payment, PaymentStatus,
    ProductId, UserId,
};
use orderflow_core::ports::OrderStore;
use orderflow_core::{Error, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Orders and their owned rows in the durable store.
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a store over the shared pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order> {
    let status: String = row.get("status");
    Ok(Order {
        id: OrderId::new(row.get("id")),
        user_id: UserId::new(row.get("user_id")),
        total: Money::from_cents(row.get("total_cents")),
        status: OrderStatus::parse(&status)?,
        idempotency_key: row.get("idempotency_key"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl OrderStore for PgOrderStore {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, total_cents, status, idempotency_key, created_at, updated_at
            FROM orders
            WHERE idempotency_key = $1
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn insert_order(&self, order: &NewOrder) -> Result<Order> {
        let row = sqlx::query(
            r"
            INSERT INTO orders (user_id, total_cents, status, idempotency_key)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, total_cents, status, idempotency_key, created_at, updated_at
            ",
        )
        .bind(order.user_id.get())
        .bind(order.total.cents())
        .bind(OrderStatus::Created.as_str())
        .bind(&order.idempotency_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => Error::DuplicateKey,
            _ => backend_err(e),
        })?;

        let order = row_to_order(&row)?;
        tracing::info!(order_id = %order.id, user_id = %order.user_id, "order created");
        metrics::counter!("orderflow.orders.created").increment(1);
        Ok(order)
    }

    async fn insert_items(&self, order_id: OrderId, items: &[NewOrderItem]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        for item in items {
            sqlx::query(
                r"
                INSERT INTO order_items (order_id, product_id, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(order_id.get())
            .bind(item.product_id.get())
            .bind(item.quantity)
            .bind(item.unit_price.cents())
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        }
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn update_status(&self, id: OrderId, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE orders
            SET status = $3, updated_at = now()
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(id.get())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        let advanced = result.rows_affected() > 0;
        if advanced {
            tracing::info!(order_id = %id, from = %from, to = %to, "order status advanced");
        }
        Ok(advanced)
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, total_cents, status, idempotency_key, created_at, updated_at
            FROM orders
            WHERE id = $1
            ",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn find_items(&self, id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r"
            SELECT id, order_id, product_id, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(rows
            .iter()
            .map(|row| OrderItem {
                id: row.get("id"),
                order_id: OrderId::new(row.get("order_id")),
                product_id: ProductId::new(row.get("product_id")),
                quantity: row.get("quantity"),
                unit_price: Money::from_cents(row.get("unit_price_cents")),
            })
            .collect())
    }

    async fn record_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO payments (id, order_id, status, provider_tx_id, amount_cents)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                provider_tx_id = EXCLUDED.provider_tx_id
            ",
        )
        .bind(payment.id)
        .bind(payment.order_id.get())
        .bind(payment.status.as_str())
        .bind(payment.provider_tx_id.as_deref())
        .bind(payment.amount.cents())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }
}

/// Fetch a payment by id. Not part of the saga's port; used by the
/// integration tests to assert recorded outcomes.
///
/// # Errors
///
/// Returns [`Error::Backend`] when the store is unreachable or the status
/// column holds an unknown value.
pub async fn find_payment(pool: &PgPool, id: Uuid) -> Result<Option<Payment>> {
    let row = sqlx::query(
        r"
        SELECT id, order_id, status, provider_tx_id, amount_cents
        FROM payments
        WHERE id = $1
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(backend_err)?;

    row.map(|row| {
        let status: String = row.get("status");
        Ok(Payment {
            id: row.get("id"),
            order_id: OrderId::new(row.get("order_id")),
            status: PaymentStatus::parse(&status)?,
            provider_tx_id: row.get("provider_tx_id"),
            amount: Money::from_cents(row.get("amount_cents")),
        })
    })
    .transpose()
}
