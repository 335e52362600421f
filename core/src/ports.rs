//! Store and cache ports.
//!
//! Every backend sits behind one of these traits: the `postgres` crate
//! implements the durable-store side, the `redis` crate implements the fast
//! inventory cache, and `orderflow-testing` provides deterministic in-memory
//! doubles. The saga layer is generic over all of them.

use crate::Result;
use crate::domain::{
    InventoryLevel, NewOrder, NewOrderItem, Order, OrderId, OrderItem, OrderStatus, Payment,
    Product, ProductId,
};
use uuid::Uuid;

/// Read-only access to the product catalog.
pub trait ProductStore: Send + Sync {
    /// Fetch the products for the given ids. Missing ids are simply absent
    /// from the result; the caller decides whether that is an error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn find_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>>;
}

/// Orders, order items, and payments in the durable store.
pub trait OrderStore: Send + Sync {
    /// Look up an order by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>>;

    /// Insert a new order with status `Created`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateKey`] when another order already
    /// holds this idempotency key: the unique constraint linearizes
    /// concurrent duplicate submissions, and the loser re-reads the winner.
    async fn insert_order(&self, order: &NewOrder) -> Result<Order>;

    /// Insert the order lines. Prices were snapshotted by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn insert_items(&self, order_id: OrderId, items: &[NewOrderItem]) -> Result<()>;

    /// Guarded status update: `SET status = to WHERE id = ? AND status =
    /// from`. Returns `false` when no row matched, i.e. the order already
    /// moved past `from` (a benign replay) or never existed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn update_status(&self, id: OrderId, from: OrderStatus, to: OrderStatus) -> Result<bool>;

    /// Fetch a single order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn find_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Fetch the lines of an order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn find_items(&self, id: OrderId) -> Result<Vec<OrderItem>>;

    /// Record a payment outcome. Upserts on payment id so event redelivery
    /// rewrites the same row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn record_payment(&self, payment: &Payment) -> Result<()>;
}

/// Per-product stock counters in the durable store.
///
/// The durable store is the authoritative record; under cache outage every
/// reservation decision is made here under a row lock.
pub trait InventoryStore: Send + Sync {
    /// Atomically reserve stock: row-lock the product, check availability,
    /// then move `quantity` from `available` to `reserved`. Returns `false`
    /// when availability is insufficient (not an error).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn reserve_stock(&self, product_id: ProductId, quantity: i64) -> Result<bool>;

    /// Move `quantity` from `reserved` back to `available`, compensating an
    /// earlier reservation. Guarded by `reserved >= quantity` so replays are
    /// no-ops; a skipped release is logged by the caller and repaired by
    /// reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn release_stock(&self, product_id: ProductId, quantity: i64) -> Result<()>;

    /// Remove `quantity` from `reserved`, completing a sale. Guarded by
    /// `reserved >= quantity` so replays are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn commit_stock(&self, product_id: ProductId, quantity: i64) -> Result<()>;

    /// All inventory rows, for cache seeding and reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn levels(&self) -> Result<Vec<InventoryLevel>>;

    /// A single inventory row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn level(&self, product_id: ProductId) -> Result<Option<InventoryLevel>>;
}

/// The fast in-memory inventory counters.
///
/// The only property the saga relies on is that each operation executes as a
/// single indivisible unit per key; any engine with atomic read-modify-write
/// on a composite value qualifies.
pub trait InventoryCache: Send + Sync {
    /// RESERVE: if `available >= quantity`, move it into `reserved` and
    /// return `true`; otherwise mutate nothing and return `false`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the cache is unreachable or
    /// the key was never seeded; the coordinator then falls back to the
    /// durable store.
    async fn try_reserve(&self, product_id: ProductId, quantity: i64) -> Result<bool>;

    /// RELEASE: unconditionally move `quantity` from `reserved` back to
    /// `available`, compensating an earlier RESERVE.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the cache is unreachable.
    async fn release(&self, product_id: ProductId, quantity: i64) -> Result<()>;

    /// COMMIT: if `reserved >= quantity`, subtract it and return `true`;
    /// otherwise mutate nothing and return `false`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the cache is unreachable.
    async fn commit(&self, product_id: ProductId, quantity: i64) -> Result<bool>;

    /// Overwrite the counters for a product with durable-store values.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the cache is unreachable.
    async fn seed(&self, level: &InventoryLevel) -> Result<()>;

    /// Read `(available, reserved)`, or `None` when the key was never
    /// seeded. Used by the reconciliation sweep.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the cache is unreachable.
    async fn read(&self, product_id: ProductId) -> Result<Option<(i64, i64)>>;
}

/// The processed-events ledger: a persistent set of event ids whose effects
/// have been fully applied. Presence gates redelivered events into no-ops.
pub trait EventLedger: Send + Sync {
    /// Whether this event's effects were already applied.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn is_processed(&self, event_id: Uuid) -> Result<bool>;

    /// Append the event id to the ledger. Conflict-do-nothing so concurrent
    /// duplicate deliveries both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the store is unreachable.
    async fn mark_processed(&self, event_id: Uuid, event_type: &str) -> Result<()>;
}
