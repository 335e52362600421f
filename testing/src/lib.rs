//! # Orderflow Testing
//!
//! In-memory implementations of every backend port, for deterministic tests
//! of the saga and inventory coordinators without Postgres, Redis, or a
//! broker.
//!
//! The doubles keep the contracts that matter to the saga:
//!
//! - [`MemInventoryCache`] executes each counter operation under one lock,
//!   mirroring the cache's atomic-script contract, and can be taken offline
//!   to exercise the durable-store fallback path
//! - [`MemInventoryStore`] serializes reservations the way row locks do
//! - [`MemOrderStore`] enforces the idempotency-key unique constraint and the
//!   guarded compare-and-set status update
//! - [`MemEventBus`] captures published envelopes (and can be made to fail)
//! - [`MemEventLedger`] is the processed-events set

use chrono::Utc;
use orderflow_core::bus::{BusError, EventBus};
use orderflow_core::domain::{
    InventoryLevel, NewOrder, NewOrderItem, Order, OrderId, OrderItem, OrderStatus, Payment,
    Product, ProductId,
};
use orderflow_core::event::EventEnvelope;
use orderflow_core::ports::{EventLedger, InventoryCache, InventoryStore, OrderStore, ProductStore};
use orderflow_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Read-only product catalog backed by a map.
pub struct MemProductStore {
    products: HashMap<ProductId, Product>,
}

impl MemProductStore {
    /// Build a catalog from the given products.
    #[must_use]
    pub fn new(products: Vec<Product>) -> Self {
        Self { products: products.into_iter().map(|p| (p.id, p)).collect() }
    }
}

impl ProductStore for MemProductStore {
    async fn find_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        Ok(ids.iter().filter_map(|id| self.products.get(id).cloned()).collect())
    }
}

/// Durable inventory counters behind a single lock, which serializes
/// concurrent reservations the way row locks do.
#[derive(Default)]
pub struct MemInventoryStore {
    levels: Mutex<HashMap<ProductId, (i64, i64)>>,
}

impl MemInventoryStore {
    /// Seed with `(product, available)` pairs; `reserved` starts at zero.
    #[must_use]
    pub fn with_stock(stock: &[(ProductId, i64)]) -> Self {
        Self {
            levels: Mutex::new(stock.iter().map(|&(id, avail)| (id, (avail, 0))).collect()),
        }
    }
}

impl InventoryStore for MemInventoryStore {
    async fn reserve_stock(&self, product_id: ProductId, quantity: i64) -> Result<bool> {
        let mut levels = self.levels.lock().await;
        match levels.get_mut(&product_id) {
            Some((available, reserved)) if *available >= quantity => {
                *available -= quantity;
                *reserved += quantity;
                Ok(true)
            },
            Some(_) | None => Ok(false),
        }
    }

    async fn release_stock(&self, product_id: ProductId, quantity: i64) -> Result<()> {
        let mut levels = self.levels.lock().await;
        if let Some((available, reserved)) = levels.get_mut(&product_id) {
            if *reserved >= quantity {
                *available += quantity;
                *reserved -= quantity;
            }
        }
        Ok(())
    }

    async fn commit_stock(&self, product_id: ProductId, quantity: i64) -> Result<()> {
        let mut levels = self.levels.lock().await;
        if let Some((_, reserved)) = levels.get_mut(&product_id) {
            if *reserved >= quantity {
                *reserved -= quantity;
            }
        }
        Ok(())
    }

    async fn levels(&self) -> Result<Vec<InventoryLevel>> {
        let levels = self.levels.lock().await;
        Ok(levels
            .iter()
            .map(|(&product_id, &(available, reserved))| InventoryLevel {
                product_id,
                available,
                reserved,
                updated_at: Utc::now(),
            })
            .collect())
    }

    async fn level(&self, product_id: ProductId) -> Result<Option<InventoryLevel>> {
        let levels = self.levels.lock().await;
        Ok(levels.get(&product_id).map(|&(available, reserved)| InventoryLevel {
            product_id,
            available,
            reserved,
            updated_at: Utc::now(),
        }))
    }
}

/// Fast inventory cache double. One lock per operation mirrors the atomic
/// per-key script contract; `set_online(false)` makes every call fail so
/// tests can drive the durable-store fallback.
pub struct MemInventoryCache {
    counters: Mutex<HashMap<ProductId, (i64, i64)>>,
    online: AtomicBool,
}

impl MemInventoryCache {
    /// Empty (unseeded) cache, online.
    #[must_use]
    pub fn new() -> Self {
        Self { counters: Mutex::new(HashMap::new()), online: AtomicBool::new(true) }
    }

    /// Seeded cache, online.
    #[must_use]
    pub fn with_stock(stock: &[(ProductId, i64)]) -> Self {
        Self {
            counters: Mutex::new(stock.iter().map(|&(id, avail)| (id, (avail, 0))).collect()),
            online: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Backend("inventory cache offline".to_string()))
        }
    }
}

impl Default for MemInventoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryCache for MemInventoryCache {
    async fn try_reserve(&self, product_id: ProductId, quantity: i64) -> Result<bool> {
        self.check_online()?;
        let mut counters = self.counters.lock().await;
        let Some((available, reserved)) = counters.get_mut(&product_id) else {
            return Err(Error::Backend(format!("inventory key {product_id} not seeded")));
        };
        if *available < quantity {
            return Ok(false);
        }
        *available -= quantity;
        *reserved += quantity;
        Ok(true)
    }

    async fn release(&self, product_id: ProductId, quantity: i64) -> Result<()> {
        self.check_online()?;
        let mut counters = self.counters.lock().await;
        let Some((available, reserved)) = counters.get_mut(&product_id) else {
            return Err(Error::Backend(format!("inventory key {product_id} not seeded")));
        };
        *available += quantity;
        *reserved -= quantity;
        Ok(())
    }

    async fn commit(&self, product_id: ProductId, quantity: i64) -> Result<bool> {
        self.check_online()?;
        let mut counters = self.counters.lock().await;
        let Some((_, reserved)) = counters.get_mut(&product_id) else {
            return Err(Error::Backend(format!("inventory key {product_id} not seeded")));
        };
        if *reserved < quantity {
            return Ok(false);
        }
        *reserved -= quantity;
        Ok(true)
    }

    async fn seed(&self, level: &InventoryLevel) -> Result<()> {
        self.check_online()?;
        let mut counters = self.counters.lock().await;
        counters.insert(level.product_id, (level.available, level.reserved));
        Ok(())
    }

    async fn read(&self, product_id: ProductId) -> Result<Option<(i64, i64)>> {
        self.check_online()?;
        let counters = self.counters.lock().await;
        Ok(counters.get(&product_id).copied())
    }
}

#[derive(Default)]
struct OrderStoreInner {
    orders: HashMap<OrderId, Order>,
    items: HashMap<OrderId, Vec<OrderItem>>,
    by_key: HashMap<String, OrderId>,
    payments: HashMap<Uuid, Payment>,
    next_order_id: i64,
    next_item_id: i64,
}

/// Orders, items, and payments behind one lock, with the idempotency-key
/// unique constraint and guarded status updates of the real store.
#[derive(Default)]
pub struct MemOrderStore {
    inner: Mutex<OrderStoreInner>,
}

impl MemOrderStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded payments, for assertions.
    pub async fn payments(&self) -> Vec<Payment> {
        self.inner.lock().await.payments.values().cloned().collect()
    }

    /// Current status of an order, for assertions.
    pub async fn status_of(&self, id: OrderId) -> Option<OrderStatus> {
        self.inner.lock().await.orders.get(&id).map(|o| o.status)
    }
}

impl OrderStore for MemOrderStore {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner.by_key.get(key).and_then(|id| inner.orders.get(id)).cloned())
    }

    async fn insert_order(&self, order: &NewOrder) -> Result<Order> {
        let mut inner = self.inner.lock().await;
        if inner.by_key.contains_key(&order.idempotency_key) {
            return Err(Error::DuplicateKey);
        }
        inner.next_order_id += 1;
        let id = OrderId::new(inner.next_order_id);
        let now = Utc::now();
        let persisted = Order {
            id,
            user_id: order.user_id,
            total: order.total,
            status: OrderStatus::Created,
            idempotency_key: Some(order.idempotency_key.clone()),
            created_at: now,
            updated_at: now,
        };
        inner.by_key.insert(order.idempotency_key.clone(), id);
        inner.orders.insert(id, persisted.clone());
        Ok(persisted)
    }

    async fn insert_items(&self, order_id: OrderId, items: &[NewOrderItem]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            inner.next_item_id += 1;
            rows.push(OrderItem {
                id: inner.next_item_id,
                order_id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            });
        }
        inner.items.insert(order_id, rows);
        Ok(())
    }

    async fn update_status(&self, id: OrderId, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(true)
            },
            Some(_) | None => Ok(false),
        }
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.inner.lock().await.orders.get(&id).cloned())
    }

    async fn find_items(&self, id: OrderId) -> Result<Vec<OrderItem>> {
        Ok(self.inner.lock().await.items.get(&id).cloned().unwrap_or_default())
    }

    async fn record_payment(&self, payment: &Payment) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.payments.insert(payment.id, payment.clone());
        Ok(())
    }
}

/// Processed-events ledger backed by a set.
#[derive(Default)]
pub struct MemEventLedger {
    processed: Mutex<HashSet<Uuid>>,
}

impl MemEventLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows, for assertions.
    pub async fn len(&self) -> usize {
        self.processed.lock().await.len()
    }

    /// Whether the ledger is empty.
    pub async fn is_empty(&self) -> bool {
        self.processed.lock().await.is_empty()
    }
}

impl EventLedger for MemEventLedger {
    async fn is_processed(&self, event_id: Uuid) -> Result<bool> {
        Ok(self.processed.lock().await.contains(&event_id))
    }

    async fn mark_processed(&self, event_id: Uuid, _event_type: &str) -> Result<()> {
        self.processed.lock().await.insert(event_id);
        Ok(())
    }
}

/// Event bus double that records published envelopes in publication order.
#[derive(Default)]
pub struct MemEventBus {
    published: Mutex<Vec<(String, EventEnvelope)>>,
    fail_publishing: AtomicBool,
}

impl MemEventBus {
    /// Working bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail.
    pub fn set_fail_publishing(&self, fail: bool) {
        self.fail_publishing.store(fail, Ordering::SeqCst);
    }

    /// All captured `(key, envelope)` pairs.
    pub async fn published(&self) -> Vec<(String, EventEnvelope)> {
        self.published.lock().await.clone()
    }

    /// Captured envelopes of one event type.
    pub async fn published_of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(_, e)| e.event_type() == event_type)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl EventBus for MemEventBus {
    fn publish(
        &self,
        key: &str,
        event: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), BusError>> + Send + '_>> {
        let key = key.to_string();
        let event = event.clone();
        Box::pin(async move {
            if self.fail_publishing.load(Ordering::SeqCst) {
                return Err(BusError::PublishFailed {
                    key,
                    reason: "publishing disabled by test".to_string(),
                });
            }
            self.published.lock().await.push((key, event));
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use orderflow_core::domain::Money;

    #[tokio::test]
    async fn cache_reserve_is_conditional() {
        let cache = MemInventoryCache::new();
        cache
            .seed(&InventoryLevel {
                product_id: ProductId::new(1),
                available: 2,
                reserved: 0,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(cache.try_reserve(ProductId::new(1), 2).await.unwrap());
        assert!(!cache.try_reserve(ProductId::new(1), 1).await.unwrap());
        assert_eq!(cache.read(ProductId::new(1)).await.unwrap(), Some((0, 2)));
    }

    #[tokio::test]
    async fn cache_errors_when_offline_or_unseeded() {
        let cache = MemInventoryCache::new();
        assert!(cache.try_reserve(ProductId::new(9), 1).await.is_err());

        cache.set_online(false);
        assert!(cache.read(ProductId::new(9)).await.is_err());
    }

    #[tokio::test]
    async fn order_store_enforces_idempotency_key() {
        let store = MemOrderStore::new();
        let new_order = NewOrder {
            user_id: orderflow_core::domain::UserId::new(1),
            total: Money::from_cents(100),
            idempotency_key: "k1".to_string(),
        };
        let first = store.insert_order(&new_order).await.unwrap();
        assert_eq!(store.insert_order(&new_order).await.unwrap_err(), Error::DuplicateKey);
        let found = store.find_by_idempotency_key("k1").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn guarded_status_update_rejects_stale_expectations() {
        let store = MemOrderStore::new();
        let order = store
            .insert_order(&NewOrder {
                user_id: orderflow_core::domain::UserId::new(1),
                total: Money::from_cents(100),
                idempotency_key: "k2".to_string(),
            })
            .await
            .unwrap();

        assert!(store.update_status(order.id, OrderStatus::Created, OrderStatus::Reserved).await.unwrap());
        assert!(!store.update_status(order.id, OrderStatus::Created, OrderStatus::Reserved).await.unwrap());
        assert_eq!(store.status_of(order.id).await, Some(OrderStatus::Reserved));
    }
}
