//! The saga coordinator.
//!
//! One synchronous operation (`submit_order`), one read (`get_order`), and
//! the payment-result handlers invoked by the event transport. The submit
//! path pairs every reservation with a compensating release; the handlers
//! are made idempotent by the processed-events ledger, whose insert is the
//! commit point of "this event's effects have been applied".

use crate::inventory::InventoryCoordinator;
use orderflow_core::bus::EventBus;
use orderflow_core::domain::{
    Money, NewOrder, NewOrderItem, Order, OrderId, OrderItem, OrderStatus, Payment, PaymentStatus,
    Product, ProductId, UserId,
};
use orderflow_core::event::{EventEnvelope, EventKind, ReservedItem};
use orderflow_core::ports::{EventLedger, InventoryCache, InventoryStore, OrderStore, ProductStore};
use orderflow_core::retry::{RetryPolicy, retry_with_backoff};
use orderflow_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Saga budgets.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Deadline for the whole reservation phase of one submit. On expiry the
    /// already-reserved items are released and the order fails.
    pub reservation_deadline: Duration,
    /// Retry budget for the `OrderReserved` publish. If this event is lost,
    /// payment never starts, so the publish is retried synchronously rather
    /// than fired and forgotten.
    pub publish_retry: RetryPolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            reservation_deadline: Duration::from_secs(30),
            publish_retry: RetryPolicy::with_max_retries(5),
        }
    }
}

/// A submitted order line.
#[derive(Debug, Clone)]
pub struct OrderLine {
    /// Product to order.
    pub product_id: ProductId,
    /// Quantity; must be at least 1.
    pub quantity: i64,
}

/// A submit-order request.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Submitting user; must be a positive id.
    pub user_id: UserId,
    /// Lines; must be non-empty.
    pub items: Vec<OrderLine>,
    /// Payment method forwarded to the payment workflow.
    pub payment_method: String,
    /// Client-supplied request key; duplicates return the original order. A
    /// fresh key is generated when absent.
    pub idempotency_key: Option<String>,
}

/// The synchronous outcome of a submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderReceipt {
    /// Persisted order id.
    pub order_id: OrderId,
    /// Status at response time.
    pub status: OrderStatus,
}

/// Drives the order lifecycle across the product catalog, the order store,
/// the inventory coordinator, the processed-events ledger, and the event
/// bus.
pub struct SagaCoordinator<P, O, L, C, S, B> {
    products: Arc<P>,
    orders: Arc<O>,
    ledger: Arc<L>,
    inventory: InventoryCoordinator<C, S>,
    bus: Arc<B>,
    config: SagaConfig,
}

impl<P, O, L, C, S, B> SagaCoordinator<P, O, L, C, S, B>
where
    P: ProductStore,
    O: OrderStore,
    L: EventLedger,
    C: InventoryCache,
    S: InventoryStore,
    B: EventBus,
{
    /// Wire the coordinator; dependencies are constructed leaves-first at
    /// startup.
    #[must_use]
    pub const fn new(
        products: Arc<P>,
        orders: Arc<O>,
        ledger: Arc<L>,
        inventory: InventoryCoordinator<C, S>,
        bus: Arc<B>,
        config: SagaConfig,
    ) -> Self {
        Self { products, orders, ledger, inventory, bus, config }
    }

    /// Submit an order: validate, persist, reserve stock, and announce
    /// `OrderReserved` for the payment workflow.
    ///
    /// The client always gets a synchronous outcome: a `Reserved` receipt
    /// (payment continues asynchronously) or an error after any partial
    /// reservations were compensated.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for empty items, non-positive quantities or
    ///   user id, and unknown products; nothing is persisted
    /// - [`Error::InsufficientStock`] when a reservation is denied; the
    ///   order is persisted with status `FAILED`
    /// - [`Error::Timeout`] when the reservation phase exceeds its deadline
    /// - [`Error::Backend`] for transport failures
    pub async fn submit_order(&self, request: OrderRequest) -> Result<OrderReceipt> {
        Self::validate(&request)?;

        let key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // The key is the sole identity of a submission: a hit returns the
        // existing order with no further side effects.
        if let Some(existing) = self.orders.find_by_idempotency_key(&key).await? {
            tracing::info!(order_id = %existing.id, "duplicate submission, returning existing order");
            return Ok(OrderReceipt { order_id: existing.id, status: existing.status });
        }

        let catalog = self.load_products(&request.items).await?;

        // Snapshot prices now; later catalog changes must not affect this
        // order.
        let mut total = Money::from_cents(0);
        let mut new_items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let product = catalog.get(&line.product_id).ok_or_else(|| {
                Error::InvalidInput(format!("unknown product {}", line.product_id))
            })?;
            total = total.plus(product.price.times(line.quantity));
            new_items.push(NewOrderItem {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: product.price,
            });
        }

        let order = match self
            .orders
            .insert_order(&NewOrder { user_id: request.user_id, total, idempotency_key: key.clone() })
            .await
        {
            Ok(order) => order,
            // Another request with the same key won the insert race; return
            // its order.
            Err(Error::DuplicateKey) => {
                let Some(existing) = self.orders.find_by_idempotency_key(&key).await? else {
                    return Err(Error::Fatal(format!(
                        "order with idempotency key {key} vanished after unique-violation"
                    )));
                };
                tracing::info!(order_id = %existing.id, "lost submission race, returning winner");
                return Ok(OrderReceipt { order_id: existing.id, status: existing.status });
            },
            Err(e) => return Err(e),
        };

        self.orders.insert_items(order.id, &new_items).await?;

        // Informational; consumers must not rely on its delivery.
        let created = EventEnvelope::new(EventKind::OrderCreated {
            order_id: order.id,
            user_id: request.user_id,
            total_cents: total.cents(),
        });
        if let Err(e) = self.bus.publish(&created.partition_key(), &created).await {
            tracing::warn!(order_id = %order.id, error = %e, "failed to publish OrderCreated");
        }

        // Reserve sequentially under the saga deadline, tracking what was
        // actually granted so compensation releases exactly that and nothing
        // more.
        let reserved: Mutex<Vec<(ProductId, i64)>> = Mutex::new(Vec::new());
        let outcome = tokio::time::timeout(
            self.config.reservation_deadline,
            self.reserve_all(&new_items, &reserved),
        )
        .await
        .unwrap_or(Err(Error::Timeout("reservation")));

        if let Err(err) = outcome {
            self.compensate(order.id, &reserved).await;
            if !self
                .orders
                .update_status(order.id, OrderStatus::Created, OrderStatus::Failed)
                .await?
            {
                tracing::warn!(order_id = %order.id, "order left CREATED before failure update");
            }
            metrics::counter!("orderflow.orders.failed").increment(1);
            tracing::info!(order_id = %order.id, error = %err, "order failed during reservation");
            return Err(err);
        }

        if !self
            .orders
            .update_status(order.id, OrderStatus::Created, OrderStatus::Reserved)
            .await?
        {
            return Err(Error::Fatal(format!(
                "order {} changed status during reservation",
                order.id
            )));
        }

        // Not fire-and-forget: losing this event would strand the order in
        // RESERVED with no payment ever starting.
        let reserved_event = EventEnvelope::order_reserved(
            order.id,
            new_items
                .iter()
                .map(|item| ReservedItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
        );
        let publish_key = reserved_event.partition_key();
        if let Err(e) = retry_with_backoff(&self.config.publish_retry, || {
            self.bus.publish(&publish_key, &reserved_event)
        })
        .await
        {
            tracing::error!(
                order_id = %order.id,
                error = %e,
                "failed to publish OrderReserved after retries; order stays RESERVED until operators intervene"
            );
            metrics::counter!("orderflow.events.publish_failures").increment(1);
        }

        metrics::counter!("orderflow.orders.reserved").increment(1);
        Ok(OrderReceipt { order_id: order.id, status: OrderStatus::Reserved })
    }

    /// Read an order and its lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn get_order(&self, id: OrderId) -> Result<(Order, Vec<OrderItem>)> {
        let Some(order) = self.orders.find_order(id).await? else {
            return Err(Error::NotFound { what: "order", id: id.get() });
        };
        let items = self.orders.find_items(id).await?;
        Ok((order, items))
    }

    /// Dispatch one transported event. Payment results are handled; the
    /// saga's own announcements on the shared topic are acknowledged
    /// unprocessed.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error; the consumer then leaves the offset
    /// uncommitted so the event is redelivered.
    pub async fn handle_event(&self, envelope: EventEnvelope) -> Result<()> {
        match envelope.kind {
            EventKind::PaymentSuccess { order_id, payment_id, amount_cents, tx_id } => {
                self.on_payment_success(
                    envelope.event_id,
                    order_id,
                    payment_id,
                    Money::from_cents(amount_cents),
                    tx_id,
                )
                .await
            },
            EventKind::PaymentFailed { order_id, payment_id, reason } => {
                self.on_payment_failed(envelope.event_id, order_id, payment_id, reason).await
            },
            EventKind::OrderCreated { .. } | EventKind::OrderReserved { .. } => Ok(()),
        }
    }

    /// Apply a successful payment: advance to PAID, commit every reserved
    /// line, advance to CONFIRMED, then record the event as processed.
    ///
    /// The ledger insert happens strictly last: if any per-line commit
    /// failed, the event is left unprocessed and redelivery retries the
    /// remainder (replays of already-committed lines are no-ops in both
    /// cache and store).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] when a store call or any stock commit
    /// failed; the caller must not commit the message offset.
    pub async fn on_payment_success(
        &self,
        event_id: Uuid,
        order_id: OrderId,
        payment_id: Uuid,
        amount: Money,
        tx_id: String,
    ) -> Result<()> {
        if self.ledger.is_processed(event_id).await? {
            tracing::debug!(event_id = %event_id, "event already applied");
            return Ok(());
        }

        let Some(_order) = self.orders.find_order(order_id).await? else {
            tracing::error!(event_id = %event_id, order_id = %order_id, "payment event for unknown order, dropping");
            self.ledger.mark_processed(event_id, "PaymentSuccess").await?;
            return Ok(());
        };
        let items = self.orders.find_items(order_id).await?;

        if !self
            .orders
            .update_status(order_id, OrderStatus::Reserved, OrderStatus::Paid)
            .await?
        {
            tracing::debug!(order_id = %order_id, "order not in RESERVED; resuming replayed delivery");
        }

        self.orders
            .record_payment(&Payment {
                id: payment_id,
                order_id,
                status: PaymentStatus::Success,
                provider_tx_id: Some(tx_id),
                amount,
            })
            .await?;

        // Attempt every line before deciding; individual failures are
        // logged, not fatal to the loop.
        let mut failed_commits = 0_usize;
        for item in &items {
            if let Err(e) = self.inventory.commit(item.product_id, item.quantity).await {
                tracing::warn!(
                    order_id = %order_id,
                    product_id = %item.product_id,
                    error = %e,
                    "stock commit failed"
                );
                failed_commits += 1;
            }
        }
        if failed_commits > 0 {
            return Err(Error::Backend(format!(
                "{failed_commits} stock commits failed for order {order_id}; awaiting redelivery"
            )));
        }

        if self
            .orders
            .update_status(order_id, OrderStatus::Paid, OrderStatus::Confirmed)
            .await?
        {
            tracing::info!(order_id = %order_id, "order confirmed");
            metrics::counter!("orderflow.orders.confirmed").increment(1);
        }

        self.ledger.mark_processed(event_id, "PaymentSuccess").await?;
        Ok(())
    }

    /// Apply a failed payment: release every reserved line, advance to
    /// CANCELLED, then record the event as processed. Symmetric to
    /// [`Self::on_payment_success`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] when a store call or any stock release
    /// failed; the caller must not commit the message offset.
    pub async fn on_payment_failed(
        &self,
        event_id: Uuid,
        order_id: OrderId,
        payment_id: Uuid,
        reason: String,
    ) -> Result<()> {
        if self.ledger.is_processed(event_id).await? {
            tracing::debug!(event_id = %event_id, "event already applied");
            return Ok(());
        }

        let Some(order) = self.orders.find_order(order_id).await? else {
            tracing::error!(event_id = %event_id, order_id = %order_id, "payment event for unknown order, dropping");
            self.ledger.mark_processed(event_id, "PaymentFailed").await?;
            return Ok(());
        };
        let items = self.orders.find_items(order_id).await?;

        self.orders
            .record_payment(&Payment {
                id: payment_id,
                order_id,
                status: PaymentStatus::Failed,
                provider_tx_id: None,
                amount: order.total,
            })
            .await?;

        let mut failed_releases = 0_usize;
        for item in &items {
            if let Err(e) = self.inventory.release(item.product_id, item.quantity).await {
                tracing::warn!(
                    order_id = %order_id,
                    product_id = %item.product_id,
                    error = %e,
                    "stock release failed"
                );
                failed_releases += 1;
            }
        }
        if failed_releases > 0 {
            return Err(Error::Backend(format!(
                "{failed_releases} stock releases failed for order {order_id}; awaiting redelivery"
            )));
        }

        if self
            .orders
            .update_status(order_id, OrderStatus::Reserved, OrderStatus::Cancelled)
            .await?
        {
            tracing::info!(order_id = %order_id, reason = %reason, "order cancelled after payment failure");
            metrics::counter!("orderflow.orders.cancelled").increment(1);
        }

        self.ledger.mark_processed(event_id, "PaymentFailed").await?;
        Ok(())
    }

    fn validate(request: &OrderRequest) -> Result<()> {
        if request.user_id.get() < 1 {
            return Err(Error::InvalidInput("user_id must be positive".to_string()));
        }
        if request.items.is_empty() {
            return Err(Error::InvalidInput("order must contain at least one item".to_string()));
        }
        for line in &request.items {
            if line.quantity < 1 {
                return Err(Error::InvalidInput(format!(
                    "quantity for product {} must be at least 1",
                    line.product_id
                )));
            }
        }
        Ok(())
    }

    async fn load_products(&self, lines: &[OrderLine]) -> Result<HashMap<ProductId, Product>> {
        let mut ids: Vec<ProductId> = lines.iter().map(|line| line.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let products = self.products.find_by_ids(&ids).await?;
        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    async fn reserve_all(
        &self,
        items: &[NewOrderItem],
        reserved: &Mutex<Vec<(ProductId, i64)>>,
    ) -> Result<()> {
        for item in items {
            if !self.inventory.reserve(item.product_id, item.quantity).await? {
                return Err(Error::InsufficientStock { product_id: item.product_id });
            }
            reserved.lock().await.push((item.product_id, item.quantity));
        }
        Ok(())
    }

    /// Release, in reverse order, exactly the reservations granted in this
    /// saga. The store writes go through the mirror queue so they land after
    /// the reservations they undo.
    async fn compensate(&self, order_id: OrderId, reserved: &Mutex<Vec<(ProductId, i64)>>) {
        let granted = reserved.lock().await.clone();
        if !granted.is_empty() {
            tracing::info!(
                order_id = %order_id,
                reservations = granted.len(),
                "releasing partial reservations"
            );
        }
        for &(product_id, quantity) in granted.iter().rev() {
            self.inventory.release_queued(product_id, quantity).await;
        }
    }
}
