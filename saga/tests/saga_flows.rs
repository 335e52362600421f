//! End-to-end saga flows over in-memory backends.
//!
//! Covers the full lifecycle: happy path through CONFIRMED, payment-failure
//! compensation, idempotent resubmits, duplicate event deliveries, partial
//! reservation rollback, and the no-oversell guarantee under a concurrent
//! burst.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use orderflow_core::domain::{Money, OrderStatus, PaymentStatus, Product, ProductId, UserId};
use orderflow_core::event::{EventEnvelope, EventKind};
use orderflow_core::ports::{InventoryCache, InventoryStore, OrderStore};
use orderflow_core::retry::RetryPolicy;
use orderflow_core::Error;
use orderflow_saga::{
    InventoryCoordinator, MirrorOp, OrderLine, OrderRequest, SagaConfig, SagaCoordinator,
    mirror_channel,
};
use orderflow_testing::{
    MemEventBus, MemEventLedger, MemInventoryCache, MemInventoryStore, MemOrderStore,
    MemProductStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

type TestSaga = SagaCoordinator<
    MemProductStore,
    MemOrderStore,
    MemEventLedger,
    MemInventoryCache,
    MemInventoryStore,
    MemEventBus,
>;

struct Fixture {
    saga: Arc<TestSaga>,
    orders: Arc<MemOrderStore>,
    cache: Arc<MemInventoryCache>,
    store: Arc<MemInventoryStore>,
    ledger: Arc<MemEventLedger>,
    bus: Arc<MemEventBus>,
    mirror_rx: mpsc::Receiver<MirrorOp>,
}

async fn fixture(products: Vec<Product>, stock: &[(ProductId, i64)]) -> Fixture {
    let product_store = Arc::new(MemProductStore::new(products));
    let orders = Arc::new(MemOrderStore::new());
    let ledger = Arc::new(MemEventLedger::new());
    let cache = Arc::new(MemInventoryCache::new());
    let store = Arc::new(MemInventoryStore::with_stock(stock));
    let bus = Arc::new(MemEventBus::new());

    let (mirror_tx, mirror_rx) = mirror_channel(1024);
    let inventory =
        InventoryCoordinator::new(Arc::clone(&cache), Arc::clone(&store), mirror_tx);
    inventory.seed_cache().await.expect("seeding cannot fail in memory");

    let config = SagaConfig {
        reservation_deadline: Duration::from_secs(5),
        publish_retry: RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        },
    };
    let saga = Arc::new(SagaCoordinator::new(
        product_store,
        Arc::clone(&orders),
        Arc::clone(&ledger),
        inventory,
        Arc::clone(&bus),
        config,
    ));

    Fixture { saga, orders, cache, store, ledger, bus, mirror_rx }
}

/// Drain the mirror queue into the durable store, standing in for the
/// background mirror worker so tests see deterministic store counters.
async fn apply_mirror(fx: &mut Fixture) {
    while let Ok(op) = fx.mirror_rx.try_recv() {
        match op {
            MirrorOp::Reserve { product_id, quantity } => {
                assert!(fx.store.reserve_stock(product_id, quantity).await.unwrap());
            },
            MirrorOp::Release { product_id, quantity } => {
                fx.store.release_stock(product_id, quantity).await.unwrap();
            },
        }
    }
}

fn widget(id: i64, price_cents: i64) -> Product {
    Product {
        id: ProductId::new(id),
        sku: format!("SKU-{id}"),
        name: format!("Product {id}"),
        price: Money::from_cents(price_cents),
    }
}

fn request(user_id: i64, items: &[(i64, i64)], key: Option<&str>) -> OrderRequest {
    OrderRequest {
        user_id: UserId::new(user_id),
        items: items
            .iter()
            .map(|&(product_id, quantity)| OrderLine {
                product_id: ProductId::new(product_id),
                quantity,
            })
            .collect(),
        payment_method: "mock".to_string(),
        idempotency_key: key.map(str::to_string),
    }
}

async fn counters(fx: &Fixture, product_id: i64) -> ((i64, i64), (i64, i64)) {
    let cached = fx.cache.read(ProductId::new(product_id)).await.unwrap().unwrap();
    let level = fx.store.level(ProductId::new(product_id)).await.unwrap().unwrap();
    (cached, (level.available, level.reserved))
}

#[tokio::test]
async fn happy_path_reserves_pays_and_confirms() {
    let mut fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let receipt = fx.saga.submit_order(request(100, &[(1, 2)], None)).await.unwrap();
    assert_eq!(receipt.status, OrderStatus::Reserved);

    let reserved_events = fx.bus.published_of_type("OrderReserved").await;
    assert_eq!(reserved_events.len(), 1);
    match &reserved_events[0].kind {
        EventKind::OrderReserved { order_id, items } => {
            assert_eq!(*order_id, receipt.order_id);
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].quantity, 2);
            assert_eq!(items[0].unit_price_cents, 1_500_000);
        },
        other => panic!("unexpected event kind: {other:?}"),
    }
    assert_eq!(fx.bus.published_of_type("OrderCreated").await.len(), 1);

    apply_mirror(&mut fx).await;
    assert_eq!(counters(&fx, 1).await, ((98, 2), (98, 2)));

    let payment_id = Uuid::new_v4();
    let event = EventEnvelope::payment_success(
        receipt.order_id,
        payment_id,
        Money::from_cents(3_000_000),
        "tx-1".to_string(),
    );
    fx.saga.handle_event(event).await.unwrap();

    assert_eq!(fx.orders.status_of(receipt.order_id).await, Some(OrderStatus::Confirmed));
    assert_eq!(counters(&fx, 1).await, ((98, 0), (98, 0)));
    assert_eq!(fx.ledger.len().await, 1);

    let payments = fx.orders.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Success);
    assert_eq!(payments[0].provider_tx_id.as_deref(), Some("tx-1"));
}

#[tokio::test]
async fn payment_failure_cancels_and_restores_stock() {
    let mut fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let receipt = fx.saga.submit_order(request(100, &[(1, 2)], None)).await.unwrap();
    apply_mirror(&mut fx).await;

    let event = EventEnvelope::payment_failed(
        receipt.order_id,
        Uuid::new_v4(),
        "card_declined".to_string(),
    );
    fx.saga.handle_event(event).await.unwrap();

    assert_eq!(fx.orders.status_of(receipt.order_id).await, Some(OrderStatus::Cancelled));
    assert_eq!(counters(&fx, 1).await, ((100, 0), (100, 0)));
    assert_eq!(fx.ledger.len().await, 1);

    let payments = fx.orders.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert_eq!(payments[0].provider_tx_id, None);
}

#[tokio::test]
async fn resubmit_with_same_key_returns_same_order_and_reserves_once() {
    let mut fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let first = fx.saga.submit_order(request(100, &[(1, 2)], Some("key-7"))).await.unwrap();
    let second = fx.saga.submit_order(request(100, &[(1, 2)], Some("key-7"))).await.unwrap();

    assert_eq!(first.order_id, second.order_id);
    assert_eq!(second.status, OrderStatus::Reserved);
    assert_eq!(fx.bus.published_of_type("OrderReserved").await.len(), 1);

    apply_mirror(&mut fx).await;
    // Stock decremented exactly once.
    assert_eq!(counters(&fx, 1).await, ((98, 2), (98, 2)));
}

#[tokio::test]
async fn submissions_without_key_are_distinct_orders() {
    let fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let first = fx.saga.submit_order(request(100, &[(1, 1)], None)).await.unwrap();
    let second = fx.saga.submit_order(request(100, &[(1, 1)], None)).await.unwrap();

    assert_ne!(first.order_id, second.order_id);
}

#[tokio::test]
async fn concurrent_submissions_with_same_key_yield_one_order() {
    let mut fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let saga = Arc::clone(&fx.saga);
        handles.push(tokio::spawn(async move {
            saga.submit_order(request(100, &[(1, 2)], Some("race-key"))).await.unwrap()
        }));
    }

    let mut order_ids = Vec::new();
    for handle in handles {
        order_ids.push(handle.await.unwrap().order_id);
    }
    order_ids.dedup();
    assert_eq!(order_ids.len(), 1);

    apply_mirror(&mut fx).await;
    assert_eq!(counters(&fx, 1).await, ((98, 2), (98, 2)));
}

#[tokio::test]
async fn oversell_burst_admits_exactly_the_stock() {
    let mut fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let mut handles = Vec::new();
    for i in 0..500 {
        let saga = Arc::clone(&fx.saga);
        handles.push(tokio::spawn(async move {
            saga.submit_order(request(100, &[(1, 1)], Some(&format!("burst-{i}")))).await
        }));
    }

    let mut reserved_orders = Vec::new();
    let mut rejections = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => {
                assert_eq!(receipt.status, OrderStatus::Reserved);
                reserved_orders.push(receipt.order_id);
            },
            Err(Error::InsufficientStock { product_id }) => {
                assert_eq!(product_id, ProductId::new(1));
                rejections += 1;
            },
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(reserved_orders.len(), 100);
    assert_eq!(rejections, 400);

    apply_mirror(&mut fx).await;
    assert_eq!(counters(&fx, 1).await, ((0, 100), (0, 100)));

    // Settle every reserved order; counters drain to zero.
    for order_id in reserved_orders {
        let event = EventEnvelope::payment_success(
            order_id,
            Uuid::new_v4(),
            Money::from_cents(1_500_000),
            format!("tx-{order_id}"),
        );
        fx.saga.handle_event(event).await.unwrap();
    }
    assert_eq!(counters(&fx, 1).await, ((0, 0), (0, 0)));
}

#[tokio::test]
async fn duplicate_payment_event_applies_once() {
    let mut fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let receipt = fx.saga.submit_order(request(100, &[(1, 2)], None)).await.unwrap();
    apply_mirror(&mut fx).await;

    let event = EventEnvelope::payment_success(
        receipt.order_id,
        Uuid::new_v4(),
        Money::from_cents(3_000_000),
        "tx-dup".to_string(),
    );
    for _ in 0..3 {
        fx.saga.handle_event(event.clone()).await.unwrap();
    }

    assert_eq!(fx.orders.status_of(receipt.order_id).await, Some(OrderStatus::Confirmed));
    assert_eq!(fx.ledger.len().await, 1);
    assert_eq!(counters(&fx, 1).await, ((98, 0), (98, 0)));
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_converge_to_one_effect() {
    let mut fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let receipt = fx.saga.submit_order(request(100, &[(1, 2)], None)).await.unwrap();
    apply_mirror(&mut fx).await;

    let event = EventEnvelope::payment_success(
        receipt.order_id,
        Uuid::new_v4(),
        Money::from_cents(3_000_000),
        "tx-race".to_string(),
    );
    let mut handles = Vec::new();
    for _ in 0..3 {
        let saga = Arc::clone(&fx.saga);
        let event = event.clone();
        handles.push(tokio::spawn(async move { saga.handle_event(event).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(fx.orders.status_of(receipt.order_id).await, Some(OrderStatus::Confirmed));
    assert_eq!(counters(&fx, 1).await, ((98, 0), (98, 0)));
}

#[tokio::test]
async fn partial_reservation_is_fully_compensated() {
    let mut fx = fixture(
        vec![widget(1, 1_500_000), widget(2, 500_000)],
        &[(ProductId::new(1), 100), (ProductId::new(2), 100)],
    )
    .await;

    let err = fx
        .saga
        .submit_order(request(100, &[(1, 50), (2, 200)], Some("partial")))
        .await
        .unwrap_err();
    assert_eq!(err, Error::InsufficientStock { product_id: ProductId::new(2) });

    let order = fx
        .orders
        .find_by_idempotency_key("partial")
        .await
        .unwrap()
        .expect("failed order is persisted");
    assert_eq!(order.status, OrderStatus::Failed);

    // Product 1's 50 were released; product 2 was never touched.
    apply_mirror(&mut fx).await;
    assert_eq!(counters(&fx, 1).await, ((100, 0), (100, 0)));
    assert_eq!(counters(&fx, 2).await, ((100, 0), (100, 0)));

    // The failed order never announced a reservation.
    assert!(fx.bus.published_of_type("OrderReserved").await.is_empty());
}

#[tokio::test]
async fn invalid_requests_have_no_side_effects() {
    let fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let empty = fx.saga.submit_order(request(100, &[], Some("bad-1"))).await.unwrap_err();
    assert!(matches!(empty, Error::InvalidInput(_)));

    let zero_qty = fx.saga.submit_order(request(100, &[(1, 0)], Some("bad-2"))).await.unwrap_err();
    assert!(matches!(zero_qty, Error::InvalidInput(_)));

    let bad_user = fx.saga.submit_order(request(0, &[(1, 1)], Some("bad-3"))).await.unwrap_err();
    assert!(matches!(bad_user, Error::InvalidInput(_)));

    let unknown = fx.saga.submit_order(request(100, &[(9, 1)], Some("bad-4"))).await.unwrap_err();
    assert!(matches!(unknown, Error::InvalidInput(_)));

    for key in ["bad-1", "bad-2", "bad-3", "bad-4"] {
        assert!(fx.orders.find_by_idempotency_key(key).await.unwrap().is_none());
    }
    assert!(fx.bus.published().await.is_empty());
    assert_eq!(fx.cache.read(ProductId::new(1)).await.unwrap(), Some((100, 0)));
}

#[tokio::test]
async fn publish_failures_do_not_abort_the_submit() {
    let fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;
    fx.bus.set_fail_publishing(true);

    let receipt = fx.saga.submit_order(request(100, &[(1, 2)], None)).await.unwrap();
    assert_eq!(receipt.status, OrderStatus::Reserved);
    assert_eq!(fx.orders.status_of(receipt.order_id).await, Some(OrderStatus::Reserved));
}

#[tokio::test]
async fn cache_outage_is_served_by_the_durable_store() {
    let fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 3)]).await;
    fx.cache.set_online(false);

    let receipt = fx.saga.submit_order(request(100, &[(1, 2)], None)).await.unwrap();
    assert_eq!(receipt.status, OrderStatus::Reserved);

    let level = fx.store.level(ProductId::new(1)).await.unwrap().unwrap();
    assert_eq!((level.available, level.reserved), (1, 2));

    // A second order over the remaining stock is refused by the fallback.
    let err = fx.saga.submit_order(request(100, &[(1, 2)], None)).await.unwrap_err();
    assert_eq!(err, Error::InsufficientStock { product_id: ProductId::new(1) });
}

#[tokio::test]
async fn payment_event_for_unknown_order_is_dropped_not_retried() {
    let fx = fixture(vec![widget(1, 1_500_000)], &[(ProductId::new(1), 100)]).await;

    let event = EventEnvelope::payment_success(
        orderflow_core::domain::OrderId::new(999),
        Uuid::new_v4(),
        Money::from_cents(100),
        "tx-ghost".to_string(),
    );
    fx.saga.handle_event(event).await.unwrap();

    // Marked processed so redelivery cannot loop forever.
    assert_eq!(fx.ledger.len().await, 1);
}
