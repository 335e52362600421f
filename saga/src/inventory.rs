//! Inventory coordination between the fast cache and the durable store.
//!
//! The cache makes the reservation decision in the common case; the store is
//! the durable record. Cache-granted reservations are mirrored to the store
//! by a dedicated worker task so the copy survives client disconnects, and a
//! periodic reconciliation resets the cache from store values to bound the
//! age of any drift.

use orderflow_core::Result;
use orderflow_core::domain::ProductId;
use orderflow_core::ports::{InventoryCache, InventoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Deadline for each mirrored store write. Independent of any request
/// deadline: a client disconnect must not leak the cache/store gap.
const MIRROR_DEADLINE: Duration = Duration::from_secs(5);

/// A durable-store write replaying a cache-granted mutation.
///
/// Operations for one saga go through one FIFO queue, so a compensating
/// release can never reach the store before the reservation it undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOp {
    /// Mirror a granted reservation.
    Reserve {
        /// Product reserved.
        product_id: ProductId,
        /// Quantity reserved.
        quantity: i64,
    },
    /// Mirror a compensating release of a reservation from the same saga.
    Release {
        /// Product released.
        product_id: ProductId,
        /// Quantity released.
        quantity: i64,
    },
}

/// Create the bounded channel feeding the mirror worker.
#[must_use]
pub fn mirror_channel(capacity: usize) -> (mpsc::Sender<MirrorOp>, mpsc::Receiver<MirrorOp>) {
    mpsc::channel(capacity)
}

/// Drain mirror operations into the durable store.
///
/// Runs until the channel closes. Each write gets its own bounded deadline;
/// failures are logged and left for reconciliation, never retried here.
pub async fn run_mirror_worker<S>(store: Arc<S>, mut ops: mpsc::Receiver<MirrorOp>)
where
    S: InventoryStore,
{
    while let Some(op) = ops.recv().await {
        match op {
            MirrorOp::Reserve { product_id, quantity } => {
                match tokio::time::timeout(
                    MIRROR_DEADLINE,
                    store.reserve_stock(product_id, quantity),
                )
                .await
                {
                    Ok(Ok(true)) => {},
                    Ok(Ok(false)) => {
                        // The cache granted what the store now refuses; the
                        // cache ran ahead of a store-side mutation.
                        // Reconciliation resets it.
                        tracing::warn!(
                            product_id = %product_id,
                            quantity = quantity,
                            "durable store rejected mirrored reservation"
                        );
                        metrics::counter!("orderflow.inventory.mirror_rejected").increment(1);
                    },
                    Ok(Err(e)) => {
                        tracing::warn!(
                            product_id = %product_id,
                            quantity = quantity,
                            error = %e,
                            "failed to mirror reservation"
                        );
                        metrics::counter!("orderflow.inventory.mirror_failures").increment(1);
                    },
                    Err(_) => {
                        tracing::warn!(
                            product_id = %product_id,
                            quantity = quantity,
                            "mirrored reservation timed out"
                        );
                        metrics::counter!("orderflow.inventory.mirror_failures").increment(1);
                    },
                }
            },
            MirrorOp::Release { product_id, quantity } => {
                match tokio::time::timeout(
                    MIRROR_DEADLINE,
                    store.release_stock(product_id, quantity),
                )
                .await
                {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => {
                        tracing::warn!(
                            product_id = %product_id,
                            quantity = quantity,
                            error = %e,
                            "failed to mirror release"
                        );
                        metrics::counter!("orderflow.inventory.mirror_failures").increment(1);
                    },
                    Err(_) => {
                        tracing::warn!(
                            product_id = %product_id,
                            quantity = quantity,
                            "mirrored release timed out"
                        );
                        metrics::counter!("orderflow.inventory.mirror_failures").increment(1);
                    },
                }
            },
        }
    }
    tracing::debug!("mirror worker exiting");
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Inventory rows examined.
    pub products: usize,
    /// Rows where the cache disagreed with the store.
    pub discrepancies: usize,
}

/// Mediates reservations between the fast cache and the durable store.
///
/// `InsufficientStock` is a `false` return, never an error; only transport
/// failures are errors. The primary reserve is the single call whose error
/// aborts the submit saga. Release and commit failures are surfaced to the
/// caller, which logs them and defers its commit point instead of aborting.
pub struct InventoryCoordinator<C, S> {
    cache: Arc<C>,
    store: Arc<S>,
    mirror: mpsc::Sender<MirrorOp>,
}

impl<C, S> Clone for InventoryCoordinator<C, S> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            mirror: self.mirror.clone(),
        }
    }
}

impl<C, S> InventoryCoordinator<C, S>
where
    C: InventoryCache,
    S: InventoryStore,
{
    /// Wire the coordinator. `mirror` is the sending half of
    /// [`mirror_channel`]; the receiving half must be driven by
    /// [`run_mirror_worker`].
    #[must_use]
    pub const fn new(cache: Arc<C>, store: Arc<S>, mirror: mpsc::Sender<MirrorOp>) -> Self {
        Self { cache, store, mirror }
    }

    /// Reserve stock for one product.
    ///
    /// Fast path: the cache's atomic RESERVE decides, and a granted
    /// reservation is enqueued for the mirror worker. When the cache is
    /// unreachable (or the key unseeded) the decision falls back to the
    /// store's row-locked transaction, which preserves correctness at
    /// durable-store latency.
    ///
    /// # Errors
    ///
    /// Returns [`orderflow_core::Error::Backend`] only when both paths are
    /// unavailable.
    pub async fn reserve(&self, product_id: ProductId, quantity: i64) -> Result<bool> {
        match self.cache.try_reserve(product_id, quantity).await {
            Ok(true) => {
                if let Err(e) = self.mirror.try_send(MirrorOp::Reserve { product_id, quantity }) {
                    tracing::warn!(
                        product_id = %product_id,
                        quantity = quantity,
                        error = %e,
                        "mirror queue rejected reservation; store lags until reconciliation"
                    );
                    metrics::counter!("orderflow.inventory.mirror_dropped").increment(1);
                }
                Ok(true)
            },
            Ok(false) => Ok(false),
            Err(e) => {
                tracing::warn!(
                    product_id = %product_id,
                    error = %e,
                    "inventory cache unavailable, falling back to durable store"
                );
                metrics::counter!("orderflow.inventory.cache_fallbacks").increment(1);
                self.store.reserve_stock(product_id, quantity).await
            },
        }
    }

    /// Release a reservation back to available stock, in the cache
    /// (log-and-continue) and then the store.
    ///
    /// # Errors
    ///
    /// Returns [`orderflow_core::Error::Backend`] when the store write
    /// fails; cache failures are only logged.
    pub async fn release(&self, product_id: ProductId, quantity: i64) -> Result<()> {
        if let Err(e) = self.cache.release(product_id, quantity).await {
            tracing::warn!(product_id = %product_id, error = %e, "cache release failed");
        }
        self.store.release_stock(product_id, quantity).await
    }

    /// Release a reservation granted earlier in the *same* saga.
    ///
    /// The cache is released immediately; the store write is enqueued behind
    /// the reservation's own mirror operation so it cannot reach the store
    /// first. Best-effort: a rejected enqueue is logged and left to
    /// reconciliation.
    pub async fn release_queued(&self, product_id: ProductId, quantity: i64) {
        if let Err(e) = self.cache.release(product_id, quantity).await {
            tracing::warn!(product_id = %product_id, error = %e, "cache release failed");
        }
        if let Err(e) = self.mirror.try_send(MirrorOp::Release { product_id, quantity }) {
            tracing::warn!(
                product_id = %product_id,
                quantity = quantity,
                error = %e,
                "mirror queue rejected release; store lags until reconciliation"
            );
            metrics::counter!("orderflow.inventory.mirror_dropped").increment(1);
        }
    }

    /// Commit reserved stock out of the counters, in the cache
    /// (log-and-continue) and then the store.
    ///
    /// # Errors
    ///
    /// Returns [`orderflow_core::Error::Backend`] when the store write
    /// fails; cache failures are only logged.
    pub async fn commit(&self, product_id: ProductId, quantity: i64) -> Result<()> {
        match self.cache.commit(product_id, quantity).await {
            Ok(true) => {},
            Ok(false) => {
                tracing::warn!(
                    product_id = %product_id,
                    quantity = quantity,
                    "cache commit found insufficient reserved stock"
                );
            },
            Err(e) => {
                tracing::warn!(product_id = %product_id, error = %e, "cache commit failed");
            },
        }
        self.store.commit_stock(product_id, quantity).await
    }

    /// Seed the cache with every inventory row from the store. Used at
    /// startup and on demand.
    ///
    /// # Errors
    ///
    /// Returns [`orderflow_core::Error::Backend`] when either side is
    /// unreachable.
    pub async fn seed_cache(&self) -> Result<usize> {
        let levels = self.store.levels().await?;
        for level in &levels {
            self.cache.seed(level).await?;
        }
        tracing::info!(products = levels.len(), "inventory cache seeded from durable store");
        Ok(levels.len())
    }

    /// Reset the cache to durable-store values, logging any discrepancy.
    ///
    /// A cache holding *more* available stock than the store is the
    /// dangerous direction (it could promise stock the store would refuse),
    /// so it is logged at error level.
    ///
    /// # Errors
    ///
    /// Returns [`orderflow_core::Error::Backend`] when either side is
    /// unreachable.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let levels = self.store.levels().await?;
        let mut report = ReconcileReport { products: levels.len(), discrepancies: 0 };

        for level in &levels {
            match self.cache.read(level.product_id).await {
                Ok(Some((available, reserved)))
                    if available == level.available && reserved == level.reserved => {},
                Ok(cached) => {
                    report.discrepancies += 1;
                    let (cached_available, cached_reserved) =
                        cached.unwrap_or((level.available, level.reserved));
                    if cached_available > level.available {
                        tracing::error!(
                            product_id = %level.product_id,
                            cache_available = cached_available,
                            store_available = level.available,
                            "cache promised more stock than the store holds"
                        );
                    } else {
                        tracing::warn!(
                            product_id = %level.product_id,
                            cache_available = cached_available,
                            cache_reserved = cached_reserved,
                            store_available = level.available,
                            store_reserved = level.reserved,
                            "inventory drift detected, resetting cache"
                        );
                    }
                    self.cache.seed(level).await?;
                },
                Err(e) => {
                    tracing::warn!(product_id = %level.product_id, error = %e, "cache read failed");
                },
            }
        }

        if report.discrepancies > 0 {
            metrics::counter!("orderflow.inventory.reconciled")
                .increment(report.discrepancies as u64);
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use orderflow_testing::{MemInventoryCache, MemInventoryStore};

    fn coordinator(
        cache: Arc<MemInventoryCache>,
        store: Arc<MemInventoryStore>,
    ) -> (InventoryCoordinator<MemInventoryCache, MemInventoryStore>, mpsc::Receiver<MirrorOp>) {
        let (tx, rx) = mirror_channel(16);
        (InventoryCoordinator::new(cache, store, tx), rx)
    }

    #[tokio::test]
    async fn fast_path_reserves_in_cache_and_enqueues_mirror() {
        let cache = Arc::new(MemInventoryCache::with_stock(&[(ProductId::new(1), 10)]));
        let store = Arc::new(MemInventoryStore::with_stock(&[(ProductId::new(1), 10)]));
        let (ic, mut mirror_rx) = coordinator(Arc::clone(&cache), Arc::clone(&store));

        assert!(ic.reserve(ProductId::new(1), 3).await.unwrap());

        use orderflow_core::ports::InventoryCache as _;
        assert_eq!(cache.read(ProductId::new(1)).await.unwrap(), Some((7, 3)));
        assert_eq!(
            mirror_rx.recv().await,
            Some(MirrorOp::Reserve { product_id: ProductId::new(1), quantity: 3 })
        );
    }

    #[tokio::test]
    async fn cache_outage_falls_back_to_store_row_lock() {
        let cache = Arc::new(MemInventoryCache::with_stock(&[(ProductId::new(1), 10)]));
        let store = Arc::new(MemInventoryStore::with_stock(&[(ProductId::new(1), 2)]));
        cache.set_online(false);
        let (ic, _mirror_rx) = coordinator(Arc::clone(&cache), Arc::clone(&store));

        assert!(ic.reserve(ProductId::new(1), 2).await.unwrap());
        assert!(!ic.reserve(ProductId::new(1), 1).await.unwrap());

        use orderflow_core::ports::InventoryStore as _;
        let level = store.level(ProductId::new(1)).await.unwrap().unwrap();
        assert_eq!((level.available, level.reserved), (0, 2));
    }

    #[tokio::test]
    async fn mirror_worker_copies_reservation_into_store() {
        let store = Arc::new(MemInventoryStore::with_stock(&[(ProductId::new(1), 10)]));
        let (tx, rx) = mirror_channel(4);
        let worker = tokio::spawn(run_mirror_worker(Arc::clone(&store), rx));

        tx.send(MirrorOp::Reserve { product_id: ProductId::new(1), quantity: 4 }).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        use orderflow_core::ports::InventoryStore as _;
        let level = store.level(ProductId::new(1)).await.unwrap().unwrap();
        assert_eq!((level.available, level.reserved), (6, 4));
    }

    #[tokio::test]
    async fn reconcile_resets_cache_to_store_values() {
        let cache = Arc::new(MemInventoryCache::with_stock(&[(ProductId::new(1), 99)]));
        let store = Arc::new(MemInventoryStore::with_stock(&[(ProductId::new(1), 10)]));
        let (ic, _mirror_rx) = coordinator(Arc::clone(&cache), Arc::clone(&store));

        let report = ic.reconcile().await.unwrap();
        assert_eq!(report.products, 1);
        assert_eq!(report.discrepancies, 1);

        use orderflow_core::ports::InventoryCache as _;
        assert_eq!(cache.read(ProductId::new(1)).await.unwrap(), Some((10, 0)));

        let report = ic.reconcile().await.unwrap();
        assert_eq!(report.discrepancies, 0);
    }

    #[tokio::test]
    async fn release_then_reserve_is_identity_on_counters() {
        let cache = Arc::new(MemInventoryCache::with_stock(&[(ProductId::new(1), 10)]));
        let store = Arc::new(MemInventoryStore::with_stock(&[(ProductId::new(1), 10)]));
        let (ic, mut mirror_rx) = coordinator(Arc::clone(&cache), Arc::clone(&store));

        assert!(ic.reserve(ProductId::new(1), 5).await.unwrap());
        // Apply the mirror synchronously so cache and store agree.
        use orderflow_core::ports::InventoryStore as _;
        match mirror_rx.recv().await.unwrap() {
            MirrorOp::Reserve { product_id, quantity } => {
                assert!(store.reserve_stock(product_id, quantity).await.unwrap());
            },
            other => panic!("unexpected mirror op: {other:?}"),
        }

        ic.release(ProductId::new(1), 5).await.unwrap();

        use orderflow_core::ports::InventoryCache as _;
        assert_eq!(cache.read(ProductId::new(1)).await.unwrap(), Some((10, 0)));
        let level = store.level(ProductId::new(1)).await.unwrap().unwrap();
        assert_eq!((level.available, level.reserved), (10, 0));
    }
}
