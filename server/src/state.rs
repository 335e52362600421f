//! Concrete wiring types shared by the handlers.

use orderflow_postgres::{PgEventLedger, PgInventoryStore, PgOrderStore, PgProductStore};
use orderflow_redis::RedisInventoryCache;
use orderflow_redpanda::RedpandaEventBus;
use orderflow_saga::{InventoryCoordinator, SagaCoordinator};
use std::sync::Arc;

/// The saga over the production backends.
pub type AppSaga = SagaCoordinator<
    PgProductStore,
    PgOrderStore,
    PgEventLedger,
    RedisInventoryCache,
    PgInventoryStore,
    RedpandaEventBus,
>;

/// The inventory coordinator over the production backends.
pub type AppInventory = InventoryCoordinator<RedisInventoryCache, PgInventoryStore>;

/// Shared handler state.
pub type AppContext = Arc<AppSaga>;
