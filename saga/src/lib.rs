//! # Orderflow Saga
//!
//! The coordinators that drive an order through its lifecycle:
//!
//! - [`InventoryCoordinator`] mediates between the fast inventory cache
//!   (low-latency decision point) and the durable store (authoritative
//!   record), with a row-locked fallback when the cache is unreachable and a
//!   mirror worker that copies cache-granted reservations into the store
//! - [`SagaCoordinator`] runs the distributed transaction
//!   "reserve stock → charge payment → confirm or compensate": the
//!   synchronous submit path, and the idempotent payment-result handlers
//!   driven by the event transport
//!
//! Serialization never comes from in-memory locks held across await points;
//! it comes from the store's row locks and the cache's atomic scripts.

mod coordinator;
mod inventory;

pub use coordinator::{OrderLine, OrderReceipt, OrderRequest, SagaConfig, SagaCoordinator};
pub use inventory::{
    InventoryCoordinator, MirrorOp, ReconcileReport, mirror_channel, run_mirror_worker,
};
