//! # Orderflow Core
//!
//! Core types and contracts for the orderflow order-processing service.
//!
//! This crate defines the domain model and the ports through which the saga
//! layer talks to its collaborators:
//!
//! - **Domain**: orders, order items, payments, products, inventory levels,
//!   and the order status state machine
//! - **Events**: the JSON event envelope published to the order-events topic
//! - **Ports**: store and cache traits implemented by the `postgres` and
//!   `redis` crates (and by in-memory doubles in `orderflow-testing`)
//! - **Bus**: the event transport contract implemented by the `redpanda` crate
//! - **Errors**: the service-wide error taxonomy
//!
//! ## Architecture Principles
//!
//! - Dependency injection via traits at every backend seam
//! - Serialization is `serde` JSON end to end (HTTP bodies and event payloads)
//! - Monetary amounts are integer cents, never floats
//! - Order status transitions are validated in exactly one place
//!   ([`domain::OrderStatus::can_transition_to`]) and guarded again by the
//!   store's compare-and-set status update

#![allow(async_fn_in_trait)]

pub mod bus;
pub mod domain;
pub mod error;
pub mod event;
pub mod ports;
pub mod retry;

pub use error::{Error, Result};
