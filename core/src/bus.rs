//! Event transport contract.
//!
//! The core publishes domain events through this trait and consumes
//! payment-result events through the transport's consumer loop (see the
//! `redpanda` crate). The transport offers at-least-once delivery with
//! per-key ordering; exactly-once *effects* are built on top via the
//! processed-events ledger.

use crate::event::EventEnvelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by the event transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The transport could not be reached or configured.
    #[error("event bus connection failed: {0}")]
    ConnectionFailed(String),

    /// A publish was not acknowledged by the broker.
    #[error("failed to publish {key}: {reason}")]
    PublishFailed {
        /// Message key of the rejected publish.
        key: String,
        /// Broker-reported reason.
        reason: String,
    },

    /// The event could not be encoded for the wire.
    #[error("failed to serialize event: {0}")]
    Serialization(String),
}

impl From<BusError> for crate::Error {
    fn from(err: BusError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Publishing side of the event transport.
///
/// `publish` returns after broker acknowledgement; events sharing a key are
/// delivered in publication order to the same consumer. Implementations
/// return boxed futures so the bus can be held as a trait object across the
/// service.
pub trait EventBus: Send + Sync {
    /// Publish one event under the given key.
    fn publish(
        &self,
        key: &str,
        event: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_maps_to_transient_backend() {
        let err: crate::Error = BusError::PublishFailed {
            key: "order-1".to_string(),
            reason: "broker down".to_string(),
        }
        .into();
        assert!(err.is_transient());
    }
}
