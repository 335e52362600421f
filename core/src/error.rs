//! Service-wide error taxonomy.

use crate::domain::ProductId;
use thiserror::Error;

/// Result type alias for orderflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the order-processing core.
///
/// Boundary mapping: `InvalidInput` rejects the request with no side effects;
/// `DuplicateKey` is not an error at the API (the existing order is
/// returned); `InsufficientStock` surfaces as a failed order after partial
/// reservations are released; `Backend` is transient and retried locally
/// before propagating; `Fatal` means an invariant was violated and no
/// recovery is attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed request, unknown product, or non-positive quantity.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An order with this idempotency key already exists.
    #[error("idempotency key already exists")]
    DuplicateKey,

    /// Reservation denied; not enough available stock.
    #[error("insufficient stock for product {product_id}")]
    InsufficientStock {
        /// Product whose reservation was denied.
        product_id: ProductId,
    },

    /// Requested entity does not exist.
    #[error("{what} {id} not found")]
    NotFound {
        /// Entity kind, e.g. `"order"`.
        what: &'static str,
        /// Entity identifier.
        id: i64,
    },

    /// A backend (durable store, inventory cache, event transport) failed
    /// transiently.
    #[error("backend unavailable: {0}")]
    Backend(String),

    /// A saga phase exceeded its deadline.
    #[error("deadline exceeded during {0}")]
    Timeout(&'static str),

    /// Unreachable state; fail loudly, do not recover.
    #[error("invariant violated: {0}")]
    Fatal(String),
}

impl Error {
    /// Wrap any displayable backend failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    /// Whether redelivery or a local retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Backend("connection reset".into()).is_transient());
        assert!(Error::Timeout("reservation").is_transient());
        assert!(!Error::DuplicateKey.is_transient());
        assert!(!Error::Fatal("bad state".into()).is_transient());
    }

    #[test]
    fn display_carries_context() {
        let err = Error::InsufficientStock { product_id: ProductId::new(7) };
        assert_eq!(err.to_string(), "insufficient stock for product 7");
    }
}
