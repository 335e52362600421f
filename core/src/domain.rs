//! Domain types for order processing.
//!
//! Orders progress through CREATED → RESERVED → PAID → CONFIRMED, or leave
//! that path onto a terminal CANCELLED/FAILED branch. All transitions are
//! validated by [`OrderStatus::can_transition_to`]; the durable store
//! additionally guards every update with a compare-and-set on the expected
//! current status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a product.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    /// Creates a new `ProductId`.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the inner integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Creates a new `OrderId`.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the inner integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a new `UserId`.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the inner integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money amount in cents (to avoid floating point issues).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new money amount from cents.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the value in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Multiplies this unit amount by a quantity.
    #[must_use]
    pub const fn times(self, quantity: i64) -> Self {
        Self(self.0 * quantity)
    }

    /// Adds two amounts.
    #[must_use]
    pub const fn plus(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cents", self.0)
    }
}

/// Immutable catalog entry, created out-of-band and read-only to the core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier.
    pub id: ProductId,
    /// Unique stock keeping unit.
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Unit price in cents.
    pub price: Money,
}

/// Per-product stock counters in the durable store.
///
/// Invariant: `available >= 0` and `reserved >= 0` at all times. Mutated only
/// through the inventory coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevel {
    /// Product this row belongs to.
    pub product_id: ProductId,
    /// Stock that can still be promised to new orders.
    pub available: i64,
    /// Stock promised to in-flight orders, not yet committed or released.
    pub reserved: i64,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Status of an order in its lifecycle.
///
/// Legal paths are `Created → Reserved → Paid → Confirmed`, or any prefix of
/// that path followed by `Cancelled` or `Failed`. Terminal states accept no
/// further transitions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Order row persisted, stock not yet reserved.
    Created,
    /// Stock reserved, awaiting the payment outcome.
    Reserved,
    /// Payment succeeded, stock commit in progress.
    Paid,
    /// Stock committed; the order is complete.
    Confirmed,
    /// Payment failed; reservations released.
    Cancelled,
    /// Reservation failed or the saga aborted.
    Failed,
}

impl OrderStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Reserved => "RESERVED",
            Self::Paid => "PAID",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Fatal`] when the string matches no known
    /// status; a free-form status column carrying an unknown value means the
    /// row was written outside the application.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "CREATED" => Ok(Self::Created),
            "RESERVED" => Ok(Self::Reserved),
            "PAID" => Ok(Self::Paid),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "FAILED" => Ok(Self::Failed),
            other => Err(crate::Error::Fatal(format!("unknown order status: {other}"))),
        }
    }

    /// Whether this status accepts no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled | Self::Failed)
    }

    /// Whether the transition `self → next` is on the legal graph.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Reserved | Self::Cancelled | Self::Failed)
                | (Self::Reserved, Self::Paid | Self::Cancelled | Self::Failed)
                | (Self::Paid, Self::Confirmed | Self::Cancelled | Self::Failed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,
    /// User who submitted the order.
    pub user_id: UserId,
    /// Total in cents, snapshotted at creation.
    pub total: Money,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Client-supplied (or generated) request key; unique across orders.
    pub idempotency_key: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change time.
    pub updated_at: DateTime<Utc>,
}

/// A persisted order line. Unit price is snapshotted at order creation and
/// never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Line identifier.
    pub id: i64,
    /// Owning order.
    pub order_id: OrderId,
    /// Product ordered.
    pub product_id: ProductId,
    /// Quantity ordered; always positive.
    pub quantity: i64,
    /// Price per unit in cents at creation time.
    pub unit_price: Money,
}

impl OrderItem {
    /// Total price for this line.
    #[must_use]
    pub const fn total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// Fields of an order not yet persisted. Status is always `Created` on
/// insert.
#[derive(Clone, Debug)]
pub struct NewOrder {
    /// Submitting user.
    pub user_id: UserId,
    /// Snapshotted total in cents.
    pub total: Money,
    /// Request key; the store's unique constraint on this column linearizes
    /// concurrent duplicate submissions.
    pub idempotency_key: String,
}

/// An order line not yet persisted.
#[derive(Clone, Debug)]
pub struct NewOrderItem {
    /// Product ordered.
    pub product_id: ProductId,
    /// Quantity ordered.
    pub quantity: i64,
    /// Snapshotted unit price.
    pub unit_price: Money,
}

/// Status of a payment attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Submitted to the provider, outcome unknown.
    Pending,
    /// Provider confirmed the charge.
    Success,
    /// Provider rejected the charge.
    Failed,
}

impl PaymentStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Fatal`] for unknown strings.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(crate::Error::Fatal(format!("unknown payment status: {other}"))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment outcome recorded against an order. At most one terminal payment
/// per order in the happy path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment identifier, assigned by the payment workflow.
    pub id: Uuid,
    /// Order this payment settles.
    pub order_id: OrderId,
    /// Outcome.
    pub status: PaymentStatus,
    /// Provider transaction id; set when the payment succeeded.
    pub provider_tx_id: Option<String>,
    /// Amount charged in cents.
    pub amount: Money,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn money_times_and_plus() {
        let unit = Money::from_cents(1_500_000);
        assert_eq!(unit.times(2).cents(), 3_000_000);
        assert_eq!(unit.plus(Money::from_cents(5)).cents(), 1_500_005);
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            OrderStatus::Created,
            OrderStatus::Reserved,
            OrderStatus::Paid,
            OrderStatus::Confirmed,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OrderStatus::parse("SHIPPED").is_err());
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::Reserved));
        assert!(OrderStatus::Reserved.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Confirmed));
    }

    #[test]
    fn compensation_branches_are_legal() {
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::Failed));
        assert!(OrderStatus::Reserved.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Failed));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [OrderStatus::Confirmed, OrderStatus::Cancelled, OrderStatus::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                OrderStatus::Created,
                OrderStatus::Reserved,
                OrderStatus::Paid,
                OrderStatus::Confirmed,
                OrderStatus::Cancelled,
                OrderStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn replays_and_skips_are_forbidden() {
        assert!(!OrderStatus::Confirmed.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Created.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Reserved.can_transition_to(OrderStatus::Confirmed));
    }

    #[test]
    fn order_item_total() {
        let item = OrderItem {
            id: 1,
            order_id: OrderId::new(1),
            product_id: ProductId::new(1),
            quantity: 3,
            unit_price: Money::from_cents(1000),
        };
        assert_eq!(item.total(), Money::from_cents(3000));
    }
}
