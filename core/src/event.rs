//! Domain events published to the order-events topic.
//!
//! Every event is a JSON object carrying a globally unique `event_id`, an
//! `event_type` discriminator, and a `timestamp`, plus type-specific fields.
//! Events are keyed by `order-<id>` so the broker preserves per-order
//! ordering: a consumer always observes `OrderReserved` before the matching
//! `PaymentSuccess`/`PaymentFailed`.

use crate::domain::{Money, OrderId, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An order line as carried inside `OrderReserved`, so downstream payment
/// processing needs no durable-store lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedItem {
    /// Product reserved.
    pub product_id: ProductId,
    /// Quantity reserved.
    pub quantity: i64,
    /// Snapshotted unit price in cents.
    pub unit_price_cents: i64,
}

/// Type-specific event payloads, discriminated on the wire by `event_type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventKind {
    /// An order row was persisted. Informational; consumers must not rely on
    /// its delivery.
    OrderCreated {
        /// Order that was created.
        order_id: OrderId,
        /// Submitting user.
        user_id: UserId,
        /// Order total in cents.
        total_cents: i64,
    },
    /// All items of an order were reserved; payment may begin.
    OrderReserved {
        /// Order that was reserved.
        order_id: OrderId,
        /// Reserved lines with snapshotted prices.
        items: Vec<ReservedItem>,
    },
    /// The payment provider confirmed the charge.
    PaymentSuccess {
        /// Order the payment settles.
        order_id: OrderId,
        /// Payment identifier.
        payment_id: Uuid,
        /// Amount charged in cents.
        amount_cents: i64,
        /// Provider transaction id.
        tx_id: String,
    },
    /// The payment provider rejected the charge.
    PaymentFailed {
        /// Order the payment was for.
        order_id: OrderId,
        /// Payment identifier.
        payment_id: Uuid,
        /// Provider-supplied failure reason.
        reason: String,
    },
}

impl EventKind {
    /// The `event_type` discriminator string.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "OrderCreated",
            Self::OrderReserved { .. } => "OrderReserved",
            Self::PaymentSuccess { .. } => "PaymentSuccess",
            Self::PaymentFailed { .. } => "PaymentFailed",
        }
    }

    /// The order this event belongs to.
    #[must_use]
    pub const fn order_id(&self) -> OrderId {
        match self {
            Self::OrderCreated { order_id, .. }
            | Self::OrderReserved { order_id, .. }
            | Self::PaymentSuccess { order_id, .. }
            | Self::PaymentFailed { order_id, .. } => *order_id,
        }
    }
}

/// The wire envelope: common fields plus the flattened type-specific payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally unique event identifier; the processed-events ledger keys on
    /// this value.
    pub event_id: Uuid,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
    /// Type-specific payload, flattened so `event_type` sits at the top
    /// level of the JSON object.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl EventEnvelope {
    /// Wrap a payload with a fresh event id and the current time.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self { event_id: Uuid::new_v4(), timestamp: Utc::now(), kind }
    }

    /// Broker message key: `order-<id>`. Events sharing a key are delivered
    /// in publication order.
    #[must_use]
    pub fn partition_key(&self) -> String {
        format!("order-{}", self.kind.order_id())
    }

    /// Convenience accessor for the `event_type` discriminator.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Convenience constructor for `OrderReserved` from order lines.
    #[must_use]
    pub fn order_reserved(order_id: OrderId, items: Vec<ReservedItem>) -> Self {
        Self::new(EventKind::OrderReserved { order_id, items })
    }

    /// Convenience constructor for `PaymentSuccess`.
    #[must_use]
    pub fn payment_success(order_id: OrderId, payment_id: Uuid, amount: Money, tx_id: String) -> Self {
        Self::new(EventKind::PaymentSuccess {
            order_id,
            payment_id,
            amount_cents: amount.cents(),
            tx_id,
        })
    }

    /// Convenience constructor for `PaymentFailed`.
    #[must_use]
    pub fn payment_failed(order_id: OrderId, payment_id: Uuid, reason: String) -> Self {
        Self::new(EventKind::PaymentFailed { order_id, payment_id, reason })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn partition_key_groups_by_order() {
        let reserved = EventEnvelope::order_reserved(OrderId::new(42), vec![]);
        let failed = EventEnvelope::payment_failed(
            OrderId::new(42),
            Uuid::new_v4(),
            "card_declined".to_string(),
        );
        assert_eq!(reserved.partition_key(), "order-42");
        assert_eq!(reserved.partition_key(), failed.partition_key());
    }

    #[test]
    fn envelope_flattens_event_type_on_the_wire() {
        let envelope = EventEnvelope::payment_success(
            OrderId::new(1),
            Uuid::new_v4(),
            Money::from_cents(3_000_000),
            "tx-123".to_string(),
        );
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["event_type"], "PaymentSuccess");
        assert_eq!(json["order_id"], 1);
        assert_eq!(json["amount_cents"], 3_000_000);
        assert!(json["event_id"].is_string());
        assert!(json["timestamp"].is_string());

        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn order_reserved_carries_the_item_list() {
        let envelope = EventEnvelope::order_reserved(
            OrderId::new(7),
            vec![ReservedItem { product_id: ProductId::new(1), quantity: 2, unit_price_cents: 1500 }],
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        match back.kind {
            EventKind::OrderReserved { order_id, items } => {
                assert_eq!(order_id, OrderId::new(7));
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].quantity, 2);
            },
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
