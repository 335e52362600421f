//! Mock payment worker.
//!
//! A development scaffold standing in for the external payment processor: it
//! consumes `OrderReserved` from the shared topic under its own consumer
//! group and publishes a `PaymentSuccess` or `PaymentFailed` back. Disabled
//! by default outside development; a real deployment runs the processor as a
//! separate service.

use orderflow_core::bus::EventBus;
use orderflow_core::domain::Money;
use orderflow_core::event::{EventEnvelope, EventKind};
use orderflow_redpanda::EventConsumer;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Fraction of payments the mock provider approves.
const SUCCESS_RATE: f64 = 0.9;

/// Run the worker until shutdown.
pub async fn run<B>(
    bus: Arc<B>,
    consumer: EventConsumer,
    latency_cap: Duration,
    shutdown: watch::Receiver<bool>,
) where
    B: EventBus + 'static,
{
    consumer
        .run(
            move |envelope| {
                let bus = Arc::clone(&bus);
                async move {
                    let EventKind::OrderReserved { order_id, items } = envelope.kind else {
                        return Ok(());
                    };

                    let amount_cents: i64 =
                        items.iter().map(|item| item.unit_price_cents * item.quantity).sum();
                    let (latency_ms, approved) = {
                        let mut rng = rand::thread_rng();
                        let cap_ms =
                            latency_cap.min(Duration::from_millis(300)).as_millis().max(10) as u64;
                        (rng.gen_range(10..=cap_ms), rng.gen_bool(SUCCESS_RATE))
                    };
                    tokio::time::sleep(Duration::from_millis(latency_ms)).await;

                    let payment_id = Uuid::new_v4();
                    let result = if approved {
                        EventEnvelope::payment_success(
                            order_id,
                            payment_id,
                            Money::from_cents(amount_cents),
                            format!("mock-{}", payment_id.simple()),
                        )
                    } else {
                        EventEnvelope::payment_failed(
                            order_id,
                            payment_id,
                            "card_declined".to_string(),
                        )
                    };

                    tracing::info!(
                        order_id = %order_id,
                        payment_id = %payment_id,
                        approved = approved,
                        amount_cents = amount_cents,
                        "mock payment processed"
                    );

                    bus.publish(&result.partition_key(), &result).await?;
                    Ok(())
                }
            },
            shutdown,
        )
        .await;
}
