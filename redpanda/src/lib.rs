//! Kafka-compatible event transport for orderflow.
//!
//! One topic carries every domain event, keyed by `order-<id>` so the broker
//! preserves per-order ordering: a consumer always sees `OrderReserved`
//! before the matching payment result.
//!
//! # Delivery semantics
//!
//! **At-least-once** with manual offset commits. The consumer loop invokes
//! the handler inline and commits the offset only after the handler returns
//! success; a crash (or handler error) before the commit means redelivery.
//! Handlers are therefore required to be idempotent, which the saga layer
//! guarantees through the processed-events ledger.
//!
//! # Example
//!
//! ```no_run
//! use orderflow_redpanda::RedpandaEventBus;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .topic("order-events")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use orderflow_core::bus::{BusError, EventBus};
use orderflow_core::event::EventEnvelope;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Errors surfaced by the consumer side of the transport.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// The consumer could not be created or subscribed.
    #[error("failed to start consumer for {topic}: {reason}")]
    SubscribeFailed {
        /// Topic that could not be subscribed.
        topic: String,
        /// Driver-reported reason.
        reason: String,
    },
}

/// Publishing side of the transport: a [`FutureProducer`] writing keyed JSON
/// records to the single order-events topic.
pub struct RedpandaEventBus {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl RedpandaEventBus {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// The topic this bus publishes to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    acks: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Topic every event is published to.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Producer acknowledgment mode. Default `"all"`: an event publish is a
    /// durable write.
    #[must_use]
    pub fn acks(mut self, acks: impl Into<String>) -> Self {
        self.acks = Some(acks.into());
        self
    }

    /// Publish deadline. Default 10 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] when brokers are not configured
    /// or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| BusError::ConnectionFailed("topic not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(10));
        let acks = self.acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .create()
            .map_err(|e| {
                BusError::ConnectionFailed(format!("failed to create producer: {e}"))
            })?;

        tracing::info!(brokers = %brokers, topic = %topic, acks = %acks, "event bus created");

        Ok(RedpandaEventBus { producer, topic, timeout })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        key: &str,
        event: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let key = key.to_string();
        let event = event.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = serde_json::to_vec(&event)
                .map_err(|e| BusError::Serialization(e.to_string()))?;

            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        key = %key,
                        partition = partition,
                        offset = offset,
                        event_type = event.event_type(),
                        "event published"
                    );
                    metrics::counter!("orderflow.events.published", "event_type" => event.event_type())
                        .increment(1);
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        key = %key,
                        error = %kafka_error,
                        "failed to publish event"
                    );
                    Err(BusError::PublishFailed { key, reason: kafka_error.to_string() })
                },
            }
        })
    }
}

/// Consuming side of the transport.
///
/// Offsets are committed only after the handler returns success, so a crash
/// mid-handler redelivers the event on restart and the ledger turns the
/// replay into a no-op.
pub struct EventConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl EventConsumer {
    /// Create a consumer in the given group, subscribed to the topic.
    ///
    /// New groups start from the earliest offset so events published before
    /// the first start are not lost.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumeError::SubscribeFailed`] when the consumer cannot be
    /// created or subscribed.
    pub fn new(brokers: &str, group: &str, topic: &str) -> Result<Self, ConsumeError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| ConsumeError::SubscribeFailed {
                topic: topic.to_string(),
                reason: format!("failed to create consumer: {e}"),
            })?;

        consumer.subscribe(&[topic]).map_err(|e| ConsumeError::SubscribeFailed {
            topic: topic.to_string(),
            reason: format!("failed to subscribe: {e}"),
        })?;

        tracing::info!(topic = %topic, group = %group, "consumer subscribed");

        Ok(Self { consumer, topic: topic.to_string() })
    }

    /// Run the consume loop until the shutdown signal flips.
    ///
    /// The in-flight handler always runs to completion: shutdown is only
    /// observed between messages, so an event either commits its offset or
    /// is redelivered whole on restart.
    pub async fn run<F, Fut>(self, handler: F, mut shutdown: watch::Receiver<bool>)
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync,
        Fut: Future<Output = orderflow_core::Result<()>> + Send,
    {
        loop {
            let message = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => {
                    tracing::info!(topic = %self.topic, "consumer shutting down");
                    return;
                },
                message = self.consumer.recv() => message,
            };

            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(topic = %self.topic, error = %e, "failed to receive message");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                },
            };

            let Some(payload) = message.payload() else {
                tracing::warn!(
                    topic = %self.topic,
                    offset = message.offset(),
                    "message has no payload, skipping"
                );
                self.commit(&message);
                continue;
            };

            let envelope: EventEnvelope = match serde_json::from_slice(payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    // Undecodable messages are committed so one poison record
                    // cannot wedge the partition.
                    tracing::warn!(
                        topic = %self.topic,
                        offset = message.offset(),
                        error = %e,
                        "failed to decode event, skipping"
                    );
                    self.commit(&message);
                    continue;
                },
            };

            let event_id = envelope.event_id;
            let event_type = envelope.event_type();
            match handler(envelope).await {
                Ok(()) => {
                    metrics::counter!("orderflow.events.consumed", "event_type" => event_type)
                        .increment(1);
                    self.commit(&message);
                },
                Err(e) => {
                    tracing::error!(
                        topic = %self.topic,
                        event_id = %event_id,
                        event_type = event_type,
                        error = %e,
                        "handler failed; offset not committed, event will be redelivered"
                    );
                    metrics::counter!("orderflow.events.handler_failures", "event_type" => event_type)
                        .increment(1);
                },
            }
        }
    }

    fn commit(&self, message: &rdkafka::message::BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            tracing::warn!(
                topic = %self.topic,
                offset = message.offset(),
                error = %e,
                "failed to commit offset (message may be redelivered)"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_and_consumer_are_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
        assert_send::<EventConsumer>();
        assert_sync::<EventConsumer>();
    }

    #[test]
    fn builder_requires_brokers_and_topic() {
        assert!(RedpandaEventBus::builder().build().is_err());
        assert!(RedpandaEventBus::builder().brokers("localhost:9092").build().is_err());
    }
}
