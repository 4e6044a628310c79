use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};
use crate::store::{OutboxStore, PendingEvent};

const BATCH_SIZE: i64 = 100;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, key: &str, payload: &str) -> Result<()>;
}

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, key: &str, payload: &str) -> Result<()> {
        let record = FutureRecord::to(&self.topic)
            .payload(payload)
            .key(key);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}

/// Relays `OrderAdmitted` rows after their sale transaction has committed.
/// Delivery is at-least-once; consumers dedupe on `order_id`.
pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl OutboxProcessor {
    pub fn new(store: Arc<dyn OutboxStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            if let Err(e) = self.relay_batch().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// Publishes one batch of pending events, oldest first, keyed by stock id.
    /// A row is marked processed only once its send succeeded. Returns how
    /// many rows were relayed.
    pub async fn relay_batch(&self) -> Result<usize> {
        let pending = self.store.pending_events(BATCH_SIZE).await?;
        let mut relayed = 0;

        for event in pending {
            if let Err(e) = self.publish(&event).await {
                error!(event_id = %event.id, error = %e, "failed to publish outbox event");
                continue;
            }

            self.store.mark_processed(event.id).await?;
            relayed += 1;
            info!(event_id = %event.id, event_type = %event.event_type, "published outbox event");
        }

        Ok(relayed)
    }

    async fn publish(&self, event: &PendingEvent) -> Result<()> {
        let json = serde_json::to_string(&event.payload)?;
        self.publisher.publish(&event.aggregate_id.to_string(), &json).await
    }
}
