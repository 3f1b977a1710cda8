use crate::store::RecordStore;
use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::OutboxEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

const BATCH_SIZE: i64 = 100;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<()>;
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
    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}

/// Publisher used when no broker is configured: events only go to the log.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        info!(
            "{} for lease {}: {}",
            event.event_type, event.aggregate_id, event.event_data
        );
        Ok(())
    }
}

pub struct OutboxProcessor {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    every: Duration,
}

impl OutboxProcessor {
    pub fn new(store: Arc<dyn RecordStore>, publisher: Arc<dyn EventPublisher>, every: Duration) -> Self {
        Self {
            store,
            publisher,
            every,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.every);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// Publishes one batch, oldest first. Failed events stay unprocessed for the next tick.
    pub async fn process_outbox_events(&self) -> Result<usize> {
        let events = self.store.pending_outbox_events(BATCH_SIZE).await?;
        let mut published = 0;

        for event in events {
            if let Err(e) = self.publisher.publish(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                continue;
            }

            self.store.mark_outbox_processed(event.id).await?;
            published += 1;
            info!("Published outbox event: {}", event.id);
        }

        Ok(published)
    }
}
