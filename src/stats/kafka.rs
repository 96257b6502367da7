/// Kafka-backed click pipeline.
///
/// The collector publishes asynchronously and never surfaces errors to the
/// request path. The consumer decouples network reads from batch assembly
/// through an internal channel and acknowledges offsets only after the
/// database transaction commits (at-least-once; redelivery can double-count).
use super::consumer::flush_batch;
use super::{ClickEvent, Collector};
use crate::error::{ApiError, ApiResult};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

pub struct KafkaCollector {
    producer: FutureProducer,
    topic: String,
}

impl KafkaCollector {
    pub fn new(brokers: &[String], topic: &str) -> ApiResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| ApiError::Internal(format!("kafka producer init failed: {}", e)))?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

impl Collector for KafkaCollector {
    fn collect(&self, event: ClickEvent) {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "click event serialization failed");
                return;
            }
        };

        // Events carry no key; the producer spreads them across partitions.
        let record = FutureRecord::<(), _>::to(&self.topic).payload(&payload);
        match self.producer.send_result(record) {
            Ok(delivery) => {
                tokio::spawn(async move {
                    if let Ok(Err((e, _))) = delivery.await {
                        error!(error = %e, "kafka delivery failed");
                    }
                });
            }
            Err((e, _)) => {
                error!(error = %e, "kafka enqueue failed, event dropped");
            }
        }
    }
}

pub struct KafkaClickConsumer {
    consumer: Arc<StreamConsumer>,
    db: PgPool,
    topic: String,
}

impl KafkaClickConsumer {
    pub fn new(brokers: &[String], topic: &str, db: PgPool) -> ApiResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", "click-stats-consumer")
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| ApiError::Internal(format!("kafka consumer init failed: {}", e)))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| ApiError::Internal(format!("kafka subscribe failed: {}", e)))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            db,
            topic: topic.to_string(),
        })
    }

    /// Consume until shutdown. A background reader feeds the internal
    /// channel so batch assembly is independent of broker latency.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let (tx, mut rx) = mpsc::channel::<(ClickEvent, i32, i64)>(BATCH_SIZE);

        let reader_consumer = Arc::clone(&self.consumer);
        let mut reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_shutdown.changed() => return,
                    received = reader_consumer.recv() => match received {
                        Ok(msg) => {
                            let partition = msg.partition();
                            let offset = msg.offset();
                            let parsed = msg
                                .payload()
                                .map(|p| serde_json::from_slice::<ClickEvent>(p));
                            drop(msg);

                            let event = match parsed {
                                Some(Ok(event)) => event,
                                Some(Err(e)) => {
                                    error!(error = %e, "click event deserialization failed");
                                    continue;
                                }
                                None => continue,
                            };
                            if tx.send((event, partition, offset)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "kafka read failed");
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                    },
                }
            }
        });

        let mut batch: Vec<ClickEvent> = Vec::with_capacity(BATCH_SIZE);
        let mut offsets: HashMap<i32, i64> = HashMap::new();
        let mut ticker = interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    self.flush_and_ack(&batch, &offsets).await;
                    return;
                }
                received = rx.recv() => match received {
                    Some((event, partition, offset)) => {
                        batch.push(event);
                        let tracked = offsets.entry(partition).or_insert(offset);
                        if offset > *tracked {
                            *tracked = offset;
                        }
                        if batch.len() >= BATCH_SIZE {
                            self.flush_and_ack(&batch, &offsets).await;
                            batch.clear();
                            offsets.clear();
                        }
                    }
                    None => {
                        self.flush_and_ack(&batch, &offsets).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush_and_ack(&batch, &offsets).await;
                        batch.clear();
                        offsets.clear();
                    }
                }
            }
        }
    }

    /// Flush the batch; only a committed transaction advances the group
    /// offsets. Committed offset is last-processed + 1.
    async fn flush_and_ack(&self, batch: &[ClickEvent], offsets: &HashMap<i32, i64>) {
        if !flush_batch(&self.db, batch).await {
            return;
        }
        if offsets.is_empty() {
            return;
        }
        for (&partition, &offset) in offsets {
            if let Err(e) = self.consumer.store_offset(&self.topic, partition, offset + 1) {
                warn!(error = %e, partition, "kafka offset store failed");
            }
        }
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Async) {
            warn!(error = %e, "kafka offset commit failed");
        } else {
            debug!(count = batch.len(), "kafka batch acknowledged");
        }
    }
}
