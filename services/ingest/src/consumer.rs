//! Kafka trigger adapter.
//!
//! A notification is committed once every record in it succeeded or was filtered
//! out. A failed notification is redelivered by seeking its partition back to it, so
//! no later offset on that partition is committed while it is outstanding. After
//! `max_delivery_attempts` it is published to the dead letter topic and committed.

use crate::config::KafkaConfig;
use crate::pipeline::{BatchReport, IngestPipeline};
use crate::trigger::{parse_notification, TriggerError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What to do with a message's offset after handling it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Every record succeeded or was filtered out, or the payload can never succeed
    Commit,
    /// At least one record failed; the message must be delivered again
    Redeliver,
}

/// Handle one notification payload end to end.
pub async fn handle_payload(pipeline: &IngestPipeline, payload: Option<&[u8]>) -> Disposition {
    let records = match payload.ok_or(TriggerError::EmptyPayload).and_then(parse_notification) {
        Ok(records) => records,
        Err(e) => {
            error!(error = %e, "Discarding undecodable notification");
            metrics::counter!("pictor.ingest.messages.invalid").increment(1);
            return Disposition::Commit;
        }
    };

    debug!(record_count = records.len(), "Received bucket notification");

    let report = pipeline.process_batch(records).await;
    disposition_for(&report)
}

pub fn disposition_for(report: &BatchReport) -> Disposition {
    if report.is_complete() {
        Disposition::Commit
    } else {
        Disposition::Redeliver
    }
}

/// One consumed message, detached from the client that fetched it
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<&'a [u8]>,
}

impl<'a> Delivery<'a> {
    pub fn from_message(message: &'a BorrowedMessage<'_>) -> Self {
        Self {
            topic: message.topic(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload(),
        }
    }
}

/// Offset management for the partitions a consumer is assigned.
#[async_trait]
pub trait PartitionControl: Send + Sync {
    /// Mark `offset` and every earlier offset of the partition as consumed.
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    /// Make `offset` the next message fetched from the partition.
    fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    /// Park a message that exhausted its delivery attempts.
    async fn dead_letter(&self, delivery: &Delivery<'_>, attempts: u32) -> Result<()>;
}

/// Bounded, exponentially delayed redelivery
#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    /// Deliveries before a message is dead-lettered (at least 1)
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RedeliveryPolicy {
    pub fn from_config(config: &KafkaConfig) -> Self {
        Self {
            max_attempts: config.max_delivery_attempts.max(1),
            backoff: config.retry_backoff(),
            max_backoff: config.max_retry_backoff(),
        }
    }

    /// Delay after the `attempt`-th failed delivery.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Where a message's partition stands after it was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Committed,
    /// The partition was sought back to the message; wait `delay` before consuming
    Rewound { attempt: u32, delay: Duration },
    DeadLettered { attempts: u32 },
}

/// Tracks failed deliveries per partition and decides commit, rewind or dead letter.
pub struct DeliveryTracker {
    policy: RedeliveryPolicy,
    /// Outstanding failed offset and its delivery count
    failures: HashMap<(String, i32), (i64, u32)>,
}

impl DeliveryTracker {
    pub fn new(policy: RedeliveryPolicy) -> Self {
        Self {
            policy,
            failures: HashMap::new(),
        }
    }

    pub async fn settle(
        &mut self,
        control: &dyn PartitionControl,
        delivery: &Delivery<'_>,
        disposition: Disposition,
    ) -> Settlement {
        let slot = (delivery.topic.to_string(), delivery.partition);

        if disposition == Disposition::Commit {
            self.failures.remove(&slot);
            commit(control, delivery);
            return Settlement::Committed;
        }

        let attempt = match self.failures.get(&slot) {
            Some(&(offset, count)) if offset == delivery.offset => count + 1,
            _ => 1,
        };

        if attempt < self.policy.max_attempts {
            self.failures.insert(slot, (delivery.offset, attempt));
            return rewind(control, delivery, attempt, self.policy.backoff_for(attempt));
        }

        match control.dead_letter(delivery, attempt).await {
            Ok(()) => {
                warn!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    attempts = attempt,
                    "Notification moved to dead letter topic"
                );
                self.failures.remove(&slot);
                commit(control, delivery);
                Settlement::DeadLettered { attempts: attempt }
            }
            Err(e) => {
                error!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Failed to dead-letter notification"
                );
                self.failures.insert(slot, (delivery.offset, attempt));
                rewind(control, delivery, attempt, self.policy.max_backoff)
            }
        }
    }
}

fn commit(control: &dyn PartitionControl, delivery: &Delivery<'_>) {
    if let Err(e) = control.commit(delivery.topic, delivery.partition, delivery.offset) {
        warn!(error = %e, "Failed to commit offset");
    }
}

fn rewind(
    control: &dyn PartitionControl,
    delivery: &Delivery<'_>,
    attempt: u32,
    delay: Duration,
) -> Settlement {
    if let Err(e) = control.rewind(delivery.topic, delivery.partition, delivery.offset) {
        error!(
            partition = delivery.partition,
            offset = delivery.offset,
            error = %e,
            "Failed to seek back to failed notification"
        );
    }
    Settlement::Rewound { attempt, delay }
}

/// Handle one message and settle its offset.
pub async fn deliver(
    pipeline: &IngestPipeline,
    tracker: &mut DeliveryTracker,
    control: &dyn PartitionControl,
    delivery: &Delivery<'_>,
) -> Settlement {
    let disposition = handle_payload(pipeline, delivery.payload).await;
    tracker.settle(control, delivery, disposition).await
}

/// Kafka consumer for bucket notification events
pub struct NotificationConsumer {
    consumer: StreamConsumer,
    producer: FutureProducer,
    pipeline: Arc<IngestPipeline>,
    policy: RedeliveryPolicy,
    dead_letter_topic: String,
    operation_timeout: Duration,
}

impl NotificationConsumer {
    /// Create a new consumer subscribed to the notification topic
    pub fn new(config: &KafkaConfig, pipeline: Arc<IngestPipeline>) -> Result<Self> {
        let mut base_config = ClientConfig::new();

        base_config.set("bootstrap.servers", &config.bootstrap_servers);

        if config.ssl_enabled {
            base_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                base_config.set("ssl.ca.location", ca_location);
            }
        }

        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            base_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = base_config
            .clone()
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
            .create()
            .context("Failed to create Kafka consumer")?;

        let producer: FutureProducer = base_config
            .clone()
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .context("Failed to create dead letter producer")?;

        consumer
            .subscribe(&[&config.notification_topic])
            .context("Failed to subscribe to notification topic")?;

        info!(
            topic = %config.notification_topic,
            group = %config.consumer_group,
            dead_letter_topic = %config.dead_letter_topic,
            max_attempts = config.max_delivery_attempts,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            producer,
            pipeline,
            policy: RedeliveryPolicy::from_config(config),
            dead_letter_topic: config.dead_letter_topic.clone(),
            operation_timeout: Duration::from_secs(10),
        })
    }

    /// Consume until `shutdown` is cancelled or the stream ends
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting notification consumer");

        let mut tracker = DeliveryTracker::new(self.policy.clone());
        let mut message_stream = self.consumer.stream();

        loop {
            let message_result = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Notification consumer shutting down");
                    break;
                }
                next = message_stream.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            let message = match message_result {
                Ok(message) => message,
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("pictor.ingest.kafka.errors").increment(1);
                    continue;
                }
            };

            let delay = self.process_message(&mut tracker, &message).await;
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Notification consumer shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if let Err(e) = self.producer.flush(Timeout::After(self.operation_timeout)) {
            warn!(error = %e, "Failed to flush dead letter producer");
        }

        Ok(())
    }

    /// Returns the delay to wait before consuming again.
    #[instrument(skip(self, tracker, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(
        &self,
        tracker: &mut DeliveryTracker,
        message: &BorrowedMessage<'_>,
    ) -> Duration {
        let delivery = Delivery::from_message(message);

        match deliver(&self.pipeline, tracker, self, &delivery).await {
            Settlement::Committed => {
                metrics::counter!("pictor.ingest.messages.processed").increment(1);
                Duration::ZERO
            }
            Settlement::Rewound { attempt, delay } => {
                warn!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Notification failed, redelivering"
                );
                metrics::counter!("pictor.ingest.messages.redelivered").increment(1);
                delay
            }
            Settlement::DeadLettered { .. } => {
                metrics::counter!("pictor.ingest.messages.dead_lettered").increment(1);
                Duration::ZERO
            }
        }
    }
}

#[async_trait]
impl PartitionControl for NotificationConsumer {
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }

    fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        self.consumer.seek(
            topic,
            partition,
            Offset::Offset(offset),
            Timeout::After(self.operation_timeout),
        )?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery<'_>, attempts: u32) -> Result<()> {
        let partition = delivery.partition.to_string();
        let offset = delivery.offset.to_string();
        let attempts = attempts.to_string();
        let key = format!("{}-{}-{}", delivery.topic, partition, offset);

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "original-topic",
                value: Some(delivery.topic.as_bytes()),
            })
            .insert(Header {
                key: "original-partition",
                value: Some(partition.as_bytes()),
            })
            .insert(Header {
                key: "original-offset",
                value: Some(offset.as_bytes()),
            })
            .insert(Header {
                key: "delivery-attempts",
                value: Some(attempts.as_bytes()),
            });

        let record = FutureRecord::to(&self.dead_letter_topic)
            .key(&key)
            .payload(delivery.payload.unwrap_or_default())
            .headers(headers);

        self.producer
            .send(record, Timeout::After(self.operation_timeout))
            .await
            .map_err(|(e, _)| e)
            .context("Failed to publish to dead letter topic")?;

        Ok(())
    }
}
