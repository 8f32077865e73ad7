use std::sync::{Arc, Weak};
use std::time::Duration;

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    message::OwnedHeaders,
    ClientConfig, Message, Offset,
};

use crate::config::{ConsumerConfig, KafkaConfig};

/// A consumer bound to a single topic, yielding one message at a time along
/// with a [`DeliveryHandle`] that controls its acknowledgment.
///
/// Offset storing is disabled (`enable.auto.offset.store=false`), so a message
/// is only ever committed after the caller explicitly calls
/// [`DeliveryHandle::ack`]. Calling [`DeliveryHandle::defer`] instead seeks
/// the partition back to the message, so the broker re-presents it on a later
/// poll without committing - the redeliver-later primitive the retry pipeline
/// is built on.
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("received empty payload")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum AckErr {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("consumer gone")]
    Gone,
}

/// One delivery from the topic, with everything the retry pipeline needs:
/// the opaque payload, the broker-assigned receipt timestamp, and the
/// message headers.
pub struct ReceivedMessage {
    pub payload: Vec<u8>,
    /// Milliseconds since epoch, assigned by the broker at the moment of this
    /// delivery (not the original produce time of any earlier hop).
    pub received_at: i64,
    pub headers: OwnedHeaders,
    pub topic: String,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: KafkaConfig,
        consumer_config: ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                consumer_config.kafka_consumer_offset_reset,
            );

        client_config.set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Receive the next message from the topic. Empty payloads are acked
    /// immediately and reported as [`RecvErr::Empty`], so one poison pill
    /// cannot wedge the partition.
    pub async fn recv(&self) -> Result<(ReceivedMessage, DeliveryHandle), RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let handle = DeliveryHandle {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            // We auto-store poison pills, panicking on failure
            handle.ack().unwrap();
            return Err(RecvErr::Empty);
        };

        let received_at = message
            .timestamp()
            .to_millis()
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let received = ReceivedMessage {
            payload: payload.to_vec(),
            received_at,
            headers: message.headers().map(|h| h.detach()).unwrap_or_default(),
            topic: self.inner.topic.clone(),
        };

        Ok((received, handle))
    }
}

pub struct DeliveryHandle {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl DeliveryHandle {
    /// Store the offset, marking the message as processed. The stored offset
    /// is committed by the client on its regular commit interval.
    pub fn ack(self) -> Result<(), AckErr> {
        let inner = self.handle.upgrade().ok_or(AckErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }

    /// Do not store the offset; seek the partition back to this message so
    /// the broker re-presents it on a later poll. The caller is expected to
    /// pause before polling again, otherwise this becomes a busy loop.
    pub fn defer(self) -> Result<(), AckErr> {
        let inner = self.handle.upgrade().ok_or(AckErr::Gone)?;
        inner.consumer.seek(
            &inner.topic,
            self.partition,
            Offset::Offset(self.offset),
            Duration::from_secs(5),
        )?;
        Ok(())
    }
}
