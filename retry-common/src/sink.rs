use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common_kafka::kafka_producer::KafkaContext;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::OwnedHeaders;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::error;

/// A record bound for some topic, with its provenance headers attached.
#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub headers: OwnedHeaders,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("message rejected by the broker as too large")]
    MessageTooBig,
    #[error("failed to produce to kafka: {0}")]
    Kafka(KafkaError),
    #[error("timed out before the broker acknowledged the write")]
    Canceled,
}

/// The publish side of the broker gateway. Both consumer services publish
/// through this seam, which keeps the handoff and replay paths testable
/// without a broker.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: OutgoingMessage) -> Result<(), SinkError>;
}

#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
}

impl KafkaSink {
    pub fn new(producer: FutureProducer<KafkaContext>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, message: OutgoingMessage) -> Result<(), SinkError> {
        let delivery = match self.producer.send_result(FutureRecord {
            topic: message.topic.as_str(),
            payload: Some(&message.payload),
            partition: None,
            key: None::<&str>,
            timestamp: None,
            headers: Some(message.headers.clone()),
        }) {
            Ok(delivery) => delivery,
            Err((e, _)) => {
                return match e.rdkafka_error_code() {
                    Some(RDKafkaErrorCode::MessageSizeTooLarge) => Err(SinkError::MessageTooBig),
                    _ => {
                        error!("failed to enqueue record for {}: {}", message.topic, e);
                        Err(SinkError::Kafka(e))
                    }
                }
            }
        };

        match delivery.await {
            Err(_) => {
                // Cancelled due to timeout while retrying
                error!("failed to produce to {} before write timeout", message.topic);
                Err(SinkError::Canceled)
            }
            Ok(Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge), _))) => {
                Err(SinkError::MessageTooBig)
            }
            Ok(Err((err, _))) => {
                error!("failed to produce to {}: {}", message.topic, err);
                Err(SinkError::Kafka(err))
            }
            Ok(Ok(_)) => Ok(()),
        }
    }
}

/// Records everything it is asked to publish. Used by the service tests and
/// handy when running a consumer against a scratch environment without a
/// second topic to write to.
#[derive(Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<OutgoingMessage>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.messages.lock().expect("poisoned MemorySink lock").clone()
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, message: OutgoingMessage) -> Result<(), SinkError> {
        self.messages
            .lock()
            .expect("poisoned MemorySink lock")
            .push(message);
        Ok(())
    }
}
