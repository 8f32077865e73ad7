use common_kafka::kafka_consumer::AckErr;
use rdkafka::error::KafkaError;
use retry_common::sink::SinkError;
use thiserror::Error;

use crate::items::StoreError;

/// Per-message processing failures. These are logged and the message is
/// acknowledged; only the missing-entity race gets the retry path.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("failed to decode event payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("unreadable provenance headers: {0}")]
    Headers(#[from] retry_common::headers::HeaderError),
    #[error("item store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to publish retry envelope: {0}")]
    Sink(#[from] SinkError),
}

/// Errors that terminate a consumer loop.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("kafka consumer error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to update delivery state: {0}")]
    Delivery(#[from] AckErr),
}
