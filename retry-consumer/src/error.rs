use common_kafka::kafka_consumer::AckErr;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors that terminate the retry consumer loop. Per-message failures are
/// handled inside the loop; only broker-level failures surface here.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("kafka consumer error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to update delivery state: {0}")]
    Delivery(#[from] AckErr),
}
