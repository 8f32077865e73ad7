use std::sync::Arc;

use common_kafka::kafka_consumer::{RecvErr, SingleTopicConsumer};
use health::HealthHandle;
use metrics::counter;
use retry_common::headers::ProvenanceHeaders;
use retry_common::sink::MessageSink;
use tracing::error;

use crate::error::WorkerError;
use crate::events::{CreateItem, UpdateItem};
use crate::items::ItemStore;
use crate::service::ItemService;

pub const CREATE_MESSAGES_RECEIVED: &str = "create_item_messages_received_total";
pub const UPDATE_MESSAGES_RECEIVED: &str = "update_item_messages_received_total";
pub const MESSAGES_FAILED: &str = "item_messages_failed_total";

/// Consumes the create-item topic and persists new items.
pub struct CreateItemConsumer<S, K> {
    consumer: SingleTopicConsumer,
    service: Arc<ItemService<S, K>>,
    liveness: HealthHandle,
}

impl<S: ItemStore, K: MessageSink> CreateItemConsumer<S, K> {
    pub fn new(
        consumer: SingleTopicConsumer,
        service: Arc<ItemService<S, K>>,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            consumer,
            service,
            liveness,
        }
    }

    /// Run until the broker connection fails. Every message is acknowledged:
    /// failures are logged and dropped so one bad event cannot wedge the
    /// partition.
    pub async fn run(&self) -> Result<(), WorkerError> {
        loop {
            self.liveness.report_healthy().await;

            let (message, delivery) = match self.consumer.recv().await {
                Ok(received) => received,
                Err(RecvErr::Empty) => continue,
                Err(RecvErr::Kafka(err)) => return Err(err.into()),
            };
            counter!(CREATE_MESSAGES_RECEIVED).increment(1);

            let result = match serde_json::from_slice::<CreateItem>(&message.payload) {
                Ok(event) => self.service.create_item(event).await,
                Err(err) => Err(err.into()),
            };
            if let Err(err) = result {
                error!("create item - error processing message: {}", err);
                counter!(MESSAGES_FAILED, "topic" => "create-item").increment(1);
            }
            delivery.ack()?;
        }
    }
}

/// Consumes the update-item topic. Updates that arrive before their item are
/// handed to the retry topic by the service; everything else is persisted or
/// dropped with a log line.
pub struct UpdateItemConsumer<S, K> {
    consumer: SingleTopicConsumer,
    service: Arc<ItemService<S, K>>,
    liveness: HealthHandle,
}

impl<S: ItemStore, K: MessageSink> UpdateItemConsumer<S, K> {
    pub fn new(
        consumer: SingleTopicConsumer,
        service: Arc<ItemService<S, K>>,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            consumer,
            service,
            liveness,
        }
    }

    pub async fn run(&self) -> Result<(), WorkerError> {
        loop {
            self.liveness.report_healthy().await;

            let (message, delivery) = match self.consumer.recv().await {
                Ok(received) => received,
                Err(RecvErr::Empty) => continue,
                Err(RecvErr::Kafka(err)) => return Err(err.into()),
            };
            counter!(UPDATE_MESSAGES_RECEIVED).increment(1);

            let result = match (
                serde_json::from_slice::<UpdateItem>(&message.payload),
                ProvenanceHeaders::from_kafka(&message.headers),
            ) {
                (Ok(event), Ok(inbound)) => {
                    self.service
                        .update_item(event, message.received_at, &message.topic, &inbound)
                        .await
                }
                (Err(err), _) => Err(err.into()),
                (_, Err(err)) => Err(err.into()),
            };
            if let Err(err) = result {
                error!("update item - error processing message: {}", err);
                counter!(MESSAGES_FAILED, "topic" => "update-item").increment(1);
            }
            delivery.ack()?;
        }
    }
}
