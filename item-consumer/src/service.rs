use metrics::counter;
use retry_common::headers::ProvenanceHeaders;
use retry_common::sink::{MessageSink, OutgoingMessage};
use retry_common::stamp::RetryStamper;
use tracing::debug;

use crate::error::ItemError;
use crate::events::{CreateItem, ItemStatus, UpdateItem};
use crate::items::{Item, ItemStore};

pub const ITEMS_CREATED: &str = "items_created_total";
pub const ITEMS_UPDATED: &str = "items_updated_total";
pub const ITEMS_SENT_TO_RETRY: &str = "items_sent_to_retry_total";

/// Business logic for item events. Create persists directly; update persists
/// when the item exists, and otherwise hands the event to the retry topic
/// with provenance stamped from the failing delivery.
pub struct ItemService<S, K> {
    store: S,
    sink: K,
    stamper: RetryStamper,
}

impl<S: ItemStore, K: MessageSink> ItemService<S, K> {
    pub fn new(store: S, sink: K, retry_topic: &str) -> Self {
        Self {
            store,
            sink,
            stamper: RetryStamper::new(retry_topic),
        }
    }

    pub async fn create_item(&self, event: CreateItem) -> Result<(), ItemError> {
        let item = Item {
            id: event.id,
            name: event.name,
            status: ItemStatus::New,
        };
        self.store.save(&item).await?;
        counter!(ITEMS_CREATED).increment(1);
        debug!(id = %item.id, "item persisted");
        Ok(())
    }

    /// Apply a status update, or park the event on the retry topic when the
    /// item does not exist yet. The missing item is an expected race with
    /// the create-item stream, not an error.
    pub async fn update_item(
        &self,
        event: UpdateItem,
        received_at: i64,
        source_topic: &str,
        inbound: &ProvenanceHeaders,
    ) -> Result<(), ItemError> {
        match self.store.find_by_id(event.id).await? {
            Some(mut item) => {
                item.status = event.status;
                self.store.save(&item).await?;
                counter!(ITEMS_UPDATED).increment(1);
                debug!(id = %item.id, status = ?item.status, "item updated");
            }
            None => {
                let stamped = self.stamper.stamp(received_at, source_topic, inbound);
                let payload = serde_json::to_vec(&event)?;
                self.sink
                    .send(OutgoingMessage {
                        topic: stamped.topic.clone(),
                        payload,
                        headers: stamped.headers(),
                    })
                    .await?;
                counter!(ITEMS_SENT_TO_RETRY).increment(1);
                debug!(id = %event.id, "item not found yet, sent to retry");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::testing::MemoryItemStore;
    use retry_common::sink::MemorySink;
    use uuid::Uuid;

    const RECEIVED_AT: i64 = 1_700_000_000_000;

    fn service(
        store: MemoryItemStore,
        sink: MemorySink,
    ) -> ItemService<MemoryItemStore, MemorySink> {
        ItemService::new(store, sink, "messaging-retry")
    }

    #[tokio::test]
    async fn create_persists_a_new_item() {
        let store = MemoryItemStore::default();
        let sink = MemorySink::new();
        let service = service(store.clone(), sink.clone());

        let id = Uuid::now_v7();
        service
            .create_item(CreateItem {
                id,
                name: "test-item".to_owned(),
            })
            .await
            .unwrap();

        let item = store.get(id).expect("item should be persisted");
        assert_eq!(item.name, "test-item");
        assert_eq!(item.status, ItemStatus::New);
        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn update_persists_when_the_item_exists() {
        let id = Uuid::now_v7();
        let store = MemoryItemStore::with_items([Item {
            id,
            name: "test-item".to_owned(),
            status: ItemStatus::New,
        }]);
        let sink = MemorySink::new();
        let service = service(store.clone(), sink.clone());

        service
            .update_item(
                UpdateItem {
                    id,
                    status: ItemStatus::Active,
                },
                RECEIVED_AT,
                "update-item",
                &ProvenanceHeaders::default(),
            )
            .await
            .unwrap();

        assert_eq!(store.get(id).unwrap().status, ItemStatus::Active);
        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn update_for_a_missing_item_is_parked_on_the_retry_topic() {
        let store = MemoryItemStore::default();
        let sink = MemorySink::new();
        let service = service(store.clone(), sink.clone());

        let id = Uuid::now_v7();
        let event = UpdateItem {
            id,
            status: ItemStatus::Active,
        };
        service
            .update_item(
                event.clone(),
                RECEIVED_AT,
                "update-item",
                &ProvenanceHeaders::default(),
            )
            .await
            .unwrap();

        assert!(store.get(id).is_none());

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "messaging-retry");

        let replayed: UpdateItem = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(replayed, event);

        let provenance = ProvenanceHeaders::from_kafka(&messages[0].headers).unwrap();
        assert_eq!(provenance.stamped(), Ok((RECEIVED_AT, "update-item")));
    }

    #[tokio::test]
    async fn refailure_keeps_the_original_provenance() {
        let store = MemoryItemStore::default();
        let sink = MemorySink::new();
        let service = service(store.clone(), sink.clone());

        // The event failed once already: it carries the first-seen timestamp
        // from that delivery
        let inbound = ProvenanceHeaders {
            original_received_timestamp: Some(RECEIVED_AT - 15_000),
            original_received_topic: None,
        };
        service
            .update_item(
                UpdateItem {
                    id: Uuid::now_v7(),
                    status: ItemStatus::Active,
                },
                RECEIVED_AT,
                "update-item",
                &inbound,
            )
            .await
            .unwrap();

        let messages = sink.messages();
        let provenance = ProvenanceHeaders::from_kafka(&messages[0].headers).unwrap();
        assert_eq!(
            provenance.stamped(),
            Ok((RECEIVED_AT - 15_000, "update-item"))
        );
    }
}
