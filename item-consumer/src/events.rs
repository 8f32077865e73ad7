use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of an item. Serialized in event payloads and stored in
/// the `item_status` Postgres enum, both using the uppercase labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "item_status")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    New,
    Active,
    Inactive,
}

/// Request to create a new item. Consumed from the create-item topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItem {
    pub id: Uuid,
    pub name: String,
}

/// Request to move an existing item to a new status. Consumed from the
/// update-item topic; the item may not have been created yet when this
/// arrives, which is the race the retry pipeline exists for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItem {
    pub id: Uuid,
    pub status: ItemStatus,
}
