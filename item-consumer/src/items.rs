use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::events::ItemStatus;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("item query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// The persisted business entity.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub status: ItemStatus,
}

/// Persistence seam for items. The store is only written from the business
/// consumer's success path; the retry pipeline never touches it.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Item>, StoreError>;
    async fn save(&self, item: &Item) -> Result<(), StoreError>;
}

pub struct PostgresItemStore {
    pool: PgPool,
}

impl PostgresItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemStore for PostgresItemStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Item>, StoreError> {
        let item = sqlx::query_as::<_, Item>(
            r#"
SELECT id, name, status
FROM items
WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn save(&self, item: &Item) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO items (id, name, status)
VALUES ($1, $2, $3)
ON CONFLICT (id) DO UPDATE
SET name = EXCLUDED.name,
    status = EXCLUDED.status,
    updated_at = NOW()
            "#,
        )
        .bind(item.id)
        .bind(&item.name)
        .bind(item.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory store for service tests.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryItemStore {
        items: Arc<Mutex<HashMap<Uuid, Item>>>,
    }

    impl MemoryItemStore {
        pub(crate) fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
            let store = Self::default();
            {
                let mut map = store.items.lock().unwrap();
                for item in items {
                    map.insert(item.id, item);
                }
            }
            store
        }

        pub(crate) fn get(&self, id: Uuid) -> Option<Item> {
            self.items.lock().unwrap().get(&id).cloned()
        }
    }

    #[async_trait]
    impl ItemStore for MemoryItemStore {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<Item>, StoreError> {
            Ok(self.items.lock().unwrap().get(&id).cloned())
        }

        async fn save(&self, item: &Item) -> Result<(), StoreError> {
            self.items.lock().unwrap().insert(item.id, item.clone());
            Ok(())
        }
    }
}
