/// Item service
///
/// Plain owner-scoped CRUD. Every lookup and mutation is keyed by the
/// caller's user id, so one user can neither see nor touch another's items.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{AppError, StoreError, ValidationError};
use crate::store::{bounded, Item, ItemStore};

const MAX_DESCRIPTION_LENGTH: usize = 1024;

pub struct ItemService {
    items: Arc<dyn ItemStore>,
    store_timeout: Duration,
}

fn validate_description(description: &str) -> Result<String, ValidationError> {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("description"));
    }
    if trimmed.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(ValidationError::TooLong("description", MAX_DESCRIPTION_LENGTH));
    }
    Ok(trimmed.to_string())
}

fn not_found() -> AppError {
    StoreError::NotFound("item".to_string()).into()
}

impl ItemService {
    pub fn new(items: Arc<dyn ItemStore>, store_timeout: Duration) -> Self {
        Self {
            items,
            store_timeout,
        }
    }

    pub async fn create(&self, owner_id: Uuid, description: &str) -> Result<Item, AppError> {
        let description = validate_description(description)?;
        let item = bounded(self.store_timeout, self.items.create(owner_id, &description)).await?;

        tracing::info!(user_id = %owner_id, item_id = %item.id, "Item created");
        Ok(item)
    }

    pub async fn list(&self, owner_id: Uuid) -> Result<Vec<Item>, AppError> {
        Ok(bounded(self.store_timeout, self.items.list_by_owner(owner_id)).await?)
    }

    /// Missing items and items owned by someone else both read as not found
    pub async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        description: &str,
    ) -> Result<Item, AppError> {
        let description = validate_description(description)?;
        let item = bounded(
            self.store_timeout,
            self.items.update(id, owner_id, &description),
        )
        .await?
        .ok_or_else(not_found)?;

        tracing::info!(user_id = %owner_id, item_id = %id, "Item updated");
        Ok(item)
    }

    pub async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), AppError> {
        if !bounded(self.store_timeout, self.items.delete(id, owner_id)).await? {
            return Err(not_found());
        }

        tracing::info!(user_id = %owner_id, item_id = %id, "Item deleted");
        Ok(())
    }
}
