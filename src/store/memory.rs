/// In-memory store (local runs and tests)

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    hash_token, CredentialStore, Item, ItemStore, NewRefreshToken, RefreshTokenRecord,
    RefreshTokenStore, Rotation, User,
};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    /// user_id -> User
    users: RwLock<HashMap<Uuid, User>>,
    /// token_hash -> record
    refresh_tokens: RwLock<HashMap<String, RefreshTokenRecord>>,
    /// item_id -> Item
    items: RwLock<HashMap<Uuid, Item>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_record(token: &NewRefreshToken<'_>) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id: Uuid::new_v4(),
        user_id: token.user_id,
        token_hash: hash_token(token.token),
        expires_at: token.expires_at,
        revoked: false,
        created_at: Utc::now(),
        revoked_at: None,
    }
}

fn insert_unique(
    tokens: &mut HashMap<String, RefreshTokenRecord>,
    record: RefreshTokenRecord,
) -> Result<RefreshTokenRecord, StoreError> {
    if tokens.contains_key(&record.token_hash) {
        return Err(StoreError::Duplicate("refresh token already stored".to_string()));
    }
    tokens.insert(record.token_hash.clone(), record.clone());
    Ok(record)
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == email) {
            return Err(StoreError::Duplicate("email already registered".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn create(&self, token: NewRefreshToken<'_>) -> Result<RefreshTokenRecord, StoreError> {
        let mut tokens = self.refresh_tokens.write().await;
        insert_unique(&mut tokens, new_record(&token))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let tokens = self.refresh_tokens.read().await;
        Ok(tokens.get(&hash_token(token)).cloned())
    }

    async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        let mut tokens = self.refresh_tokens.write().await;
        if let Some(record) = tokens.get_mut(&hash_token(token)) {
            if !record.revoked {
                record.revoked = true;
                record.revoked_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn rotate(&self, old: &str, new: NewRefreshToken<'_>) -> Result<Rotation, StoreError> {
        // One write guard covers the check, the revoke and the insert
        let mut tokens = self.refresh_tokens.write().await;
        let new_record = new_record(&new);
        if tokens.contains_key(&new_record.token_hash) {
            return Err(StoreError::Duplicate("refresh token already stored".to_string()));
        }

        match tokens.get_mut(&hash_token(old)) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                record.revoked_at = Some(Utc::now());
            }
            _ => return Ok(Rotation::AlreadyRevoked),
        }

        tokens.insert(new_record.token_hash.clone(), new_record);
        Ok(Rotation::Rotated)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut tokens = self.refresh_tokens.write().await;
        let now = Utc::now();
        let mut revoked = 0;
        for record in tokens
            .values_mut()
            .filter(|r| r.user_id == user_id && !r.revoked)
        {
            record.revoked = true;
            record.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn create(&self, owner_id: Uuid, description: &str) -> Result<Item, StoreError> {
        let now = Utc::now();
        let item = Item {
            id: Uuid::new_v4(),
            owner_id,
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.items.write().await.insert(item.id, item.clone());
        Ok(item)
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Item>, StoreError> {
        let items = self.items.read().await;
        let mut owned: Vec<Item> = items
            .values()
            .filter(|i| i.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by_key(|i| i.created_at);
        Ok(owned)
    }

    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        description: &str,
    ) -> Result<Option<Item>, StoreError> {
        let mut items = self.items.write().await;
        match items.get_mut(&id) {
            Some(item) if item.owner_id == owner_id => {
                item.description = description.to_string();
                item.updated_at = Utc::now();
                Ok(Some(item.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<bool, StoreError> {
        let mut items = self.items.write().await;
        let owned = items.get(&id).map_or(false, |i| i.owner_id == owner_id);
        if owned {
            items.remove(&id);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn new_token(user_id: Uuid, token: &str) -> NewRefreshToken<'_> {
        NewRefreshToken {
            user_id,
            token,
            expires_at: Utc::now() + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStore::new();
        CredentialStore::create(&store, "a@x.com", "hash").await.unwrap();

        let result = CredentialStore::create(&store, "a@x.com", "hash").await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_find_user_by_email_and_id() {
        let store = MemoryStore::new();
        let user = CredentialStore::create(&store, "a@x.com", "hash").await.unwrap();

        assert_eq!(store.find_by_email("a@x.com").await.unwrap(), Some(user.clone()));
        assert_eq!(store.find_by_id(user.id).await.unwrap(), Some(user));
        assert_eq!(store.find_by_email("b@x.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tokens_stored_as_digest() {
        let store = MemoryStore::new();
        let record = RefreshTokenStore::create(&store, new_token(Uuid::new_v4(), "plain"))
            .await
            .unwrap();

        assert_eq!(record.token_hash, hash_token("plain"));
        assert!(!record.revoked);
        assert_eq!(store.find_by_token("plain").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let store = MemoryStore::new();
        RefreshTokenStore::create(&store, new_token(Uuid::new_v4(), "t1"))
            .await
            .unwrap();

        store.revoke("t1").await.unwrap();
        let first = store.find_by_token("t1").await.unwrap().unwrap();
        store.revoke("t1").await.unwrap();
        let second = store.find_by_token("t1").await.unwrap().unwrap();

        assert!(second.revoked);
        assert_eq!(first.revoked_at, second.revoked_at);
        store.revoke("unknown").await.unwrap();
    }

    #[tokio::test]
    async fn test_rotate_only_once() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        RefreshTokenStore::create(&store, new_token(user_id, "old"))
            .await
            .unwrap();

        let first = store.rotate("old", new_token(user_id, "new1")).await.unwrap();
        let second = store.rotate("old", new_token(user_id, "new2")).await.unwrap();

        assert_eq!(first, Rotation::Rotated);
        assert_eq!(second, Rotation::AlreadyRevoked);
        assert!(store.find_by_token("old").await.unwrap().unwrap().revoked);
        assert!(!store.find_by_token("new1").await.unwrap().unwrap().revoked);
        assert_eq!(store.find_by_token("new2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        RefreshTokenStore::create(store.as_ref(), new_token(user_id, "old"))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let token = format!("new-{}", i);
                    store
                        .rotate("old", new_token(user_id, &token))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut rotated = 0;
        for handle in handles {
            if handle.await.unwrap() == Rotation::Rotated {
                rotated += 1;
            }
        }
        assert_eq!(rotated, 1);
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        for token in ["a", "b", "c"] {
            RefreshTokenStore::create(&store, new_token(user_id, token))
                .await
                .unwrap();
        }
        RefreshTokenStore::create(&store, new_token(other, "d"))
            .await
            .unwrap();
        store.revoke("a").await.unwrap();

        assert_eq!(store.revoke_all_for_user(user_id).await.unwrap(), 2);
        assert!(store.find_by_token("c").await.unwrap().unwrap().revoked);
        assert!(!store.find_by_token("d").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_items_are_owner_scoped() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let item = ItemStore::create(&store, owner, "lamp").await.unwrap();

        assert_eq!(store.list_by_owner(owner).await.unwrap(), vec![item.clone()]);
        assert!(store.list_by_owner(intruder).await.unwrap().is_empty());

        assert_eq!(store.update(item.id, intruder, "stolen").await.unwrap(), None);
        assert!(!store.delete(item.id, intruder).await.unwrap());

        let updated = store.update(item.id, owner, "desk lamp").await.unwrap().unwrap();
        assert_eq!(updated.description, "desk lamp");
        assert!(store.delete(item.id, owner).await.unwrap());
        assert!(store.list_by_owner(owner).await.unwrap().is_empty());
    }
}
