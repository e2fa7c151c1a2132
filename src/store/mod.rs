/// Persistence layer
///
/// The auth core and item service talk to storage only through the traits
/// below. Two backends exist: PostgreSQL (`postgres`) and an in-process map
/// (`memory`) used for local runs and tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StoreError;

/// Registered user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted refresh token
///
/// `revoked` only ever goes from false to true; rows are never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Refresh token about to be stored
#[derive(Debug, Clone)]
pub struct NewRefreshToken<'a> {
    pub user_id: Uuid,
    pub token: &'a str,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of an atomic refresh token rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Old token revoked and replacement stored
    Rotated,
    /// Old token was already revoked (or unknown); nothing was written
    AlreadyRevoked,
}

/// Owner-scoped item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Hash a refresh token using SHA-256
///
/// Only the digest is stored; lookups hash the presented token.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bound a store call by `timeout`; running out of time reads as `Unavailable`
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| StoreError::Unavailable(format!("store call exceeded {:?}", timeout)))?
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store a new user. Fails with `Duplicate` if the email is taken.
    async fn create(&self, email: &str, password_hash: &str) -> Result<User, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(&self, token: NewRefreshToken<'_>) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Mark a token revoked. Revoking a revoked or unknown token is not an error.
    async fn revoke(&self, token: &str) -> Result<(), StoreError>;

    /// Revoke `old` only if it is still active and store `new` in the same
    /// transaction. Concurrent callers presenting the same `old` token see
    /// exactly one `Rotated`.
    async fn rotate(&self, old: &str, new: NewRefreshToken<'_>) -> Result<Rotation, StoreError>;

    /// Revoke every active token of a user, returning how many were revoked
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn create(&self, owner_id: Uuid, description: &str) -> Result<Item, StoreError>;

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Item>, StoreError>;

    /// Update an item owned by `owner_id`. `None` if no such item.
    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        description: &str,
    ) -> Result<Option<Item>, StoreError>;

    /// Delete an item owned by `owner_id`. `false` if no such item.
    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<bool, StoreError>;
}
