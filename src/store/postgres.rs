/// PostgreSQL store backed by a `sqlx` connection pool

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    hash_token, CredentialStore, Item, ItemStore, NewRefreshToken, RefreshTokenRecord,
    RefreshTokenStore, Rotation, User,
};
use crate::error::StoreError;

type UserRow = (Uuid, String, String, DateTime<Utc>);
type RefreshTokenRow = (
    Uuid,
    Uuid,
    String,
    DateTime<Utc>,
    bool,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);
type ItemRow = (Uuid, Uuid, String, DateTime<Utc>, DateTime<Utc>);

const REFRESH_TOKEN_COLUMNS: &str =
    "id, user_id, token_hash, expires_at, is_revoked, created_at, revoked_at";

fn user_from_row((id, email, password_hash, created_at): UserRow) -> User {
    User {
        id,
        email,
        password_hash,
        created_at,
    }
}

fn refresh_token_from_row(
    (id, user_id, token_hash, expires_at, revoked, created_at, revoked_at): RefreshTokenRow,
) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id,
        user_id,
        token_hash,
        expires_at,
        revoked,
        created_at,
        revoked_at,
    }
}

fn item_from_row((id, owner_id, description, created_at, updated_at): ItemRow) -> Item {
    Item {
        id,
        owner_id,
        description,
        created_at,
        updated_at,
    }
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations from `./migrations`
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(format!("Migration failed: {}", e)))
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn create(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, email, password_hash, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(password_hash)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(user_from_row(row))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(user_from_row))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(user_from_row))
    }
}

#[async_trait]
impl RefreshTokenStore for PostgresStore {
    async fn create(&self, token: NewRefreshToken<'_>) -> Result<RefreshTokenRecord, StoreError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(&format!(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            REFRESH_TOKEN_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(token.user_id)
        .bind(hash_token(token.token))
        .bind(token.expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(refresh_token_from_row(row))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(&format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = $1",
            REFRESH_TOKEN_COLUMNS
        ))
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(refresh_token_from_row))
    }

    async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE token_hash = $2 AND is_revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(hash_token(token))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn rotate(&self, old: &str, new: NewRefreshToken<'_>) -> Result<Rotation, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // Conditional claim: only one concurrent caller can flip the flag
        let claimed = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE token_hash = $2 AND is_revoked = false
            "#,
        )
        .bind(now)
        .bind(hash_token(old))
        .execute(&mut tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(Rotation::AlreadyRevoked);
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(hash_token(new.token))
        .bind(new.expires_at)
        .bind(now)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(Rotation::Rotated)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE user_id = $2 AND is_revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ItemStore for PostgresStore {
    async fn create(&self, owner_id: Uuid, description: &str) -> Result<Item, StoreError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, ItemRow>(
            r#"
            INSERT INTO items (id, owner_id, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING id, owner_id, description, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(description)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(item_from_row(row))
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT id, owner_id, description, created_at, updated_at
            FROM items
            WHERE owner_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(item_from_row).collect())
    }

    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        description: &str,
    ) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query_as::<_, ItemRow>(
            r#"
            UPDATE items
            SET description = $1, updated_at = $2
            WHERE id = $3 AND owner_id = $4
            RETURNING id, owner_id, description, created_at, updated_at
            "#,
        )
        .bind(description)
        .bind(Utc::now())
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(item_from_row))
    }

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM items WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
