/// Authentication service
///
/// Orchestrates registration, login, refresh-token rotation and logout on
/// top of the credential store, the refresh-token store and the token codec.
/// Holds no mutable state of its own; every request may run concurrently.
///
/// Refresh token lifecycle: a stored record is either active
/// (`revoked = false`) or revoked. Revocation is terminal. Expiry is derived
/// from `expires_at` at read time, and an expired record is revoked the
/// first time it is presented.

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::jwt::{TokenCodec, TokenPair};
use crate::auth::password::{dummy_hash, hash_password_blocking, verify_password_blocking};
use crate::clock::Clock;
use crate::configuration::AuthSettings;
use crate::error::{AppError, AuthError, StoreError, ValidationError};
use crate::store::{
    bounded, CredentialStore, NewRefreshToken, RefreshTokenStore, Rotation, User,
};

pub struct AuthService {
    users: Arc<dyn CredentialStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
    settings: AuthSettings,
    dummy_hash: String,
}

impl AuthService {
    /// # Errors
    /// Returns error if the configured hash cost is rejected by bcrypt
    pub fn new(
        users: Arc<dyn CredentialStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        codec: Arc<TokenCodec>,
        clock: Arc<dyn Clock>,
        settings: AuthSettings,
    ) -> Result<Self, AppError> {
        let dummy_hash = dummy_hash(settings.password_hash_cost)?;
        Ok(Self {
            users,
            refresh_tokens,
            codec,
            clock,
            settings,
            dummy_hash,
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Register a new user
    ///
    /// Input validation is the caller's job. A taken email surfaces as the
    /// generic `RegistrationFailed`.
    pub async fn register(&self, email: &str, password: &str) -> Result<User, AppError> {
        let password_hash =
            hash_password_blocking(password.to_string(), self.settings.password_hash_cost).await?;

        let user = bounded(
            self.settings.store_timeout(),
            self.users.create(email, &password_hash),
        )
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(_) => {
                tracing::info!("Registration rejected: email already registered");
                AppError::Auth(AuthError::RegistrationFailed)
            }
            other => AppError::Store(other),
        })?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Authenticate with email and password and issue a token pair
    ///
    /// Unknown email and wrong password fail identically. The refresh token
    /// is returned only after its record has been stored.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        let user = bounded(self.settings.store_timeout(), self.users.find_by_email(email)).await?;

        let (user, stored_hash) = match user {
            Some(user) => {
                let hash = user.password_hash.clone();
                (Some(user), hash)
            }
            None => (None, self.dummy_hash.clone()),
        };

        let password_valid = verify_password_blocking(password.to_string(), stored_hash).await?;
        let user = match user {
            Some(user) if password_valid => user,
            _ => return Err(AuthError::InvalidCredentials.into()),
        };

        let pair = self.codec.issue_pair(user.id)?;
        self.store_refresh_token(user.id, &pair).await?;

        tracing::info!(user_id = %user.id, "User logged in");
        Ok(pair)
    }

    /// Exchange a refresh token for a new pair (single-use rotation)
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        if refresh_token.trim().is_empty() {
            return Err(ValidationError::EmptyField("refresh_token").into());
        }
        let timeout = self.settings.store_timeout();

        let record = bounded(timeout, self.refresh_tokens.find_by_token(refresh_token))
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        if record.revoked {
            tracing::warn!(user_id = %record.user_id, "Revoked refresh token presented");
            self.on_reuse(record.user_id).await?;
            return Err(AuthError::RefreshTokenRevoked.into());
        }

        if record.is_expired_at(self.clock.now()) {
            tracing::info!(user_id = %record.user_id, "Expired refresh token presented");
            // The caller learns the token expired even if the revoke fails
            if let Err(e) = bounded(timeout, self.refresh_tokens.revoke(refresh_token)).await {
                tracing::warn!(
                    user_id = %record.user_id,
                    error = %e,
                    "Failed to revoke expired refresh token"
                );
            }
            return Err(AuthError::RefreshTokenExpired.into());
        }

        // Mint first: a signing failure must not burn the presented token
        let pair = self.codec.issue_pair(record.user_id)?;
        let replacement = NewRefreshToken {
            user_id: record.user_id,
            token: &pair.refresh_token,
            expires_at: pair.refresh_expires_at,
        };

        match bounded(timeout, self.refresh_tokens.rotate(refresh_token, replacement)).await? {
            Rotation::Rotated => {
                tracing::info!(user_id = %record.user_id, "Refresh token rotated");
                Ok(pair)
            }
            Rotation::AlreadyRevoked => {
                // Lost a race with a concurrent refresh of the same token
                tracing::warn!(user_id = %record.user_id, "Refresh token already rotated");
                self.on_reuse(record.user_id).await?;
                Err(AuthError::RefreshTokenRevoked.into())
            }
        }
    }

    /// Revoke a refresh token. Unknown and already revoked tokens are accepted.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AppError> {
        if refresh_token.trim().is_empty() {
            return Err(ValidationError::EmptyField("refresh_token").into());
        }
        bounded(
            self.settings.store_timeout(),
            self.refresh_tokens.revoke(refresh_token),
        )
        .await?;
        Ok(())
    }

    /// Look up the user an access token was issued to
    pub async fn current_user(&self, user_id: Uuid) -> Result<User, AppError> {
        bounded(self.settings.store_timeout(), self.users.find_by_id(user_id))
            .await?
            .ok_or_else(|| StoreError::NotFound("user".to_string()).into())
    }

    async fn store_refresh_token(&self, user_id: Uuid, pair: &TokenPair) -> Result<(), AppError> {
        let token = NewRefreshToken {
            user_id,
            token: &pair.refresh_token,
            expires_at: pair.refresh_expires_at,
        };
        bounded(self.settings.store_timeout(), self.refresh_tokens.create(token)).await?;
        Ok(())
    }

    async fn on_reuse(&self, user_id: Uuid) -> Result<(), AppError> {
        if !self.settings.revoke_all_on_reuse {
            return Ok(());
        }
        let revoked = bounded(
            self.settings.store_timeout(),
            self.refresh_tokens.revoke_all_for_user(user_id),
        )
        .await?;
        tracing::warn!(user_id = %user_id, revoked = revoked, "All refresh tokens revoked after reuse");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::TokenKind;
    use crate::clock::MockClock;
    use crate::configuration::JwtSettings;
    use crate::store::{MemoryStore, RefreshTokenRecord};
    use async_trait::async_trait;
    const MIN_COST: u32 = 4;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::time::Duration;

    struct TestContext {
        service: Arc<AuthService>,
        store: Arc<MemoryStore>,
        clock: Arc<MockClock>,
    }

    fn jwt_settings() -> JwtSettings {
        JwtSettings {
            access_secret: "test-access-secret-at-least-32-characters".to_string(),
            refresh_secret: "test-refresh-secret-at-least-32-characters".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    fn auth_settings() -> AuthSettings {
        AuthSettings {
            password_hash_cost: MIN_COST,
            store_timeout_ms: 1_000,
            revoke_all_on_reuse: false,
        }
    }

    fn context_with(settings: AuthSettings) -> TestContext {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MockClock::new());
        let codec = Arc::new(TokenCodec::new(&jwt_settings(), clock.clone()).unwrap());
        let service = AuthService::new(store.clone(), store.clone(), codec, clock.clone(), settings)
            .expect("Failed to build auth service");

        TestContext {
            service: Arc::new(service),
            store,
            clock,
        }
    }

    fn context() -> TestContext {
        context_with(auth_settings())
    }

    async fn stored(store: &MemoryStore, token: &str) -> RefreshTokenRecord {
        store
            .find_by_token(token)
            .await
            .unwrap()
            .expect("refresh token should be stored")
    }

    #[tokio::test]
    async fn test_register_hashes_password() {
        let ctx = context();
        let user = ctx.service.register("a@x.com", "pw123").await.unwrap();

        assert_eq!(user.email, "a@x.com");
        assert_ne!(user.password_hash, "pw123");
        assert!(user.password_hash.starts_with("$2"));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_generic() {
        let ctx = context();
        ctx.service.register("a@x.com", "pw123").await.unwrap();

        let result = ctx.service.register("a@x.com", "other").await;
        assert_eq!(result.unwrap_err(), AppError::Auth(AuthError::RegistrationFailed));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let ctx = context();
        ctx.service.register("a@x.com", "pw123").await.unwrap();

        let first = ctx.service.login("a@x.com", "pw123").await.unwrap();
        assert!(!first.access_token.is_empty());
        assert!(!first.refresh_token.is_empty());
        assert!(!stored(&ctx.store, &first.refresh_token).await.revoked);

        let second = ctx.service.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(stored(&ctx.store, &first.refresh_token).await.revoked);
        assert!(!stored(&ctx.store, &second.refresh_token).await.revoked);

        let replay = ctx.service.refresh(&first.refresh_token).await;
        assert_eq!(replay.unwrap_err(), AppError::Auth(AuthError::RefreshTokenRevoked));

        // The replacement keeps working
        assert!(ctx.service.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_issued_tokens_carry_user_id() {
        let ctx = context();
        let user = ctx.service.register("a@x.com", "pw123").await.unwrap();
        let pair = ctx.service.login("a@x.com", "pw123").await.unwrap();

        let claims = ctx
            .service
            .codec()
            .validate(&pair.access_token, TokenKind::Access)
            .unwrap();
        assert_eq!(claims.user_id().unwrap(), user.id);
        assert_eq!(stored(&ctx.store, &pair.refresh_token).await.user_id, user.id);
    }

    #[tokio::test]
    async fn test_login_does_not_reveal_unknown_email() {
        let ctx = context();
        ctx.service.register("a@x.com", "pw123").await.unwrap();

        let wrong_password = ctx.service.login("a@x.com", "wrong").await.unwrap_err();
        let unknown_email = ctx.service.login("nobody@x.com", "pw123").await.unwrap_err();

        assert_eq!(wrong_password, AppError::Auth(AuthError::InvalidCredentials));
        assert_eq!(wrong_password, unknown_email);
    }

    #[tokio::test]
    async fn test_unknown_refresh_token() {
        let ctx = context();
        let result = ctx.service.refresh("never-issued").await;

        assert_eq!(result.unwrap_err(), AppError::Auth(AuthError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn test_empty_refresh_token_is_validation_error() {
        let ctx = context();

        assert!(matches!(
            ctx.service.refresh("  ").await,
            Err(AppError::Validation(ValidationError::EmptyField("refresh_token")))
        ));
        assert!(matches!(
            ctx.service.logout("").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_revoked() {
        let ctx = context();
        ctx.service.register("a@x.com", "pw123").await.unwrap();
        let pair = ctx.service.login("a@x.com", "pw123").await.unwrap();

        ctx.clock.advance(ChronoDuration::days(7) + ChronoDuration::seconds(1));

        let result = ctx.service.refresh(&pair.refresh_token).await;
        assert_eq!(result.unwrap_err(), AppError::Auth(AuthError::RefreshTokenExpired));
        assert!(stored(&ctx.store, &pair.refresh_token).await.revoked);

        // Once revoked, the token reads as revoked
        let again = ctx.service.refresh(&pair.refresh_token).await;
        assert_eq!(again.unwrap_err(), AppError::Auth(AuthError::RefreshTokenRevoked));
    }

    #[tokio::test]
    async fn test_refresh_token_valid_at_expiry_instant() {
        let ctx = context();
        ctx.service.register("a@x.com", "pw123").await.unwrap();
        let pair = ctx.service.login("a@x.com", "pw123").await.unwrap();

        ctx.clock.advance(ChronoDuration::days(7));

        assert!(ctx.service.refresh(&pair.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let ctx = context();
        ctx.service.register("a@x.com", "pw123").await.unwrap();
        let pair = ctx.service.login("a@x.com", "pw123").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = ctx.service.clone();
                let token = pair.refresh_token.clone();
                tokio::spawn(async move { service.refresh(&token).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert_eq!(e, AppError::Auth(AuthError::RefreshTokenRevoked)),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_reuse_only_rejects_by_default() {
        let ctx = context();
        ctx.service.register("a@x.com", "pw123").await.unwrap();
        let first = ctx.service.login("a@x.com", "pw123").await.unwrap();
        let second = ctx.service.refresh(&first.refresh_token).await.unwrap();

        assert!(ctx.service.refresh(&first.refresh_token).await.is_err());
        assert!(!stored(&ctx.store, &second.refresh_token).await.revoked);
    }

    #[tokio::test]
    async fn test_reuse_can_revoke_every_session() {
        let ctx = context_with(AuthSettings {
            revoke_all_on_reuse: true,
            ..auth_settings()
        });
        ctx.service.register("a@x.com", "pw123").await.unwrap();
        let first = ctx.service.login("a@x.com", "pw123").await.unwrap();
        let other_device = ctx.service.login("a@x.com", "pw123").await.unwrap();
        let second = ctx.service.refresh(&first.refresh_token).await.unwrap();

        let replay = ctx.service.refresh(&first.refresh_token).await;
        assert_eq!(replay.unwrap_err(), AppError::Auth(AuthError::RefreshTokenRevoked));
        assert!(stored(&ctx.store, &second.refresh_token).await.revoked);
        assert!(stored(&ctx.store, &other_device.refresh_token).await.revoked);
    }

    #[tokio::test]
    async fn test_logout_revokes_and_is_idempotent() {
        let ctx = context();
        ctx.service.register("a@x.com", "pw123").await.unwrap();
        let pair = ctx.service.login("a@x.com", "pw123").await.unwrap();

        ctx.service.logout(&pair.refresh_token).await.unwrap();
        ctx.service.logout(&pair.refresh_token).await.unwrap();
        ctx.service.logout("never-issued").await.unwrap();

        assert!(stored(&ctx.store, &pair.refresh_token).await.revoked);
        assert!(ctx.service.refresh(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_current_user() {
        let ctx = context();
        let user = ctx.service.register("a@x.com", "pw123").await.unwrap();

        assert_eq!(ctx.service.current_user(user.id).await.unwrap(), user);
        assert!(matches!(
            ctx.service.current_user(Uuid::new_v4()).await,
            Err(AppError::Store(StoreError::NotFound(_)))
        ));
    }

    /// Refresh token store whose writes fail or hang; reads go to `inner`
    struct BrokenTokenStore {
        inner: Arc<MemoryStore>,
        hang: bool,
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("connection refused".to_string())
    }

    #[async_trait]
    impl RefreshTokenStore for BrokenTokenStore {
        async fn create(
            &self,
            _token: NewRefreshToken<'_>,
        ) -> Result<RefreshTokenRecord, StoreError> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Err(unavailable())
        }

        async fn find_by_token(
            &self,
            token: &str,
        ) -> Result<Option<RefreshTokenRecord>, StoreError> {
            self.inner.find_by_token(token).await
        }

        async fn revoke(&self, _token: &str) -> Result<(), StoreError> {
            Err(unavailable())
        }

        async fn rotate(
            &self,
            _old: &str,
            _new: NewRefreshToken<'_>,
        ) -> Result<Rotation, StoreError> {
            Err(unavailable())
        }

        async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
            self.inner.revoke_all_for_user(user_id).await
        }
    }

    struct BrokenContext {
        service: AuthService,
        tokens: Arc<MemoryStore>,
        clock: Arc<MockClock>,
    }

    fn broken_service(hang: bool, timeout_ms: u64) -> BrokenContext {
        let users = Arc::new(MemoryStore::new());
        let tokens = Arc::new(MemoryStore::new());
        let broken = Arc::new(BrokenTokenStore {
            inner: tokens.clone(),
            hang,
        });
        let clock = Arc::new(MockClock::new());
        let codec = Arc::new(TokenCodec::new(&jwt_settings(), clock.clone()).unwrap());
        let service = AuthService::new(
            users,
            broken,
            codec,
            clock.clone(),
            AuthSettings {
                store_timeout_ms: timeout_ms,
                ..auth_settings()
            },
        )
        .unwrap();

        BrokenContext {
            service,
            tokens,
            clock,
        }
    }

    /// Store a refresh token directly, bypassing login
    async fn seed_token(ctx: &BrokenContext, token: &str, expires_at: DateTime<Utc>) {
        let record = NewRefreshToken {
            user_id: Uuid::new_v4(),
            token,
            expires_at,
        };
        RefreshTokenStore::create(ctx.tokens.as_ref(), record)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_fails_when_refresh_token_cannot_be_stored() {
        let ctx = broken_service(false, 1_000);
        ctx.service.register("a@x.com", "pw123").await.unwrap();

        let result = ctx.service.login("a@x.com", "pw123").await;
        assert!(matches!(
            result,
            Err(AppError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_store_timeout_surfaces_unavailable() {
        let ctx = broken_service(true, 50);
        ctx.service.register("a@x.com", "pw123").await.unwrap();

        let err = ctx.service.login("a@x.com", "pw123").await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::Unavailable(_))));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_old_token_usable() {
        let ctx = broken_service(false, 1_000);
        seed_token(&ctx, "old-refresh-token", ctx.clock.now() + ChronoDuration::days(1)).await;

        let result = ctx.service.refresh("old-refresh-token").await;

        assert!(matches!(
            result,
            Err(AppError::Store(StoreError::Unavailable(_)))
        ));
        assert!(!stored(&ctx.tokens, "old-refresh-token").await.revoked);
    }

    #[tokio::test]
    async fn test_expired_token_reported_even_if_revoke_fails() {
        let ctx = broken_service(false, 1_000);
        seed_token(&ctx, "stale-refresh-token", ctx.clock.now() - ChronoDuration::seconds(1)).await;

        let result = ctx.service.refresh("stale-refresh-token").await;

        assert_eq!(result.unwrap_err(), AppError::Auth(AuthError::RefreshTokenExpired));
    }
}
