/// JWT Token Generation and Validation
///
/// `TokenCodec` signs and verifies access and refresh tokens. Each kind has
/// its own HS256 secret; a token signed with one secret never validates as
/// the other kind.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenKind};
use crate::clock::Clock;
use crate::configuration::JwtSettings;
use crate::error::{ConfigError, TokenError};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Freshly minted access and refresh tokens for one user
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry of the refresh token, persisted alongside its record
    pub refresh_expires_at: DateTime<Utc>,
}

struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: i64,
}

impl SigningKey {
    fn from_secret(secret: &str, lifetime: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        }
    }
}

pub struct TokenCodec {
    access: SigningKey,
    refresh: SigningKey,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    /// Build a codec from configuration
    ///
    /// # Errors
    /// Returns error if a secret is missing, both secrets are the same,
    /// or a lifetime is not positive
    pub fn new(config: &JwtSettings, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        if config.access_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.access_secret".to_string()));
        }
        if config.refresh_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.refresh_secret".to_string()));
        }
        if config.access_secret == config.refresh_secret {
            return Err(ConfigError::InvalidValue(
                "jwt.access_secret and jwt.refresh_secret must differ".to_string(),
            ));
        }
        if config.access_token_expiry <= 0 || config.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be positive".to_string(),
            ));
        }

        Ok(Self {
            access: SigningKey::from_secret(&config.access_secret, config.access_token_expiry),
            refresh: SigningKey::from_secret(&config.refresh_secret, config.refresh_token_expiry),
            issuer: config.issuer.clone(),
            clock,
        })
    }

    fn key(&self, kind: TokenKind) -> &SigningKey {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Access token lifetime in seconds
    pub fn access_token_lifetime(&self) -> i64 {
        self.access.lifetime
    }

    fn sign(&self, user_id: Uuid, kind: TokenKind) -> Result<(String, i64), TokenError> {
        let key = self.key(kind);
        let claims = Claims::new(
            user_id,
            kind,
            self.clock.timestamp(),
            key.lifetime,
            self.issuer.clone(),
        );

        let token = encode(&Header::new(ALGORITHM), &claims, &key.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok((token, claims.exp))
    }

    /// Issue a short-lived access token
    pub fn issue_access(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.sign(user_id, TokenKind::Access).map(|(token, _)| token)
    }

    /// Issue a long-lived refresh token
    pub fn issue_refresh(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.sign(user_id, TokenKind::Refresh).map(|(token, _)| token)
    }

    /// Issue an access token and a refresh token together
    pub fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, TokenError> {
        let access_token = self.issue_access(user_id)?;
        let (refresh_token, refresh_exp) = self.sign(user_id, TokenKind::Refresh)?;
        let refresh_expires_at = Utc
            .timestamp_opt(refresh_exp, 0)
            .single()
            .ok_or_else(|| TokenError::Signing("refresh expiry out of range".to_string()))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            refresh_expires_at,
        })
    }

    /// Validate a token of the given kind and return its claims
    ///
    /// # Errors
    /// - `UnexpectedAlgorithm` if the header names anything but HS256
    /// - `InvalidSignature` if the MAC does not match this kind's secret
    /// - `InvalidClaims` on issuer or kind mismatch
    /// - `Expired` once `exp` is behind the clock
    /// - `Malformed` for anything undecodable, including `alg: none` headers,
    ///   since `none` is not an algorithm the decoder can name
    pub fn validate(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[&self.issuer]);
        // Expiry is compared against the injected clock below
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.key(kind).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                match e.kind() {
                    ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                    ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                        TokenError::UnexpectedAlgorithm
                    }
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidIssuer | ErrorKind::MissingRequiredClaim(_) => {
                        TokenError::InvalidClaims
                    }
                    _ => TokenError::Malformed,
                }
            })?;

        if claims.typ != kind {
            return Err(TokenError::InvalidClaims);
        }
        if claims.is_expired_at(self.clock.timestamp()) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
