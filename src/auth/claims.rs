/// JWT Claims structure
///
/// Payload shared by access and refresh tokens. The `typ` claim keeps one
/// kind from being accepted where the other is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TokenError;

/// Which of the two bearer tokens a claim set belongs to
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT Claims for access and refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Token kind
    pub typ: TokenKind,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
    /// Unique token ID
    pub jti: String,
}

impl Claims {
    /// Create new claims issued at `now` and expiring `expiry_seconds` later
    pub fn new(
        user_id: Uuid,
        typ: TokenKind,
        now: i64,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        Self {
            sub: user_id.to_string(),
            typ,
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Extract user ID from claims
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::InvalidClaims)
    }

    /// Check if token has expired at `now`
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp < now
    }
}
