/// Authentication module
///
/// Handles JWT issuance/validation, password hashing, and the
/// register / login / refresh lifecycle.

mod claims;
mod jwt;
mod password;
mod service;

pub use claims::{Claims, TokenKind};
pub use jwt::{TokenCodec, TokenPair};
pub use service::AuthService;
