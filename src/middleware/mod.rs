/// Middleware module
///
/// Custom middleware for authentication.

mod jwt_middleware;

pub use jwt_middleware::{JwtMiddleware, AUTH_COOKIE};
