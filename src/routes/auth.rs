/// Authentication Routes
///
/// Handles user registration, login, token refresh, logout, and current user
/// information. Request bodies are validated here; everything else is
/// delegated to `AuthService`.

use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{AuthService, Claims, TokenPair};
use crate::error::{AppError, ErrorContext};
use crate::middleware::AUTH_COOKIE;
use crate::validators::{is_valid_email, is_valid_password};

/// User registration / login request
#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh / logout request
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: Uuid,
}

/// Authentication response with access and refresh tokens
#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// User information response
#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub created_at: String,
}

fn access_cookie(token: &str, max_age: i64) -> Cookie<'static> {
    Cookie::build(AUTH_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(max_age))
        .finish()
}

fn token_response(pair: TokenPair, expires_in: i64) -> HttpResponse {
    let cookie = access_cookie(&pair.access_token, expires_in);

    HttpResponse::Ok().cookie(cookie).json(AuthResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in,
    })
}

/// POST /auth/register
///
/// Register a new user with email and password.
///
/// # Errors
/// - 400: Validation errors, or registration failed (email taken)
/// - 503: Store unavailable
pub async fn register(
    form: web::Json<CredentialsRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");

    let email = is_valid_email(&form.email)?;
    is_valid_password(&form.password)?;

    let user = auth.register(&email, &form.password).await?;

    tracing::debug!(request_id = %context.request_id, "Registration request served");

    Ok(HttpResponse::Created().json(RegisterResponse {
        message: "registered".to_string(),
        user_id: user.id,
    }))
}

/// POST /auth/login
///
/// Authenticate user with email and password.
/// Returns access token and refresh token on success.
///
/// # Errors
/// - 400: Validation error (invalid email format)
/// - 401: Invalid credentials (email not found or wrong password)
///
/// # Security Notes
/// - Uses same error for "not found" and "wrong password"
pub async fn login(
    form: web::Json<CredentialsRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let email = is_valid_email(&form.email)?;
    is_valid_password(&form.password)?;

    let pair = auth.login(&email, &form.password).await?;

    tracing::debug!(request_id = %context.request_id, "Login request served");

    Ok(token_response(pair, auth.codec().access_token_lifetime()))
}

/// POST /auth/refresh
///
/// Exchange a refresh token for a new pair. The presented token is revoked;
/// presenting it again is rejected.
///
/// # Errors
/// - 400: Empty refresh token
/// - 401: Invalid, expired, or revoked refresh token
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let pair = auth.refresh(&form.refresh_token).await?;

    tracing::debug!(request_id = %context.request_id, "Refresh request served");

    Ok(token_response(pair, auth.codec().access_token_lifetime()))
}

/// POST /auth/logout
///
/// Revoke the presented refresh token and clear the access cookie.
/// Unknown or already revoked tokens still answer 204.
pub async fn logout(
    form: web::Json<RefreshRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    auth.logout(&form.refresh_token).await?;

    let mut cookie = Cookie::build(AUTH_COOKIE, "").path("/").finish();
    cookie.make_removal();

    Ok(HttpResponse::NoContent().cookie(cookie).finish())
}

/// GET /auth/me
///
/// Get current authenticated user's information.
/// **Requires valid JWT access token** (claims are injected by JWT middleware).
///
/// # Errors
/// - 401: Missing or invalid token (handled by middleware)
/// - 404: User no longer exists
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let context = ErrorContext::new("current_user").with_user_id(user_id.to_string());

    let user = auth.current_user(user_id).await?;

    tracing::debug!(
        request_id = %context.request_id,
        user_id = ?context.user_id,
        "Current user served"
    );

    Ok(HttpResponse::Ok().json(UserResponse {
        id: user.id.to_string(),
        email: user.email,
        created_at: user.created_at.to_rfc3339(),
    }))
}
