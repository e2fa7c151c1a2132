use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{AuthService, TokenCodec};
use crate::clock::Clock;
use crate::configuration::{AuthSettings, JwtSettings};
use crate::error::AppError;
use crate::items::ItemService;
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    create_item, delete_item, get_current_user, health_check, list_items, login, logout, refresh,
    register, update_item,
};
use crate::store::{CredentialStore, ItemStore, RefreshTokenStore};

/// Services shared by every worker
#[derive(Clone)]
pub struct AppState {
    pub auth: web::Data<AuthService>,
    pub items: web::Data<ItemService>,
    pub codec: Arc<TokenCodec>,
}

/// Wire the services on top of a single store backend
///
/// # Errors
/// Returns error if the JWT or auth settings are rejected
pub fn build_state<S>(
    store: Arc<S>,
    jwt: &JwtSettings,
    auth: AuthSettings,
    clock: Arc<dyn Clock>,
) -> Result<AppState, AppError>
where
    S: CredentialStore + RefreshTokenStore + ItemStore + 'static,
{
    let codec = Arc::new(TokenCodec::new(jwt, clock.clone())?);
    let store_timeout = auth.store_timeout();

    let auth_service = AuthService::new(
        store.clone(),
        store.clone(),
        codec.clone(),
        clock,
        auth,
    )?;
    let item_service = ItemService::new(store, store_timeout);

    Ok(AppState {
        auth: web::Data::new(auth_service),
        items: web::Data::new(item_service),
        codec,
    })
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())      // Standard logging
            .wrap(LoggerMiddleware)       // Request timing

            // Shared state
            .app_data(state.auth.clone())
            .app_data(state.items.clone())

            // Public routes (no authentication required)
            .route("/health_check", web::get().to(health_check))
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))

            // Protected routes (require JWT authentication)
            .service(
                web::resource("/auth/me")
                    .wrap(JwtMiddleware::new(state.codec.clone()))
                    .route(web::get().to(get_current_user)),
            )
            .service(
                web::scope("/items")
                    .wrap(JwtMiddleware::new(state.codec.clone()))
                    .route("", web::post().to(create_item))
                    .route("", web::get().to(list_items))
                    .route("/{id}", web::put().to(update_item))
                    .route("/{id}", web::delete().to(delete_item)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
