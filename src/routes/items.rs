/// Item Routes
///
/// Owner-scoped CRUD. The owner is always the authenticated caller; item ids
/// belonging to other users answer 404.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::AppError;
use crate::items::ItemService;

#[derive(Deserialize)]
pub struct ItemRequest {
    pub description: String,
}

/// POST /items
pub async fn create_item(
    claims: web::ReqData<Claims>,
    form: web::Json<ItemRequest>,
    items: web::Data<ItemService>,
) -> Result<HttpResponse, AppError> {
    let owner_id = claims.user_id()?;
    let item = items.create(owner_id, &form.description).await?;

    Ok(HttpResponse::Created().json(item))
}

/// GET /items
pub async fn list_items(
    claims: web::ReqData<Claims>,
    items: web::Data<ItemService>,
) -> Result<HttpResponse, AppError> {
    let owner_id = claims.user_id()?;
    let list = items.list(owner_id).await?;

    Ok(HttpResponse::Ok().json(list))
}

/// PUT /items/{id}
pub async fn update_item(
    claims: web::ReqData<Claims>,
    path: web::Path<Uuid>,
    form: web::Json<ItemRequest>,
    items: web::Data<ItemService>,
) -> Result<HttpResponse, AppError> {
    let owner_id = claims.user_id()?;
    let item = items
        .update(path.into_inner(), owner_id, &form.description)
        .await?;

    Ok(HttpResponse::Ok().json(item))
}

/// DELETE /items/{id}
pub async fn delete_item(
    claims: web::ReqData<Claims>,
    path: web::Path<Uuid>,
    items: web::Data<ItemService>,
) -> Result<HttpResponse, AppError> {
    let owner_id = claims.user_id()?;
    items.delete(path.into_inner(), owner_id).await?;

    Ok(HttpResponse::NoContent().finish())
}
