mod auth;
mod health_check;
mod items;

pub use auth::{get_current_user, login, logout, refresh, register};
pub use health_check::health_check;
pub use items::{create_item, delete_item, list_items, update_item};
