use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod dto;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod revocation;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
