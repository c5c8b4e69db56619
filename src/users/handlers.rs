use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::{
    auth::{dto::PublicUser, middleware::AuthUser, repo::StoreError},
    error::AuthError,
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user))
        .route("/me", get(get_me))
}

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<PublicUser>>, AuthError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    let users = state.users.list_users(limit).await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state.users.find_by_id(id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AuthError> {
    // A valid token for a user that no longer exists is treated as no session.
    let user = state.users.find_by_id(user_id).await.map_err(|e| match e {
        StoreError::NotFound => {
            error!(user_id = %user_id, "session subject not found");
            AuthError::Unauthorized(crate::auth::jwt::TokenError::Missing)
        }
        other => other.into(),
    })?;
    Ok(Json(user.into()))
}
