use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthResponse, MessageResponse, SignInRequest, SignOutRequest, SignUpRequest},
        middleware::bearer_token,
        services,
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-out", post(sign_out))
}

#[instrument(skip(state, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let res = services::sign_up(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

#[instrument(skip(state, payload))]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    services::sign_in(&state, payload).await.map(Json)
}

/// Token comes from the JSON body or, failing that, the bearer header.
#[instrument(skip_all)]
pub async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<SignOutRequest>>,
) -> Json<MessageResponse> {
    let body_token = payload.and_then(|Json(p)| p.token);
    let token = body_token.as_deref().or_else(|| bearer_token(&headers));
    services::sign_out(&state, token).await;
    Json(MessageResponse {
        message: "signed out",
    })
}
