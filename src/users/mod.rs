use axum::{middleware, Router};

use crate::{auth::middleware::require_session, state::AppState};

pub mod handlers;

/// Every route here sits behind the session gate.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::user_routes())
        .route_layer(middleware::from_fn_with_state(state, require_session))
}
