use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::auth::{jwt::TokenError, password::HashError, repo::StoreError};

/// Every failure an auth or user handler can report to a client.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("email already registered")]
    EmailTaken,

    /// Unknown email and wrong password both end up here.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] TokenError),

    #[error("not found")]
    NotFound,

    /// Stored verifier could not be parsed.
    #[error("stored credential is corrupt")]
    CorruptCredential,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub error: String,
    pub status: u16,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::InvalidCredentials | AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::CorruptCredential | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidInput(_) => "INVALID_INPUT",
            AuthError::EmailTaken => "EMAIL_TAKEN",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::Unauthorized(_) => "UNAUTHORIZED",
            AuthError::NotFound => "NOT_FOUND",
            AuthError::CorruptCredential | AuthError::Internal(_) => "INTERNAL",
        }
    }

    /// Client-facing message; token and server detail stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AuthError::InvalidInput(msg) => msg.clone(),
            AuthError::Unauthorized(_) => "missing, invalid or expired session".into(),
            AuthError::CorruptCredential | AuthError::Internal(_) => {
                "internal server error".into()
            }
            other => other.to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            error: self.public_message(),
            status: self.status_code().as_u16(),
        }
    }
}

impl From<HashError> for AuthError {
    fn from(e: HashError) -> Self {
        match e {
            HashError::CorruptCredential(_) => AuthError::CorruptCredential,
            HashError::Hashing(msg) => AuthError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => AuthError::EmailTaken,
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Backend(e) => AuthError::Internal(anyhow::Error::new(e).context("user store")),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::Internal(e) => error!(error = ?e, "request failed"),
            AuthError::CorruptCredential => {
                error!("stored credential could not be parsed; operator attention required")
            }
            AuthError::Unauthorized(reason) => debug!(%reason, "unauthorized"),
            _ => {}
        }
        (self.status_code(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_failures_share_one_public_shape() {
        let bad_sig = AuthError::from(TokenError::BadSignature).body();
        let expired = AuthError::from(TokenError::Expired).body();
        assert_eq!(bad_sig.code, "UNAUTHORIZED");
        assert_eq!(bad_sig.error, expired.error);
        assert_eq!(bad_sig.status, 401);
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let err = AuthError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        let body = err.body();
        assert_eq!(body.status, 500);
        assert!(!body.error.contains("10.0.0.3"));
        assert_eq!(AuthError::CorruptCredential.body().error, body.error);
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert!(matches!(AuthError::from(StoreError::DuplicateEmail), AuthError::EmailTaken));
        assert!(matches!(AuthError::from(StoreError::NotFound), AuthError::NotFound));
        assert_eq!(AuthError::EmailTaken.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_input_message_reaches_client() {
        let body = AuthError::InvalidInput("password too short".into()).body();
        assert_eq!(body.code, "INVALID_INPUT");
        assert_eq!(body.error, "password too short");
    }
}
