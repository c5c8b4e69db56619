use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload used for session tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,   // user ID
    pub iat: i64,    // issued at (unix timestamp)
    pub exp: i64,    // expires at (unix timestamp)
    pub iss: String, // issuer
    pub aud: String, // audience
    pub jti: Uuid,   // token ID, key for revocation
}
