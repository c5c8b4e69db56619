use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::User;

/// Request body for sign-up.
#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Request body for sign-in.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Request body for sign-out; a bearer header works too.
#[derive(Debug, Default, Deserialize)]
pub struct SignOutRequest {
    #[serde(default)]
    pub token: Option<String>,
}

/// Response returned after sign-up or sign-in.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            created_at: u.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_never_carries_the_hash() {
        let user = User {
            id: Uuid::new_v4(),
            email: "test@example.com".into(),
            name: "Test".into(),
            password_hash: "$argon2id$secret".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&PublicUser::from(user.clone())).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(!json.contains("argon2"));

        let raw = serde_json::to_string(&user).unwrap();
        assert!(!raw.contains("password_hash"));
    }
}
