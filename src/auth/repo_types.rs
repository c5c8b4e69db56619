use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                   // unique user ID
    pub email: String,              // lowercased login identity
    pub name: String,               // display name
    #[serde(skip_serializing)]
    pub password_hash: String,      // Argon2 hash, not exposed in JSON
    pub created_at: OffsetDateTime, // creation timestamp
}

/// Fields supplied by sign-up; id and timestamp come from the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}
