use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("user not found")]
    NotFound,
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Persistence capability for user records.
///
/// `create_user` must reject a duplicate email atomically; callers never pre-check.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<User, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<User, StoreError>;
    /// Oldest accounts first, at most `limit` of them.
    async fn list_users(&self, limit: usize) -> Result<Vec<User>, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    /// Relies on the unique index on `users.email`.
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, name, password_hash, created_at
            "#,
        )
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::DuplicateEmail
            }
            _ => StoreError::Backend(e),
        })
    }

    async fn find_by_email(&self, email: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"SELECT id, email, name, password_hash, created_at FROM users WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn list_users(&self, limit: usize) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, created_at
            FROM users
            ORDER BY created_at, id
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }
}

#[derive(Default)]
struct MemoryTables {
    by_id: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

/// In-process store for development and tests. Uniqueness check and insert share one write lock.
#[derive(Default)]
pub struct MemoryUserStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.by_email.contains_key(&new.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.by_email.insert(user.email.clone(), user.id);
        tables.by_id.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<User, StoreError> {
        let tables = self.tables.read().await;
        tables
            .by_email
            .get(email)
            .and_then(|id| tables.by_id.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        self.tables
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_users(&self, limit: usize) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.by_id.values().cloned().collect();
        users.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        users.truncate(limit);
        Ok(users)
    }
}
