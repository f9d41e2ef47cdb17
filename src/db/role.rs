use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{DbError, now_timestamp, timed};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: String,
    pub name: String,
}

pub struct RoleStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl RoleStore {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// The whole role catalog, ordered by name.
    pub async fn list(&self) -> Result<Vec<Role>, DbError> {
        timed(
            self.timeout,
            sqlx::query_as("SELECT id, name FROM roles ORDER BY name").fetch_all(&self.pool),
        )
        .await
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Role>, DbError> {
        timed(
            self.timeout,
            sqlx::query_as("SELECT id, name FROM roles WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool),
        )
        .await
    }

    /// Add a role. Names are unique, ignoring case.
    pub async fn create(&self, name: &str) -> Result<Role, DbError> {
        let role = Role {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        timed(
            self.timeout,
            sqlx::query("INSERT INTO roles (id, name, created_at) VALUES (?, ?, ?)")
                .bind(&role.id)
                .bind(&role.name)
                .bind(now_timestamp())
                .execute(&self.pool),
        )
        .await?;
        Ok(role)
    }
}
