//! Refresh token records.
//!
//! Each user owns at most one record. Issuing a new refresh token replaces
//! the token, session id and expiry of the existing record in place; the
//! record id and creation time are kept.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use super::{DbError, format_timestamp, now_timestamp, parse_timestamp, timed};

#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    /// `jti` of the stored refresh token. Access tokens carry it as `sid`.
    pub session_id: String,
    pub token: String,
    pub expiration_date: DateTime<Utc>,
    pub created_at: String,
    pub updated_at: String,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date < now
    }
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: String,
    user_id: String,
    session_id: String,
    token: String,
    expiration_date: String,
    created_at: String,
    updated_at: String,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            session_id: row.session_id,
            token: row.token,
            // An unreadable expiry is treated as already expired.
            expiration_date: parse_timestamp(&row.expiration_date)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct RefreshTokenStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Insert or replace the record of `user_id`. Concurrent calls race; the last write wins.
    pub async fn upsert(
        &self,
        user_id: &str,
        session_id: &str,
        token: &str,
        expiration_date: &DateTime<Utc>,
    ) -> Result<(), DbError> {
        let now = now_timestamp();
        timed(
            self.timeout,
            sqlx::query(
                "INSERT INTO refresh_tokens
                    (id, user_id, session_id, token, expiration_date, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(user_id) DO UPDATE SET
                    session_id = excluded.session_id,
                    token = excluded.token,
                    expiration_date = excluded.expiration_date,
                    updated_at = excluded.updated_at",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(session_id)
            .bind(token)
            .bind(format_timestamp(expiration_date))
            .bind(&now)
            .bind(&now)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn get_by_user(&self, user_id: &str) -> Result<Option<RefreshTokenRecord>, DbError> {
        let row: Option<RefreshTokenRow> = timed(
            self.timeout,
            sqlx::query_as(
                "SELECT id, user_id, session_id, token, expiration_date, created_at, updated_at
                 FROM refresh_tokens WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    /// Delete the record of `user_id` (revoke).
    pub async fn delete_by_user(&self, user_id: &str) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_by_user(&self, user_id: &str) -> Result<i64, DbError> {
        let (count,): (i64,) = timed(
            self.timeout,
            sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool),
        )
        .await?;
        Ok(count)
    }
}
