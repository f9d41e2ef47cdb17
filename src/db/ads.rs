//! Promotional short links (`/r/{code}`).

use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use super::{DbError, now_timestamp, timed};
use crate::codes::short_code;

const MAX_CODE_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Ad {
    pub code: String,
    pub original_url: String,
    pub source: String,
    pub qty_clicks: i64,
    pub created_at: String,
}

pub struct AdStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl AdStore {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub async fn create(&self, original_url: &str, source: &str) -> Result<Ad, DbError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let ad = Ad {
                code: short_code(),
                original_url: original_url.to_string(),
                source: source.to_string(),
                qty_clicks: 0,
                created_at: now_timestamp(),
            };
            let inserted = timed(
                self.timeout,
                sqlx::query(
                    "INSERT INTO ads (code, original_url, source, qty_clicks, created_at) \
                     VALUES (?, ?, ?, 0, ?)",
                )
                .bind(&ad.code)
                .bind(&ad.original_url)
                .bind(&ad.source)
                .bind(&ad.created_at)
                .execute(&self.pool),
            )
            .await;

            match inserted {
                Ok(_) => return Ok(ad),
                Err(e) if e.is_unique_violation() && attempt < MAX_CODE_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<Ad>, DbError> {
        timed(
            self.timeout,
            sqlx::query_as(
                "SELECT code, original_url, source, qty_clicks, created_at FROM ads WHERE code = ?",
            )
            .bind(code)
            .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn increment_clicks(&self, code: &str) -> Result<(), DbError> {
        timed(
            self.timeout,
            sqlx::query("UPDATE ads SET qty_clicks = qty_clicks + 1 WHERE code = ?")
                .bind(code)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Ad>, DbError> {
        timed(
            self.timeout,
            sqlx::query_as(
                "SELECT code, original_url, source, qty_clicks, created_at FROM ads \
                 ORDER BY created_at DESC",
            )
            .fetch_all(&self.pool),
        )
        .await
    }
}
