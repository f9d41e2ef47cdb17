use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{DbError, Listing, Paginated, now_timestamp, timed};
use crate::filter::CompiledQuery;
use crate::filter::sql::{ColumnKind, Columns, column};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AdReference {
    pub id: String,
    pub description: String,
    pub image_url: String,
    pub link_url: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdReferenceInput {
    pub description: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub link_url: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

const SELECT: &str = "id, description, image_url, link_url, is_active, created_at, updated_at";

const ALL_AD_REFERENCES: Listing = Listing {
    select: SELECT,
    from: "ad_references",
    scope: None,
    columns: Columns(&[
        column("id", "id", ColumnKind::Text),
        column("description", "description", ColumnKind::Text),
        column("image_url", "image_url", ColumnKind::Text),
        column("link_url", "link_url", ColumnKind::Text),
        column("is_active", "is_active", ColumnKind::Boolean),
        column("created_at", "created_at", ColumnKind::Timestamp),
    ]),
};

pub struct AdReferenceStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl AdReferenceStore {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub async fn create(&self, input: &AdReferenceInput) -> Result<AdReference, DbError> {
        let now = now_timestamp();
        let reference = AdReference {
            id: uuid::Uuid::new_v4().to_string(),
            description: input.description.clone(),
            image_url: input.image_url.clone(),
            link_url: input.link_url.clone(),
            is_active: input.is_active,
            created_at: now.clone(),
            updated_at: now,
        };
        timed(
            self.timeout,
            sqlx::query(
                "INSERT INTO ad_references \
                 (id, description, image_url, link_url, is_active, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&reference.id)
            .bind(&reference.description)
            .bind(&reference.image_url)
            .bind(&reference.link_url)
            .bind(reference.is_active)
            .bind(&reference.created_at)
            .bind(&reference.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(reference)
    }

    pub async fn get(&self, id: &str) -> Result<Option<AdReference>, DbError> {
        timed(
            self.timeout,
            sqlx::query_as(
                "SELECT id, description, image_url, link_url, is_active, created_at, updated_at \
                 FROM ad_references WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn list_active(&self) -> Result<Vec<AdReference>, DbError> {
        timed(
            self.timeout,
            sqlx::query_as(
                "SELECT id, description, image_url, link_url, is_active, created_at, updated_at \
                 FROM ad_references WHERE is_active = 1 ORDER BY created_at DESC",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn update(&self, id: &str, input: &AdReferenceInput) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query(
                "UPDATE ad_references SET description = ?, image_url = ?, link_url = ?, \
                 is_active = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&input.description)
            .bind(&input.image_url)
            .bind(&input.link_url)
            .bind(input.is_active)
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query("DELETE FROM ad_references WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn search(&self, query: &CompiledQuery) -> Result<Paginated<AdReference>, DbError> {
        ALL_AD_REFERENCES.fetch(&self.pool, self.timeout, query).await
    }
}
