use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{DbError, Listing, Paginated, now_timestamp, timed};
use crate::codes::short_code;
use crate::filter::CompiledQuery;
use crate::filter::sql::{ColumnKind, Columns, column};

/// Provider recorded when the poster does not name one.
pub const DEFAULT_PROVIDER: &str = "vagasprajr";

const MAX_CODE_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub salary: String,
    pub url: String,
    pub description: String,
    pub provider: String,
    pub code: String,
    pub short_url: String,
    pub details_url: String,
    pub creator_id: Option<String>,
    pub is_approved: bool,
    pub is_closed: bool,
    pub qty_clicks: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewJob {
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub salary: String,
    pub url: String,
    pub description: String,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobStatusUpdate {
    pub is_approved: Option<bool>,
    pub is_closed: Option<bool>,
}

/// Distinct values offered as filter choices.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterOptions {
    pub companies: Vec<String>,
    pub locations: Vec<String>,
    pub salaries: Vec<String>,
    pub providers: Vec<String>,
}

const JOB_SELECT: &str = "id, title, company_name, location, salary, url, description, provider, \
    code, short_url, details_url, creator_id, is_approved, is_closed, qty_clicks, \
    created_at, updated_at";

const FILTER_COLUMNS: Columns = Columns(&[
    column("title", "title", ColumnKind::Text),
    column("company_name", "company_name", ColumnKind::Text),
    column("location", "location", ColumnKind::Text),
    column("salary", "salary", ColumnKind::Text),
    column("description", "description", ColumnKind::Text),
    column("provider", "provider", ColumnKind::Text),
    column("code", "code", ColumnKind::Text),
    column("id", "id", ColumnKind::Text),
    column("is_approved", "is_approved", ColumnKind::Boolean),
    column("is_closed", "is_closed", ColumnKind::Boolean),
    column("qty_clicks", "qty_clicks", ColumnKind::Integer),
    column("created_at", "created_at", ColumnKind::Timestamp),
]);

const PUBLIC_JOBS: Listing = Listing {
    select: JOB_SELECT,
    from: "jobs",
    scope: Some("is_approved = 1 AND is_closed = 0"),
    columns: FILTER_COLUMNS,
};

const ALL_JOBS: Listing = Listing {
    select: JOB_SELECT,
    from: "jobs",
    scope: None,
    columns: FILTER_COLUMNS,
};

pub struct JobStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl JobStore {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Insert a posting under a fresh short code. New postings await approval.
    pub async fn create(
        &self,
        job: &NewJob,
        creator_id: Option<&str>,
        base_ui_host: &str,
    ) -> Result<Job, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let base = base_ui_host.trim_end_matches('/');
        let provider = job
            .provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROVIDER);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let code = short_code();
            let now = now_timestamp();
            let inserted = timed(
                self.timeout,
                sqlx::query(
                    "INSERT INTO jobs (id, title, company_name, location, salary, url, \
                     description, provider, code, short_url, details_url, creator_id, \
                     created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&job.title)
                .bind(&job.company_name)
                .bind(&job.location)
                .bind(&job.salary)
                .bind(&job.url)
                .bind(&job.description)
                .bind(provider)
                .bind(&code)
                .bind(format!("{}/go/{}", base, code))
                .bind(format!("{}/v/{}", base, code))
                .bind(creator_id)
                .bind(&now)
                .bind(&now)
                .execute(&self.pool),
            )
            .await;

            match inserted {
                Ok(_) => break,
                Err(e) if e.is_unique_violation() && attempt < MAX_CODE_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }

        self.get_by_id(&id)
            .await?
            .ok_or(DbError::Sqlx(sqlx::Error::RowNotFound))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Job>, DbError> {
        timed(
            self.timeout,
            sqlx::query_as(
                "SELECT id, title, company_name, location, salary, url, description, provider, \
                 code, short_url, details_url, creator_id, is_approved, is_closed, qty_clicks, \
                 created_at, updated_at FROM jobs WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    /// An approved, open posting by short code.
    pub async fn get_public_by_code(&self, code: &str) -> Result<Option<Job>, DbError> {
        timed(
            self.timeout,
            sqlx::query_as(
                "SELECT id, title, company_name, location, salary, url, description, provider, \
                 code, short_url, details_url, creator_id, is_approved, is_closed, qty_clicks, \
                 created_at, updated_at FROM jobs \
                 WHERE code = ? AND is_approved = 1 AND is_closed = 0",
            )
            .bind(code)
            .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn increment_clicks(&self, id: &str) -> Result<(), DbError> {
        timed(
            self.timeout,
            sqlx::query("UPDATE jobs SET qty_clicks = qty_clicks + 1 WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn update_status(&self, id: &str, update: &JobStatusUpdate) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query(
                "UPDATE jobs SET is_approved = COALESCE(?, is_approved), \
                 is_closed = COALESCE(?, is_closed), updated_at = ? WHERE id = ?",
            )
            .bind(update.is_approved)
            .bind(update.is_closed)
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
            sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Filtered listing of approved, open postings.
    pub async fn search_public(&self, query: &CompiledQuery) -> Result<Paginated<Job>, DbError> {
        PUBLIC_JOBS.fetch(&self.pool, self.timeout, query).await
    }

    /// Filtered listing of every posting.
    pub async fn search_all(&self, query: &CompiledQuery) -> Result<Paginated<Job>, DbError> {
        ALL_JOBS.fetch(&self.pool, self.timeout, query).await
    }

    /// Distinct non-empty values of public postings.
    pub async fn filter_options(&self) -> Result<FilterOptions, DbError> {
        Ok(FilterOptions {
            companies: self
                .distinct(
                    "SELECT DISTINCT company_name FROM jobs \
                     WHERE is_approved = 1 AND is_closed = 0 AND company_name != '' ORDER BY 1",
                )
                .await?,
            locations: self
                .distinct(
                    "SELECT DISTINCT location FROM jobs \
                     WHERE is_approved = 1 AND is_closed = 0 AND location != '' ORDER BY 1",
                )
                .await?,
            salaries: self
                .distinct(
                    "SELECT DISTINCT salary FROM jobs \
                     WHERE is_approved = 1 AND is_closed = 0 AND salary != '' ORDER BY 1",
                )
                .await?,
            providers: self
                .distinct(
                    "SELECT DISTINCT provider FROM jobs \
                     WHERE is_approved = 1 AND is_closed = 0 AND provider != '' ORDER BY 1",
                )
                .await?,
        })
    }

    async fn distinct(&self, sql: &'static str) -> Result<Vec<String>, DbError> {
        timed(
            self.timeout,
            sqlx::query_scalar(sql).fetch_all(&self.pool),
        )
        .await
    }
}
