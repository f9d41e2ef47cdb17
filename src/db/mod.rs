mod ad_references;
mod ads;
mod jobs;
mod refresh_token;
mod role;
mod time;
mod user;

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::filter::CompiledQuery;
use crate::filter::sql::{Columns, push_predicate};

pub use ad_references::{AdReference, AdReferenceInput, AdReferenceStore};
pub use ads::{Ad, AdStore};
pub use jobs::{FilterOptions, Job, JobStatusUpdate, JobStore, NewJob};
pub use refresh_token::{RefreshTokenRecord, RefreshTokenStore};
pub use role::{Role, RoleStore};
pub use time::{format_timestamp, now_timestamp, parse_timestamp};
pub use user::{
    Experience, NewUser, ProfileUpdate, TechExperience, User, UserLink, UserStore,
};

/// Upper bound for a single store operation.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("database operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed JSON column: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Sqlx(sqlx::Error::Database(e)) => e.is_unique_violation(),
            _ => false,
        }
    }
}

/// Run a store operation under `limit`.
pub(crate) async fn timed<T, F>(limit: Duration, operation: F) -> Result<T, DbError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result.map_err(DbError::from),
        Err(_) => Err(DbError::Timeout(limit)),
    }
}

/// One page of a filtered listing.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub data: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            data: self.data.into_iter().map(f).collect(),
        }
    }
}

/// A table listing: what to select, from where, and which fields clients may use.
pub(crate) struct Listing {
    pub select: &'static str,
    pub from: &'static str,
    /// Fixed condition ANDed with the client filter.
    pub scope: Option<&'static str>,
    pub columns: Columns,
}

impl Listing {
    fn push_where(&self, qb: &mut QueryBuilder<Sqlite>, query: &CompiledQuery) {
        let predicate = self.columns.restrict(&query.predicate);
        qb.push(" WHERE ");
        if let Some(scope) = self.scope {
            qb.push("(");
            qb.push(scope);
            qb.push(") AND ");
        }
        push_predicate(qb, &predicate, &self.columns);
    }

    pub async fn fetch<R>(
        &self,
        pool: &SqlitePool,
        limit: Duration,
        query: &CompiledQuery,
    ) -> Result<Paginated<R>, DbError>
    where
        R: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let mut count = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", self.from));
        self.push_where(&mut count, query);
        let total: i64 = timed(limit, count.build_query_scalar::<i64>().fetch_one(pool)).await?;

        let data = if query.limit == 0 || query.skip >= total {
            Vec::new()
        } else {
            let mut select =
                QueryBuilder::new(format!("SELECT {} FROM {}", self.select, self.from));
            self.push_where(&mut select, query);
            select.push(" ORDER BY ");
            select.push(self.columns.order_by(&query.sort));
            select.push(" LIMIT ");
            select.push_bind(query.limit);
            select.push(" OFFSET ");
            select.push_bind(query.skip);
            timed(limit, select.build_query_as::<R>().fetch_all(pool)).await?
        };

        Ok(Paginated {
            total,
            page: query.page,
            per_page: query.limit,
            data,
        })
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    timeout: Duration,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(STORE_TIMEOUT)
            .connect(&url)
            .await?;

        let db = Self {
            pool,
            timeout: STORE_TIMEOUT,
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Override the per-operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        if version < 2 {
            self.migrate_v2().await?;
        }

        if version < 3 {
            self.migrate_v3().await?;
        }

        if version < 4 {
            self.migrate_v4().await?;
        }

        Ok(())
    }

    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                "CREATE TABLE users (
                    id TEXT PRIMARY KEY,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT,
                    user_name TEXT UNIQUE COLLATE NOCASE,
                    profile_image_url TEXT NOT NULL DEFAULT '',
                    city TEXT NOT NULL DEFAULT '',
                    state TEXT NOT NULL DEFAULT '',
                    about_me TEXT NOT NULL DEFAULT '',
                    links TEXT NOT NULL DEFAULT '[]',
                    experiences TEXT NOT NULL DEFAULT '[]',
                    tech_experiences TEXT NOT NULL DEFAULT '[]',
                    provider TEXT NOT NULL DEFAULT 'local',
                    roles TEXT NOT NULL DEFAULT '[]',
                    bookmarked_jobs TEXT NOT NULL DEFAULT '[]',
                    is_email_confirmed INTEGER NOT NULL DEFAULT 0,
                    validation_token TEXT,
                    is_public INTEGER NOT NULL DEFAULT 0,
                    profile_views INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    last_login TEXT
                )",
                "CREATE INDEX idx_users_validation_token ON users(validation_token)",
                "CREATE INDEX idx_users_created_at ON users(created_at)",
                "CREATE TABLE roles (
                    id TEXT PRIMARY KEY,
                    name TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    created_at TEXT NOT NULL
                )",
                "INSERT INTO roles (id, name, created_at) VALUES
                    (lower(hex(randomblob(16))), 'admin',
                        strftime('%Y-%m-%dT%H:%M:%S.000000000Z', 'now')),
                    (lower(hex(randomblob(16))), 'recruiter',
                        strftime('%Y-%m-%dT%H:%M:%S.000000000Z', 'now')),
                    (lower(hex(randomblob(16))), 'user',
                        strftime('%Y-%m-%dT%H:%M:%S.000000000Z', 'now'))",
                // At most one refresh record per user
                "CREATE TABLE refresh_tokens (
                    id TEXT PRIMARY KEY,
                    user_id TEXT UNIQUE NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    token TEXT NOT NULL,
                    expiration_date TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
            ],
        )
        .await
    }

    async fn migrate_v2(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            2,
            &[
                "CREATE TABLE jobs (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    company_name TEXT NOT NULL DEFAULT '',
                    location TEXT NOT NULL DEFAULT '',
                    salary TEXT NOT NULL DEFAULT '',
                    url TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    provider TEXT NOT NULL DEFAULT 'vagasprajr',
                    code TEXT UNIQUE NOT NULL,
                    short_url TEXT NOT NULL,
                    details_url TEXT NOT NULL,
                    creator_id TEXT,
                    is_approved INTEGER NOT NULL DEFAULT 0,
                    is_closed INTEGER NOT NULL DEFAULT 0,
                    qty_clicks INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
                "CREATE INDEX idx_jobs_public ON jobs(is_approved, is_closed, created_at)",
                "CREATE TABLE ads (
                    code TEXT PRIMARY KEY,
                    original_url TEXT NOT NULL,
                    source TEXT NOT NULL DEFAULT '',
                    qty_clicks INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                )",
            ],
        )
        .await
    }

    async fn migrate_v3(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            3,
            &[
                "CREATE TABLE ad_references (
                    id TEXT PRIMARY KEY,
                    description TEXT NOT NULL,
                    image_url TEXT NOT NULL DEFAULT '',
                    link_url TEXT NOT NULL DEFAULT '',
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
                "CREATE INDEX idx_ad_references_active ON ad_references(is_active, created_at)",
            ],
        )
        .await
    }

    /// Refresh records remember the session id their access tokens carry.
    /// Records written before this have an empty id and no longer refresh.
    async fn migrate_v4(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            4,
            &["ALTER TABLE refresh_tokens ADD COLUMN session_id TEXT NOT NULL DEFAULT ''"],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone(), self.timeout)
    }

    /// Get the refresh token store.
    pub fn refresh_tokens(&self) -> RefreshTokenStore {
        RefreshTokenStore::new(self.pool.clone(), self.timeout)
    }

    pub fn roles(&self) -> RoleStore {
        RoleStore::new(self.pool.clone(), self.timeout)
    }

    pub fn jobs(&self) -> JobStore {
        JobStore::new(self.pool.clone(), self.timeout)
    }

    pub fn ads(&self) -> AdStore {
        AdStore::new(self.pool.clone(), self.timeout)
    }

    pub fn ad_references(&self) -> AdReferenceStore {
        AdReferenceStore::new(self.pool.clone(), self.timeout)
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        assert_eq!(db.get_version().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_default_roles_seeded() {
        let db = Database::open(":memory:").await.unwrap();
        let names: Vec<String> = db
            .roles()
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["admin", "recruiter", "user"]);
    }

    #[tokio::test]
    async fn test_timed_reports_timeout() {
        let result: Result<(), DbError> = timed(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DbError::Timeout(_))));
    }
}
