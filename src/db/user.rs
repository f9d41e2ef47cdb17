use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{DbError, Listing, Paginated, now_timestamp, timed};
use crate::filter::CompiledQuery;
use crate::filter::sql::{ColumnKind, Columns, column};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLink {
    pub id: i64,
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    pub company: String,
    pub position: String,
    pub location: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub description: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechExperience {
    pub name: String,
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub user_name: Option<String>,
    pub profile_image_url: String,
    pub city: String,
    pub state: String,
    pub about_me: String,
    pub links: Vec<UserLink>,
    pub experiences: Vec<Experience>,
    pub tech_experiences: Vec<TechExperience>,
    pub provider: String,
    /// Role ids, resolved to names through the role catalog.
    pub role_ids: Vec<String>,
    pub bookmarked_jobs: Vec<String>,
    pub is_email_confirmed: bool,
    pub validation_token: Option<String>,
    pub is_public: bool,
    pub profile_views: i64,
    pub created_at: String,
    pub updated_at: String,
    pub last_login: Option<String>,
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, password_hash, user_name, \
    profile_image_url, city, state, about_me, links, experiences, tech_experiences, provider, \
    roles, bookmarked_jobs, is_email_confirmed, validation_token, is_public, profile_views, \
    created_at, updated_at, last_login";

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    id: String,
    first_name: String,
    last_name: String,
    email: String,
    password_hash: Option<String>,
    user_name: Option<String>,
    profile_image_url: String,
    city: String,
    state: String,
    about_me: String,
    links: String,
    experiences: String,
    tech_experiences: String,
    provider: String,
    roles: String,
    bookmarked_jobs: String,
    is_email_confirmed: i32,
    validation_token: Option<String>,
    is_public: i32,
    profile_views: i64,
    created_at: String,
    updated_at: String,
    last_login: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = serde_json::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            password_hash: row.password_hash,
            user_name: row.user_name,
            profile_image_url: row.profile_image_url,
            city: row.city,
            state: row.state,
            about_me: row.about_me,
            links: serde_json::from_str(&row.links)?,
            experiences: serde_json::from_str(&row.experiences)?,
            tech_experiences: serde_json::from_str(&row.tech_experiences)?,
            provider: row.provider,
            role_ids: serde_json::from_str(&row.roles)?,
            bookmarked_jobs: serde_json::from_str(&row.bookmarked_jobs)?,
            is_email_confirmed: row.is_email_confirmed != 0,
            validation_token: row.validation_token,
            is_public: row.is_public != 0,
            profile_views: row.profile_views,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login: row.last_login,
        })
    }
}

/// Fields of a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub provider: String,
    pub profile_image_url: String,
    pub role_ids: Vec<String>,
    pub is_email_confirmed: bool,
    pub validation_token: Option<String>,
}

/// Self-service profile changes. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub about_me: Option<String>,
    pub links: Option<Vec<UserLink>>,
    pub experiences: Option<Vec<Experience>>,
    pub tech_experiences: Option<Vec<TechExperience>>,
    pub is_public: Option<bool>,
}

const FILTER_COLUMNS: Columns = Columns(&[
    column("first_name", "first_name", ColumnKind::Text),
    column("last_name", "last_name", ColumnKind::Text),
    column("email", "email", ColumnKind::Text),
    column("user_name", "user_name", ColumnKind::Text),
    column("city", "city", ColumnKind::Text),
    column("state", "state", ColumnKind::Text),
    column("about_me", "about_me", ColumnKind::Text),
    column("provider", "provider", ColumnKind::Text),
    column("links", "links", ColumnKind::JsonArray),
    column("experiences", "experiences", ColumnKind::JsonArray),
    column("tech_experiences", "tech_experiences", ColumnKind::JsonArray),
    column("roles", "roles", ColumnKind::JsonArray),
    column("is_email_confirmed", "is_email_confirmed", ColumnKind::Boolean),
    column("is_public", "is_public", ColumnKind::Boolean),
    column("profile_views", "profile_views", ColumnKind::Integer),
    column("created_at", "created_at", ColumnKind::Timestamp),
    column("last_login", "last_login", ColumnKind::Timestamp),
]);

const ALL_USERS: Listing = Listing {
    select: USER_COLUMNS,
    from: "users",
    scope: None,
    columns: FILTER_COLUMNS,
};

const PUBLIC_TALENTS: Listing = Listing {
    select: USER_COLUMNS,
    from: "users",
    scope: Some("is_public = 1 AND is_email_confirmed = 1"),
    columns: FILTER_COLUMNS,
};

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl UserStore {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn fetch_one_where(
        &self,
        sql: &'static str,
        value: &str,
    ) -> Result<Option<User>, DbError> {
        let row: Option<UserRow> = timed(
            self.timeout,
            sqlx::query_as(sql).bind(value).fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::try_from).transpose()?)
    }

    /// Insert a new account. Emails are stored lowercased.
    pub async fn create(&self, new: &NewUser) -> Result<User, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        timed(
            self.timeout,
            sqlx::query(
                "INSERT INTO users (id, first_name, last_name, email, password_hash, provider, \
                 profile_image_url, roles, is_email_confirmed, validation_token, \
                 created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&new.first_name)
            .bind(&new.last_name)
            .bind(new.email.to_lowercase())
            .bind(&new.password_hash)
            .bind(&new.provider)
            .bind(&new.profile_image_url)
            .bind(serde_json::to_string(&new.role_ids)?)
            .bind(new.is_email_confirmed)
            .bind(&new.validation_token)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool),
        )
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or(DbError::Sqlx(sqlx::Error::RowNotFound))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>, DbError> {
        self.fetch_one_where(
            "SELECT id, first_name, last_name, email, password_hash, user_name, \
             profile_image_url, city, state, about_me, links, experiences, tech_experiences, \
             provider, roles, bookmarked_jobs, is_email_confirmed, validation_token, is_public, \
             profile_views, created_at, updated_at, last_login FROM users WHERE id = ?",
            id,
        )
        .await
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        self.fetch_one_where(
            "SELECT id, first_name, last_name, email, password_hash, user_name, \
             profile_image_url, city, state, about_me, links, experiences, tech_experiences, \
             provider, roles, bookmarked_jobs, is_email_confirmed, validation_token, is_public, \
             profile_views, created_at, updated_at, last_login FROM users WHERE email = ?",
            &email.trim().to_lowercase(),
        )
        .await
    }

    pub async fn get_by_user_name(&self, user_name: &str) -> Result<Option<User>, DbError> {
        self.fetch_one_where(
            "SELECT id, first_name, last_name, email, password_hash, user_name, \
             profile_image_url, city, state, about_me, links, experiences, tech_experiences, \
             provider, roles, bookmarked_jobs, is_email_confirmed, validation_token, is_public, \
             profile_views, created_at, updated_at, last_login FROM users WHERE user_name = ?",
            user_name,
        )
        .await
    }

    pub async fn get_by_validation_token(&self, token: &str) -> Result<Option<User>, DbError> {
        self.fetch_one_where(
            "SELECT id, first_name, last_name, email, password_hash, user_name, \
             profile_image_url, city, state, about_me, links, experiences, tech_experiences, \
             provider, roles, bookmarked_jobs, is_email_confirmed, validation_token, is_public, \
             profile_views, created_at, updated_at, last_login \
             FROM users WHERE validation_token = ?",
            token,
        )
        .await
    }

    /// Confirm the account owning `token` and consume the token.
    pub async fn confirm_email(&self, token: &str) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query(
                "UPDATE users SET is_email_confirmed = 1, validation_token = NULL, updated_at = ? \
                 WHERE validation_token = ?",
            )
            .bind(now_timestamp())
            .bind(token)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hand an unconfirmed account over to an identity provider that vouches for its email.
    ///
    /// Whoever registered the address never proved they own it, so their
    /// password and pending confirmation token are dropped with the confirmation.
    /// Returns false when the account was already confirmed.
    pub async fn confirm_for_provider(&self, id: &str, provider: &str) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query(
                "UPDATE users SET is_email_confirmed = 1, password_hash = NULL, \
                 validation_token = NULL, provider = ?, updated_at = ? \
                 WHERE id = ? AND is_email_confirmed = 0",
            )
            .bind(provider)
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_validation_token(&self, id: &str, token: &str) -> Result<(), DbError> {
        timed(
            self.timeout,
            sqlx::query("UPDATE users SET validation_token = ?, updated_at = ? WHERE id = ?")
                .bind(token)
                .bind(now_timestamp())
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Replace the password of the account owning `token` and consume the token.
    pub async fn reset_password(&self, token: &str, password_hash: &str) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query(
                "UPDATE users SET password_hash = ?, validation_token = NULL, updated_at = ? \
                 WHERE validation_token = ?",
            )
            .bind(password_hash)
            .bind(now_timestamp())
            .bind(token)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_last_login(&self, id: &str) -> Result<(), DbError> {
        timed(
            self.timeout,
            sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
                .bind(now_timestamp())
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<bool, DbError> {
        let links = update.links.as_ref().map(serde_json::to_string).transpose()?;
        let experiences = update
            .experiences
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let tech_experiences = update
            .tech_experiences
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = timed(
            self.timeout,
            sqlx::query(
                "UPDATE users SET
                    first_name = COALESCE(?, first_name),
                    last_name = COALESCE(?, last_name),
                    profile_image_url = COALESCE(?, profile_image_url),
                    city = COALESCE(?, city),
                    state = COALESCE(?, state),
                    about_me = COALESCE(?, about_me),
                    links = COALESCE(?, links),
                    experiences = COALESCE(?, experiences),
                    tech_experiences = COALESCE(?, tech_experiences),
                    is_public = COALESCE(?, is_public),
                    updated_at = ?
                 WHERE id = ?",
            )
            .bind(&update.first_name)
            .bind(&update.last_name)
            .bind(&update.profile_image_url)
            .bind(&update.city)
            .bind(&update.state)
            .bind(&update.about_me)
            .bind(links)
            .bind(experiences)
            .bind(tech_experiences)
            .bind(update.is_public)
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the public handle. Fails with a unique violation when taken.
    pub async fn set_user_name(&self, id: &str, user_name: &str) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query("UPDATE users SET user_name = ?, updated_at = ? WHERE id = ?")
                .bind(user_name)
                .bind(now_timestamp())
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether `user_name` is free for the account `id`.
    pub async fn is_user_name_available(&self, user_name: &str, id: &str) -> Result<bool, DbError> {
        let taken: Option<(String,)> = timed(
            self.timeout,
            sqlx::query_as("SELECT id FROM users WHERE user_name = ? AND id != ?")
                .bind(user_name)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(taken.is_none())
    }

    pub async fn set_role_ids(&self, id: &str, role_ids: &[String]) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query("UPDATE users SET roles = ?, updated_at = ? WHERE id = ?")
                .bind(serde_json::to_string(role_ids)?)
                .bind(now_timestamp())
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Add a job to the bookmarks. Adding twice keeps a single entry.
    pub async fn add_bookmark(&self, id: &str, job_id: &str) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query(
                "UPDATE users SET bookmarked_jobs = json_insert(bookmarked_jobs, '$[#]', ?1)
                 WHERE id = ?2
                 AND NOT EXISTS (SELECT 1 FROM json_each(users.bookmarked_jobs) WHERE value = ?1)",
            )
            .bind(job_id)
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_bookmark(&self, id: &str, job_id: &str) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query(
                "UPDATE users SET bookmarked_jobs =
                    (SELECT json_group_array(value)
                     FROM json_each(users.bookmarked_jobs) WHERE value != ?1)
                 WHERE id = ?2
                 AND EXISTS (SELECT 1 FROM json_each(users.bookmarked_jobs) WHERE value = ?1)",
            )
            .bind(job_id)
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_profile_views(&self, id: &str) -> Result<(), DbError> {
        timed(
            self.timeout,
            sqlx::query("UPDATE users SET profile_views = profile_views + 1 WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, DbError> {
        let result = timed(
            self.timeout,
            sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Filtered listing of every account.
    pub async fn search(&self, query: &CompiledQuery) -> Result<Paginated<User>, DbError> {
        let page = ALL_USERS
            .fetch::<UserRow>(&self.pool, self.timeout, query)
            .await?;
        collect_users(page)
    }

    /// Filtered listing of confirmed accounts that opted into a public profile.
    pub async fn search_talents(&self, query: &CompiledQuery) -> Result<Paginated<User>, DbError> {
        let page = PUBLIC_TALENTS
            .fetch::<UserRow>(&self.pool, self.timeout, query)
            .await?;
        collect_users(page)
    }
}

fn collect_users(page: Paginated<UserRow>) -> Result<Paginated<User>, DbError> {
    let data = page
        .data
        .into_iter()
        .map(User::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Paginated {
        total: page.total,
        page: page.page,
        per_page: page.per_page,
        data,
    })
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::filter::{Field, Filter, FilterRequest, compile};

    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: email.into(),
            password_hash: Some("hash".into()),
            provider: "local".into(),
            profile_image_url: String::new(),
            role_ids: vec![],
            is_email_confirmed: false,
            validation_token: Some("token-1".into()),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.users().create(&new_user("Ada@Example.com")).await.unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(user.links.is_empty());

        let found = db.users().get_by_email("ADA@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(db.users().get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_fails() {
        let db = Database::open(":memory:").await.unwrap();
        db.users().create(&new_user("ada@example.com")).await.unwrap();
        let err = db.users().create(&new_user("ada@example.com")).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_confirm_email_consumes_token() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.users().create(&new_user("ada@example.com")).await.unwrap();

        assert!(db.users().confirm_email("token-1").await.unwrap());
        assert!(!db.users().confirm_email("token-1").await.unwrap());

        let user = db.users().get_by_id(&user.id).await.unwrap().unwrap();
        assert!(user.is_email_confirmed);
        assert!(user.validation_token.is_none());
    }

    #[tokio::test]
    async fn test_bookmarks() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.users().create(&new_user("ada@example.com")).await.unwrap();

        assert!(db.users().add_bookmark(&user.id, "job-1").await.unwrap());
        assert!(!db.users().add_bookmark(&user.id, "job-1").await.unwrap());
        assert!(db.users().add_bookmark(&user.id, "job-2").await.unwrap());
        assert!(db.users().remove_bookmark(&user.id, "job-1").await.unwrap());
        assert!(!db.users().remove_bookmark(&user.id, "job-1").await.unwrap());

        let user = db.users().get_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(user.bookmarked_jobs, vec!["job-2".to_string()]);
    }

    #[tokio::test]
    async fn test_provider_confirmation_drops_unproven_credentials() {
        let db = Database::open(":memory:").await.unwrap();
        let ada = db.users().create(&new_user("ada@example.com")).await.unwrap();

        assert!(db.users().confirm_for_provider(&ada.id, "google").await.unwrap());
        let ada = db.users().get_by_id(&ada.id).await.unwrap().unwrap();
        assert!(ada.is_email_confirmed);
        assert!(ada.password_hash.is_none());
        assert!(ada.validation_token.is_none());
        assert_eq!(ada.provider, "google");

        // Confirmed accounts are left alone
        assert!(!db.users().confirm_for_provider(&ada.id, "other").await.unwrap());
        let ada = db.users().get_by_id(&ada.id).await.unwrap().unwrap();
        assert_eq!(ada.provider, "google");
    }

    #[tokio::test]
    async fn test_user_name_uniqueness() {
        let db = Database::open(":memory:").await.unwrap();
        let ada = db.users().create(&new_user("ada@example.com")).await.unwrap();
        let bob = db.users().create(&new_user("bob@example.com")).await.unwrap();

        db.users().set_user_name(&ada.id, "ada").await.unwrap();
        assert!(db.users().is_user_name_available("ada", &ada.id).await.unwrap());
        assert!(!db.users().is_user_name_available("ADA", &bob.id).await.unwrap());
        let err = db.users().set_user_name(&bob.id, "Ada").await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_talent_search_only_public() {
        let db = Database::open(":memory:").await.unwrap();
        let ada = db.users().create(&new_user("ada@example.com")).await.unwrap();
        db.users().create(&new_user("bob@example.com")).await.unwrap();
        db.users().confirm_for_provider(&ada.id, "google").await.unwrap();
        db.users()
            .update_profile(
                &ada.id,
                &ProfileUpdate {
                    is_public: Some(true),
                    city: Some("Recife".into()),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();

        let request = FilterRequest {
            page: 1,
            page_size: 10,
            filters: vec![Filter {
                operator: "and".into(),
                fields: vec![Field::new("city", "string", "recif")],
            }],
            ..FilterRequest::default()
        };
        let page = db.users().search_talents(&compile(&request)).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].id, ada.id);

        let everyone = db
            .users()
            .search(&compile(&FilterRequest {
                page: 1,
                page_size: 10,
                ..FilterRequest::default()
            }))
            .await
            .unwrap();
        assert_eq!(everyone.total, 2);
    }
}
