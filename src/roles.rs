//! Role catalog and role checks.
//!
//! Users store role ids; routes require role names. The catalog that maps
//! one to the other is read through the cache under [`ROLE_CATALOG_KEY`] and
//! expires after the configured TTL. Every mutation goes through
//! [`RoleCatalog::create_role`] so the cached copy is dropped immediately.

use std::time::Duration;

use tracing::warn;

use crate::cache::Cache;
use crate::db::{Database, DbError, Role};

pub const ROLE_CATALOG_KEY: &str = "roles";

/// Default lifetime of the cached catalog.
pub const DEFAULT_ROLE_CACHE_TTL: Duration = Duration::from_secs(300);

/// Whether a user holding `user_roles` may use a route requiring `required`.
/// An empty requirement admits every authenticated user.
pub fn has_required_role<S: AsRef<str>>(required: &[&str], user_roles: &[S]) -> bool {
    required.is_empty()
        || user_roles
            .iter()
            .any(|role| required.iter().any(|r| r.eq_ignore_ascii_case(role.as_ref())))
}

#[derive(Clone)]
pub struct RoleCatalog {
    db: Database,
    cache: Cache,
    ttl: Duration,
}

impl RoleCatalog {
    pub fn new(db: Database, cache: Cache, ttl: Duration) -> Self {
        Self { db, cache, ttl }
    }

    /// The full catalog, from cache when possible.
    pub async fn roles(&self) -> Result<Vec<Role>, DbError> {
        match self.cache.get(ROLE_CATALOG_KEY).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<Role>>(&bytes) {
                Ok(roles) => return Ok(roles),
                Err(e) => warn!(error = %e, "Discarding malformed cached role catalog"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Role cache read failed, using database"),
        }

        let roles = self.db.roles().list().await?;

        match serde_json::to_vec(&roles) {
            Ok(bytes) => {
                if let Err(e) = self.cache.set(ROLE_CATALOG_KEY, &bytes, Some(self.ttl)).await {
                    warn!(error = %e, "Failed to cache role catalog");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize role catalog"),
        }

        Ok(roles)
    }

    /// Drop the cached catalog.
    pub async fn invalidate(&self) {
        if let Err(e) = self.cache.delete(ROLE_CATALOG_KEY).await {
            warn!(error = %e, "Failed to invalidate role catalog");
        }
    }

    pub async fn create_role(&self, name: &str) -> Result<Role, DbError> {
        let role = self.db.roles().create(name).await?;
        self.invalidate().await;
        Ok(role)
    }

    /// Names of the roles with the given ids. Unknown ids are ignored.
    pub async fn names_for(&self, role_ids: &[String]) -> Result<Vec<String>, DbError> {
        let catalog = self.roles().await?;
        Ok(catalog
            .into_iter()
            .filter(|role| role_ids.contains(&role.id))
            .map(|role| role.name)
            .collect())
    }

    /// Ids of the named roles, or the first name missing from the catalog.
    pub async fn ids_for(&self, names: &[String]) -> Result<Result<Vec<String>, String>, DbError> {
        let catalog = self.roles().await?;
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            match catalog.iter().find(|role| role.name.eq_ignore_ascii_case(name)) {
                Some(role) => {
                    if !ids.contains(&role.id) {
                        ids.push(role.id.clone());
                    }
                }
                None => return Ok(Err(name.clone())),
            }
        }
        Ok(Ok(ids))
    }

    /// Role names of a user, or `None` when the user does not exist.
    pub async fn user_role_names(&self, user_id: &str) -> Result<Option<Vec<String>>, DbError> {
        let Some(user) = self.db.users().get_by_id(user_id).await? else {
            return Ok(None);
        };
        Ok(Some(self.names_for(&user.role_ids).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_check() {
        assert!(!has_required_role(&["admin"], &["editor"]));
        assert!(has_required_role(&["admin", "editor"], &["editor"]));
        assert!(has_required_role(&[], &[] as &[&str]));
        assert!(!has_required_role(&["admin"], &[] as &[&str]));
        assert!(has_required_role(&["admin"], &["ADMIN"]));
    }

    #[tokio::test]
    async fn test_catalog_is_read_through() {
        let db = Database::open(":memory:").await.unwrap();
        let cache = Cache::memory();
        let catalog = RoleCatalog::new(db.clone(), cache.clone(), DEFAULT_ROLE_CACHE_TTL);

        assert_eq!(cache.get(ROLE_CATALOG_KEY).await.unwrap(), None);
        let roles = catalog.roles().await.unwrap();
        assert_eq!(roles.len(), 3);
        assert!(cache.get(ROLE_CATALOG_KEY).await.unwrap().is_some());

        // A role added behind the catalog's back stays invisible until invalidation
        db.roles().create("editor").await.unwrap();
        assert_eq!(catalog.roles().await.unwrap().len(), 3);
        catalog.invalidate().await;
        assert_eq!(catalog.roles().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_create_role_invalidates() {
        let db = Database::open(":memory:").await.unwrap();
        let catalog = RoleCatalog::new(db, Cache::memory(), DEFAULT_ROLE_CACHE_TTL);

        assert_eq!(catalog.roles().await.unwrap().len(), 3);
        catalog.create_role("editor").await.unwrap();
        assert_eq!(catalog.roles().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_cached_catalog_expires() {
        let db = Database::open(":memory:").await.unwrap();
        let catalog = RoleCatalog::new(db.clone(), Cache::memory(), Duration::from_millis(20));

        assert_eq!(catalog.roles().await.unwrap().len(), 3);
        db.roles().create("editor").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(catalog.roles().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_names_and_ids() {
        let db = Database::open(":memory:").await.unwrap();
        let catalog = RoleCatalog::new(db, Cache::memory(), DEFAULT_ROLE_CACHE_TTL);

        let ids = catalog
            .ids_for(&["admin".into(), "user".into()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids.len(), 2);

        let mut names = catalog.names_for(&ids).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["admin", "user"]);

        let missing = catalog.ids_for(&["ghost".into()]).await.unwrap();
        assert_eq!(missing, Err("ghost".to_string()));
    }
}
