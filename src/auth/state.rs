//! Authentication state trait and macro.

use super::cookie::CookieSettings;
use crate::roles::RoleCatalog;
use crate::session::Sessions;

/// State types that can authenticate requests.
pub trait HasAuthState {
    fn sessions(&self) -> &Sessions;
    fn role_catalog(&self) -> &RoleCatalog;
    fn cookies(&self) -> &CookieSettings;
}

/// Implement `HasAuthState` for a state struct with the standard fields.
///
/// The struct must have these fields:
/// - `sessions: Sessions`
/// - `roles: RoleCatalog`
/// - `cookies: CookieSettings`
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct JobsState {
///     pub db: Database,
///     pub sessions: Sessions,
///     pub roles: RoleCatalog,
///     pub cookies: CookieSettings,
/// }
///
/// impl_has_auth_state!(JobsState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_state {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthState for $state_type {
            fn sessions(&self) -> &$crate::session::Sessions {
                &self.sessions
            }
            fn role_catalog(&self) -> &$crate::roles::RoleCatalog {
                &self.roles
            }
            fn cookies(&self) -> &$crate::auth::CookieSettings {
                &self.cookies
            }
        }
    };
}
