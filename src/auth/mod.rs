//! Request authentication with role-based access control.
//!
//! The access token travels in the `jobboard_token` cookie or an
//! `Authorization: Bearer` header and is validated statelessly. Routes that
//! require roles resolve the caller's role ids through the cached catalog.

mod cookie;
mod errors;
mod extractors;
mod ip;
mod state;

pub use cookie::{CookieSettings, SESSION_COOKIE_NAME, extract_token, get_cookie};
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{AdminOnly, AnyRole, Auth, RoleConstraint, StaffOnly};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthState;
