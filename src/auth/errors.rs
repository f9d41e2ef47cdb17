//! Authentication error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::cookie::CookieSettings;
use crate::jwt::TokenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    TokenNotFound,
    InvalidToken,
    ExpiredToken,
    Unauthenticated,
    /// Authenticated, but none of the required roles.
    Unauthorized,
    StoreError,
}

impl From<TokenError> for AuthErrorKind {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AuthErrorKind::ExpiredToken,
            TokenError::Invalid => AuthErrorKind::InvalidToken,
            TokenError::Signing(_) => AuthErrorKind::StoreError,
        }
    }
}

impl AuthErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            AuthErrorKind::TokenNotFound
            | AuthErrorKind::InvalidToken
            | AuthErrorKind::ExpiredToken
            | AuthErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            AuthErrorKind::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable identifier clients can branch on.
    pub fn code(self) -> &'static str {
        match self {
            AuthErrorKind::TokenNotFound => "token_not_found",
            AuthErrorKind::InvalidToken => "invalid_token",
            AuthErrorKind::ExpiredToken => "expired_token",
            AuthErrorKind::Unauthenticated => "unauthenticated",
            AuthErrorKind::Unauthorized => "unauthorized",
            AuthErrorKind::StoreError => "store_error",
        }
    }

    fn message(self) -> &'static str {
        match self {
            AuthErrorKind::TokenNotFound => "Not authenticated",
            AuthErrorKind::InvalidToken => "Invalid token",
            AuthErrorKind::ExpiredToken => "Token has expired",
            AuthErrorKind::Unauthenticated => "Invalid credentials",
            AuthErrorKind::Unauthorized => "Insufficient permissions",
            AuthErrorKind::StoreError => "Database error",
        }
    }

    fn clears_cookie(self) -> bool {
        matches!(self, AuthErrorKind::InvalidToken | AuthErrorKind::ExpiredToken)
    }
}

/// API authentication errors (JSON body; clears the session cookie when the
/// presented token is unusable).
#[derive(Debug)]
pub struct ApiAuthError {
    pub kind: AuthErrorKind,
    clear_cookie: Option<String>,
}

impl ApiAuthError {
    pub fn new(kind: AuthErrorKind, cookies: &CookieSettings) -> Self {
        Self {
            kind,
            clear_cookie: kind.clears_cookie().then(|| cookies.clear_session_cookie()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    code: &'static str,
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        let mut response = (
            self.kind.status_code(),
            Json(ErrorResponse {
                error: self.kind.message(),
                code: self.kind.code(),
            }),
        )
            .into_response();

        if let Some(cookie) = self.clear_cookie {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AuthErrorKind::TokenNotFound.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthErrorKind::ExpiredToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthErrorKind::Unauthorized.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthErrorKind::StoreError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_only_token_failures_clear_cookie() {
        let settings = CookieSettings::default();

        let expired = ApiAuthError::new(AuthErrorKind::ExpiredToken, &settings).into_response();
        let cookie = expired.headers().get(header::SET_COOKIE).unwrap();
        assert!(cookie.to_str().unwrap().contains("Max-Age=0"));

        let missing = ApiAuthError::new(AuthErrorKind::TokenNotFound, &settings).into_response();
        assert!(missing.headers().get(header::SET_COOKIE).is_none());
    }
}
