//! Session cookie handling and raw token extraction.

use axum::http::{HeaderMap, header};

use super::errors::AuthErrorKind;

/// Cookie carrying the access token.
pub const SESSION_COOKIE_NAME: &str = "jobboard_token";

const BEARER_PREFIX: &str = "Bearer ";

/// Attributes shared by every session cookie we set or clear.
#[derive(Debug, Clone, Default)]
pub struct CookieSettings {
    pub domain: Option<String>,
    pub secure: bool,
}

impl CookieSettings {
    fn attributes(&self) -> String {
        let mut attrs = String::from("HttpOnly; SameSite=Strict; Path=/");
        if let Some(domain) = &self.domain {
            attrs.push_str("; Domain=");
            attrs.push_str(domain);
        }
        if self.secure {
            attrs.push_str("; Secure");
        }
        attrs
    }

    pub fn session_cookie(&self, token: &str, max_age: i64) -> String {
        format!(
            "{}={}; Max-Age={}; {}",
            SESSION_COOKIE_NAME,
            token,
            max_age,
            self.attributes()
        )
    }

    pub fn clear_session_cookie(&self) -> String {
        format!("{}=; Max-Age=0; {}", SESSION_COOKIE_NAME, self.attributes())
    }
}

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// The raw token of a request: the named cookie first, then `Authorization: Bearer`.
pub fn extract_token<'a>(
    headers: &'a HeaderMap,
    cookie_name: &str,
) -> Result<&'a str, AuthErrorKind> {
    if let Some(token) = get_cookie(headers, cookie_name) {
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthErrorKind::TokenNotFound)?;

    match value.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthErrorKind::TokenNotFound),
    }
}
