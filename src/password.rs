//! Password hashing and the password/user-name policies.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 64;

pub const MIN_USER_NAME_LENGTH: usize = 3;
pub const MAX_USER_NAME_LENGTH: usize = 30;

/// Hash a password into a PHC string with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Check a password against a stored PHC string. A malformed hash never verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Returns a reason when the password is not acceptable.
pub fn check_password_policy(password: &str) -> Result<(), &'static str> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err("Password must be at least 8 characters");
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err("Password must be at most 64 characters");
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err("Password must contain a letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain a digit");
    }
    Ok(())
}

pub fn check_user_name(user_name: &str) -> Result<(), &'static str> {
    let len = user_name.len();
    if !(MIN_USER_NAME_LENGTH..=MAX_USER_NAME_LENGTH).contains(&len) {
        return Err("User name must be between 3 and 30 characters");
    }
    if !user_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err("User name may only contain letters, digits and underscores");
    }
    Ok(())
}

/// Loose syntactic check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .filter(|label| !label.is_empty())
            .count()
            >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
