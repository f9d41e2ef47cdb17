//! Random identifiers handed out to users.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of job and ad short-link codes.
pub const SHORT_CODE_LEN: usize = 6;

/// Length of email confirmation and password recovery tokens.
pub const SECRET_TOKEN_LEN: usize = 32;

fn alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn short_code() -> String {
    alphanumeric(SHORT_CODE_LEN)
}

pub fn secret_token() -> String {
    alphanumeric(SECRET_TOKEN_LEN)
}

/// Whether `code` could have been produced by [`short_code`].
pub fn is_short_code(code: &str) -> bool {
    code.len() == SHORT_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths_and_alphabet() {
        let code = short_code();
        assert!(is_short_code(&code));
        let token = secret_token();
        assert_eq!(token.len(), SECRET_TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_is_short_code_rejects_other_input() {
        assert!(!is_short_code("abc"));
        assert!(!is_short_code("abc-12"));
        assert!(!is_short_code("abcdefg"));
    }
}
