use thiserror::Error;
use uuid::Uuid;

const MAX_TOKEN_LEN: usize = 256;

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("anonymous sign-in is disabled")]
    AnonymousDisabled,
    #[error("custom token is empty, too long or contains whitespace")]
    InvalidToken,
}

/// Resolves the identity for a sign-in attempt. Anonymous sessions get a fresh
/// random id; a custom token always maps to the same id.
pub fn resolve_identity(token: Option<&str>, allow_anonymous: bool) -> Result<String, AuthError> {
    match token {
        None => {
            if !allow_anonymous {
                return Err(AuthError::AnonymousDisabled);
            }
            Ok(Uuid::new_v4().to_string())
        }
        Some(token) => {
            if token.is_empty()
                || token.len() > MAX_TOKEN_LEN
                || token.chars().any(char::is_whitespace)
            {
                return Err(AuthError::InvalidToken);
            }
            Ok(Uuid::new_v5(&Uuid::NAMESPACE_URL, token.as_bytes()).to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_token_identity_is_stable() {
        let first = resolve_identity(Some("team-token"), false).unwrap();
        let second = resolve_identity(Some("team-token"), false).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, resolve_identity(Some("other-token"), false).unwrap());
    }

    #[test]
    fn anonymous_identities_differ() {
        let a = resolve_identity(None, true).unwrap();
        let b = resolve_identity(None, true).unwrap();
        assert_ne!(a, b);
        assert_eq!(resolve_identity(None, false), Err(AuthError::AnonymousDisabled));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert_eq!(resolve_identity(Some(""), true), Err(AuthError::InvalidToken));
        assert_eq!(resolve_identity(Some("a b"), true), Err(AuthError::InvalidToken));
        let long = "x".repeat(MAX_TOKEN_LEN + 1);
        assert_eq!(resolve_identity(Some(&long), true), Err(AuthError::InvalidToken));
    }
}
