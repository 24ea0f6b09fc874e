//! API token generation and hashing.
//!
//! Stored tokens keep only a short clear-text prefix, used to narrow the
//! lookup, and an argon2 hash of the whole token.

use argon2::{password_hash::{PasswordHasher, PasswordVerifier, SaltString}, Argon2, PasswordHash};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::errors::ServiceError;

pub const TOKEN_PREFIX_LEN: usize = 4;
pub const GENERATED_NOTE: &str = "generated at startup";

/// 32 random bytes, hex encoded.
pub fn new_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn prefix_of(token: &str) -> &str {
    let end = token.char_indices().nth(TOKEN_PREFIX_LEN).map(|(i, _)| i).unwrap_or(token.len());
    &token[..end]
}

/// Returns `(prefix, hash)` for storage.
pub fn hash_token(token: &str) -> Result<(String, String), ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(token.as_bytes(), &salt)
        .map_err(|e| ServiceError::Token(e.to_string()))?
        .to_string();
    Ok((prefix_of(token).to_string(), hash))
}

pub fn verify_token(token: &str, hashed: &str) -> bool {
    match PasswordHash::new(hashed) {
        Ok(parsed) => Argon2::default().verify_password(token.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_hex() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_then_verify() {
        let token = new_token();
        let (prefix, hash) = hash_token(&token).expect("hash");
        assert_eq!(prefix, &token[..TOKEN_PREFIX_LEN]);
        assert!(verify_token(&token, &hash));
        assert!(!verify_token("wrong", &hash));
        assert!(!verify_token(&token, "not-a-hash"));
    }

    #[test]
    fn short_tokens_use_whole_token_as_prefix() {
        assert_eq!(prefix_of("ab"), "ab");
    }
}
