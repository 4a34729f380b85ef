//! Password hashing and constant-time comparison.
//!
//! Passwords are stored only as salted Argon2 hashes in PHC string form;
//! plaintext is dropped as soon as authentication completes. Hash
//! verification and the server-password check are constant-time.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::errors::UserError;

/// Hash a plaintext password with a fresh random salt.
pub fn hash_password(plain: &str) -> Result<String, UserError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| UserError("Password hashing failed".to_string()))
}

/// Verify a plaintext password against a stored PHC hash.
///
/// A malformed stored hash verifies as false rather than erroring: the
/// caller only ever needs pass/fail.
pub fn verify_password(plain: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default().verify_password(plain.as_bytes(), &parsed).is_ok()
}

/// Constant-time string equality for shared secrets (server password).
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_password_verifies() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
    }

    #[test]
    fn wrong_password_fails() {
        let hash = hash_password("hunter22").unwrap();
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("", &hash));
    }

    #[test]
    fn mutated_hash_fails() {
        let hash = hash_password("hunter22").unwrap();
        let mut bytes = hash.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let mutated = String::from_utf8(bytes).unwrap();
        assert!(!verify_password("hunter22", &mutated));
    }

    #[test]
    fn plaintext_never_stored() {
        let hash = hash_password("hunter22").unwrap();
        assert!(!hash.contains("hunter22"));
        assert!(hash.starts_with("$argon2"));
    }

    #[test]
    fn constant_time_comparison() {
        assert!(constant_time_eq("sekrit", "sekrit"));
        assert!(!constant_time_eq("sekrit", "sekrij"));
        assert!(!constant_time_eq("sekrit", "sekri"));
        assert!(!constant_time_eq("", "x"));
    }
}
