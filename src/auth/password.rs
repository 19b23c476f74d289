//! Argon2 hashing for account passwords. Hashes are PHC strings, so the salt
//! and parameters travel with the hash.

use anyhow::anyhow;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!(error = %e, "could not hash password");
            anyhow!("password hashing failed: {e}")
        })
}

/// `Ok(false)` for a wrong password, `Err` when the stored hash is unreadable.
pub fn verify_password(plain: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|e| anyhow!("stored hash is not PHC: {e}"))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::DEMO_PASSWORD;

    #[test]
    fn demo_password_verifies_against_its_hash() {
        let hash = hash_password(DEMO_PASSWORD).expect("hash");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(DEMO_PASSWORD, &hash).expect("verify"));
    }

    #[test]
    fn another_users_password_is_rejected() {
        let alice = hash_password("pw1").expect("hash");
        assert!(!verify_password("pw2", &alice).expect("verify"));
    }

    #[test]
    fn surrounding_spaces_are_part_of_the_password() {
        let hash = hash_password(" pw1 ").expect("hash");
        assert!(!verify_password("pw1", &hash).expect("verify"));
        assert!(verify_password(" pw1 ", &hash).expect("verify"));
    }

    #[test]
    fn stored_hash_that_is_not_phc_is_an_error() {
        assert!(verify_password(DEMO_PASSWORD, "plaintext-1").is_err());
    }

    #[test]
    fn seeded_users_get_distinct_salts() {
        let first = hash_password(DEMO_PASSWORD).expect("hash");
        let second = hash_password(DEMO_PASSWORD).expect("hash");
        assert_ne!(first, second);
    }
}
