//! Password hashing and one-time password generation.
//!
//! Hashes are bcrypt strings (`$2b$<cost>$...`). Hashing and verification are
//! CPU-bound and run on the blocking thread pool, never on the async workers.

use rand::{Rng, rngs::OsRng};
use thiserror::Error;

const OTP_LEN: usize = 8;
const OTP_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789";

pub const MIN_PASSWORD_LEN: usize = 8;
/// bcrypt reads at most this many bytes of input.
pub const MAX_PASSWORD_BYTES: usize = 72;
pub const MIN_HASH_COST: u32 = 4;
pub const MAX_HASH_COST: u32 = 31;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("stored password hash has an invalid format")]
    InvalidFormat,
    #[error("password must be at least {min} characters")]
    TooShort { min: usize },
    #[error("password must be at most {max} bytes")]
    TooLong { max: usize },
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// bcrypt hasher with a fixed work factor.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// `cost` is clamped to the range bcrypt accepts.
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_HASH_COST, MAX_HASH_COST),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hashes `password` with a fresh random salt.
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let password = password.to_owned();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|err| PasswordError::Hashing(err.to_string()))?
            .map_err(|err| PasswordError::Hashing(err.to_string()))
    }

    /// Checks `password` against a stored hash.
    pub async fn verify(&self, password: &str, stored: &str) -> Result<bool, PasswordError> {
        let password = password.to_owned();
        let stored = stored.to_owned();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &stored))
            .await
            .map_err(|err| PasswordError::Hashing(err.to_string()))?
            .map_err(|_| PasswordError::InvalidFormat)
    }
}

/// Rejects passwords shorter than [`MIN_PASSWORD_LEN`] or longer than bcrypt reads.
pub fn validate_new_password(password: &str) -> Result<(), PasswordError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(PasswordError::TooLong {
            max: MAX_PASSWORD_BYTES,
        });
    }
    Ok(())
}

/// Generates a one-time password from an unambiguous alphabet.
pub fn generate_otp() -> String {
    let mut rng = OsRng;
    (0..OTP_LEN)
        .map(|_| OTP_ALPHABET[rng.gen_range(0..OTP_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(MIN_HASH_COST)
    }

    #[tokio::test]
    async fn hash_verifies_and_is_salted() {
        let first = hasher().hash("correct horse").await.unwrap();
        let second = hasher().hash("correct horse").await.unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("$2b$04$"), "{first}");

        assert_eq!(hasher().verify("correct horse", &first).await, Ok(true));
        assert_eq!(hasher().verify("wrong horse", &first).await, Ok(false));
        assert_eq!(hasher().verify("correct horse", &second).await, Ok(true));
    }

    #[tokio::test]
    async fn malformed_hashes_are_rejected() {
        for stored in ["plaintext", "v1$00$00", "$2b$04$short"] {
            assert_eq!(
                hasher().verify("x", stored).await,
                Err(PasswordError::InvalidFormat),
                "{stored}"
            );
        }
    }

    #[test]
    fn cost_is_clamped() {
        assert_eq!(PasswordHasher::new(0).cost(), MIN_HASH_COST);
        assert_eq!(PasswordHasher::new(99).cost(), MAX_HASH_COST);
        assert_eq!(PasswordHasher::new(12).cost(), 12);
    }

    #[test]
    fn otp_uses_the_unambiguous_alphabet() {
        let otp = generate_otp();
        assert_eq!(otp.len(), OTP_LEN);
        assert!(otp.bytes().all(|b| OTP_ALPHABET.contains(&b)));
        assert!(validate_new_password(&otp).is_ok());
        assert!(validate_new_password("short").is_err());
        assert_eq!(
            validate_new_password(&"x".repeat(MAX_PASSWORD_BYTES + 1)),
            Err(PasswordError::TooLong {
                max: MAX_PASSWORD_BYTES
            })
        );
    }
}
