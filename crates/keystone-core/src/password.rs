// Password hashing (Argon2id) and strength validation.

use std::collections::HashMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use thiserror::Error;

pub const MIN_LENGTH: usize = 8;
pub const MAX_LENGTH: usize = 128;

/// Ratio at or above which a password counts as too similar to a user attribute.
const MAX_SIMILARITY: f64 = 0.7;

const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "password12", "password123", "passw0rd", "12345678",
    "123456789", "1234567890", "87654321", "11111111", "00000000", "qwerty123",
    "qwertyuiop", "1q2w3e4r", "1qaz2wsx", "abc12345", "abcd1234", "iloveyou",
    "sunshine", "princess", "football", "baseball", "welcome1", "welcome123",
    "admin123", "administrator", "letmein1", "monkey123", "dragon123", "trustno1",
    "superman", "starwars", "whatever", "computer", "michelle", "zaq12wsx",
    "qazwsxedc", "asdfghjkl", "changeme", "secret123", "master123", "shadow123",
];

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("This password is too short. It must contain at least {MIN_LENGTH} characters.")]
    TooShort,

    #[error("This password is too long. It must contain at most {MAX_LENGTH} characters.")]
    TooLong,

    #[error("The password is too similar to the {0}.")]
    TooSimilar(&'static str),

    #[error("This password is too common.")]
    TooCommon,

    #[error("This password is entirely numeric.")]
    EntirelyNumeric,

    #[error("failed to hash password: {0}")]
    Hash(String),
}

/// Hash a password into an Argon2id PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Check `password` against a stored PHC string. A malformed stored hash
/// simply fails verification.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Run the strength rules in order and return the first failure:
/// length, similarity to username / email, common list, all digits.
pub fn validate_password(
    password: &str,
    username: Option<&str>,
    email: Option<&str>,
) -> Result<(), PasswordError> {
    let len = password.chars().count();
    if len < MIN_LENGTH {
        return Err(PasswordError::TooShort);
    }
    if len > MAX_LENGTH {
        return Err(PasswordError::TooLong);
    }

    let lowered = password.to_lowercase();
    let attributes = [("username", username), ("email address", email)];
    for (label, value) in attributes {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };
        let value = value.to_lowercase();
        let parts = std::iter::once(value.as_str())
            .chain(value.split(|c: char| !c.is_alphanumeric() && c != '_'))
            .filter(|p| !p.is_empty());
        for part in parts {
            if quick_ratio(&lowered, part) >= MAX_SIMILARITY {
                return Err(PasswordError::TooSimilar(label));
            }
        }
    }

    if COMMON_PASSWORDS.contains(&lowered.trim()) {
        return Err(PasswordError::TooCommon);
    }

    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(PasswordError::EntirelyNumeric);
    }

    Ok(())
}

/// Upper bound on sequence similarity: twice the size of the multiset
/// intersection of characters over the combined length.
fn quick_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_default() += 1;
    }
    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(n) = available.get_mut(&c) {
            if *n > 0 {
                *n -= 1;
                matches += 1;
            }
        }
    }
    2.0 * matches as f64 / total as f64
}
