//! Salted credential hashing.
//!
//! Hashes are stored as `salt$digest` where both halves are hex and the
//! digest is SHA-256 over `salt$password`.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Hashes a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = hex::encode(salt);
    let digest = digest(&salt, password);
    format!("{salt}${digest}")
}

/// Checks a password against a stored `salt$digest` hash.
///
/// A malformed stored value never verifies.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, expected)) => digest(salt, password) == expected,
        None => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
