//! Password hashing

use std::sync::LazyLock;

use argon2::password_hash::{self, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot hash password: {0}")]
    Hash(password_hash::Error),
    #[error("Malformed password hash: {0}")]
    MalformedHash(password_hash::Error),
}

/// Hash verified against when there is no stored hash, so that a missing account costs as much
/// as a wrong password
static DECOY: LazyLock<Option<String>> = LazyLock::new(|| hash("decoy password").ok());

#[cfg(test)]
thread_local! {
    /// Number of Argon2 verifications run on the current thread
    pub static VERIFICATIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Generates a fresh random salt
fn salt() -> Result<SaltString, Error> {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    SaltString::encode_b64(&bytes).map_err(Error::Hash)
}

/// Hashes the password with Argon2 using a random salt
///
/// Returned hash is a PHC string carrying algorithm parameters and salt along with the hash itself.
pub fn hash(password: &str) -> Result<String, Error> {
    let salt = salt()?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(Error::Hash)?;

    Ok(hash.to_string())
}

/// Verifies the password against a PHC hash
///
/// Mismatching password is not an error. Errors are only returned if the hash itself cannot be used.
pub fn verify(hash: &str, password: &str) -> Result<bool, Error> {
    let hash = PasswordHash::new(hash).map_err(Error::MalformedHash)?;

    #[cfg(test)]
    VERIFICATIONS.with(|count| count.set(count.get() + 1));

    match Argon2::default().verify_password(password.as_bytes(), &hash) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(err) => Err(Error::MalformedHash(err)),
    }
}

/// Runs a verification which never succeeds, taking as long as `verify` does
pub fn verify_decoy(password: &str) {
    if let Some(decoy) = DECOY.as_deref() {
        let _ = verify(decoy, password);
    }
}
