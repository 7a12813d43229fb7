use bcrypt::{hash, verify};
use crate::errors::AppResult;

/// Salted one-way hash. Two calls with the same password yield different hashes.
pub fn hash_password(password: &str, cost: u32) -> AppResult<String> {
    Ok(hash(password.as_bytes(), cost)?)
}

/// True iff `password` is the input that produced `password_hash`.
/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match verify(password.as_bytes(), password_hash) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!("Stored password hash could not be checked: {}", e);
            false
        }
    }
}
