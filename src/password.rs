use once_cell::sync::Lazy;
use tracing::debug;

pub use bcrypt::DEFAULT_COST;

// Verified against when the username is unknown so that both rejection paths
// pay for one bcrypt comparison.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| bcrypt::hash("primrose-timing-equaliser", DEFAULT_COST).ok());

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash_password_with_cost(password, DEFAULT_COST)
}

pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

/// True iff `password` hashes to `stored_hash`. Malformed hashes and any other
/// bcrypt failure are a plain `false`.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match bcrypt::verify(password, stored_hash) {
        Ok(ok) => ok,
        Err(e) => {
            debug!("password verification failed: {e}");
            false
        }
    }
}

/// Burns one comparison for a login whose username does not exist.
pub fn verify_against_dummy(password: &str) -> bool {
    if let Some(h) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, h);
    }
    false
}
