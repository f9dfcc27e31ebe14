use crate::error::{AppError, AppResult};

/// Hash a password for storage.
pub fn hash_password(plaintext: &str) -> AppResult<String> {
    bcrypt::hash(plaintext, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("password hash failed: {}", e)))
}

/// Verify a plaintext password against a stored hash. Constant-time via bcrypt.
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("hunter2", "not-a-bcrypt-hash"));
    }
}
