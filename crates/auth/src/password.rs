//! bcrypt password checks, run off the async executor.

/// Cost used for newly created hashes.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Check `plain` against a stored bcrypt hash.
///
/// bcrypt is deliberately slow, so the comparison runs on tokio's blocking
/// pool. An unparsable stored hash is logged and treated as a mismatch: the
/// caller sees the same outcome as a wrong password.
pub async fn verify_password(plain: String, hash: String) -> bool {
    let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(plain.as_bytes(), &hash)).await;
    match outcome {
        Ok(Ok(matches)) => matches,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "stored password hash could not be parsed");
            false
        }
        Err(e) => {
            tracing::error!(error = %e, "password verification task failed");
            false
        }
    }
}

/// Hash a password for storage (seeding and tests).
pub fn hash_password(plain: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(plain, cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_password_verifies() {
        let hash = hash_password("correct horse", 4).unwrap();
        assert!(verify_password("correct horse".into(), hash).await);
    }

    #[tokio::test]
    async fn wrong_password_does_not_verify() {
        let hash = hash_password("correct horse", 4).unwrap();
        assert!(!verify_password("battery staple".into(), hash).await);
    }

    #[tokio::test]
    async fn corrupt_hash_is_a_mismatch() {
        assert!(!verify_password("anything".into(), "not-a-bcrypt-hash".into()).await);
    }
}
