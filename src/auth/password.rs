use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::error;

use crate::config::HasherConfig;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
    /// The stored verifier is not a usable PHC string.
    #[error("corrupt credential: {0}")]
    CorruptCredential(String),
}

/// Argon2id verifier creation and checking.
///
/// Cheap to clone; the dummy verifier is shared.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    dummy: Arc<str>,
}

impl CredentialHasher {
    pub fn new(cfg: &HasherConfig) -> Result<Self, HashError> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| HashError::Hashing(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut hasher = Self {
            argon2,
            dummy: Arc::from(""),
        };
        hasher.dummy = Arc::from(hasher.hash("authgate-timing-equalizer")?);
        Ok(hasher)
    }

    pub fn hash(&self, plain: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                HashError::Hashing(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// `Ok(false)` on mismatch, `Err` only when `hash` itself is unusable.
    pub fn verify(&self, plain: &str, hash: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            HashError::CorruptCredential(e.to_string())
        })?;
        match self.argon2.verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => {
                error!(error = %e, "argon2 verify error");
                Err(HashError::CorruptCredential(e.to_string()))
            }
        }
    }

    /// Burns the same CPU as a real verification; used when the account doesn't exist.
    pub fn verify_dummy(&self, plain: &str) {
        let _ = self.verify(plain, &self.dummy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(&HasherConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .expect("hasher should build")
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let h = hasher();
        let password = "Secur3P@ssw0rd!";
        let hash = h.hash(password).expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));
        assert!(h.verify(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let h = hasher();
        let hash = h.hash("correct-horse-battery-staple").expect("hashing should succeed");
        assert!(!h.verify("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let h = hasher();
        let a = h.hash("Secret123!").unwrap();
        let b = h.hash("Secret123!").unwrap();
        assert_ne!(a, b);
        assert!(h.verify("Secret123!", &a).unwrap());
        assert!(h.verify("Secret123!", &b).unwrap());
    }

    #[test]
    fn malformed_hash_is_corrupt_not_mismatch() {
        let err = hasher().verify("anything", "not-a-valid-hash").unwrap_err();
        assert!(matches!(err, HashError::CorruptCredential(_)));
    }

    #[test]
    fn invalid_params_are_rejected() {
        let res = CredentialHasher::new(&HasherConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        });
        assert!(res.is_err());
    }
}
