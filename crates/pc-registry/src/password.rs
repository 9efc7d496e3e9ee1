//! Credential Service
//!
//! Argon2id hashing and verification of subscriber credentials.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tracing::debug;

use crate::error::{RegistryError, Result};

/// Hash and verify credential secrets
pub trait CredentialVerifier: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String>;

    /// `Ok(false)` for a wrong secret; errors only for unusable hashes
    fn verify(&self, secret: &str, hash: &str) -> Result<bool>;
}

/// Argon2id configuration
#[derive(Debug, Clone)]
pub struct Argon2Config {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Iterations
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_cost: 19_456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl Argon2Config {
    /// Low memory config for tests
    pub fn testing() -> Self {
        Self {
            memory_cost: 4096,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn to_params(&self) -> Result<Params> {
        Params::new(self.memory_cost, self.time_cost, self.parallelism, None)
            .map_err(|e| RegistryError::internal(format!("Invalid Argon2 params: {}", e)))
    }
}

/// Argon2id credential service
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl PasswordService {
    pub fn new(config: Argon2Config) -> Result<Self> {
        let params = config.to_params()?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        Ok(Self { argon2 })
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| RegistryError::internal(format!("Failed to hash password: {}", e)))?;

        Ok(hash.to_string())
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| RegistryError::internal(format!("Invalid password hash format: {}", e)))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => {
                debug!("Password verification failed: incorrect password");
                Ok(false)
            }
            Err(e) => Err(RegistryError::internal(format!(
                "Password verification error: {}",
                e
            ))),
        }
    }
}

impl CredentialVerifier for PasswordService {
    fn hash(&self, secret: &str) -> Result<String> {
        self.hash_password(secret)
    }

    fn verify(&self, secret: &str, hash: &str) -> Result<bool> {
        self.verify_password(secret, hash)
    }
}
