use std::sync::Arc;

use crate::hash::{KdfParams, constant_time_eq, generate_salt, hash_password};
use crate::store::{CredentialRecord, CredentialStore, StoreError};
use crate::CredentialError;

/// Answers login and registration attempts against a [`CredentialStore`].
///
/// Failures of any kind come back as `false`; the cause is logged.
/// Hashing is CPU-bound, so async callers should run these on a blocking
/// thread.
#[derive(Clone)]
pub struct CredentialGate {
    store: Arc<dyn CredentialStore>,
    params: KdfParams,
}

impl CredentialGate {
    /// `params` applies to new registrations; existing records keep their own.
    pub fn new(store: Arc<dyn CredentialStore>, params: KdfParams) -> Self {
        Self { store, params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// True only when exactly one record exists for `username` and the
    /// password hashes to its stored value.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        match self.try_verify(username, password) {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(username, error = %e, "credential check failed");
                false
            }
        }
    }

    /// Creates a record for `username`; false if one already exists.
    pub fn register(&self, username: &str, password: &str) -> bool {
        match self.try_register(username, password) {
            Ok(()) => {
                tracing::info!(username, "account registered");
                true
            }
            Err(CredentialError::Store(StoreError::Duplicate(_))) => {
                tracing::info!(username, "registration refused, username taken");
                false
            }
            Err(e) => {
                tracing::warn!(username, error = %e, "registration failed");
                false
            }
        }
    }

    fn try_verify(&self, username: &str, password: &str) -> Result<bool, CredentialError> {
        let mut records = self.store.find_by_username(username)?;
        if records.len() != 1 {
            if records.len() > 1 {
                tracing::warn!(username, count = records.len(), "ambiguous credential records");
            }
            return Ok(false);
        }
        let record = records.remove(0);

        let salt = hex::decode(&record.salt)
            .map_err(|e| CredentialError::Malformed(format!("salt: {e}")))?;
        let expected = hex::decode(&record.password_hash)
            .map_err(|e| CredentialError::Malformed(format!("hash: {e}")))?;

        let actual = hash_password(password, &salt, &record.kdf)?;
        Ok(constant_time_eq(&actual, &expected))
    }

    fn try_register(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        if !self.store.find_by_username(username)?.is_empty() {
            return Err(StoreError::Duplicate(username.to_string()).into());
        }

        let salt = generate_salt();
        let hash = hash_password(password, &salt, &self.params)?;
        self.store.insert(CredentialRecord {
            username: username.to_string(),
            password_hash: hex::encode(hash),
            salt: hex::encode(salt),
            kdf: self.params,
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for CredentialGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialGate")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
