//! Account credentials: salted password hashing, record storage, and the
//! gate that answers login and registration attempts.

mod gate;
mod hash;
mod store;

pub use gate::CredentialGate;
pub use hash::{KdfParams, SALT_LEN, constant_time_eq, generate_salt, hash_password};
pub use store::{CredentialRecord, CredentialStore, JsonFileStore, MemoryStore, StoreError};

/// Errors produced while deriving or checking credentials.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("malformed stored credential: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
