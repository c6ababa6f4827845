//! Salted password hashing with scrypt.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::CredentialError;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// scrypt cost parameters.
///
/// Stored alongside each record so changing the configured cost does not
/// invalidate existing accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
    pub output_len: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
            output_len: 32,
        }
    }
}

impl KdfParams {
    fn to_scrypt(self) -> Result<scrypt::Params, CredentialError> {
        scrypt::Params::new(self.log_n, self.r, self.p, self.output_len)
            .map_err(|e| CredentialError::Kdf(e.to_string()))
    }
}

/// Generates a fresh random salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill(&mut salt);
    salt
}

/// Derives the password hash for `salt` under `params`.
pub fn hash_password(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Vec<u8>, CredentialError> {
    let scrypt_params = params.to_scrypt()?;
    let mut out = vec![0u8; params.output_len];
    scrypt::scrypt(password.as_bytes(), salt, &scrypt_params, &mut out)
        .map_err(|e| CredentialError::Kdf(e.to_string()))?;
    Ok(out)
}

/// Compares two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Cheap parameters for unit tests.
#[cfg(test)]
pub(crate) const FAST: KdfParams = KdfParams {
    log_n: 4,
    r: 8,
    p: 1,
    output_len: 32,
};
