//! Passcode issuance and verification.
//!
//! A passcode is shown to the caller once, at database creation. Only its
//! SHA-256 digest (lower-case hex) is kept in the credential table.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::ServiceError;

pub const PASSCODE_LEN: usize = 15;

/// Stored verifier for one database.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    pub passcode_hash: String,
    pub created_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Hash `passcode` and stamp the record with the current time.
    pub fn issue(passcode: &str) -> Self {
        Self { passcode_hash: hash_passcode(passcode), created_at: Utc::now() }
    }

    pub fn matches(&self, supplied: &str) -> bool {
        let digest = hash_passcode(supplied);
        digest.as_bytes().ct_eq(self.passcode_hash.as_bytes()).into()
    }
}

/// Database name -> credential record.
pub type CredentialTable = BTreeMap<String, CredentialRecord>;

/// 15 characters drawn uniformly from `[A-Za-z0-9]`.
pub fn generate_passcode() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSCODE_LEN)
        .map(char::from)
        .collect()
}

pub fn hash_passcode(passcode: &str) -> String {
    hex::encode(Sha256::digest(passcode.as_bytes()))
}

/// Check `supplied` against the record stored for `name`.
///
/// An absent or empty passcode is `MissingPasscode`. A database without a
/// record can never be unlocked and reports `InvalidPasscode`.
pub fn verify(table: &CredentialTable, name: &str, supplied: Option<&str>) -> Result<(), ServiceError> {
    let supplied = match supplied {
        Some(p) if !p.is_empty() => p,
        _ => return Err(ServiceError::MissingPasscode),
    };
    match table.get(name) {
        Some(record) if record.matches(supplied) => Ok(()),
        _ => Err(ServiceError::InvalidPasscode),
    }
}
