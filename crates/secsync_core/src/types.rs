//! Core type definitions for SecSync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for one reconciliation attempt, issued by storage.
///
/// The value is opaque to the engine; only equality matters. A changed
/// id on transaction close means new work arrived for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Public key identity of an application or certificate issuer.
///
/// `key_id` doubles as the authority key identifier (AKI) when the key
/// belongs to an issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Key identifier.
    pub key_id: Vec<u8>,
    /// Encoded public key.
    #[serde(default)]
    pub public_key: Vec<u8>,
}

impl KeyInfo {
    /// Creates a key info from its identifier and encoded public key.
    pub fn new(key_id: impl Into<Vec<u8>>, public_key: impl Into<Vec<u8>>) -> Self {
        Self {
            key_id: key_id.into(),
            public_key: public_key.into(),
        }
    }

    /// Creates a key info that only carries an identifier.
    pub fn from_key_id(key_id: impl Into<Vec<u8>>) -> Self {
        Self::new(key_id, Vec::new())
    }
}

impl fmt::Display for KeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("key:")?;
        for byte in &self.key_id {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
