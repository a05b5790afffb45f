//! Certificate chains and their reconciliation identity.
//!
//! Certificates are carried as opaque encoded bytes next to the two fields
//! the engine compares: the serial number and the issuer's authority key
//! identifier. Validation happens elsewhere.

use crate::types::KeyInfo;
use serde::{Deserialize, Serialize};

/// A single certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Serial number bytes.
    pub serial: Vec<u8>,
    /// Authority key identifier of the issuer.
    pub authority_key_id: Vec<u8>,
    /// Encoded certificate. Never interpreted by this crate.
    #[serde(default)]
    pub encoded: Vec<u8>,
}

impl Certificate {
    /// Creates a certificate without encoded content.
    pub fn new(serial: impl Into<Vec<u8>>, authority_key_id: impl Into<Vec<u8>>) -> Self {
        Self {
            serial: serial.into(),
            authority_key_id: authority_key_id.into(),
            encoded: Vec::new(),
        }
    }

    /// Attaches encoded certificate bytes.
    #[must_use]
    pub fn with_encoded(mut self, encoded: impl Into<Vec<u8>>) -> Self {
        self.encoded = encoded.into();
        self
    }

    /// Returns the reconciliation identity of this certificate.
    pub fn identity(&self) -> CertificateIdentity {
        CertificateIdentity {
            serial: self.serial.clone(),
            issuer_key_id: self.authority_key_id.clone(),
        }
    }

    /// Returns true if serial and AKI match byte for byte.
    pub fn same_identity(&self, other: &Certificate) -> bool {
        self.serial == other.serial && self.authority_key_id == other.authority_key_id
    }
}

/// Identity used when diffing certificates: (serial, issuer AKI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CertificateIdentity {
    /// Serial number bytes.
    pub serial: Vec<u8>,
    /// Authority key identifier of the issuer.
    pub issuer_key_id: Vec<u8>,
}

/// An ordered certificate chain, leaf first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateChain {
    /// Certificates, leaf first.
    pub certificates: Vec<Certificate>,
}

/// One membership grant.
pub type MembershipCertificateChain = CertificateChain;

/// The chain establishing an application's identity.
pub type IdentityCertificateChain = CertificateChain;

impl CertificateChain {
    /// Creates a chain from certificates, leaf first.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// Returns the leaf certificate.
    pub fn leaf(&self) -> Option<&Certificate> {
        self.certificates.first()
    }

    /// Returns the identity of the leaf certificate.
    pub fn leaf_identity(&self) -> Option<CertificateIdentity> {
        self.leaf().map(Certificate::identity)
    }

    /// Returns the number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Returns true if the chain holds no certificates.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Returns true if the leaf matches the given membership summary.
    pub fn matches_summary(&self, summary: &MembershipSummary) -> bool {
        self.leaf().is_some_and(|leaf| summary.matches(leaf))
    }

    /// Compares two chains by length and per-certificate serial and AKI.
    ///
    /// Encoded content is ignored.
    pub fn same_identity_as(&self, other: &CertificateChain) -> bool {
        self.len() == other.len()
            && self
                .certificates
                .iter()
                .zip(&other.certificates)
                .all(|(a, b)| a.same_identity(b))
    }
}

impl From<Vec<Certificate>> for CertificateChain {
    fn from(certificates: Vec<Certificate>) -> Self {
        Self::new(certificates)
    }
}

/// Lightweight descriptor of a membership installed on a remote application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSummary {
    /// Serial number of the membership leaf certificate.
    pub serial: Vec<u8>,
    /// Issuer key info; `key_id` is the AKI.
    pub issuer: KeyInfo,
}

impl MembershipSummary {
    /// Creates a new summary.
    pub fn new(serial: impl Into<Vec<u8>>, issuer: KeyInfo) -> Self {
        Self {
            serial: serial.into(),
            issuer,
        }
    }

    /// Builds the summary a remote application would report for a chain.
    pub fn for_chain(chain: &MembershipCertificateChain) -> Option<Self> {
        chain.leaf().map(|leaf| Self {
            serial: leaf.serial.clone(),
            issuer: KeyInfo::from_key_id(leaf.authority_key_id.clone()),
        })
    }

    /// Returns the reconciliation identity.
    pub fn identity(&self) -> CertificateIdentity {
        CertificateIdentity {
            serial: self.serial.clone(),
            issuer_key_id: self.issuer.key_id.clone(),
        }
    }

    /// Returns true if the certificate has this summary's serial and issuer AKI.
    pub fn matches(&self, certificate: &Certificate) -> bool {
        self.serial == certificate.serial && self.issuer.key_id == certificate.authority_key_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(pairs: &[(u8, u8)]) -> CertificateChain {
        pairs
            .iter()
            .map(|&(serial, aki)| Certificate::new(vec![serial], vec![aki]))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn leaf_is_first() {
        let c = chain(&[(1, 10), (2, 20)]);
        assert_eq!(c.leaf().unwrap().serial, vec![1]);
        assert_eq!(
            c.leaf_identity(),
            Some(CertificateIdentity {
                serial: vec![1],
                issuer_key_id: vec![10],
            })
        );
        assert!(CertificateChain::default().leaf_identity().is_none());
    }

    #[test]
    fn identity_ignores_encoded_content() {
        let a = CertificateChain::new(vec![Certificate::new(vec![1], vec![2]).with_encoded(vec![0xaa])]);
        let b = CertificateChain::new(vec![Certificate::new(vec![1], vec![2]).with_encoded(vec![0xbb])]);
        assert!(a.same_identity_as(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn identity_detects_length_and_byte_changes() {
        let base = chain(&[(1, 10), (2, 20)]);
        assert!(!base.same_identity_as(&chain(&[(1, 10)])));
        assert!(!base.same_identity_as(&chain(&[(1, 10), (3, 20)])));
        assert!(!base.same_identity_as(&chain(&[(1, 10), (2, 21)])));
        assert!(base.same_identity_as(&chain(&[(1, 10), (2, 20)])));
    }

    #[test]
    fn summary_matching() {
        let c = chain(&[(5, 50)]);
        let summary = MembershipSummary::for_chain(&c).unwrap();
        assert!(c.matches_summary(&summary));
        assert_eq!(summary.identity(), c.leaf_identity().unwrap());

        let other = MembershipSummary::new(vec![5], KeyInfo::from_key_id(vec![51]));
        assert!(!c.matches_summary(&other));
        assert!(!CertificateChain::default().matches_summary(&summary));
    }

    #[test]
    fn chain_serializes_as_list() {
        let c = chain(&[(1, 2)]);
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.starts_with('['));
        let back: CertificateChain = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
