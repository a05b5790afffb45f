//! # SecSync Core
//!
//! Security state data model for SecSync.
//!
//! This crate provides:
//! - Application identity and lifecycle (`OnlineApplication`, `SecurityInfo`)
//! - The storage-side record (`PersistedApplicationRecord`, `SyncState`)
//! - Certificate chains and their reconciliation identity
//! - Manifests and permission policies
//! - `TransactionId` tokens issued by storage
//!
//! This is a pure data crate with no I/O operations. Nothing here interprets
//! certificate bytes or computes digests; comparisons are structural.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod application;
mod certificate;
mod policy;
mod types;

pub use application::{
    ApplicationState, OnlineApplication, PersistedApplicationRecord, SecurityInfo, SyncState,
};
pub use certificate::{
    Certificate, CertificateChain, CertificateIdentity, IdentityCertificateChain,
    MembershipCertificateChain, MembershipSummary,
};
pub use policy::{
    Acl, Manifest, PermissionPolicy, Peer, Rule, RuleMember, DEFAULT_POLICY_VERSION,
};
pub use types::{KeyInfo, TransactionId};
