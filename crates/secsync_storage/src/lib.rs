//! # SecSync Storage
//!
//! Security storage trait and in-memory implementation for SecSync.
//!
//! Storage holds the **desired** security state of every managed
//! application: membership certificates, the identity chain with its
//! manifest, and the permission policy. The sync engine reads this state
//! inside a per-application transaction and reports back how far the
//! remote application got.
//!
//! ## Design Principles
//!
//! - One open transaction per application at a time
//! - `EndOfData` means "no such record" and is not a failure
//! - Transaction ids change whenever desired state changes, so a caller
//!   can detect that its view went stale mid-cycle
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Implementations
//!
//! - [`InMemorySecurityStorage`] - For testing and demos
//!
//! ## Example
//!
//! ```rust
//! use secsync_core::{ApplicationState, IdentityCertificateChain, KeyInfo, Manifest, OnlineApplication};
//! use secsync_storage::{InMemorySecurityStorage, SecurityStorage};
//!
//! let storage = InMemorySecurityStorage::new();
//! let key = KeyInfo::from_key_id(vec![1]);
//! storage.claim_application(key.clone(), IdentityCertificateChain::default(), Manifest::default());
//!
//! let app = OnlineApplication::new(":1.7", ApplicationState::Claimed, key);
//! let (record, txn) = storage.start_updates(&app).unwrap();
//! let next = storage.complete_updates(&record, txn).unwrap();
//! assert_eq!(next, txn);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::{PendingChangesListener, SecurityStorage};
pub use error::{StorageError, StorageResult};
pub use memory::InMemorySecurityStorage;
