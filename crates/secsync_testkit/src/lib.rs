//! # SecSync Testkit
//!
//! Test utilities for SecSync.
//!
//! This crate provides:
//! - Fixtures for certificates, manifests and policies
//! - A synchronous [`Scenario`] harness around the update cycle
//! - Property-based test generators using proptest
//! - Storage fault injection
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use secsync_core::ApplicationState;
//! use secsync_testkit::prelude::*;
//!
//! let scenario = Scenario::new();
//! let app = scenario.claimed(1, ApplicationState::Claimed, remote_in_sync(1));
//! scenario.run(&app);
//! assert!(app.remote.mutating_calls().is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
