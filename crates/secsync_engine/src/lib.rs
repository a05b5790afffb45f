//! # SecSync Engine
//!
//! Security state synchronization engine for SecSync.
//!
//! This crate provides:
//! - Membership set reconciliation (local chains vs. remote summaries) and
//!   the policy decision
//! - The per-application update cycle (reset, or memberships → identity → policy)
//! - A single-worker event queue serializing all cycles
//! - The event-driven `ApplicationUpdater`
//! - Proxy and security agent abstractions, with in-process implementations
//!
//! ## Architecture
//!
//! Storage holds the **desired** state; the remote application holds the
//! **installed** state. A cycle opens a storage transaction, computes the
//! difference phase by phase and issues only the remote calls needed to
//! close it. If storage changed while the cycle ran, the cycle starts over.
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time; events are handled in arrival order
//! - Every storage transaction that is opened is closed
//! - A cycle against an up-to-date application makes no mutating calls
//! - Missing sessions are not errors; the next trigger retries
//! - Outcomes reach the security agent by value and never block the worker

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cycle;
mod error;
mod facade;
mod loopback;
mod proxy;
mod queue;
mod reconciler;
mod report;
mod transaction;
mod updater;

pub use config::UpdaterConfig;
pub use cycle::{CycleReport, PassOutcome, UpdateCycle, UpdaterStats};
pub use error::{SyncError, SyncResult};
pub use facade::{InMemoryAgent, SecurityAgentFacade};
pub use loopback::{
    LoopbackProxy, LoopbackProxyManager, ProxyCall, RemoteSecurityState, SimulatedApplication,
};
pub use proxy::{ProxyError, ProxyHandle, ProxyObjectManager, ProxyResult};
pub use queue::{SecurityEvent, SecurityEventHandler, SecurityEventQueue};
pub use reconciler::{reconcile_memberships, MembershipDiff, PolicyAction};
pub use report::{
    ErrorContext, ManifestUpdateNotice, Notification, SyncErrorReport, SyncErrorType,
};
pub use transaction::UpdateTransaction;
pub use updater::ApplicationUpdater;

/// Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
