//! Application identity, lifecycle and the persisted record.

use crate::types::KeyInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state reported by a remote application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationState {
    /// The application cannot be claimed.
    NotClaimable,
    /// The application is waiting to be claimed.
    Claimable,
    /// The application is claimed and managed.
    Claimed,
    /// The application is claimed but requests new permissions.
    NeedsUpdate,
}

impl ApplicationState {
    /// Returns true if the application carries a security configuration.
    ///
    /// Unclaimed applications are by definition already reset.
    pub fn is_claimed(&self) -> bool {
        matches!(self, ApplicationState::Claimed | ApplicationState::NeedsUpdate)
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplicationState::NotClaimable => "NOT_CLAIMABLE",
            ApplicationState::Claimable => "CLAIMABLE",
            ApplicationState::Claimed => "CLAIMED",
            ApplicationState::NeedsUpdate => "NEED_UPDATE",
        };
        f.write_str(name)
    }
}

/// Progress of a reconciliation relative to a reset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// Storage asked for the application to be reset.
    WillReset,
    /// The remote application was reset.
    Reset,
    /// The remote configuration matches storage.
    Ok,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::WillReset => "SYNC_WILL_RESET",
            SyncState::Reset => "SYNC_RESET",
            SyncState::Ok => "SYNC_OK",
        };
        f.write_str(name)
    }
}

/// Network-visible security metadata for an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInfo {
    /// Bus name the application is reachable on.
    pub bus_name: String,
    /// Public key identity.
    pub key_info: KeyInfo,
    /// Lifecycle state.
    pub application_state: ApplicationState,
}

impl SecurityInfo {
    /// Creates new security info.
    pub fn new(
        bus_name: impl Into<String>,
        key_info: KeyInfo,
        application_state: ApplicationState,
    ) -> Self {
        Self {
            bus_name: bus_name.into(),
            key_info,
            application_state,
        }
    }
}

/// A reachable remote application.
///
/// Rebuilt from live discovery whenever it is needed; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineApplication {
    /// Bus name the application is reachable on. Empty when offline.
    pub bus_name: String,
    /// Lifecycle state.
    pub application_state: ApplicationState,
    /// Public key identity.
    pub key_info: KeyInfo,
}

impl OnlineApplication {
    /// Creates a new online application.
    pub fn new(
        bus_name: impl Into<String>,
        application_state: ApplicationState,
        key_info: KeyInfo,
    ) -> Self {
        Self {
            bus_name: bus_name.into(),
            application_state,
            key_info,
        }
    }

    /// Builds the application from discovery metadata.
    pub fn from_security_info(info: &SecurityInfo) -> Self {
        Self {
            bus_name: info.bus_name.clone(),
            application_state: info.application_state,
            key_info: info.key_info.clone(),
        }
    }

    /// Overwrites the discovery fields from newer metadata.
    pub fn apply_security_info(&mut self, info: &SecurityInfo) {
        self.bus_name = info.bus_name.clone();
        self.application_state = info.application_state;
        self.key_info = info.key_info.clone();
    }
}

/// Storage-side record of a claimed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedApplicationRecord {
    /// Public key identity.
    pub key_info: KeyInfo,
    /// Reconciliation progress.
    pub sync_state: SyncState,
}

impl PersistedApplicationRecord {
    /// Creates a new record.
    pub fn new(key_info: KeyInfo, sync_state: SyncState) -> Self {
        Self {
            key_info,
            sync_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimed_states() {
        assert!(ApplicationState::Claimed.is_claimed());
        assert!(ApplicationState::NeedsUpdate.is_claimed());
        assert!(!ApplicationState::Claimable.is_claimed());
        assert!(!ApplicationState::NotClaimable.is_claimed());
    }

    #[test]
    fn online_application_from_security_info() {
        let key = KeyInfo::from_key_id(vec![1, 2]);
        let info = SecurityInfo::new(":1.42", key.clone(), ApplicationState::NeedsUpdate);

        let mut app = OnlineApplication::from_security_info(&info);
        assert_eq!(app.bus_name, ":1.42");
        assert_eq!(app.key_info, key);
        assert_eq!(app.application_state, ApplicationState::NeedsUpdate);

        let newer = SecurityInfo::new(":1.43", key, ApplicationState::Claimed);
        app.apply_security_info(&newer);
        assert_eq!(app.bus_name, ":1.43");
        assert_eq!(app.application_state, ApplicationState::Claimed);
    }

    #[test]
    fn display_names() {
        assert_eq!(SyncState::WillReset.to_string(), "SYNC_WILL_RESET");
        assert_eq!(ApplicationState::NeedsUpdate.to_string(), "NEED_UPDATE");
    }
}
