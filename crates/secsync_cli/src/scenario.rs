//! Scenario files.
//!
//! A scenario lists applications with the state storage wants them in and
//! the state they currently have installed:
//!
//! ```json
//! {
//!   "applications": [{
//!     "bus_name": ":1.5",
//!     "key_info": { "key_id": [5], "public_key": [4, 5] },
//!     "state": "Claimed",
//!     "desired": { "identity": [], "manifest": [], "memberships": [] },
//!     "remote": {}
//!   }]
//! }
//! ```
//!
//! An application without `desired` is not managed by storage.

use crate::error::{CliError, CliResult};
use secsync_core::{
    ApplicationState, IdentityCertificateChain, KeyInfo, Manifest, MembershipCertificateChain,
    PermissionPolicy, SecurityInfo,
};
use secsync_engine::RemoteSecurityState;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// A set of applications to diff or sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Applications on the network.
    #[serde(default)]
    pub applications: Vec<ScenarioApplication>,
}

/// One application in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioApplication {
    /// Bus name the application is reachable at.
    pub bus_name: String,
    /// Public key identity.
    pub key_info: KeyInfo,
    /// Announced application state.
    #[serde(default = "claimed")]
    pub state: ApplicationState,
    /// Desired state kept in storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<DesiredState>,
    /// Installed state.
    #[serde(default)]
    pub remote: RemoteSecurityState,
}

fn claimed() -> ApplicationState {
    ApplicationState::Claimed
}

/// What storage holds for a managed application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    /// Identity chain, leaf first.
    #[serde(default)]
    pub identity: IdentityCertificateChain,
    /// Manifest installed with the identity.
    #[serde(default)]
    pub manifest: Manifest,
    /// Membership chains.
    #[serde(default)]
    pub memberships: Vec<MembershipCertificateChain>,
    /// Policy. `None` means the default policy.
    #[serde(default)]
    pub policy: Option<PermissionPolicy>,
    /// The application is to be reset and forgotten.
    #[serde(default)]
    pub remove: bool,
}

impl Scenario {
    /// Reads and validates a scenario file.
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let scenario: Scenario = serde_json::from_str(&text).map_err(|source| CliError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Writes the scenario as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let text = serde_json::to_string_pretty(self).map_err(|source| CliError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks that application keys are unique.
    pub fn validate(&self) -> CliResult<()> {
        let mut seen = HashSet::new();
        for app in &self.applications {
            if !seen.insert(&app.key_info) {
                return Err(CliError::DuplicateApplication(app.key_info.to_string()));
            }
        }
        Ok(())
    }
}

impl ScenarioApplication {
    /// Returns the application's discovery metadata.
    pub fn security_info(&self) -> SecurityInfo {
        SecurityInfo::new(self.bus_name.clone(), self.key_info.clone(), self.state)
    }
}
