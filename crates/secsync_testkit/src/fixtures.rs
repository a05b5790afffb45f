//! Test fixtures and scenario helpers.
//!
//! Builders for certificates, manifests and policies, plus [`Scenario`],
//! which wires storage, simulated applications and an in-memory agent to
//! an [`UpdateCycle`] that runs synchronously on the test thread.

use secsync_core::{
    ApplicationState, Certificate, CertificateChain, IdentityCertificateChain, KeyInfo, Manifest,
    MembershipCertificateChain, MembershipSummary, OnlineApplication, PermissionPolicy, Rule,
    RuleMember, SecurityInfo,
};
use secsync_engine::{
    CycleReport, InMemoryAgent, LoopbackProxyManager, ManifestUpdateNotice, RemoteSecurityState,
    SimulatedApplication, SyncErrorReport, UpdateCycle, UpdaterConfig,
};
use secsync_storage::{InMemorySecurityStorage, SecurityStorage};
use std::sync::Arc;

/// Key of test application `id`.
pub fn key(id: u8) -> KeyInfo {
    KeyInfo::new(vec![id], vec![0x04, id])
}

/// A one-certificate membership chain with the given leaf serial and AKI.
pub fn membership_chain(serial: u8, aki: u8) -> MembershipCertificateChain {
    CertificateChain::new(vec![Certificate::new(vec![serial], vec![aki])])
}

/// The summary a remote application reports for `membership_chain(serial, aki)`.
pub fn membership_summary(serial: u8, aki: u8) -> MembershipSummary {
    MembershipSummary::new(vec![serial], KeyInfo::from_key_id(vec![aki]))
}

/// An identity chain from (serial, AKI) pairs, leaf first.
pub fn identity_chain(pairs: &[(u8, u8)]) -> IdentityCertificateChain {
    pairs
        .iter()
        .map(|&(serial, aki)| Certificate::new(vec![serial], vec![aki]))
        .collect::<Vec<_>>()
        .into()
}

/// A manifest granting full access to each interface.
pub fn manifest(interfaces: &[&str]) -> Manifest {
    Manifest::new(
        interfaces
            .iter()
            .map(|name| Rule::new(*name, vec![RuleMember::new("*", 0x03)]))
            .collect(),
    )
}

/// An empty policy with the given version.
pub fn policy(version: u32) -> PermissionPolicy {
    PermissionPolicy::new(version)
}

/// Identity every scenario application is claimed with.
pub fn default_identity(id: u8) -> IdentityCertificateChain {
    identity_chain(&[(id, 0xa0), (0x01, 0xca)])
}

/// Manifest every scenario application is claimed with.
pub fn default_manifest() -> Manifest {
    manifest(&["org.example.Door"])
}

/// Remote state matching a freshly claimed scenario application.
pub fn remote_in_sync(id: u8) -> RemoteSecurityState {
    RemoteSecurityState {
        identity: default_identity(id),
        manifest: default_manifest(),
        ..RemoteSecurityState::default()
    }
}

/// One application taking part in a scenario.
#[derive(Debug, Clone)]
pub struct TestApplication {
    /// Discovery metadata.
    pub info: SecurityInfo,
    /// The application as the agent sees it.
    pub app: OnlineApplication,
    /// The simulated remote side.
    pub remote: Arc<SimulatedApplication>,
}

impl TestApplication {
    /// Returns the application's key.
    pub fn key(&self) -> &KeyInfo {
        &self.info.key_info
    }
}

/// Storage, remote applications and agent around a synchronous cycle runner.
pub struct Scenario<S: SecurityStorage + 'static = InMemorySecurityStorage> {
    /// Desired state.
    pub storage: Arc<S>,
    /// Simulated remote applications.
    pub proxies: Arc<LoopbackProxyManager>,
    /// Application directory and notification sink.
    pub agent: Arc<InMemoryAgent>,
    /// The cycle runner under test.
    pub cycle: UpdateCycle<S, LoopbackProxyManager, InMemoryAgent>,
}

impl Scenario {
    /// Creates a scenario over an empty in-memory storage.
    pub fn new() -> Self {
        Self::with_storage(InMemorySecurityStorage::new(), UpdaterConfig::new())
    }

    /// Adds an application that storage manages, with the given remote state.
    pub fn claimed(&self, id: u8, state: ApplicationState, remote: RemoteSecurityState) -> TestApplication {
        self.storage
            .claim_application(key(id), default_identity(id), default_manifest());
        self.add_application(id, state, remote)
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SecurityStorage + 'static> Scenario<S> {
    /// Creates a scenario over the given storage.
    pub fn with_storage(storage: S, config: UpdaterConfig) -> Self {
        let storage = Arc::new(storage);
        let proxies = Arc::new(LoopbackProxyManager::new());
        let agent = Arc::new(InMemoryAgent::new(config.notification_capacity));
        let cycle = UpdateCycle::new(
            config,
            Arc::clone(&storage),
            Arc::clone(&proxies),
            Arc::clone(&agent),
        );
        Self {
            storage,
            proxies,
            agent,
            cycle,
        }
    }

    /// Brings an application online without touching storage.
    pub fn add_application(
        &self,
        id: u8,
        state: ApplicationState,
        remote: RemoteSecurityState,
    ) -> TestApplication {
        let info = SecurityInfo::new(format!(":1.{id}"), key(id), state);
        self.agent.announce(info.clone());
        let remote = self.proxies.add(key(id), remote);
        TestApplication {
            app: OnlineApplication::from_security_info(&info),
            info,
            remote,
        }
    }

    /// Runs one update cycle for the application.
    pub fn run(&self, app: &TestApplication) -> CycleReport {
        self.cycle.run(&app.app, &app.info)
    }

    /// Drains the notifications and keeps the error reports.
    pub fn reports(&self) -> Vec<SyncErrorReport> {
        self.agent
            .drain_notifications()
            .into_iter()
            .filter_map(|n| n.as_sync_error().cloned())
            .collect()
    }

    /// Drains the notifications and keeps the manifest notices.
    pub fn notices(&self) -> Vec<ManifestUpdateNotice> {
        self.agent
            .drain_notifications()
            .into_iter()
            .filter_map(|n| n.as_manifest_update().cloned())
            .collect()
    }
}
