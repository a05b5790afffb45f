//! In-process remote applications for testing.
//!
//! [`SimulatedApplication`] holds the security configuration a real
//! application would keep, logs every call made on it and can be told to
//! fail. [`LoopbackProxyManager`] hands out proxies to registered
//! simulated applications.

use crate::proxy::{ProxyError, ProxyHandle, ProxyObjectManager, ProxyResult};
use parking_lot::{Mutex, RwLock};
use secsync_core::{
    IdentityCertificateChain, KeyInfo, Manifest, MembershipCertificateChain, MembershipSummary,
    OnlineApplication, PermissionPolicy, DEFAULT_POLICY_VERSION,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Security configuration installed on a simulated application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSecurityState {
    /// Installed membership chains.
    #[serde(default)]
    pub memberships: Vec<MembershipCertificateChain>,
    /// Installed identity chain.
    #[serde(default)]
    pub identity: IdentityCertificateChain,
    /// Manifest installed with the identity.
    #[serde(default)]
    pub manifest: Manifest,
    /// Manifest the application declares it needs.
    #[serde(default)]
    pub manifest_template: Manifest,
    /// Installed policy. `None` means the default policy.
    #[serde(default)]
    pub policy: Option<PermissionPolicy>,
}

/// A call made on a simulated application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyCall {
    /// `reset`
    Reset,
    /// `get_policy_version`
    GetPolicyVersion,
    /// `reset_policy`
    ResetPolicy,
    /// `update_policy`
    UpdatePolicy(PermissionPolicy),
    /// `get_membership_summaries`
    GetMembershipSummaries,
    /// `install_membership`
    InstallMembership(MembershipCertificateChain),
    /// `remove_membership`
    RemoveMembership(MembershipSummary),
    /// `get_identity`
    GetIdentity,
    /// `update_identity`
    UpdateIdentity {
        /// Chain sent.
        chain: IdentityCertificateChain,
        /// Manifest sent.
        manifest: Manifest,
    },
    /// `get_manifest_template`
    GetManifestTemplate,
}

impl ProxyCall {
    /// Returns the operation name used in errors and failure injection.
    pub fn operation(&self) -> &'static str {
        match self {
            ProxyCall::Reset => "Reset",
            ProxyCall::GetPolicyVersion => "GetPolicyVersion",
            ProxyCall::ResetPolicy => "ResetPolicy",
            ProxyCall::UpdatePolicy(_) => "UpdatePolicy",
            ProxyCall::GetMembershipSummaries => "GetMembershipSummaries",
            ProxyCall::InstallMembership(_) => "InstallMembership",
            ProxyCall::RemoveMembership(_) => "RemoveMembership",
            ProxyCall::GetIdentity => "GetIdentity",
            ProxyCall::UpdateIdentity { .. } => "UpdateIdentity",
            ProxyCall::GetManifestTemplate => "GetManifestTemplate",
        }
    }

    /// Returns true if the call changes the application's configuration.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ProxyCall::Reset
                | ProxyCall::ResetPolicy
                | ProxyCall::UpdatePolicy(_)
                | ProxyCall::InstallMembership(_)
                | ProxyCall::RemoveMembership(_)
                | ProxyCall::UpdateIdentity { .. }
        )
    }
}

/// A remote application living in the same process.
#[derive(Debug, Default)]
pub struct SimulatedApplication {
    state: Mutex<RemoteSecurityState>,
    calls: Mutex<Vec<ProxyCall>>,
    failures: RwLock<HashMap<String, String>>,
    offline: AtomicBool,
}

impl SimulatedApplication {
    /// Creates an application with an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an application with the given configuration installed.
    pub fn with_state(state: RemoteSecurityState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Returns a copy of the installed configuration.
    pub fn state(&self) -> RemoteSecurityState {
        self.state.lock().clone()
    }

    /// Replaces the installed configuration.
    pub fn set_state(&self, state: RemoteSecurityState) {
        *self.state.lock() = state;
    }

    /// Sets the manifest template the application declares.
    pub fn set_manifest_template(&self, template: Manifest) {
        self.state.lock().manifest_template = template;
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<ProxyCall> {
        self.calls.lock().clone()
    }

    /// Returns the calls that changed the configuration.
    pub fn mutating_calls(&self) -> Vec<ProxyCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.is_mutating())
            .cloned()
            .collect()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Makes every later call to `operation` fail with `message`.
    pub fn fail_on(&self, operation: &str, message: impl Into<String>) {
        self.failures
            .write()
            .insert(operation.to_string(), message.into());
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    /// Takes the application off the network. Connecting and calling then
    /// fail with [`ProxyError::NoSession`].
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Returns true if the application is reachable.
    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Logs the call and applies injected failures.
    fn call(&self, call: ProxyCall) -> ProxyResult<()> {
        if !self.is_online() {
            return Err(ProxyError::NoSession);
        }
        let operation = call.operation();
        self.calls.lock().push(call);
        match self.failures.read().get(operation) {
            Some(message) => Err(ProxyError::remote(operation, message.clone())),
            None => Ok(()),
        }
    }
}

/// A connected handle to a [`SimulatedApplication`].
#[derive(Debug, Clone)]
pub struct LoopbackProxy {
    app: Arc<SimulatedApplication>,
}

impl LoopbackProxy {
    /// Creates a proxy for the application.
    pub fn new(app: Arc<SimulatedApplication>) -> Self {
        Self { app }
    }
}

impl ProxyHandle for LoopbackProxy {
    fn reset(&self) -> ProxyResult<()> {
        self.app.call(ProxyCall::Reset)?;
        let mut state = self.app.state.lock();
        let manifest_template = std::mem::take(&mut state.manifest_template);
        *state = RemoteSecurityState {
            manifest_template,
            ..RemoteSecurityState::default()
        };
        Ok(())
    }

    fn get_policy_version(&self) -> ProxyResult<u32> {
        self.app.call(ProxyCall::GetPolicyVersion)?;
        Ok(self
            .app
            .state
            .lock()
            .policy
            .as_ref()
            .map_or(DEFAULT_POLICY_VERSION, |policy| policy.version))
    }

    fn reset_policy(&self) -> ProxyResult<()> {
        self.app.call(ProxyCall::ResetPolicy)?;
        self.app.state.lock().policy = None;
        Ok(())
    }

    fn update_policy(&self, policy: &PermissionPolicy) -> ProxyResult<()> {
        self.app.call(ProxyCall::UpdatePolicy(policy.clone()))?;
        self.app.state.lock().policy = Some(policy.clone());
        Ok(())
    }

    fn get_membership_summaries(&self) -> ProxyResult<Vec<MembershipSummary>> {
        self.app.call(ProxyCall::GetMembershipSummaries)?;
        Ok(self
            .app
            .state
            .lock()
            .memberships
            .iter()
            .filter_map(MembershipSummary::for_chain)
            .collect())
    }

    fn install_membership(&self, chain: &MembershipCertificateChain) -> ProxyResult<()> {
        self.app.call(ProxyCall::InstallMembership(chain.clone()))?;
        self.app.state.lock().memberships.push(chain.clone());
        Ok(())
    }

    fn remove_membership(&self, serial: &[u8], issuer: &KeyInfo) -> ProxyResult<()> {
        let summary = MembershipSummary::new(serial.to_vec(), issuer.clone());
        self.app
            .call(ProxyCall::RemoveMembership(summary.clone()))?;
        self.app
            .state
            .lock()
            .memberships
            .retain(|chain| !chain.matches_summary(&summary));
        Ok(())
    }

    fn get_identity(&self) -> ProxyResult<IdentityCertificateChain> {
        self.app.call(ProxyCall::GetIdentity)?;
        Ok(self.app.state.lock().identity.clone())
    }

    fn update_identity(
        &self,
        chain: &IdentityCertificateChain,
        manifest: &Manifest,
    ) -> ProxyResult<()> {
        self.app.call(ProxyCall::UpdateIdentity {
            chain: chain.clone(),
            manifest: manifest.clone(),
        })?;
        let mut state = self.app.state.lock();
        state.identity = chain.clone();
        state.manifest = manifest.clone();
        Ok(())
    }

    fn get_manifest_template(&self) -> ProxyResult<Manifest> {
        self.app.call(ProxyCall::GetManifestTemplate)?;
        Ok(self.app.state.lock().manifest_template.clone())
    }
}

/// Hands out [`LoopbackProxy`] handles for registered applications.
#[derive(Debug, Default)]
pub struct LoopbackProxyManager {
    applications: RwLock<HashMap<KeyInfo, Arc<SimulatedApplication>>>,
    connections: AtomicU64,
}

impl LoopbackProxyManager {
    /// Creates a manager with no applications.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an application under its key.
    pub fn register(&self, key_info: KeyInfo, app: Arc<SimulatedApplication>) {
        self.applications.write().insert(key_info, app);
    }

    /// Registers a fresh application and returns it.
    pub fn add(&self, key_info: KeyInfo, state: RemoteSecurityState) -> Arc<SimulatedApplication> {
        let app = Arc::new(SimulatedApplication::with_state(state));
        self.register(key_info, Arc::clone(&app));
        app
    }

    /// Looks up a registered application.
    pub fn application(&self, key_info: &KeyInfo) -> Option<Arc<SimulatedApplication>> {
        self.applications.read().get(key_info).cloned()
    }

    /// Returns the number of proxies handed out.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }
}

impl ProxyObjectManager for LoopbackProxyManager {
    type Handle = LoopbackProxy;

    fn get_proxy_object(&self, app: &OnlineApplication) -> ProxyResult<Self::Handle> {
        let simulated = self.application(&app.key_info).ok_or_else(|| {
            ProxyError::ConnectionFailed(format!("no application with key {}", app.key_info))
        })?;
        if !simulated.is_online() {
            return Err(ProxyError::NoSession);
        }
        self.connections.fetch_add(1, Ordering::Relaxed);
        Ok(LoopbackProxy::new(simulated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secsync_core::{ApplicationState, Certificate, CertificateChain};

    fn chain(serial: u8, aki: u8) -> MembershipCertificateChain {
        CertificateChain::new(vec![Certificate::new(vec![serial], vec![aki])])
    }

    fn connect(manager: &LoopbackProxyManager, id: u8) -> ProxyResult<LoopbackProxy> {
        let app = OnlineApplication::new(":1.1", ApplicationState::Claimed, KeyInfo::from_key_id(vec![id]));
        manager.get_proxy_object(&app)
    }

    #[test]
    fn memberships_roundtrip_through_summaries() {
        let manager = LoopbackProxyManager::new();
        let app = manager.add(KeyInfo::from_key_id(vec![1]), RemoteSecurityState::default());
        let proxy = connect(&manager, 1).unwrap();

        proxy.install_membership(&chain(1, 9)).unwrap();
        proxy.install_membership(&chain(2, 9)).unwrap();
        assert_eq!(proxy.get_membership_summaries().unwrap().len(), 2);

        proxy
            .remove_membership(&[1], &KeyInfo::from_key_id(vec![9]))
            .unwrap();
        assert_eq!(app.state().memberships, vec![chain(2, 9)]);
        assert_eq!(app.mutating_calls().len(), 3);
        assert_eq!(app.calls().len(), 4);
    }

    #[test]
    fn policy_version_defaults_to_zero() {
        let manager = LoopbackProxyManager::new();
        manager.add(KeyInfo::from_key_id(vec![1]), RemoteSecurityState::default());
        let proxy = connect(&manager, 1).unwrap();

        assert_eq!(proxy.get_policy_version().unwrap(), DEFAULT_POLICY_VERSION);
        proxy.update_policy(&PermissionPolicy::new(5)).unwrap();
        assert_eq!(proxy.get_policy_version().unwrap(), 5);
        proxy.reset_policy().unwrap();
        assert_eq!(proxy.get_policy_version().unwrap(), DEFAULT_POLICY_VERSION);
    }

    #[test]
    fn reset_keeps_template_only() {
        let template = Manifest::default();
        let manager = LoopbackProxyManager::new();
        let app = manager.add(
            KeyInfo::from_key_id(vec![1]),
            RemoteSecurityState {
                memberships: vec![chain(1, 1)],
                policy: Some(PermissionPolicy::new(3)),
                manifest_template: template.clone(),
                ..RemoteSecurityState::default()
            },
        );
        connect(&manager, 1).unwrap().reset().unwrap();

        let state = app.state();
        assert!(state.memberships.is_empty());
        assert!(state.policy.is_none());
        assert_eq!(state.manifest_template, template);
    }

    #[test]
    fn injected_failure() {
        let manager = LoopbackProxyManager::new();
        let app = manager.add(KeyInfo::from_key_id(vec![1]), RemoteSecurityState::default());
        app.fail_on("UpdatePolicy", "denied");

        let proxy = connect(&manager, 1).unwrap();
        assert_eq!(
            proxy.update_policy(&PermissionPolicy::new(1)),
            Err(ProxyError::remote("UpdatePolicy", "denied"))
        );
        assert!(app.state().policy.is_none());

        app.clear_failures();
        assert!(proxy.update_policy(&PermissionPolicy::new(1)).is_ok());
    }

    #[test]
    fn offline_application_has_no_session() {
        let manager = LoopbackProxyManager::new();
        let app = manager.add(KeyInfo::from_key_id(vec![1]), RemoteSecurityState::default());
        let proxy = connect(&manager, 1).unwrap();

        app.set_online(false);
        assert_eq!(connect(&manager, 1).unwrap_err(), ProxyError::NoSession);
        assert_eq!(proxy.get_identity(), Err(ProxyError::NoSession));
        assert_eq!(manager.connections(), 1);
    }

    #[test]
    fn unknown_application_fails_to_connect() {
        let manager = LoopbackProxyManager::new();
        assert!(matches!(
            connect(&manager, 4),
            Err(ProxyError::ConnectionFailed(_))
        ));
    }
}
