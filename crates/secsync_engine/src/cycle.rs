//! The per-application update cycle.
//!
//! A cycle is one or more passes. Each pass opens a storage transaction,
//! brings the remote application in line with the desired state and closes
//! the transaction again. If storage reports a different transaction id on
//! close, the desired state changed while the pass ran and a fresh pass
//! starts.
//!
//! ```text
//!   WillReset ──reset──► Reset
//!   otherwise ──► Memberships ──► Identity ──► Policy ──► Ok
//! ```
//!
//! Remote calls block and cannot be cancelled. A peer that never answers
//! stalls the cycle and, since cycles run on the queue's worker, every
//! cycle after it.

use crate::config::UpdaterConfig;
use crate::error::{SyncError, SyncResult};
use crate::facade::SecurityAgentFacade;
use crate::proxy::{ProxyHandle, ProxyObjectManager};
use crate::queue::{SecurityEvent, SecurityEventHandler};
use crate::reconciler::{reconcile_memberships, PolicyAction};
use crate::report::{
    ErrorContext, ManifestUpdateNotice, Notification, SyncErrorReport, SyncErrorType,
};
use crate::transaction::UpdateTransaction;
use parking_lot::RwLock;
use secsync_core::{
    ApplicationState, IdentityCertificateChain, Manifest, MembershipCertificateChain,
    OnlineApplication, PermissionPolicy, SecurityInfo, SyncState,
};
use secsync_storage::{SecurityStorage, StorageError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How a pass, or the whole cycle, ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Storage does not manage the application.
    NotManaged,
    /// The application was reset.
    Reset,
    /// The remote configuration matches storage.
    Synced,
    /// No session with the application; nothing was reported.
    Disconnected,
    /// A failure was reported to the agent.
    Failed(SyncErrorType),
}

impl PassOutcome {
    /// Returns true if the pass reached its goal.
    pub fn is_success(&self) -> bool {
        matches!(self, PassOutcome::Reset | PassOutcome::Synced)
    }
}

/// Result of a full update cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Number of passes performed.
    pub passes: u32,
    /// Outcome of the last pass, or `Failed(Storage)` if the pass limit was hit.
    pub outcome: PassOutcome,
    /// Sync state handed to the agent, if a record was read.
    pub sync_state: Option<SyncState>,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Statistics about update cycles.
#[derive(Debug, Clone, Default)]
pub struct UpdaterStats {
    /// Total number of cycles completed.
    pub cycles_completed: u64,
    /// Total number of passes.
    pub passes: u64,
    /// Passes started because storage changed during a pass.
    pub restarts: u64,
    /// Error reports sent to the agent.
    pub errors_reported: u64,
    /// Manifest update notices sent to the agent.
    pub manifest_notices: u64,
    /// Remote calls that changed the application's configuration.
    pub mutating_calls: u64,
    /// Last reported error message.
    pub last_error: Option<String>,
}

/// Why a pass stopped early.
enum Abort {
    /// The failure was reported under this category.
    Reported(SyncErrorType),
    /// A transient failure, logged only.
    Silent,
}

impl From<Abort> for PassOutcome {
    fn from(abort: Abort) -> Self {
        match abort {
            Abort::Reported(error_type) => PassOutcome::Failed(error_type),
            Abort::Silent => PassOutcome::Disconnected,
        }
    }
}

type PhaseResult<T = ()> = Result<T, Abort>;

/// Desired state read from storage at the start of a pass.
struct DesiredState {
    memberships: Vec<MembershipCertificateChain>,
    identity: IdentityCertificateChain,
    manifest: Manifest,
    policy: Option<PermissionPolicy>,
}

struct PassResult {
    outcome: PassOutcome,
    sync_state: Option<SyncState>,
    restart: bool,
}

impl PassResult {
    fn finished(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            sync_state: None,
            restart: false,
        }
    }
}

/// Runs update cycles against storage, remote applications and the agent.
pub struct UpdateCycle<S, P, F>
where
    S: SecurityStorage + ?Sized,
    P: ProxyObjectManager,
    F: SecurityAgentFacade + ?Sized,
{
    config: UpdaterConfig,
    storage: Arc<S>,
    proxies: Arc<P>,
    facade: Arc<F>,
    stats: RwLock<UpdaterStats>,
}

impl<S, P, F> UpdateCycle<S, P, F>
where
    S: SecurityStorage + ?Sized,
    P: ProxyObjectManager,
    F: SecurityAgentFacade + ?Sized,
{
    /// Creates a new update cycle runner.
    pub fn new(config: UpdaterConfig, storage: Arc<S>, proxies: Arc<P>, facade: Arc<F>) -> Self {
        Self {
            config,
            storage,
            proxies,
            facade,
            stats: RwLock::new(UpdaterStats::default()),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Gets the security agent.
    pub fn facade(&self) -> &Arc<F> {
        &self.facade
    }

    /// Gets the current stats.
    pub fn stats(&self) -> UpdaterStats {
        self.stats.read().clone()
    }

    /// Runs a full update cycle for one application.
    ///
    /// The application state in `sec_info` decides the branch taken; `app`
    /// is what remote calls and reports refer to. Failures are reported
    /// through the agent, never returned.
    pub fn run(&self, app: &OnlineApplication, sec_info: &SecurityInfo) -> CycleReport {
        let start = Instant::now();
        info!(
            bus_name = %app.bus_name,
            application = %app.key_info,
            state = %sec_info.application_state,
            "update cycle started"
        );

        let mut passes = 0u32;
        let mut sync_state = None;
        let outcome = loop {
            if !self.config.allows_pass(passes) {
                warn!(application = %app.key_info, passes, "storage did not settle, giving up");
                self.report(SyncErrorReport::new(
                    app.clone(),
                    SyncErrorType::Storage,
                    SyncError::RestartLimitExceeded { passes },
                ));
                break PassOutcome::Failed(SyncErrorType::Storage);
            }

            passes += 1;
            if passes > 1 {
                self.stats.write().restarts += 1;
            }
            let pass = self.run_pass(app, sec_info.application_state);
            if pass.sync_state.is_some() {
                sync_state = pass.sync_state;
            }
            if !pass.restart {
                break pass.outcome;
            }
            debug!(application = %app.key_info, passes, "desired state changed during pass, restarting");
        };

        if let Some(state) = sync_state {
            self.facade.set_sync_state(app, state);
        }

        let report = CycleReport {
            passes,
            outcome,
            sync_state,
            duration: start.elapsed(),
        };
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.passes += u64::from(passes);
        }
        info!(
            application = %app.key_info,
            passes,
            outcome = ?report.outcome,
            duration_ms = report.duration.as_millis() as u64,
            "update cycle finished"
        );
        report
    }

    /// One traversal from opening the transaction to closing it.
    fn run_pass(&self, app: &OnlineApplication, state: ApplicationState) -> PassResult {
        let mut txn = match UpdateTransaction::open(&*self.storage, app) {
            Ok(txn) => txn,
            Err(e) if e.is_end_of_data() => {
                debug!(application = %app.key_info, "application not managed");
                return PassResult::finished(PassOutcome::NotManaged);
            }
            Err(e) => {
                let abort = self.fail(app, SyncErrorType::Storage, e.into(), None);
                return PassResult::finished(abort.into());
            }
        };

        let result = if txn.sync_state() == SyncState::WillReset {
            self.reset_application(app, state, &mut txn)
                .map(|()| PassOutcome::Reset)
        } else {
            self.update_application(app, state, &mut txn)
                .map(|()| PassOutcome::Synced)
        };
        let outcome = result.unwrap_or_else(PassOutcome::from);

        let sync_state = txn.sync_state();
        let opened = txn.id();
        match txn.finish() {
            Ok(current) => PassResult {
                outcome,
                sync_state: Some(sync_state),
                restart: current != opened,
            },
            Err(e) => {
                let abort = self.fail(app, SyncErrorType::Storage, e.into(), None);
                PassResult {
                    outcome: abort.into(),
                    sync_state: Some(sync_state),
                    restart: false,
                }
            }
        }
    }

    fn reset_application(
        &self,
        app: &OnlineApplication,
        state: ApplicationState,
        txn: &mut UpdateTransaction<'_, S>,
    ) -> PhaseResult {
        if state.is_claimed() {
            let proxy = self.connect(app, SyncErrorType::Reset)?;
            proxy
                .reset()
                .map_err(|e| self.fail(app, SyncErrorType::Reset, e.into(), None))?;
            self.count_mutation();
            info!(application = %app.key_info, "application reset");
        } else {
            debug!(application = %app.key_info, %state, "application already reset");
        }
        txn.set_sync_state(SyncState::Reset);
        Ok(())
    }

    fn update_application(
        &self,
        app: &OnlineApplication,
        state: ApplicationState,
        txn: &mut UpdateTransaction<'_, S>,
    ) -> PhaseResult {
        if !state.is_claimed() {
            error!(application = %app.key_info, %state, "cannot update unclaimed application");
            return Err(self.fail(
                app,
                SyncErrorType::UnexpectedState,
                SyncError::UnexpectedState { state },
                None,
            ));
        }

        let desired = self.load_desired_state(app)?;
        let proxy = self.connect(app, SyncErrorType::Remote)?;

        self.update_memberships(app, &proxy, &desired)?;
        self.update_identity(app, state, &proxy, &desired)?;
        self.update_policy(app, &proxy, &desired)?;

        txn.set_sync_state(SyncState::Ok);
        Ok(())
    }

    fn load_desired_state(&self, app: &OnlineApplication) -> PhaseResult<DesiredState> {
        let storage_failure = |e: StorageError| {
            self.fail(app, SyncErrorType::Storage, e.into(), None)
        };

        let memberships = self
            .storage
            .get_membership_certificates(app)
            .map_err(storage_failure)?;
        let (identity, manifest) = self
            .storage
            .get_identity_certificates_and_manifest(app)
            .map_err(storage_failure)?;
        let policy = match self.storage.get_policy(app) {
            Ok(policy) => Some(policy),
            Err(e) if e.is_end_of_data() => None,
            Err(e) => return Err(storage_failure(e)),
        };

        Ok(DesiredState {
            memberships,
            identity,
            manifest,
            policy,
        })
    }

    fn update_memberships(
        &self,
        app: &OnlineApplication,
        proxy: &P::Handle,
        desired: &DesiredState,
    ) -> PhaseResult {
        let remote = proxy
            .get_membership_summaries()
            .map_err(|e| self.fail(app, SyncErrorType::Remote, e.into(), None))?;

        let diff = reconcile_memberships(&desired.memberships, &remote);
        debug!(
            application = %app.key_info,
            install = diff.to_install.len(),
            remove = diff.to_remove.len(),
            "membership diff"
        );

        for chain in &diff.to_install {
            proxy.install_membership(chain).map_err(|e| {
                self.fail(
                    app,
                    SyncErrorType::Membership,
                    e.into(),
                    Some(ErrorContext::MembershipChain(chain.clone())),
                )
            })?;
            self.count_mutation();
        }

        for summary in &diff.to_remove {
            proxy
                .remove_membership(&summary.serial, &summary.issuer)
                .map_err(|e| {
                    self.fail(
                        app,
                        SyncErrorType::Membership,
                        e.into(),
                        Some(ErrorContext::MembershipSummary(summary.clone())),
                    )
                })?;
            self.count_mutation();
        }
        Ok(())
    }

    fn update_identity(
        &self,
        app: &OnlineApplication,
        state: ApplicationState,
        proxy: &P::Handle,
        desired: &DesiredState,
    ) -> PhaseResult {
        let remote = proxy
            .get_identity()
            .map_err(|e| self.fail(app, SyncErrorType::Remote, e.into(), None))?;

        if desired.identity.same_identity_as(&remote) {
            debug!(application = %app.key_info, "identity up to date");
        } else {
            proxy
                .update_identity(&desired.identity, &desired.manifest)
                .map_err(|e| {
                    self.fail(
                        app,
                        SyncErrorType::Identity,
                        e.into(),
                        Some(ErrorContext::Identity(desired.identity.clone())),
                    )
                })?;
            self.count_mutation();
            debug!(application = %app.key_info, "identity updated");
        }

        if state == ApplicationState::NeedsUpdate {
            let template = proxy
                .get_manifest_template()
                .map_err(|e| self.fail(app, SyncErrorType::Remote, e.into(), None))?;
            if !desired.manifest.same_rules(&template) {
                let notice =
                    ManifestUpdateNotice::new(app.clone(), desired.manifest.clone(), template);
                info!(%notice, "manifest update requested");
                self.stats.write().manifest_notices += 1;
                self.facade.notify_listeners(Notification::ManifestUpdate(notice));
            }
        }
        Ok(())
    }

    fn update_policy(
        &self,
        app: &OnlineApplication,
        proxy: &P::Handle,
        desired: &DesiredState,
    ) -> PhaseResult {
        let remote_version = proxy
            .get_policy_version()
            .map_err(|e| self.fail(app, SyncErrorType::Remote, e.into(), None))?;

        match PolicyAction::plan(desired.policy.as_ref(), remote_version) {
            PolicyAction::Reset => {
                proxy.reset_policy().map_err(|e| {
                    self.fail(
                        app,
                        SyncErrorType::Policy,
                        e.into(),
                        Some(ErrorContext::Policy(None)),
                    )
                })?;
                self.count_mutation();
                debug!(application = %app.key_info, remote_version, "policy reset to default");
            }
            PolicyAction::Update(policy) => {
                proxy.update_policy(policy).map_err(|e| {
                    self.fail(
                        app,
                        SyncErrorType::Policy,
                        e.into(),
                        Some(ErrorContext::Policy(Some(policy.clone()))),
                    )
                })?;
                self.count_mutation();
                debug!(
                    application = %app.key_info,
                    remote_version,
                    version = policy.version,
                    "policy updated"
                );
            }
            PolicyAction::Keep => {
                debug!(application = %app.key_info, remote_version, "policy up to date");
            }
        }
        Ok(())
    }

    /// Connects to the application. Connection failures other than a
    /// missing session are reported under `category`.
    fn connect(&self, app: &OnlineApplication, category: SyncErrorType) -> PhaseResult<P::Handle> {
        self.proxies
            .get_proxy_object(app)
            .map_err(|e| self.fail(app, category, e.into(), None))
    }

    /// Reports a failure unless it is transient.
    fn fail(
        &self,
        app: &OnlineApplication,
        error_type: SyncErrorType,
        error: SyncError,
        context: Option<ErrorContext>,
    ) -> Abort {
        if error.is_transient() {
            warn!(application = %app.key_info, error = %error, "no session, skipping update");
            return Abort::Silent;
        }

        let mut report = SyncErrorReport::new(app.clone(), error_type, error);
        if let Some(context) = context {
            report = report.with_context(context);
        }
        self.report(report);
        Abort::Reported(error_type)
    }

    fn report(&self, report: SyncErrorReport) {
        warn!(%report, "sync failed");
        {
            let mut stats = self.stats.write();
            stats.errors_reported += 1;
            stats.last_error = Some(report.error.to_string());
        }
        self.facade.notify_listeners(Notification::SyncError(report));
    }

    fn count_mutation(&self) {
        self.stats.write().mutating_calls += 1;
    }
}

impl<S, P, F> SecurityEventHandler for UpdateCycle<S, P, F>
where
    S: SecurityStorage + ?Sized + 'static,
    P: ProxyObjectManager + 'static,
    F: SecurityAgentFacade + ?Sized + 'static,
{
    fn handle_task(&self, event: SecurityEvent) -> SyncResult<()> {
        let Some(new_info) = event.new_info else {
            debug!("application disappeared, nothing to update");
            return Ok(());
        };

        let triggered = match &event.old_info {
            None => true,
            Some(old) => {
                old.application_state != ApplicationState::NeedsUpdate
                    && new_info.application_state == ApplicationState::NeedsUpdate
            }
        };
        if !triggered {
            debug!(application = %new_info.key_info, "state change needs no update");
            return Ok(());
        }

        let app = self
            .facade
            .get_application(&new_info.key_info)
            .unwrap_or_else(|| OnlineApplication::from_security_info(&new_info));
        self.run(&app, &new_info);
        Ok(())
    }
}
