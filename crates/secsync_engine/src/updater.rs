//! Event-driven application updater.

use crate::config::UpdaterConfig;
use crate::cycle::{UpdateCycle, UpdaterStats};
use crate::error::{SyncError, SyncResult};
use crate::facade::SecurityAgentFacade;
use crate::proxy::ProxyObjectManager;
use crate::queue::{SecurityEvent, SecurityEventQueue};
use secsync_core::{ApplicationState, OnlineApplication, PersistedApplicationRecord, SecurityInfo};
use secsync_storage::{PendingChangesListener, SecurityStorage};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Keeps remote applications in line with storage.
///
/// Every trigger (a new application, an application asking for new
/// permissions, a change in storage, an explicit request) becomes a
/// [`SecurityEvent`] on a single queue. The queue's worker runs the update
/// cycles one after another, so at most one cycle is active at a time.
///
/// # Example
///
/// ```rust
/// use secsync_engine::{ApplicationUpdater, InMemoryAgent, LoopbackProxyManager, UpdaterConfig};
/// use secsync_storage::InMemorySecurityStorage;
/// use std::sync::Arc;
///
/// let storage = Arc::new(InMemorySecurityStorage::new());
/// let updater = Arc::new(
///     ApplicationUpdater::new(
///         UpdaterConfig::new(),
///         Arc::clone(&storage),
///         Arc::new(LoopbackProxyManager::new()),
///         Arc::new(InMemoryAgent::default()),
///     )
///     .unwrap(),
/// );
/// storage.set_listener(updater.pending_changes_listener());
/// assert!(updater.wait_until_idle());
/// ```
pub struct ApplicationUpdater<S, P, F>
where
    S: SecurityStorage + ?Sized + 'static,
    P: ProxyObjectManager + 'static,
    F: SecurityAgentFacade + ?Sized + 'static,
{
    cycle: Arc<UpdateCycle<S, P, F>>,
    queue: SecurityEventQueue,
}

impl<S, P, F> ApplicationUpdater<S, P, F>
where
    S: SecurityStorage + ?Sized + 'static,
    P: ProxyObjectManager + 'static,
    F: SecurityAgentFacade + ?Sized + 'static,
{
    /// Creates the updater and starts its worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::WorkerSpawn`] if the worker cannot be started.
    pub fn new(
        config: UpdaterConfig,
        storage: Arc<S>,
        proxies: Arc<P>,
        facade: Arc<F>,
    ) -> SyncResult<Self> {
        let worker_name = config.worker_name.clone();
        let cycle = Arc::new(UpdateCycle::new(config, storage, proxies, facade));
        let queue = SecurityEventQueue::start(&worker_name, Arc::clone(&cycle))?;
        Ok(Self { cycle, queue })
    }

    /// Gets the cycle runner, for running a cycle synchronously.
    pub fn cycle(&self) -> &Arc<UpdateCycle<S, P, F>> {
        &self.cycle
    }

    /// Gets the current stats.
    pub fn stats(&self) -> UpdaterStats {
        self.cycle.stats()
    }

    /// Queues an update of every record whose desired state changed.
    ///
    /// Records of applications the agent does not see are skipped.
    pub fn on_pending_changes(&self, records: Vec<PersistedApplicationRecord>) {
        let facade = self.cycle.facade();
        for record in records {
            let Some(app) = facade.get_application(&record.key_info) else {
                debug!(application = %record.key_info, "pending change for unknown application");
                continue;
            };
            match facade.get_application_sec_info(&app) {
                Ok(info) => self.submit(SecurityEvent::new(Some(info), None)),
                Err(e) => {
                    debug!(application = %record.key_info, error = %e, "pending change for offline application");
                }
            }
        }
    }

    /// Queues a change in an application's security info.
    ///
    /// Whether the change warrants an update is decided on the worker.
    pub fn on_security_state_change(
        &self,
        old_info: Option<&SecurityInfo>,
        new_info: Option<&SecurityInfo>,
    ) {
        self.submit(SecurityEvent::new(new_info.cloned(), old_info.cloned()));
    }

    /// Queues an update of one application.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ApplicationNotFound`] if the agent has no
    /// security info for it, or [`SyncError::QueueClosed`] after shutdown.
    pub fn update_application(&self, app: &OnlineApplication) -> SyncResult<()> {
        let info = self.cycle.facade().get_application_sec_info(app)?;
        self.queue.enqueue(SecurityEvent::new(Some(info), None))
    }

    /// Queues an update of claimed applications.
    ///
    /// With `None`, every claimed application the agent knows is updated.
    /// Supplied applications are looked up in the agent's directory first;
    /// the directory's state decides, and unknown ones are skipped.
    /// Returns the number of updates queued.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueueClosed`] after shutdown.
    pub fn update_applications(&self, apps: Option<&[OnlineApplication]>) -> SyncResult<usize> {
        let facade = self.cycle.facade();
        let candidates = match apps {
            Some(apps) => apps
                .iter()
                .filter_map(|app| {
                    let known = facade.get_application(&app.key_info);
                    if known.is_none() {
                        debug!(application = %app.key_info, "skipping unknown application");
                    }
                    known
                })
                .collect(),
            None => facade.applications(),
        };

        let mut queued = 0;
        for app in candidates
            .iter()
            .filter(|app| app.application_state == ApplicationState::Claimed)
        {
            match self.update_application(app) {
                Ok(()) => queued += 1,
                Err(SyncError::ApplicationNotFound) => {
                    debug!(application = %app.key_info, "skipping offline application");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(queued)
    }

    /// Waits for queued updates to finish, up to the configured timeout.
    pub fn wait_until_idle(&self) -> bool {
        self.wait_until_idle_for(self.cycle.config().idle_timeout)
    }

    /// Waits for queued updates to finish, up to `timeout`.
    pub fn wait_until_idle_for(&self, timeout: Duration) -> bool {
        self.queue.wait_until_idle(timeout)
    }

    /// Returns the number of queued or running updates.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Stops accepting events and waits for queued ones to finish.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Returns a storage listener that does not keep the updater alive.
    ///
    /// The updater owns the storage, so registering the updater itself
    /// would form a reference cycle.
    pub fn pending_changes_listener(self: &Arc<Self>) -> Arc<dyn PendingChangesListener> {
        Arc::new(WeakListener {
            updater: Arc::downgrade(self),
        })
    }

    fn submit(&self, event: SecurityEvent) {
        if let Err(e) = self.queue.enqueue(event) {
            warn!(error = %e, "dropping security event");
        }
    }
}

impl<S, P, F> PendingChangesListener for ApplicationUpdater<S, P, F>
where
    S: SecurityStorage + ?Sized + 'static,
    P: ProxyObjectManager + 'static,
    F: SecurityAgentFacade + ?Sized + 'static,
{
    fn on_pending_changes(&self, records: Vec<PersistedApplicationRecord>) {
        ApplicationUpdater::on_pending_changes(self, records);
    }
}

struct WeakListener<S, P, F>
where
    S: SecurityStorage + ?Sized + 'static,
    P: ProxyObjectManager + 'static,
    F: SecurityAgentFacade + ?Sized + 'static,
{
    updater: Weak<ApplicationUpdater<S, P, F>>,
}

impl<S, P, F> PendingChangesListener for WeakListener<S, P, F>
where
    S: SecurityStorage + ?Sized + 'static,
    P: ProxyObjectManager + 'static,
    F: SecurityAgentFacade + ?Sized + 'static,
{
    fn on_pending_changes(&self, records: Vec<PersistedApplicationRecord>) {
        if let Some(updater) = self.updater.upgrade() {
            updater.on_pending_changes(records);
        }
    }
}
