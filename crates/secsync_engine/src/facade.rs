//! Security agent facade.
//!
//! The updater never talks to listeners directly. It asks the agent which
//! applications are online and hands every outcome over by value through
//! [`SecurityAgentFacade::notify_listeners`].

use crate::error::{SyncError, SyncResult};
use crate::report::Notification;
use parking_lot::{Mutex, RwLock};
use secsync_core::{KeyInfo, OnlineApplication, SecurityInfo, SyncState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;
use tracing::warn;

/// Directory of online applications and sink for sync outcomes.
pub trait SecurityAgentFacade: Send + Sync {
    /// Looks up an online application by key.
    fn get_application(&self, key_info: &KeyInfo) -> Option<OnlineApplication>;

    /// Returns every known application.
    fn applications(&self) -> Vec<OnlineApplication>;

    /// Records the sync state reached for an application.
    fn set_sync_state(&self, app: &OnlineApplication, state: SyncState);

    /// Returns the live security info of an application.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ApplicationNotFound`] if the application is not
    /// visible on the network.
    fn get_application_sec_info(&self, app: &OnlineApplication) -> SyncResult<SecurityInfo>;

    /// Takes ownership of a notification and delivers it to listeners.
    ///
    /// Must not block.
    fn notify_listeners(&self, notification: Notification);
}

/// An in-memory security agent.
///
/// Keeps the application directory in maps and forwards notifications into
/// a bounded channel. When the channel is full the notification is dropped
/// and counted, so the updater is never blocked by a slow consumer.
pub struct InMemoryAgent {
    applications: RwLock<HashMap<KeyInfo, OnlineApplication>>,
    security_infos: RwLock<HashMap<KeyInfo, SecurityInfo>>,
    sync_states: RwLock<HashMap<KeyInfo, SyncState>>,
    sender: SyncSender<Notification>,
    receiver: Mutex<Receiver<Notification>>,
    dropped: AtomicU64,
}

impl InMemoryAgent {
    /// Creates an agent whose notification channel holds `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        Self {
            applications: RwLock::new(HashMap::new()),
            security_infos: RwLock::new(HashMap::new()),
            sync_states: RwLock::new(HashMap::new()),
            sender,
            receiver: Mutex::new(receiver),
            dropped: AtomicU64::new(0),
        }
    }

    /// Records discovery metadata for an application.
    ///
    /// Returns the previous metadata, which is what a state-change event
    /// needs as its old value.
    pub fn announce(&self, info: SecurityInfo) -> Option<SecurityInfo> {
        let key = info.key_info.clone();
        {
            let mut apps = self.applications.write();
            apps.entry(key.clone())
                .and_modify(|app| app.apply_security_info(&info))
                .or_insert_with(|| OnlineApplication::from_security_info(&info));
        }
        self.security_infos.write().insert(key, info)
    }

    /// Marks an application as gone from the network.
    ///
    /// The application stays in the directory with an empty bus name.
    pub fn withdraw(&self, key_info: &KeyInfo) -> Option<SecurityInfo> {
        if let Some(app) = self.applications.write().get_mut(key_info) {
            app.bus_name.clear();
        }
        self.security_infos.write().remove(key_info)
    }

    /// Returns the sync state last recorded for an application.
    pub fn sync_state(&self, key_info: &KeyInfo) -> Option<SyncState> {
        self.sync_states.read().get(key_info).copied()
    }

    /// Returns the next notification without waiting.
    pub fn try_next_notification(&self) -> Option<Notification> {
        self.receiver.lock().try_recv().ok()
    }

    /// Waits up to `timeout` for the next notification.
    pub fn next_notification(&self, timeout: Duration) -> Option<Notification> {
        match self.receiver.lock().recv_timeout(timeout) {
            Ok(notification) => Some(notification),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns every notification currently queued.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.receiver.lock().try_iter().collect()
    }

    /// Returns the number of notifications dropped because the channel was full.
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryAgent {
    fn default() -> Self {
        Self::new(256)
    }
}

impl SecurityAgentFacade for InMemoryAgent {
    fn get_application(&self, key_info: &KeyInfo) -> Option<OnlineApplication> {
        self.applications.read().get(key_info).cloned()
    }

    fn applications(&self) -> Vec<OnlineApplication> {
        self.applications.read().values().cloned().collect()
    }

    fn set_sync_state(&self, app: &OnlineApplication, state: SyncState) {
        self.sync_states.write().insert(app.key_info.clone(), state);
    }

    fn get_application_sec_info(&self, app: &OnlineApplication) -> SyncResult<SecurityInfo> {
        self.security_infos
            .read()
            .get(&app.key_info)
            .cloned()
            .ok_or(SyncError::ApplicationNotFound)
    }

    fn notify_listeners(&self, notification: Notification) {
        match self.sender.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(notification) | TrySendError::Disconnected(notification)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%notification, "notification channel full, dropping");
            }
        }
    }
}
