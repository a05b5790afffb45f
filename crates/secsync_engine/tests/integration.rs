//! End-to-end tests: storage changes flow through the queue to remote
//! applications.

use secsync_core::{
    ApplicationState, Certificate, CertificateChain, KeyInfo, Manifest, OnlineApplication,
    PermissionPolicy, SecurityInfo, SyncState,
};
use secsync_engine::{
    ApplicationUpdater, InMemoryAgent, LoopbackProxyManager, Notification, ProxyCall,
    RemoteSecurityState, SecurityAgentFacade, SyncErrorType, UpdaterConfig,
};
use secsync_storage::InMemorySecurityStorage;
use std::sync::Arc;
use std::time::Duration;

type Updater = ApplicationUpdater<InMemorySecurityStorage, LoopbackProxyManager, InMemoryAgent>;

struct World {
    storage: Arc<InMemorySecurityStorage>,
    proxies: Arc<LoopbackProxyManager>,
    agent: Arc<InMemoryAgent>,
    updater: Arc<Updater>,
}

impl World {
    fn new() -> Self {
        let storage = Arc::new(InMemorySecurityStorage::new());
        let proxies = Arc::new(LoopbackProxyManager::new());
        let agent = Arc::new(InMemoryAgent::default());
        let updater = Arc::new(
            ApplicationUpdater::new(
                UpdaterConfig::new().with_idle_timeout(Duration::from_secs(10)),
                Arc::clone(&storage),
                Arc::clone(&proxies),
                Arc::clone(&agent),
            )
            .unwrap(),
        );
        storage.set_listener(updater.pending_changes_listener());
        Self {
            storage,
            proxies,
            agent,
            updater,
        }
    }

    /// Brings an application online and tells the updater about it.
    fn announce(&self, id: u8, state: ApplicationState) -> SecurityInfo {
        let info = SecurityInfo::new(format!(":1.{id}"), key(id), state);
        let old = self.agent.announce(info.clone());
        self.updater
            .on_security_state_change(old.as_ref(), Some(&info));
        info
    }

    fn settle(&self) {
        assert!(self.updater.wait_until_idle());
    }
}

fn key(id: u8) -> KeyInfo {
    KeyInfo::from_key_id(vec![id])
}

fn chain(serial: u8, aki: u8) -> CertificateChain {
    CertificateChain::new(vec![Certificate::new(vec![serial], vec![aki])])
}

#[test]
fn storage_changes_reach_the_application() {
    let world = World::new();
    let remote = world.proxies.add(key(1), RemoteSecurityState::default());
    world.announce(1, ApplicationState::Claimed);
    world.storage.claim_application(key(1), chain(1, 0xca), Manifest::default());
    world.settle();

    world.storage.install_membership(&key(1), chain(10, 0xb1)).unwrap();
    world.storage.update_policy(&key(1), PermissionPolicy::new(2)).unwrap();
    world.settle();

    let state = remote.state();
    assert_eq!(state.identity, chain(1, 0xca));
    assert_eq!(state.memberships, vec![chain(10, 0xb1)]);
    assert_eq!(state.policy, Some(PermissionPolicy::new(2)));
    assert_eq!(world.agent.sync_state(&key(1)), Some(SyncState::Ok));
    assert!(world.agent.drain_notifications().is_empty());
}

#[test]
fn repeated_triggers_are_idempotent() {
    let world = World::new();
    let remote = world.proxies.add(key(2), RemoteSecurityState::default());
    world.announce(2, ApplicationState::Claimed);
    world.storage.claim_application(key(2), chain(2, 0xca), Manifest::default());
    world.settle();
    remote.clear_calls();

    let app = world.agent.get_application(&key(2)).unwrap();
    for _ in 0..3 {
        world.updater.update_application(&app).unwrap();
    }
    world.settle();

    assert!(remote.mutating_calls().is_empty());
    assert_eq!(world.updater.pending(), 0);
}

#[test]
fn needs_update_triggers_manifest_notice() {
    let world = World::new();
    let template = Manifest::new(vec![secsync_core::Rule::new(
        "org.example.Lamp",
        vec![secsync_core::RuleMember::new("*", 0x01)],
    )]);
    world.proxies.add(
        key(3),
        RemoteSecurityState {
            manifest_template: template.clone(),
            ..RemoteSecurityState::default()
        },
    );
    world.announce(3, ApplicationState::Claimed);
    world.storage.claim_application(key(3), chain(3, 0xca), Manifest::default());
    world.settle();
    world.agent.drain_notifications();

    world.announce(3, ApplicationState::NeedsUpdate);
    world.settle();

    let notification = world
        .agent
        .next_notification(Duration::from_secs(1))
        .unwrap();
    let notice = notification.as_manifest_update().unwrap();
    assert_eq!(notice.template, template);
    assert_eq!(notice.additional_rules.len(), 1);
}

#[test]
fn removal_resets_and_forgets() {
    let world = World::new();
    let remote = world.proxies.add(key(4), RemoteSecurityState::default());
    world.announce(4, ApplicationState::Claimed);
    world.storage.claim_application(key(4), chain(4, 0xca), Manifest::default());
    world.settle();

    world.storage.remove_application(&key(4)).unwrap();
    world.settle();

    assert!(remote.mutating_calls().contains(&ProxyCall::Reset));
    assert_eq!(world.agent.sync_state(&key(4)), Some(SyncState::Reset));
    assert!(world.storage.managed_applications().is_empty());
}

#[test]
fn failures_surface_as_notifications() {
    let world = World::new();
    let remote = world.proxies.add(key(5), RemoteSecurityState::default());
    remote.fail_on("UpdateIdentity", "rejected");
    world.announce(5, ApplicationState::Claimed);
    world.storage.claim_application(key(5), chain(5, 0xca), Manifest::default());
    world.settle();

    let reports: Vec<_> = world
        .agent
        .drain_notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::SyncError(report) => Some(report),
            Notification::ManifestUpdate(_) => None,
        })
        .collect();
    assert!(!reports.is_empty());
    assert!(reports
        .iter()
        .all(|r| r.error_type == SyncErrorType::Identity));
    assert!(world.updater.stats().errors_reported >= 1);
}

#[test]
fn update_applications_picks_claimed_only() {
    let world = World::new();
    world.proxies.add(key(6), RemoteSecurityState::default());
    world.proxies.add(key(7), RemoteSecurityState::default());
    world.agent.announce(SecurityInfo::new(":1.6", key(6), ApplicationState::Claimed));
    world.agent.announce(SecurityInfo::new(":1.7", key(7), ApplicationState::Claimable));

    assert_eq!(world.updater.update_applications(None).unwrap(), 1);

    let offline = OnlineApplication::new("", ApplicationState::Claimed, key(8));
    assert_eq!(
        world.updater.update_applications(Some(&[offline])).unwrap(),
        0
    );
    world.settle();
}

#[test]
fn update_applications_uses_directory_state() {
    let world = World::new();
    for id in 6..=8 {
        world.proxies.add(key(id), RemoteSecurityState::default());
    }
    world.agent.announce(SecurityInfo::new(":1.6", key(6), ApplicationState::Claimed));
    world.agent.announce(SecurityInfo::new(":1.7", key(7), ApplicationState::Claimable));
    world.agent.announce(SecurityInfo::new(":1.8", key(8), ApplicationState::Claimed));

    // The caller's copies are stale; the agent's states decide.
    let stale = [
        OnlineApplication::new(":1.6", ApplicationState::Claimable, key(6)),
        OnlineApplication::new(":1.7", ApplicationState::Claimed, key(7)),
        OnlineApplication::new(":1.8", ApplicationState::Claimable, key(8)),
        OnlineApplication::new(":1.9", ApplicationState::Claimed, key(9)),
    ];
    assert_eq!(world.updater.update_applications(Some(&stale)).unwrap(), 2);
    world.settle();
}

#[test]
fn shutdown_rejects_new_work() {
    let world = World::new();
    world.agent.announce(SecurityInfo::new(":1.9", key(9), ApplicationState::Claimed));
    world.updater.shutdown();

    let app = world.agent.get_application(&key(9)).unwrap();
    assert!(world.updater.update_application(&app).is_err());
}
