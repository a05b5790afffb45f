//! Stress tests for the updater.
//!
//! Many threads change desired state at once while the updater's single
//! worker keeps remote applications in line.

use crate::fixtures::{default_identity, default_manifest, key, membership_chain, policy};
use crate::generators::chain_identities;
use secsync_core::{ApplicationState, Certificate, KeyInfo, SecurityInfo, DEFAULT_POLICY_VERSION};
use secsync_engine::{
    ApplicationUpdater, InMemoryAgent, LoopbackProxyManager, RemoteSecurityState,
    SecurityAgentFacade, UpdaterConfig,
};
use secsync_storage::{InMemorySecurityStorage, SecurityStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Storage changes made.
    pub changes: usize,
    /// Storage changes rejected.
    pub failed_changes: usize,
    /// Update cycles run by the worker.
    pub cycles: u64,
    /// Applications whose remote state matches storage at the end.
    pub converged: usize,
    /// Applications whose remote state does not match storage.
    pub diverged: Vec<KeyInfo>,
    /// Time from the first change until the queue drained.
    pub duration: Duration,
}

impl StressTestResult {
    /// Returns true if every application converged.
    pub fn all_converged(&self) -> bool {
        self.diverged.is_empty()
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Changes: {} ({} failed)", self.changes, self.failed_changes);
        println!("Cycles: {}", self.cycles);
        println!("Converged: {}", self.converged);
        println!("Diverged: {}", self.diverged.len());
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Storage changes per thread.
    pub operations: usize,
    /// Number of threads changing storage.
    pub threads: usize,
    /// Number of managed applications.
    pub applications: u8,
    /// How long to wait for the queue to drain.
    pub drain_timeout: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            applications: 8,
            drain_timeout: Duration::from_secs(60),
        }
    }
}

/// Changes desired state from several threads and checks that every remote
/// application ends up matching storage.
pub fn stress_concurrent_changes(config: &StressConfig) -> StressTestResult {
    let storage = Arc::new(InMemorySecurityStorage::new());
    let proxies = Arc::new(LoopbackProxyManager::new());
    let agent = Arc::new(InMemoryAgent::new(4096));
    let updater = Arc::new(
        ApplicationUpdater::new(
            UpdaterConfig::new().with_idle_timeout(config.drain_timeout),
            Arc::clone(&storage),
            Arc::clone(&proxies),
            Arc::clone(&agent),
        )
        .expect("Failed to start updater"),
    );
    storage.set_listener(updater.pending_changes_listener());

    for id in 0..config.applications {
        proxies.add(key(id), RemoteSecurityState::default());
        agent.announce(SecurityInfo::new(format!(":1.{id}"), key(id), ApplicationState::Claimed));
        storage.claim_application(key(id), default_identity(id), default_manifest());
    }

    let changes = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let storage = Arc::clone(&storage);
            let changes = Arc::clone(&changes);
            let failed = Arc::clone(&failed);
            let operations = config.operations;
            let applications = config.applications.max(1);

            thread::spawn(move || {
                for i in 0..operations {
                    let app = key((i % applications as usize) as u8);
                    let serial = (i / applications as usize % 16) as u8;
                    let result = match i % 3 {
                        0 => storage.install_membership(&app, membership_chain(serial, t as u8)),
                        1 => storage.update_policy(&app, policy((i % 7) as u32 + 1)),
                        _ => storage.remove_membership(
                            &app,
                            &Certificate::new(vec![serial], vec![t as u8]).identity(),
                        ),
                    };
                    match result {
                        Ok(()) => changes.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Writer thread panicked");
    }
    assert!(updater.wait_until_idle(), "updater did not drain in time");
    let duration = start.elapsed();

    let mut converged = 0;
    let mut diverged = Vec::new();
    for id in 0..config.applications {
        let app = agent
            .get_application(&key(id))
            .expect("Application disappeared");
        let remote = proxies
            .application(&key(id))
            .expect("Remote application disappeared")
            .state();

        let memberships = storage
            .get_membership_certificates(&app)
            .expect("Failed to read memberships");
        let policy_version = storage
            .get_policy(&app)
            .map_or(DEFAULT_POLICY_VERSION, |policy| policy.version);
        let remote_version = remote
            .policy
            .as_ref()
            .map_or(DEFAULT_POLICY_VERSION, |policy| policy.version);

        if chain_identities(&memberships) == chain_identities(&remote.memberships)
            && policy_version == remote_version
            && remote.identity == default_identity(id)
        {
            converged += 1;
        } else {
            diverged.push(key(id));
        }
    }

    StressTestResult {
        changes: changes.load(Ordering::Relaxed),
        failed_changes: failed.load(Ordering::Relaxed),
        cycles: updater.stats().cycles_completed,
        converged,
        diverged,
        duration,
    }
}
