//! Sync command implementation.
//!
//! Seeds an in-memory storage, simulated applications and an agent from a
//! scenario, announces every application to the updater and waits for the
//! queue to drain.

use crate::error::{CliError, CliResult};
use crate::scenario::Scenario;
use secsync_core::SyncState;
use secsync_engine::{
    ApplicationUpdater, InMemoryAgent, LoopbackProxyManager, RemoteSecurityState, UpdaterConfig,
};
use secsync_storage::InMemorySecurityStorage;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome for one application.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationOutcome {
    /// Bus name.
    pub bus_name: String,
    /// Key identity.
    pub key: String,
    /// Sync state the updater reported, if any cycle read a record.
    pub sync_state: Option<SyncState>,
    /// Storage still manages the application.
    pub managed: bool,
    /// Installed state after the run.
    pub remote: RemoteSecurityState,
}

/// Sync run result.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    /// Per-application outcome, in scenario order.
    pub applications: Vec<ApplicationOutcome>,
    /// Update cycles run.
    pub cycles: u64,
    /// Passes run.
    pub passes: u64,
    /// Passes repeated because storage changed.
    pub restarts: u64,
    /// Mutating remote calls made.
    pub mutating_calls: u64,
    /// Reports and notices delivered to the agent.
    pub notifications: Vec<String>,
    /// Notifications lost to a full channel.
    pub dropped_notifications: u64,
}

/// Runs every application in the scenario through the updater.
///
/// Returns the summary and the scenario as it stands afterwards: remote
/// states replaced by what was installed, and forgotten applications no
/// longer managed.
pub fn execute(scenario: &Scenario, config: UpdaterConfig) -> CliResult<(SyncSummary, Scenario)> {
    scenario.validate()?;

    let storage = Arc::new(InMemorySecurityStorage::new());
    let proxies = Arc::new(LoopbackProxyManager::new());
    let agent = Arc::new(InMemoryAgent::new(config.notification_capacity));
    let idle_timeout = config.idle_timeout;

    for app in &scenario.applications {
        if let Some(desired) = &app.desired {
            storage.claim_application(
                app.key_info.clone(),
                desired.identity.clone(),
                desired.manifest.clone(),
            );
            for chain in &desired.memberships {
                storage.install_membership(&app.key_info, chain.clone())?;
            }
            if let Some(policy) = &desired.policy {
                storage.update_policy(&app.key_info, policy.clone())?;
            }
            if desired.remove {
                storage.remove_application(&app.key_info)?;
            }
        }
        proxies.add(app.key_info.clone(), app.remote.clone());
        agent.announce(app.security_info());
    }

    let updater = ApplicationUpdater::new(
        config,
        Arc::clone(&storage),
        Arc::clone(&proxies),
        Arc::clone(&agent),
    )?;
    for app in &scenario.applications {
        updater.on_security_state_change(None, Some(&app.security_info()));
    }
    if !updater.wait_until_idle() {
        return Err(CliError::Timeout(idle_timeout));
    }
    updater.shutdown();
    let stats = updater.stats();

    let mut converged = scenario.clone();
    let mut applications = Vec::with_capacity(scenario.applications.len());
    for app in &mut converged.applications {
        let remote = proxies
            .application(&app.key_info)
            .map(|remote| remote.state())
            .unwrap_or_default();
        let managed = storage.get_managed_application(&app.key_info).is_ok();
        if !managed {
            app.desired = None;
        }
        app.remote = remote.clone();

        applications.push(ApplicationOutcome {
            bus_name: app.bus_name.clone(),
            key: app.key_info.to_string(),
            sync_state: agent.sync_state(&app.key_info),
            managed,
            remote,
        });
    }

    let dropped_notifications = agent.dropped_notifications();
    if dropped_notifications > 0 {
        warn!(dropped = dropped_notifications, "notifications dropped");
    }
    let summary = SyncSummary {
        applications,
        cycles: stats.cycles_completed,
        passes: stats.passes,
        restarts: stats.restarts,
        mutating_calls: stats.mutating_calls,
        notifications: agent
            .drain_notifications()
            .iter()
            .map(ToString::to_string)
            .collect(),
        dropped_notifications,
    };
    info!(
        cycles = summary.cycles,
        mutating_calls = summary.mutating_calls,
        "sync finished"
    );
    Ok((summary, converged))
}

/// Runs the sync command.
pub fn run(
    path: &Path,
    config: UpdaterConfig,
    output: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = Scenario::load(path)?;
    let (summary, converged) = execute(&scenario, config)?;

    if let Some(output) = output {
        converged.save(output)?;
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            print_text_output(&summary);
        }
    }

    Ok(())
}

fn print_text_output(summary: &SyncSummary) {
    println!("Sync Results");
    println!("============");
    println!("Cycles:          {}", summary.cycles);
    println!("Passes:          {}", summary.passes);
    println!("Restarts:        {}", summary.restarts);
    println!("Mutating calls:  {}", summary.mutating_calls);
    println!();

    for app in &summary.applications {
        let state = app
            .sync_state
            .map_or_else(|| "-".to_string(), |state| state.to_string());
        let managed = if app.managed { "managed" } else { "not managed" };
        println!("{} ({}): {} [{}]", app.bus_name, app.key, state, managed);
    }

    if !summary.notifications.is_empty() {
        println!();
        println!("Notifications:");
        for notification in &summary.notifications {
            println!("  {notification}");
        }
    }
    if summary.dropped_notifications > 0 {
        println!("  ({} dropped)", summary.dropped_notifications);
    }
}

/// Builds the updater configuration from command-line flags.
pub fn config(max_passes: Option<u32>, unbounded: bool, timeout_secs: u64) -> UpdaterConfig {
    let mut config = UpdaterConfig::new()
        .with_worker_name("secsync-cli-updater")
        .with_idle_timeout(Duration::from_secs(timeout_secs));
    if let Some(passes) = max_passes {
        config = config.with_max_passes(passes);
    }
    if unbounded {
        config = config.unbounded();
    }
    config
}
