//! Diff command implementation.
//!
//! Predicts the remote calls an update cycle would make for each
//! application without running one.

use crate::scenario::{Scenario, ScenarioApplication};
use secsync_core::{
    ApplicationState, CertificateIdentity, MembershipSummary, DEFAULT_POLICY_VERSION,
};
use secsync_engine::{reconcile_memberships, PolicyAction};
use serde::Serialize;
use std::path::Path;

/// What a cycle would do with an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    /// Storage does not manage the application.
    NotManaged,
    /// The application is reset and forgotten.
    Reset,
    /// The application is brought in line with storage.
    Update,
    /// The application is in a state that cannot be updated.
    UnexpectedState,
}

/// Policy phase outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyChange {
    /// Installed policy already matches.
    Keep,
    /// The default policy is restored.
    Reset,
    /// A new policy version is installed.
    Update {
        /// Version installed.
        version: u32,
    },
}

impl From<PolicyAction<'_>> for PolicyChange {
    fn from(action: PolicyAction<'_>) -> Self {
        match action {
            PolicyAction::Keep => Self::Keep,
            PolicyAction::Reset => Self::Reset,
            PolicyAction::Update(policy) => Self::Update {
                version: policy.version,
            },
        }
    }
}

/// Planned changes for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationDiff {
    /// Bus name.
    pub bus_name: String,
    /// Key identity.
    pub key: String,
    /// Overall action.
    pub action: PlannedAction,
    /// The remote application receives a reset call.
    pub remote_reset: bool,
    /// Memberships to install, by leaf identity.
    pub install: Vec<CertificateIdentity>,
    /// Memberships to remove.
    pub remove: Vec<MembershipSummary>,
    /// The identity chain and manifest are replaced.
    pub update_identity: bool,
    /// Policy change.
    pub policy: PolicyChange,
    /// Template rules the application asks for beyond its manifest.
    pub requested_rules: usize,
}

impl ApplicationDiff {
    fn new(app: &ScenarioApplication, action: PlannedAction) -> Self {
        Self {
            bus_name: app.bus_name.clone(),
            key: app.key_info.to_string(),
            action,
            remote_reset: false,
            install: Vec::new(),
            remove: Vec::new(),
            update_identity: false,
            policy: PolicyChange::Keep,
            requested_rules: 0,
        }
    }

    /// Returns the number of mutating calls the cycle would make.
    pub fn mutating_calls(&self) -> usize {
        let reset = usize::from(self.remote_reset);
        let policy = usize::from(self.policy != PolicyChange::Keep);
        reset + self.install.len() + self.remove.len() + usize::from(self.update_identity) + policy
    }
}

/// Computes the planned changes for every application in the scenario.
pub fn compute(scenario: &Scenario) -> Vec<ApplicationDiff> {
    scenario.applications.iter().map(plan).collect()
}

fn plan(app: &ScenarioApplication) -> ApplicationDiff {
    let Some(desired) = &app.desired else {
        return ApplicationDiff::new(app, PlannedAction::NotManaged);
    };

    if desired.remove {
        let mut diff = ApplicationDiff::new(app, PlannedAction::Reset);
        // Unclaimed applications are already reset.
        diff.remote_reset = app.state.is_claimed();
        return diff;
    }
    if !app.state.is_claimed() {
        return ApplicationDiff::new(app, PlannedAction::UnexpectedState);
    }

    let mut diff = ApplicationDiff::new(app, PlannedAction::Update);
    let remote = &app.remote;

    let summaries: Vec<_> = remote
        .memberships
        .iter()
        .filter_map(MembershipSummary::for_chain)
        .collect();
    let memberships = reconcile_memberships(&desired.memberships, &summaries);
    diff.install = memberships
        .to_install
        .iter()
        .filter_map(|chain| chain.leaf_identity())
        .collect();
    diff.remove = memberships.to_remove;

    diff.update_identity = !desired.identity.same_identity_as(&remote.identity);
    if app.state == ApplicationState::NeedsUpdate {
        diff.requested_rules = desired
            .manifest
            .additional_rules(&remote.manifest_template)
            .len();
    }

    let remote_version = remote
        .policy
        .as_ref()
        .map_or(DEFAULT_POLICY_VERSION, |policy| policy.version);
    diff.policy = PolicyAction::plan(desired.policy.as_ref(), remote_version).into();
    diff
}

/// Runs the diff command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = Scenario::load(path)?;
    let diffs = compute(&scenario);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&diffs)?);
        }
        _ => {
            print_text_output(&diffs);
        }
    }

    Ok(())
}

fn print_text_output(diffs: &[ApplicationDiff]) {
    println!("Planned Changes");
    println!("===============");
    for diff in diffs {
        println!();
        println!("{} ({})", diff.bus_name, diff.key);
        println!("  Action:     {:?}", diff.action);
        if diff.remote_reset {
            println!("  Reset:      remote configuration cleared");
        }
        if diff.action != PlannedAction::Update {
            continue;
        }
        for identity in &diff.install {
            println!(
                "  Install:    serial {} issuer {}",
                hex(&identity.serial),
                hex(&identity.issuer_key_id)
            );
        }
        for summary in &diff.remove {
            println!(
                "  Remove:     serial {} issuer {}",
                hex(&summary.serial),
                summary.issuer
            );
        }
        if diff.update_identity {
            println!("  Identity:   replace chain and manifest");
        }
        match &diff.policy {
            PolicyChange::Keep => {}
            PolicyChange::Reset => println!("  Policy:     reset to default"),
            PolicyChange::Update { version } => println!("  Policy:     install version {version}"),
        }
        if diff.requested_rules > 0 {
            println!("  Manifest:   {} additional rules requested", diff.requested_rules);
        }
        println!("  Calls:      {}", diff.mutating_calls());
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
