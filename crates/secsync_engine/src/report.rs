//! Outcome records handed to the security agent.

use crate::error::SyncError;
use secsync_core::{
    IdentityCertificateChain, Manifest, MembershipCertificateChain, MembershipSummary,
    OnlineApplication, PermissionPolicy, Rule,
};
use std::fmt;

/// Phase or category a sync failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorType {
    /// Reading or closing the storage transaction failed.
    Storage,
    /// Connecting to or reading from the remote application failed.
    Remote,
    /// Resetting the remote application failed.
    Reset,
    /// Installing or removing a membership failed.
    Membership,
    /// Updating the identity failed.
    Identity,
    /// Updating or resetting the policy failed.
    Policy,
    /// The application was in a state incompatible with the update.
    UnexpectedState,
}

impl fmt::Display for SyncErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncErrorType::Storage => "SYNC_ER_STORAGE",
            SyncErrorType::Remote => "SYNC_ER_REMOTE",
            SyncErrorType::Reset => "SYNC_ER_RESET",
            SyncErrorType::Membership => "SYNC_ER_MEMBERSHIP",
            SyncErrorType::Identity => "SYNC_ER_IDENTITY",
            SyncErrorType::Policy => "SYNC_ER_POLICY",
            SyncErrorType::UnexpectedState => "SYNC_ER_UNEXPECTED_STATE",
        };
        f.write_str(name)
    }
}

/// The object an operation was working on when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorContext {
    /// Membership being installed.
    MembershipChain(MembershipCertificateChain),
    /// Membership being removed.
    MembershipSummary(MembershipSummary),
    /// Identity chain being installed.
    Identity(IdentityCertificateChain),
    /// Policy being installed. `None` when restoring the default policy.
    Policy(Option<PermissionPolicy>),
}

/// A failed synchronization of one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncErrorReport {
    /// The application being synchronized.
    pub app: OnlineApplication,
    /// Failing phase.
    pub error_type: SyncErrorType,
    /// Underlying error.
    pub error: SyncError,
    /// Object involved in the failing operation, if any.
    pub context: Option<ErrorContext>,
}

impl SyncErrorReport {
    /// Creates a report without context.
    pub fn new(app: OnlineApplication, error_type: SyncErrorType, error: SyncError) -> Self {
        Self {
            app,
            error_type,
            error,
            context: None,
        }
    }

    /// Attaches the object involved in the failure.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl fmt::Display for SyncErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyncError >> busName: {} type: {} status: {}",
            self.app.bus_name, self.error_type, self.error
        )
    }
}

/// An application asks for more permissions than its manifest grants.
///
/// Informational; a higher layer decides whether the new template needs
/// approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestUpdateNotice {
    /// The application.
    pub app: OnlineApplication,
    /// Manifest currently granted.
    pub manifest: Manifest,
    /// Template the application now declares.
    pub template: Manifest,
    /// Template rules the granted manifest does not cover.
    pub additional_rules: Vec<Rule>,
}

impl ManifestUpdateNotice {
    /// Builds a notice comparing the granted manifest with a template.
    pub fn new(app: OnlineApplication, manifest: Manifest, template: Manifest) -> Self {
        let additional_rules = manifest.additional_rules(&template);
        Self {
            app,
            manifest,
            template,
            additional_rules,
        }
    }
}

impl fmt::Display for ManifestUpdateNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ManifestUpdate >> {} requested {} additional rules",
            self.app.bus_name,
            self.additional_rules.len()
        )
    }
}

/// Anything the updater reports to the security agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A synchronization failed.
    SyncError(SyncErrorReport),
    /// An application requests a new manifest.
    ManifestUpdate(ManifestUpdateNotice),
}

impl Notification {
    /// Returns the error report, if this is one.
    pub fn as_sync_error(&self) -> Option<&SyncErrorReport> {
        match self {
            Notification::SyncError(report) => Some(report),
            Notification::ManifestUpdate(_) => None,
        }
    }

    /// Returns the manifest notice, if this is one.
    pub fn as_manifest_update(&self) -> Option<&ManifestUpdateNotice> {
        match self {
            Notification::ManifestUpdate(notice) => Some(notice),
            Notification::SyncError(_) => None,
        }
    }
}

impl From<SyncErrorReport> for Notification {
    fn from(report: SyncErrorReport) -> Self {
        Notification::SyncError(report)
    }
}

impl From<ManifestUpdateNotice> for Notification {
    fn from(notice: ManifestUpdateNotice) -> Self {
        Notification::ManifestUpdate(notice)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::SyncError(report) => fmt::Display::fmt(report, f),
            Notification::ManifestUpdate(notice) => fmt::Display::fmt(notice, f),
        }
    }
}
