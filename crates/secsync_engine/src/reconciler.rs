//! Membership set reconciliation and the policy decision.
//!
//! Memberships are matched on the identity of the leaf certificate:
//! (serial, issuer authority key id), compared byte for byte. Content is
//! not compared, so a renewed certificate that keeps its serial and issuer
//! is seen as the same membership and is not replaced.
//!
//! Policies are compared by version only.

use secsync_core::{
    MembershipCertificateChain, MembershipSummary, PermissionPolicy, DEFAULT_POLICY_VERSION,
};

/// Changes needed to make a remote membership set match the local one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// Local chains not installed remotely.
    pub to_install: Vec<MembershipCertificateChain>,
    /// Remote memberships absent locally.
    pub to_remove: Vec<MembershipSummary>,
}

impl MembershipDiff {
    /// Returns true if the sets already match.
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty()
    }
}

/// Computes the installs and removals that reconcile `remote` with `local`.
///
/// Both outputs keep input order. A local chain without certificates has
/// no identity and is skipped. Sets are small (one entry per security
/// group), so the quadratic scan is fine.
pub fn reconcile_memberships(
    local: &[MembershipCertificateChain],
    remote: &[MembershipSummary],
) -> MembershipDiff {
    let to_install = local
        .iter()
        .filter(|chain| !chain.is_empty())
        .filter(|chain| !remote.iter().any(|summary| chain.matches_summary(summary)))
        .cloned()
        .collect();

    let to_remove = remote
        .iter()
        .filter(|summary| !local.iter().any(|chain| chain.matches_summary(summary)))
        .cloned()
        .collect();

    MembershipDiff {
        to_install,
        to_remove,
    }
}

/// The policy call that brings the remote application in line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction<'a> {
    /// The installed policy already matches.
    Keep,
    /// Restore the default policy.
    Reset,
    /// Install this policy.
    Update(&'a PermissionPolicy),
}

impl<'a> PolicyAction<'a> {
    /// Decides the policy call from the desired policy (`None` for the
    /// default) and the installed version.
    pub fn plan(desired: Option<&'a PermissionPolicy>, remote_version: u32) -> Self {
        match desired {
            None if remote_version != DEFAULT_POLICY_VERSION => Self::Reset,
            Some(policy) if policy.version != remote_version => Self::Update(policy),
            _ => Self::Keep,
        }
    }

    /// Returns true if a mutating call is needed.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Keep)
    }
}
