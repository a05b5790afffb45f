//! Property-based test generators using proptest.
//!
//! Identities are drawn from small domains so that generated local and
//! remote sets overlap often.

use crate::fixtures::{identity_chain, membership_chain, membership_summary};
use proptest::prelude::*;
use secsync_core::{
    IdentityCertificateChain, MembershipCertificateChain, MembershipSummary, PermissionPolicy,
};
use std::collections::BTreeSet;

/// Strategy for a membership identity: (leaf serial, issuer AKI).
pub fn membership_identity_strategy() -> impl Strategy<Value = (u8, u8)> {
    (0u8..8, 0u8..4)
}

/// Strategy for a set of membership chains with distinct identities.
pub fn local_memberships_strategy() -> impl Strategy<Value = Vec<MembershipCertificateChain>> {
    prop::collection::btree_set(membership_identity_strategy(), 0..8).prop_map(|ids| {
        ids.into_iter()
            .map(|(serial, aki)| membership_chain(serial, aki))
            .collect()
    })
}

/// Strategy for a set of remote membership summaries with distinct identities.
pub fn remote_memberships_strategy() -> impl Strategy<Value = Vec<MembershipSummary>> {
    prop::collection::btree_set(membership_identity_strategy(), 0..8).prop_map(|ids| {
        ids.into_iter()
            .map(|(serial, aki)| membership_summary(serial, aki))
            .collect()
    })
}

/// Strategy for an identity chain of up to four certificates.
pub fn identity_chain_strategy() -> impl Strategy<Value = IdentityCertificateChain> {
    prop::collection::vec((0u8..4, 0u8..4), 0..4).prop_map(|pairs| identity_chain(&pairs))
}

/// Strategy for an optional desired policy.
pub fn policy_strategy() -> impl Strategy<Value = Option<PermissionPolicy>> {
    prop::option::of((0u32..6).prop_map(PermissionPolicy::new))
}

/// Strategy for an installed policy version, 0 being the default policy.
pub fn policy_version_strategy() -> impl Strategy<Value = u32> {
    0u32..6
}

/// Returns the (serial, AKI) identities of membership chains.
pub fn chain_identities(chains: &[MembershipCertificateChain]) -> BTreeSet<(Vec<u8>, Vec<u8>)> {
    chains
        .iter()
        .filter_map(|chain| chain.leaf_identity())
        .map(|id| (id.serial, id.issuer_key_id))
        .collect()
}

/// Returns the (serial, AKI) identities of membership summaries.
pub fn summary_identities(summaries: &[MembershipSummary]) -> BTreeSet<(Vec<u8>, Vec<u8>)> {
    summaries
        .iter()
        .map(|s| (s.serial.clone(), s.issuer.key_id.clone()))
        .collect()
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn local_identities_are_distinct(chains in local_memberships_strategy()) {
            prop_assert_eq!(chain_identities(&chains).len(), chains.len());
        }

        #[test]
        fn remote_identities_are_distinct(summaries in remote_memberships_strategy()) {
            prop_assert_eq!(summary_identities(&summaries).len(), summaries.len());
        }

        #[test]
        fn identity_chain_length(chain in identity_chain_strategy()) {
            prop_assert!(chain.len() < 4);
        }
    }
}
