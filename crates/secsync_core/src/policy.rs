//! Manifests and permission policies.

use crate::types::KeyInfo;
use serde::{Deserialize, Serialize};

/// Version reported by an application running its default policy.
///
/// Retrieving the actual default policy from a remote application is not
/// reliable, so version 0 is used as the marker for "default installed".
pub const DEFAULT_POLICY_VERSION: u32 = 0;

/// Access granted on one interface member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleMember {
    /// Member name, `*` for all members.
    pub name: String,
    /// Member type (method call, signal, property). `None` matches all.
    #[serde(default)]
    pub member_type: Option<String>,
    /// Action mask (provide, observe, modify).
    pub action_mask: u8,
}

impl RuleMember {
    /// Creates a rule member that applies to every member type.
    pub fn new(name: impl Into<String>, action_mask: u8) -> Self {
        Self {
            name: name.into(),
            member_type: None,
            action_mask,
        }
    }
}

/// A permission rule for one object path and interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// Object path, `*` for all objects.
    #[serde(default = "wildcard")]
    pub object_path: String,
    /// Interface name.
    pub interface_name: String,
    /// Member-level access.
    #[serde(default)]
    pub members: Vec<RuleMember>,
}

fn wildcard() -> String {
    "*".to_string()
}

impl Rule {
    /// Creates a rule on all objects for the given interface.
    pub fn new(interface_name: impl Into<String>, members: Vec<RuleMember>) -> Self {
        Self {
            object_path: wildcard(),
            interface_name: interface_name.into(),
            members,
        }
    }
}

/// The set of rules an application is granted, or, as a template, the
/// rules it declares it needs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    /// Rules in declaration order.
    pub rules: Vec<Rule>,
}

impl Manifest {
    /// Creates a manifest from rules.
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Returns the template rules this manifest does not already grant.
    pub fn additional_rules(&self, template: &Manifest) -> Vec<Rule> {
        template
            .rules
            .iter()
            .filter(|rule| !self.rules.contains(rule))
            .cloned()
            .collect()
    }

    /// Returns true if both manifests grant the same rules, in any order.
    pub fn same_rules(&self, other: &Manifest) -> bool {
        self.rules.len() == other.rules.len() && self.additional_rules(other).is_empty()
    }
}

/// Peers an ACL applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Peer {
    /// Any peer, authenticated or not.
    All,
    /// Any authenticated peer.
    AnyTrusted,
    /// Peers holding an identity issued by this authority.
    FromCertificateAuthority(KeyInfo),
    /// Peers holding a membership of this security group.
    WithMembership {
        /// Group authority.
        authority: KeyInfo,
        /// Group identifier.
        group_id: Vec<u8>,
    },
    /// A single peer.
    WithPublicKey(KeyInfo),
}

/// An access control list entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Acl {
    /// Peers this entry applies to.
    pub peers: Vec<Peer>,
    /// Rules granted to those peers.
    pub rules: Vec<Rule>,
}

/// A versioned permission policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionPolicy {
    /// Policy version. Staleness is decided on this number alone.
    pub version: u32,
    /// Access control lists.
    #[serde(default)]
    pub acls: Vec<Acl>,
}

impl PermissionPolicy {
    /// Creates an empty policy with the given version.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            acls: Vec::new(),
        }
    }

    /// Adds an ACL entry.
    #[must_use]
    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acls.push(acl);
        self
    }

    /// Returns true if this is the default policy marker version.
    pub fn is_default_version(&self) -> bool {
        self.version == DEFAULT_POLICY_VERSION
    }
}
