//! Remote application abstraction.

use secsync_core::{
    IdentityCertificateChain, KeyInfo, Manifest, MembershipCertificateChain,
    MembershipSummary, OnlineApplication, PermissionPolicy,
};
use thiserror::Error;

/// Result type for remote operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors returned by a remote application or the connection to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// No session is currently established with the application.
    #[error("no active session")]
    NoSession,

    /// The connection could not be set up.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote call failed.
    #[error("{operation} failed: {message}")]
    Remote {
        /// Name of the remote operation.
        operation: &'static str,
        /// Failure reported by the application.
        message: String,
    },
}

impl ProxyError {
    /// Creates a remote call failure.
    pub fn remote(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            operation,
            message: message.into(),
        }
    }

    /// Returns true if the failure only means there is no session yet.
    pub fn is_no_session(&self) -> bool {
        matches!(self, ProxyError::NoSession)
    }
}

/// A connected handle to one remote application.
///
/// Every call may block for the duration of a network round trip and
/// cannot be cancelled.
pub trait ProxyHandle {
    /// Resets the application to its unclaimed state.
    fn reset(&self) -> ProxyResult<()>;

    /// Returns the version of the installed policy.
    fn get_policy_version(&self) -> ProxyResult<u32>;

    /// Restores the default policy.
    fn reset_policy(&self) -> ProxyResult<()>;

    /// Installs a policy.
    fn update_policy(&self, policy: &PermissionPolicy) -> ProxyResult<()>;

    /// Lists the installed memberships.
    fn get_membership_summaries(&self) -> ProxyResult<Vec<MembershipSummary>>;

    /// Installs a membership certificate chain.
    fn install_membership(&self, chain: &MembershipCertificateChain) -> ProxyResult<()>;

    /// Removes the membership with the given serial and issuer.
    fn remove_membership(&self, serial: &[u8], issuer: &KeyInfo) -> ProxyResult<()>;

    /// Returns the installed identity certificate chain.
    fn get_identity(&self) -> ProxyResult<IdentityCertificateChain>;

    /// Installs an identity certificate chain with its manifest.
    fn update_identity(
        &self,
        chain: &IdentityCertificateChain,
        manifest: &Manifest,
    ) -> ProxyResult<()>;

    /// Returns the manifest template the application declares.
    fn get_manifest_template(&self) -> ProxyResult<Manifest>;
}

/// Hands out connected proxies for remote applications.
pub trait ProxyObjectManager: Send + Sync {
    /// Handle type produced by this manager.
    type Handle: ProxyHandle;

    /// Connects to the application.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NoSession`] if no session can be established
    /// right now, or another error if connecting failed.
    fn get_proxy_object(&self, app: &OnlineApplication) -> ProxyResult<Self::Handle>;
}
