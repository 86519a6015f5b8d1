//! Directory session interface
//!
//! The pool is written against these traits; the ldap3-backed implementation
//! lives in [`crate::ldap`].

use async_trait::async_trait;
use dirpool_core::{AttributeMutation, Result, RootDse};

/// One authenticated, encrypted session. Requests on a session are strictly ordered.
#[async_trait]
pub trait DirectorySession: Send + 'static {
    /// Subtree search under `base_dn` for entries where `attribute` equals `value`.
    /// DNs come back in server order.
    async fn find_by_equality(
        &mut self,
        base_dn: &str,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<String>>;

    /// Submit one modify request carrying a single mutation.
    async fn modify(&mut self, dn: &str, mutation: &AttributeMutation) -> Result<()>;

    /// Values of `attribute` on `dn`, or `None` when the entry lacks it.
    async fn read_attribute(&mut self, dn: &str, attribute: &str) -> Result<Option<Vec<String>>>;

    async fn root_dse(&mut self) -> Result<RootDse>;

    /// Whether the underlying connection is known to be gone.
    fn is_closed(&mut self) -> bool;

    /// Unbind and close. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Opens sessions that all share one server, bind identity and trust policy.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: DirectorySession;

    /// Connect, complete the TLS handshake and bind.
    async fn connect(&self) -> Result<Self::Session>;

    /// Human-readable target, used in logs
    fn target(&self) -> String;
}
