//! Dirpool Core Library
//!
//! Configuration, error taxonomy and shared value types for the Dirpool
//! directory connection pool.

pub mod config;
pub mod error;
pub mod types;

pub use config::DirpoolConfig;
pub use error::{BatchError, Error, Result};
pub use types::{AttributeMutation, ModificationKind, RootDse};

/// Dirpool version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default LDAPS port
pub const DEFAULT_LDAPS_PORT: u16 = 636;

/// Default plain LDAP port (only used together with STARTTLS)
pub const DEFAULT_LDAP_PORT: u16 = 389;

/// Attribute used to identify users when no other is configured
pub const DEFAULT_LOOKUP_ATTRIBUTE: &str = "uid";
