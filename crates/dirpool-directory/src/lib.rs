//! Dirpool Directory Library
//!
//! A fixed-capacity pool of LDAPS connections, each one validated by a
//! [`dirpool_tls::TrustPolicy`] and bound with a single service identity,
//! plus the attribute operations run over borrowed connections.
//!
//! ```no_run
//! # async fn run(config: dirpool_core::DirpoolConfig) -> dirpool_core::Result<()> {
//! use dirpool_directory::DirectoryPool;
//!
//! let pool = DirectoryPool::open(&config).await?;
//! let mut conn = pool.borrow().await?;
//! let dn = pool.lookup_user_dn(&mut conn, "jdoe", "dc=example,dc=com").await?;
//! pool.replace_attribute(&mut conn, &dn, "description", "contractor").await?;
//! pool.release(conn).await;
//! pool.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod ldap;
pub mod manager;
mod operations;
pub mod pool;
pub mod session;

#[cfg(test)]
mod memory;

pub use ldap::{LdapConnector, LdapSession};
pub use manager::ConnectionState;
pub use pool::{DirectoryConnection, DirectoryPool, PoolStatus};
pub use session::{Connector, DirectorySession};
