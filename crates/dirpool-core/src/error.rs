//! Error types for Dirpool

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

// LDAP result codes (RFC 4511, appendix A) that get their own error kind
pub const RC_SUCCESS: u32 = 0;
pub const RC_PROTOCOL_ERROR: u32 = 2;
pub const RC_NO_SUCH_OBJECT: u32 = 32;
pub const RC_INAPPROPRIATE_AUTHENTICATION: u32 = 48;
pub const RC_INVALID_CREDENTIALS: u32 = 49;
pub const RC_INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;

#[derive(Error, Debug)]
pub enum Error {
    // Setup Errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Transport Errors
    #[error("Connection error during {operation}: {message}")]
    Connection { operation: String, message: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    // Directory Errors
    #[error("Bind rejected for {bind_dn} (result code {code}): {message}")]
    Authentication {
        bind_dn: String,
        code: u32,
        message: String,
    },

    #[error("{operation} on {dn}: entry not found: {message}")]
    NotFound {
        operation: String,
        dn: String,
        message: String,
    },

    #[error("{operation} on {dn}: insufficient access rights (result code {code}): {message}")]
    Permission {
        operation: String,
        dn: String,
        code: u32,
        message: String,
    },

    #[error("{operation} on {dn} failed (result code {code}): {message}")]
    Protocol {
        operation: String,
        dn: String,
        code: u32,
        message: String,
    },

    #[error(transparent)]
    Batch(#[from] BatchError),

    // Pool Errors
    #[error("The connection pool has been shut down")]
    PoolClosed,

    #[error("Cannot shut down: {0} connection(s) still borrowed")]
    OutstandingBorrows(usize),
}

/// Partial-commit report for a non-transactional batch of replacements.
#[derive(Error, Debug)]
#[error(
    "Batch update of {dn} stopped at '{failed_attribute}' \
     (committed: {committed:?}, not attempted: {not_attempted:?}): {source}"
)]
pub struct BatchError {
    pub dn: String,
    /// Attributes replaced before the failure, in request order
    pub committed: Vec<String>,
    pub failed_attribute: String,
    /// Attributes after the failing one, never sent to the server
    pub not_attempted: Vec<String>,
    pub source: Box<Error>,
}

impl Error {
    /// Map a non-zero LDAP result code to the matching error kind.
    pub fn from_result_code(
        operation: impl Into<String>,
        dn: impl Into<String>,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        let dn = dn.into();
        let message = message.into();

        match code {
            RC_NO_SUCH_OBJECT => Error::NotFound {
                operation,
                dn,
                message,
            },
            RC_INSUFFICIENT_ACCESS_RIGHTS => Error::Permission {
                operation,
                dn,
                code,
                message,
            },
            RC_INAPPROPRIATE_AUTHENTICATION | RC_INVALID_CREDENTIALS => Error::Authentication {
                bind_dn: dn,
                code,
                message,
            },
            _ => Error::Protocol {
                operation,
                dn,
                code,
                message,
            },
        }
    }

    pub fn connection(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connection {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::Connection { .. } => "ConnectionError",
            Error::Tls(_) => "TLSError",
            Error::Timeout { .. } => "TimeoutError",
            Error::Authentication { .. } => "AuthenticationError",
            Error::NotFound { .. } => "NotFoundError",
            Error::Permission { .. } => "PermissionError",
            Error::Protocol { .. } => "ProtocolError",
            Error::Batch(batch) => batch.source.code(),
            Error::PoolClosed => "PoolClosed",
            Error::OutstandingBorrows(_) => "OutstandingBorrows",
        }
    }

    /// LDAP result code carried by the error, if the server produced one.
    pub fn result_code(&self) -> Option<u32> {
        match self {
            Error::NotFound { .. } => Some(RC_NO_SUCH_OBJECT),
            Error::Authentication { code, .. }
            | Error::Permission { code, .. }
            | Error::Protocol { code, .. } => Some(*code),
            Error::Batch(batch) => batch.source.result_code(),
            _ => None,
        }
    }

    /// Whether a caller may retry the same request with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Timeout { .. })
    }

    /// Whether the connection that produced this error must leave the pool.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Tls(_) | Error::Timeout { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
