//! Configuration for Dirpool

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirpoolConfig {
    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub trust: TrustConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DirpoolConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `DIRPOOL_*` environment variables onto this configuration
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("DIRPOOL_HOST") {
            self.directory.host = host;
        }
        if let Ok(port) = std::env::var("DIRPOOL_PORT") {
            if let Ok(p) = port.parse() {
                self.directory.port = p;
            }
        }
        if let Ok(dn) = std::env::var("DIRPOOL_BIND_DN") {
            self.directory.bind_dn = dn;
        }
        if let Ok(secret) = std::env::var("DIRPOOL_BIND_SECRET") {
            self.directory.bind_secret = secret;
        }
        if let Ok(path) = std::env::var("DIRPOOL_TRUST_STORE") {
            self.trust.store_path = PathBuf::from(path);
        }
        if let Ok(pass) = std::env::var("DIRPOOL_TRUST_STORE_PASSPHRASE") {
            self.trust.store_passphrase = pass;
        }
        if let Ok(capacity) = std::env::var("DIRPOOL_POOL_CAPACITY") {
            if let Ok(c) = capacity.parse() {
                self.pool.capacity = c;
            }
        }
        if let Ok(level) = std::env::var("DIRPOOL_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.directory.validate()?;
        self.trust.validate()?;
        self.pool.validate()
    }
}

/// Target server and bind identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Use STARTTLS on a plain `ldap://` connection instead of LDAPS
    #[serde(default)]
    pub start_tls: bool,

    /// Example: "cn=admin,dc=example,dc=com"
    pub bind_dn: String,

    pub bind_secret: String,

    /// Attribute matched against the username in user lookups
    #[serde(default = "default_lookup_attribute")]
    pub lookup_attribute: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

fn default_port() -> u16 {
    crate::DEFAULT_LDAPS_PORT
}

fn default_lookup_attribute() -> String {
    crate::DEFAULT_LOOKUP_ATTRIBUTE.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_operation_timeout() -> u64 {
    30
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            start_tls: false,
            bind_dn: String::new(),
            bind_secret: String::new(),
            lookup_attribute: default_lookup_attribute(),
            connect_timeout_secs: default_connect_timeout(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl DirectoryConfig {
    /// Server URL. Always a TLS-protected scheme or STARTTLS upgrade.
    pub fn url(&self) -> String {
        if self.start_tls {
            format!("ldap://{}:{}", self.host, self.port)
        } else {
            format!("ldaps://{}:{}", self.host, self.port)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Configuration("Directory host is required".into()));
        }
        if self.port == 0 {
            return Err(Error::Configuration("Directory port must be non-zero".into()));
        }
        if self.bind_dn.is_empty() {
            return Err(Error::Configuration("Bind DN is required".into()));
        }
        if self.lookup_attribute.is_empty() {
            return Err(Error::Configuration("Lookup attribute is required".into()));
        }
        if self.connect_timeout_secs == 0 || self.operation_timeout_secs == 0 {
            return Err(Error::Configuration("Timeouts must be at least one second".into()));
        }
        Ok(())
    }
}

/// Trust store and certificate checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Path to the trust store holding extra trust anchors
    pub store_path: PathBuf,

    #[serde(default)]
    pub store_passphrase: String,

    #[serde(default)]
    pub store_format: TrustStoreFormat,

    /// Also accept chains ending at the platform's trusted roots
    #[serde(default = "default_true")]
    pub include_platform_roots: bool,

    /// Reject certificates whose subject does not match the host
    #[serde(default = "default_true")]
    pub enforce_hostname: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::new(),
            store_passphrase: String::new(),
            store_format: TrustStoreFormat::default(),
            include_platform_roots: true,
            enforce_hostname: true,
        }
    }
}

impl TrustConfig {
    pub fn validate(&self) -> Result<()> {
        if self.store_path.as_os_str().is_empty() {
            return Err(Error::Configuration("Trust store path is required".into()));
        }
        if !self.store_path.exists() {
            return Err(Error::Configuration(format!(
                "Trust store not found: {:?}",
                self.store_path
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStoreFormat {
    /// PKCS#12 archive unlocked with the passphrase.
    ///
    /// Entries must be trusted certificates, as written by `keytool` or by
    /// `openssl pkcs12 -export -nokeys -jdktrust anyExtendedKeyUsage`. A
    /// plain `openssl pkcs12 -export -nokeys` archive loads with no anchors.
    #[default]
    Pkcs12,
    /// PEM bundle of certificates; the passphrase is ignored
    Pem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Open every connection up front instead of on first demand
    #[serde(default = "default_true")]
    pub prefill: bool,

    /// How long `borrow` waits for a free connection
    #[serde(default = "default_borrow_timeout")]
    pub borrow_timeout_secs: u64,
}

fn default_capacity() -> usize {
    10
}

fn default_borrow_timeout() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            prefill: true,
            borrow_timeout_secs: default_borrow_timeout(),
        }
    }
}

impl PoolConfig {
    pub fn borrow_timeout(&self) -> Duration {
        Duration::from_secs(self.borrow_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Configuration("Pool capacity must be at least 1".into()));
        }
        if self.borrow_timeout_secs == 0 {
            return Err(Error::Configuration("Borrow timeout must be at least one second".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
