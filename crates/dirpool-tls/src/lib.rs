//! Certificate trust for Dirpool directory connections
//!
//! Provides the TLS client configuration used for every pooled connection:
//! - Trust anchors from a PKCS#12 or PEM trust store
//! - Platform default roots, accepted alongside the trust store
//! - Strict hostname verification, checked after chain validation

mod store;
mod verifier;

pub use store::{anchors_from, load_platform_roots, load_trust_store};
pub use verifier::{ComposedVerifier, TrustSource};

use dirpool_core::config::{TrustConfig, TrustStoreFormat};
use dirpool_core::{Error, Result};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Immutable trust decision for directory connections
#[derive(Debug)]
pub struct TrustPolicy {
    store_path: PathBuf,
    store_format: TrustStoreFormat,
    include_platform_roots: bool,
    enforce_hostname: bool,
    store_anchors: Arc<RootCertStore>,
    platform_anchors: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl TrustPolicy {
    /// Load the trust store once and capture the verification settings.
    pub fn load(
        store_path: &Path,
        passphrase: &str,
        store_format: TrustStoreFormat,
        include_platform_roots: bool,
        enforce_hostname: bool,
    ) -> Result<Self> {
        let certs = load_trust_store(store_path, passphrase, store_format)?;
        let store_anchors = anchors_from(certs)?;

        let platform_anchors = if include_platform_roots {
            load_platform_roots()
        } else {
            RootCertStore::empty()
        };

        info!(
            "Trust policy: {} anchor(s) from {:?}, {} platform root(s), hostname enforcement {}",
            store_anchors.len(),
            store_path,
            platform_anchors.len(),
            if enforce_hostname { "on" } else { "off" }
        );

        Ok(Self {
            store_path: store_path.to_path_buf(),
            store_format,
            include_platform_roots,
            enforce_hostname,
            store_anchors: Arc::new(store_anchors),
            platform_anchors: Arc::new(platform_anchors),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        })
    }

    pub fn from_config(config: &TrustConfig) -> Result<Self> {
        Self::load(
            &config.store_path,
            &config.store_passphrase,
            config.store_format,
            config.include_platform_roots,
            config.enforce_hostname,
        )
    }

    /// PKCS#12 trust store plus platform roots, consumed straight into a client configuration.
    pub fn build_socket_factory(
        trust_store_path: &Path,
        trust_store_passphrase: &str,
        enforce_hostname_match: bool,
    ) -> Result<Arc<ClientConfig>> {
        Self::load(
            trust_store_path,
            trust_store_passphrase,
            TrustStoreFormat::Pkcs12,
            true,
            enforce_hostname_match,
        )?
        .into_socket_factory()
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn store_format(&self) -> TrustStoreFormat {
        self.store_format
    }

    pub fn includes_platform_roots(&self) -> bool {
        self.include_platform_roots
    }

    pub fn enforces_hostname(&self) -> bool {
        self.enforce_hostname
    }

    /// Number of anchors read from the trust store
    pub fn trust_store_len(&self) -> usize {
        self.store_anchors.len()
    }

    pub fn verifier(&self) -> Arc<ComposedVerifier> {
        let verifier = ComposedVerifier::new(
            self.provider.signature_verification_algorithms,
            self.enforce_hostname,
        )
        .with_anchors(TrustSource::TrustStore, self.store_anchors.clone())
        .with_anchors(TrustSource::Platform, self.platform_anchors.clone());

        Arc::new(verifier)
    }

    /// Build the client configuration handed to every directory connection.
    pub fn into_socket_factory(self) -> Result<Arc<ClientConfig>> {
        let verifier = self.verifier();

        let config = ClientConfig::builder_with_provider(self.provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Configuration(format!("TLS config error: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(Arc::new(config))
    }
}
