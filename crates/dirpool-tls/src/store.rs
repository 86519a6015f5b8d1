//! Trust store loading
//!
//! Reads extra trust anchors from a PKCS#12 archive or a PEM bundle, and the
//! platform's default roots from the operating system store.

use dirpool_core::config::TrustStoreFormat;
use dirpool_core::{Error, Result};
use p12_keystore::{KeyStore, KeyStoreEntry};
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use std::path::Path;
use tracing::{debug, warn};

/// Load every certificate held by the trust store at `path`.
pub fn load_trust_store(
    path: &Path,
    passphrase: &str,
    format: TrustStoreFormat,
) -> Result<Vec<CertificateDer<'static>>> {
    let certs = match format {
        TrustStoreFormat::Pkcs12 => load_pkcs12_certs(path, passphrase)?,
        TrustStoreFormat::Pem => load_pem_certs(path)?,
    };

    if certs.is_empty() {
        return Err(Error::Configuration(format!(
            "No certificates found in trust store {:?}",
            path
        )));
    }

    debug!("Loaded {} certificate(s) from {:?}", certs.len(), path);
    Ok(certs)
}

/// Build an anchor set from trust store certificates. Every certificate must parse.
pub fn anchors_from(certs: Vec<CertificateDer<'static>>) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    for cert in certs {
        store.add(cert).map_err(|e| {
            Error::Configuration(format!("Failed to add trust anchor: {}", e))
        })?;
    }
    Ok(store)
}

/// Platform default roots. Unreadable entries are skipped with a warning.
pub fn load_platform_roots() -> RootCertStore {
    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        warn!("Skipping unreadable platform certificate: {}", err);
    }

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(result.certs);
    if ignored > 0 {
        warn!("Ignored {} unparsable platform root(s)", ignored);
    }
    debug!("Loaded {} platform root(s)", added);

    store
}

fn load_pkcs12_certs(path: &Path, passphrase: &str) -> Result<Vec<CertificateDer<'static>>> {
    let data = std::fs::read(path).map_err(|e| {
        Error::Configuration(format!("Failed to open trust store {:?}: {}", path, e))
    })?;

    let keystore = KeyStore::from_pkcs12(&data, passphrase).map_err(|e| {
        Error::Configuration(format!("Failed to unlock trust store {:?}: {}", path, e))
    })?;

    let mut certs = Vec::new();
    for (alias, entry) in keystore.entries() {
        if let KeyStoreEntry::Certificate(cert) = entry {
            certs.push(CertificateDer::from(cert.as_der().to_vec()));
        } else if let KeyStoreEntry::PrivateKeyChain(chain) = entry {
            // Only the chain's certificates are trust material
            debug!("Using certificate chain of key entry '{}'", alias);
            certs.extend(
                chain
                    .chain()
                    .iter()
                    .map(|cert| CertificateDer::from(cert.as_der().to_vec())),
            );
        }
    }

    Ok(certs)
}

fn load_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = std::fs::read(path).map_err(|e| {
        Error::Configuration(format!("Failed to open trust store {:?}: {}", path, e))
    })?;

    // A lone DER certificate is accepted as a one-entry bundle
    if !data.is_empty() && !looks_like_pem(&data) {
        return Ok(vec![CertificateDer::from(data)]);
    }

    rustls_pemfile::certs(&mut data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Configuration(format!("Failed to parse certificates: {}", e)))
}

fn looks_like_pem(data: &[u8]) -> bool {
    data.windows(b"-----BEGIN".len()).any(|w| w == b"-----BEGIN")
}
