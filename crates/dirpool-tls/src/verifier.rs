//! Server certificate verifier combining several anchor sets
//!
//! A chain is accepted when it validates against ANY configured anchor set.
//! Hostname matching runs afterwards as a separate check.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, verify_server_name};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where an anchor set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustSource {
    /// Roots shipped with the operating system
    Platform,
    /// Certificates from the configured trust store
    TrustStore,
}

impl std::fmt::Display for TrustSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustSource::Platform => f.write_str("platform"),
            TrustSource::TrustStore => f.write_str("trust store"),
        }
    }
}

#[derive(Debug)]
struct AnchorSet {
    source: TrustSource,
    roots: Arc<RootCertStore>,
}

/// Verifier accepting chains from any anchor set, with optional hostname enforcement
#[derive(Debug)]
pub struct ComposedVerifier {
    anchor_sets: Vec<AnchorSet>,
    enforce_hostname: bool,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ComposedVerifier {
    pub(crate) fn new(algorithms: WebPkiSupportedAlgorithms, enforce_hostname: bool) -> Self {
        Self {
            anchor_sets: Vec::new(),
            enforce_hostname,
            algorithms,
        }
    }

    pub(crate) fn with_anchors(mut self, source: TrustSource, roots: Arc<RootCertStore>) -> Self {
        if roots.is_empty() {
            debug!("Skipping empty {} anchor set", source);
        } else {
            self.anchor_sets.push(AnchorSet { source, roots });
        }
        self
    }

    pub fn enforces_hostname(&self) -> bool {
        self.enforce_hostname
    }

    pub fn sources(&self) -> Vec<TrustSource> {
        self.anchor_sets.iter().map(|set| set.source).collect()
    }

    /// Validate the chain against each anchor set in turn, returning the one that accepted it.
    pub fn verify_chain(
        &self,
        cert: &ParsedCertificate<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<TrustSource, rustls::Error> {
        let mut first_error = None;

        for set in &self.anchor_sets {
            match verify_server_cert_signed_by_trust_anchor(
                cert,
                &set.roots,
                intermediates,
                now,
                self.algorithms.all,
            ) {
                Ok(()) => return Ok(set.source),
                Err(e) => {
                    debug!("Chain rejected by {} anchors: {}", set.source, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(first_error
            .unwrap_or(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)))
    }
}

impl ServerCertVerifier for ComposedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;

        let source = self.verify_chain(&cert, intermediates, now).map_err(|e| {
            warn!("Rejected certificate for {:?}: {}", server_name, e);
            e
        })?;

        if self.enforce_hostname {
            verify_server_name(&cert, server_name).map_err(|e| {
                warn!("Certificate is not valid for {:?}: {}", server_name, e);
                e
            })?;
        }

        debug!("Accepted certificate for {:?} via {} anchors", server_name, source);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
