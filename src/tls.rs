//! A concrete [`TlsConnect`] built on `tokio-rustls`.
//!
//! `spec.md` §1 is explicit that this crate relies on a system-provided
//! TLS library rather than implementing one; `rustls` fills that role here,
//! matching the teacher's `rustls-tls` feature group
//! (`hyper-rustls`/`tokio-rustls`/`rustls`/`webpki-roots`).

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::TlsConnector as InnerConnector;

use crate::error::{Error, Result};
use crate::stream::{BoxStream, TlsConnect};

/// ALPN protocol identifier for HTTP/1.1.
pub const ALPN_HTTP1: &[u8] = b"http/1.1";
/// ALPN protocol identifier for HTTP/2 (advertised only; the H2 path itself
/// is an external adapter per `spec.md` §1).
pub const ALPN_H2: &[u8] = b"h2";

/// A [`TlsConnect`] implementation backed by `rustls`.
pub struct RustlsConnector {
    verifying: Arc<rustls::ClientConfig>,
    non_verifying: Arc<rustls::ClientConfig>,
}

impl RustlsConnector {
    /// Builds a connector trusting the platform's webpki roots, with ALPN
    /// advertising `http/1.1` only or `h2,http/1.1` depending on `http2`.
    pub fn new(http2: bool) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut verifying = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let mut non_verifying = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify))
            .with_no_client_auth();

        let alpn: Vec<Vec<u8>> = if http2 {
            vec![ALPN_H2.to_vec(), ALPN_HTTP1.to_vec()]
        } else {
            vec![ALPN_HTTP1.to_vec()]
        };
        verifying.alpn_protocols = alpn.clone();
        non_verifying.alpn_protocols = alpn;

        Self {
            verifying: Arc::new(verifying),
            non_verifying: Arc::new(non_verifying),
        }
    }
}

impl TlsConnect for RustlsConnector {
    fn connect<'a>(
        &'a self,
        server_name: &'a str,
        stream: BoxStream,
        verify: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<BoxStream>> + Send + 'a>> {
        Box::pin(async move {
            let config = if verify {
                self.verifying.clone()
            } else {
                self.non_verifying.clone()
            };
            let connector = InnerConnector::from(config);
            let name = ServerName::try_from(server_name.to_owned())
                .map_err(|e| Error::tls_failed(e))?;
            let tls_stream = connector
                .connect(name, stream)
                .await
                .map_err(Error::tls_failed)?;
            Ok(BoxStream::new(tls_stream))
        })
    }
}

/// Disables certificate verification entirely, used when a caller sets
/// `verify_ssl=false` (`spec.md` §4.3). Never the default.
#[derive(Debug)]
struct NoVerify;

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
