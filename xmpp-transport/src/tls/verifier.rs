//! Server certificate verification.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use super::config::CertFailHandler;
use crate::certificate::Certificate;
use crate::Error;

/// WebPKI verification with an optional user override on failure.
///
/// Without roots (trust-all mode) every certificate is accepted; handshake signatures
/// are still checked.
pub(crate) struct XmppVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    handler: Option<CertFailHandler>,
    provider: Arc<CryptoProvider>,
}

impl XmppVerifier {
    pub(crate) fn new(
        roots: Option<Arc<RootCertStore>>,
        handler: Option<CertFailHandler>,
        provider: Arc<CryptoProvider>,
    ) -> Result<XmppVerifier, Error> {
        let inner = match roots {
            Some(roots) => Some(
                WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
                    .build()
                    .map_err(|e| Error::Config(e.to_string()))?,
            ),
            None => None,
        };
        Ok(XmppVerifier {
            inner,
            handler,
            provider,
        })
    }
}

impl fmt::Debug for XmppVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmppVerifier")
            .field("trust_all", &self.inner.is_none())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl ServerCertVerifier for XmppVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let Some(inner) = &self.inner else {
            return Ok(ServerCertVerified::assertion());
        };
        let err = match inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => return Ok(verified),
            Err(err) => err,
        };
        let Some(handler) = &self.handler else {
            return Err(err);
        };
        let cert = Certificate::from_der(end_entity.as_ref())
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        let reason = err.to_string();
        log::warn!(
            "Certificate verification failed for {}: {reason}",
            server_name.to_str()
        );
        if handler(&cert, &reason) {
            log::debug!("Certificate accepted by the failure handler");
            Ok(ServerCertVerified::assertion())
        } else {
            Err(err)
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Arc<CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    fn verify(verifier: &XmppVerifier, der: &CertificateDer<'_>) -> Result<(), rustls::Error> {
        let name = ServerName::try_from("example.org").unwrap();
        verifier
            .verify_server_cert(der, &[], &name, &[], UnixTime::now())
            .map(|_| ())
    }

    fn self_signed() -> CertificateDer<'static> {
        rcgen::generate_simple_self_signed(vec!["example.org".into()])
            .unwrap()
            .cert
            .der()
            .clone()
    }

    #[test]
    fn trust_all_accepts_anything() {
        let verifier = XmppVerifier::new(None, None, provider()).unwrap();
        assert!(verify(&verifier, &self_signed()).is_ok());
    }

    #[test]
    fn unknown_issuer_is_rejected() {
        let roots = Arc::new(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        });
        let verifier = XmppVerifier::new(Some(roots), None, provider()).unwrap();
        assert!(verify(&verifier, &self_signed()).is_err());
    }

    #[test]
    fn handler_decides() {
        let roots = Arc::new(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        });
        let accept: CertFailHandler = Arc::new(|cert: &Certificate, reason: &str| {
            assert_eq!(cert.dns_name(0), Some("example.org"));
            assert!(!reason.is_empty());
            true
        });
        let verifier = XmppVerifier::new(Some(roots.clone()), Some(accept), provider()).unwrap();
        assert!(verify(&verifier, &self_signed()).is_ok());

        let refuse: CertFailHandler = Arc::new(|_: &Certificate, _: &str| false);
        let verifier = XmppVerifier::new(Some(roots), Some(refuse), provider()).unwrap();
        assert!(verify(&verifier, &self_signed()).is_err());
    }

    #[test]
    fn empty_roots_are_a_config_error() {
        let roots = Arc::new(RootCertStore::empty());
        assert!(matches!(
            XmppVerifier::new(Some(roots), None, provider()),
            Err(Error::Config(_))
        ));
    }
}
