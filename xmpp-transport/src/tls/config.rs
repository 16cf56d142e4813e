//! TLS credential configuration: trust anchors and client certificate.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::Item;

use super::password::{load_private_key, PasswordCache};
use super::verifier::XmppVerifier;
use crate::certificate::Certificate;
use crate::Error;

/// Decides whether to go on with a peer certificate that failed verification.
///
/// Receives the decoded certificate and the verification error text.
pub type CertFailHandler = Arc<dyn Fn(&Certificate, &str) -> bool + Send + Sync>;

/// TLS settings shared by every handshake of a session.
///
/// ```no_run
/// use xmpp_transport::TlsConfig;
///
/// let tls = TlsConfig::builder()
///     .ca_file("/etc/ssl/certs/ca-certificates.crt")
///     .client_cert("client.pem", "client.key")
///     .build()?;
/// # Ok::<(), xmpp_transport::Error>(())
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    ca_file: Option<PathBuf>,
    roots: Option<Arc<RootCertStore>>,
    client_cert: Option<(PathBuf, PathBuf)>,
    cert_fail_handler: Option<CertFailHandler>,
    password_retries: u32,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ca_file", &self.ca_file)
            .field("roots", &self.roots.as_ref().map(|r| r.len()))
            .field("client_cert", &self.client_cert)
            .field("cert_fail_handler", &self.cert_fail_handler.is_some())
            .field("password_retries", &self.password_retries)
            .finish()
    }
}

impl Default for TlsConfig {
    /// Verification against the bundled web PKI roots, no client certificate.
    fn default() -> Self {
        TlsConfig {
            ca_file: None,
            roots: Some(Arc::new(default_roots())),
            client_cert: None,
            cert_fail_handler: None,
            password_retries: 1,
        }
    }
}

impl TlsConfig {
    /// Starts a builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Whether a client certificate is configured, which makes EXTERNAL usable.
    pub fn has_client_cert(&self) -> bool {
        self.client_cert.is_some()
    }

    /// Whether server certificates go unverified.
    pub fn trusts_all(&self) -> bool {
        self.roots.is_none()
    }

    /// The trust anchor file, when one replaced the defaults.
    pub fn ca_file(&self) -> Option<&Path> {
        self.ca_file.as_deref()
    }

    /// Builds the rustls configuration for one handshake, decrypting the client key
    /// through `passwords` if needed.
    pub(crate) fn client_config(&self, passwords: &mut PasswordCache) -> Result<ClientConfig, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = XmppVerifier::new(
            self.roots.clone(),
            self.cert_fail_handler.clone(),
            provider.clone(),
        )?;
        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier));

        let config = match &self.client_cert {
            Some((cert_path, key_path)) => {
                let certs = load_certs(cert_path)?;
                let key = load_private_key(key_path, passwords, self.password_retries)?;
                builder.with_client_auth_cert(certs, key)?
            }
            None => builder.with_no_client_auth(),
        };
        Ok(config)
    }
}

/// Builder for [`TlsConfig`].
pub struct TlsConfigBuilder {
    ca_file: Option<PathBuf>,
    extra_roots: Vec<CertificateDer<'static>>,
    client_cert: Option<(PathBuf, PathBuf)>,
    trust_all: bool,
    cert_fail_handler: Option<CertFailHandler>,
    password_retries: u32,
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        TlsConfigBuilder {
            ca_file: None,
            extra_roots: Vec::new(),
            client_cert: None,
            trust_all: false,
            cert_fail_handler: None,
            password_retries: 1,
        }
    }
}

impl TlsConfigBuilder {
    /// Trust the certificates of a PEM file instead of the bundled roots.
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Trust one more certificate. Any explicit trust anchor replaces the bundled roots.
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.extra_roots.push(cert);
        self
    }

    /// Authenticate with a client certificate chain and its key, both PEM files (the key
    /// may also be DER). Encrypted PKCS#8 keys are decrypted with the session's
    /// passphrase callback.
    pub fn client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some((cert.into(), key.into()));
        self
    }

    /// Accept any server certificate. Only for testing.
    pub fn trust_all(mut self, trust_all: bool) -> Self {
        self.trust_all = trust_all;
        self
    }

    /// Let `handler` decide about certificates that fail verification.
    pub fn cert_fail_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Certificate, &str) -> bool + Send + Sync + 'static,
    {
        self.cert_fail_handler = Some(Arc::new(handler));
        self
    }

    /// How many times to prompt for the client key passphrase (default 1).
    pub fn password_retries(mut self, retries: u32) -> Self {
        self.password_retries = retries;
        self
    }

    /// Loads the trust anchors.
    ///
    /// Fails if the CA file cannot be read or holds no certificate.
    pub fn build(self) -> Result<TlsConfig, Error> {
        let roots = if self.trust_all {
            None
        } else {
            let mut store = match &self.ca_file {
                Some(path) => load_ca_file(path)?,
                None if self.extra_roots.is_empty() => default_roots(),
                None => RootCertStore::empty(),
            };
            let (_, ignored) = store.add_parsable_certificates(self.extra_roots);
            if ignored > 0 {
                log::warn!("Ignored {ignored} unparsable root certificate(s)");
            }
            Some(Arc::new(store))
        };

        Ok(TlsConfig {
            ca_file: self.ca_file,
            roots,
            client_cert: self.client_cert,
            cert_fail_handler: self.cert_fail_handler,
            password_retries: self.password_retries,
        })
    }
}

fn default_roots() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
    }
}

fn load_ca_file(path: &Path) -> Result<RootCertStore, Error> {
    let data = fs::read(path).map_err(|e| {
        Error::Config(format!(
            "failed to read CA file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = io::Cursor::new(&data);
    let mut store = RootCertStore::empty();
    let mut found = 0;
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                let _ = store.add_parsable_certificates(std::iter::once(cert));
                found += 1;
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Config(format!(
                    "failed to parse CA file '{}'",
                    path.display()
                )))
            }
        }
    }
    if found == 0 || store.is_empty() {
        return Err(Error::Config(format!(
            "no valid certificate in '{}'",
            path.display()
        )));
    }
    log::debug!("Loaded {} trust anchor(s) from {}", store.len(), path.display());
    Ok(store)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let data = fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut &data[..]).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificate in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}
