//! A client session: one transport, one passphrase cache and at most one SASL exchange.

use std::collections::BTreeSet;
use std::fmt;
use std::io;

use sasl::common::Identity;
use sasl::{
    binding_for, Credentials, Engine, MechanismKind, SelectionPolicy, ServerMessage, Step,
};

use crate::certificate::Certificate;
use crate::socket::Socket;
use crate::tls::{PasswordCache, PasswordCallback, TlsConfig};
use crate::transport::{Transport, TransportKind};
use crate::Error;

/// When to encrypt the connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Upgrade with STARTTLS when the server offers it.
    #[default]
    StartTls,
    /// Upgrade with STARTTLS, and fail if the server does not offer it.
    Mandatory,
    /// TLS from the first byte (`xmpps`, usually port 5223).
    Legacy,
    /// Never encrypt.
    Disabled,
}

/// XMPP server connection configuration
#[derive(Clone, Debug, Default)]
pub enum ServerConfig {
    /// Use SRV record to find server host
    #[default]
    UseSrv,
    /// Manually define server host and port
    Manual {
        /// Server host name
        host: String,
        /// Server port
        port: u16,
    },
}

/// Session configuration.
#[derive(Clone)]
pub struct Config {
    /// Domain of the server, also the TLS server name.
    pub domain: String,
    /// How to find the server.
    pub server: ServerConfig,
    /// When to encrypt.
    pub tls: TlsPolicy,
    /// Trust anchors and client certificate.
    pub tls_config: TlsConfig,
    /// Mechanisms never to use.
    pub disabled_mechanisms: BTreeSet<MechanismKind>,
    /// Allow PLAIN over an unencrypted connection.
    pub allow_plain_unencrypted: bool,
    /// Prompt for the client key passphrase.
    pub password_callback: Option<PasswordCallback>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("domain", &self.domain)
            .field("server", &self.server)
            .field("tls", &self.tls)
            .field("tls_config", &self.tls_config)
            .field("disabled_mechanisms", &self.disabled_mechanisms)
            .field("allow_plain_unencrypted", &self.allow_plain_unencrypted)
            .field("password_callback", &self.password_callback.is_some())
            .finish()
    }
}

impl Config {
    /// Defaults for `domain`: SRV lookup, STARTTLS when offered, web PKI roots.
    pub fn new<D: Into<String>>(domain: D) -> Config {
        Config {
            domain: domain.into(),
            server: ServerConfig::UseSrv,
            tls: TlsPolicy::StartTls,
            tls_config: TlsConfig::default(),
            disabled_mechanisms: BTreeSet::new(),
            allow_plain_unencrypted: false,
            password_callback: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed,
}

/// The secure part of an XMPP client connection.
///
/// Owns the transport, swapping it for a TLS one on STARTTLS, and runs the SASL
/// exchange. Parsing and serializing the stream is the caller's job.
pub struct Session<S> {
    config: Config,
    transport: Transport<S>,
    passwords: PasswordCache,
    engine: Option<Engine>,
    auth: AuthState,
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("domain", &self.config.domain)
            .field("transport", &self.transport)
            .field("engine", &self.engine)
            .field("auth", &self.auth)
            .finish()
    }
}

impl<S: Socket> Session<S> {
    /// Takes over a connected socket, running the TLS handshake first under
    /// [`TlsPolicy::Legacy`].
    pub async fn new(socket: S, config: Config) -> Result<Session<S>, Error> {
        let mut passwords = PasswordCache::new(config.password_callback.clone());
        let transport = match config.tls {
            TlsPolicy::Legacy => {
                Transport::secured(socket, &config.tls_config, &config.domain, &mut passwords)
                    .await?
            }
            _ => Transport::plain(socket),
        };
        Ok(Session {
            config,
            transport,
            passwords,
            engine: None,
            auth: AuthState::Unauthenticated,
        })
    }

    /// Whether to send `<starttls/>`, given whether the server's features offer it.
    pub fn wants_starttls(&self, offered: bool) -> Result<bool, Error> {
        if self.transport.kind() != TransportKind::Plain {
            return Ok(false);
        }
        match self.config.tls {
            TlsPolicy::StartTls => Ok(offered),
            TlsPolicy::Mandatory if offered => Ok(true),
            TlsPolicy::Mandatory => Err(Error::NoTls),
            TlsPolicy::Legacy | TlsPolicy::Disabled => Ok(false),
        }
    }

    /// Runs the TLS handshake after the server's `<proceed/>`.
    pub async fn start_tls(&mut self) -> Result<(), Error> {
        if self.auth != AuthState::Unauthenticated {
            return Err(Error::InvalidState("STARTTLS after authentication started"));
        }
        self.transport
            .start_tls(
                &self.config.tls_config,
                &self.config.domain,
                &mut self.passwords,
            )
            .await
    }

    /// What the current transport and configuration allow.
    pub fn selection_policy(&self, credentials: &Credentials) -> SelectionPolicy {
        let encrypted = self.transport.is_secured();
        SelectionPolicy {
            encrypted,
            allow_plain_unencrypted: self.config.allow_plain_unencrypted,
            channel_binding: self.transport.channel_binding().is_bound(),
            // rustls does not report whether the server requested the certificate.
            client_certificate: encrypted && self.config.tls_config.has_client_cert(),
            anonymous: credentials.identity == Identity::None,
            disabled: self.config.disabled_mechanisms.clone(),
        }
    }

    /// The mechanism [`Session::auth_start`] would pick.
    pub fn select_mechanism(
        &self,
        offered: &[&str],
        credentials: &Credentials,
    ) -> Option<MechanismKind> {
        self.selection_policy(credentials)
            .select(offered.iter().copied())
    }

    /// Picks a mechanism among those `offered` and returns it with the initial response
    /// for `<auth/>`.
    pub fn auth_start(
        &mut self,
        offered: &[&str],
        mut credentials: Credentials,
    ) -> Result<(MechanismKind, Vec<u8>), Error> {
        if self.auth != AuthState::Unauthenticated {
            return Err(Error::InvalidState("authentication already started"));
        }
        let kind = self
            .select_mechanism(offered, &credentials)
            .ok_or(Error::NoMechanism)?;
        let offered_plus = offered
            .iter()
            .filter_map(|name| MechanismKind::from_name(name))
            .any(MechanismKind::is_plus);
        if credentials.domain.is_none() {
            credentials.domain = Some(self.config.domain.clone());
        }
        credentials.channel_binding =
            binding_for(kind, self.transport.channel_binding(), offered_plus);

        let started = Engine::new(kind, credentials).and_then(|mut engine| {
            let initial = engine.start()?;
            Ok((engine, initial))
        });
        match started {
            Ok((engine, initial)) => {
                self.engine = Some(engine);
                self.auth = AuthState::Authenticating;
                Ok((kind, initial))
            }
            Err(e) => {
                self.auth = AuthState::Failed;
                Err(e.into())
            }
        }
    }

    /// Feeds one server message to the running exchange.
    pub fn auth_step(&mut self, message: ServerMessage<'_>) -> Result<Step, Error> {
        let engine = self
            .engine
            .as_mut()
            .ok_or(Error::InvalidState("no authentication in progress"))?;
        match engine.step(message) {
            Ok(Step::Success) => {
                self.engine = None;
                self.auth = AuthState::Authenticated;
                Ok(Step::Success)
            }
            Ok(step) => Ok(step),
            Err(e) => {
                self.engine = None;
                self.auth = AuthState::Failed;
                Err(e.into())
            }
        }
    }

    /// Whether SASL succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.auth == AuthState::Authenticated
    }

    /// See [`Transport::read`].
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport.read(buf)
    }

    /// See [`Transport::write`].
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport.write(buf)
    }

    /// See [`Transport::pending`].
    pub fn pending(&mut self) -> usize {
        self.transport.pending()
    }

    /// See [`Transport::clear_pending_write`].
    pub fn clear_pending_write(&mut self) -> io::Result<()> {
        self.transport.clear_pending_write()
    }

    /// The transport.
    pub fn transport(&self) -> &Transport<S> {
        &self.transport
    }

    /// The server certificate, once secured.
    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.transport.peer_certificate()
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Closes the transport and forgets the cached passphrase.
    pub async fn close(&mut self) {
        self.engine = None;
        self.transport.close().await;
        self.passwords.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::MemorySocket;
    use sasl::AuthError;
    use std::path::Path;
    use std::sync::Arc;

    async fn session(config: Config) -> Session<MemorySocket> {
        Session::new(MemorySocket::new(b"", 1 << 16), config)
            .await
            .unwrap()
    }

    fn user() -> Credentials {
        Credentials::default()
            .with_username("user")
            .with_password("pencil")
    }

    #[tokio::test]
    async fn starttls_policy() {
        let mut config = Config::new("example.org");
        let s = session(config.clone()).await;
        assert!(s.wants_starttls(true).unwrap());
        assert!(!s.wants_starttls(false).unwrap());

        config.tls = TlsPolicy::Mandatory;
        let s = session(config.clone()).await;
        assert!(s.wants_starttls(true).unwrap());
        assert!(matches!(s.wants_starttls(false), Err(Error::NoTls)));

        config.tls = TlsPolicy::Disabled;
        let s = session(config).await;
        assert!(!s.wants_starttls(true).unwrap());
    }

    #[tokio::test]
    async fn no_plain_without_tls() {
        let mut s = session(Config::new("example.org")).await;
        assert_eq!(s.select_mechanism(&["PLAIN"], &user()), None);
        assert!(matches!(
            s.auth_start(&["PLAIN"], user()),
            Err(Error::NoMechanism)
        ));
        assert!(!s.is_authenticated());
    }

    #[tokio::test]
    async fn plain_exchange() {
        let mut config = Config::new("example.org");
        config.allow_plain_unencrypted = true;
        let mut s = session(config).await;

        let (kind, initial) = s.auth_start(&["PLAIN"], user()).unwrap();
        assert_eq!(kind, MechanismKind::Plain);
        assert_eq!(initial, b"\0user\0pencil");
        assert_eq!(s.auth_step(ServerMessage::Success(None)).unwrap(), Step::Success);
        assert!(s.is_authenticated());

        assert!(matches!(s.start_tls().await, Err(Error::InvalidState(_))));
        assert!(matches!(
            s.auth_step(ServerMessage::Success(None)),
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn scram_over_plain_does_not_bind() {
        let mut s = session(Config::new("example.org")).await;
        let offered = ["PLAIN", "SCRAM-SHA-1", "SCRAM-SHA-256", "SCRAM-SHA-256-PLUS"];
        let (kind, initial) = s.auth_start(&offered, user()).unwrap();
        assert_eq!(kind, MechanismKind::ScramSha256);
        assert!(initial.starts_with(b"n,,n=user,r="));

        let err = s
            .auth_step(ServerMessage::Challenge(b"r=forged,s=QSXCR+Q6sek8bf92,i=4096"))
            .unwrap_err();
        match err {
            Error::Auth(e) => assert_eq!(e.reason(), "protocol"),
            e => panic!("unexpected {e}"),
        }
        assert!(!s.is_authenticated());
        assert!(matches!(
            s.auth_start(&offered, user()),
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn disabled_mechanisms_are_skipped() {
        let mut config = Config::new("example.org");
        config.disabled_mechanisms.insert(MechanismKind::ScramSha256);
        let s = session(config).await;
        assert_eq!(
            s.select_mechanism(&["SCRAM-SHA-1", "SCRAM-SHA-256"], &user()),
            Some(MechanismKind::ScramSha1)
        );
    }

    #[tokio::test]
    async fn server_failure() {
        let mut s = session(Config::new("example.org")).await;
        s.auth_start(&["DIGEST-MD5"], user()).unwrap();
        match s.auth_step(ServerMessage::Failure("not-authorized")) {
            Err(Error::Auth(AuthError::Rejected(reason))) => assert_eq!(reason, "not-authorized"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_invalidates() {
        let mut config = Config::new("example.org");
        config.password_callback = Some(Arc::new(|_, _| Some(String::from("hunter2"))));
        let mut s = session(config).await;
        let pass = s.passwords.passphrase(Path::new("client.key"), 1).unwrap();
        assert_eq!(pass.as_str(), "hunter2");
        assert!(s.passwords.is_cached());

        s.close().await;
        assert!(!s.passwords.is_cached());
        assert_eq!(s.transport().kind(), TransportKind::Closed);
        assert!(s.write(b"<presence/>").is_err());
    }
}
