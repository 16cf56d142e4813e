//! Error types of the secure session layer.

use std::error::Error as StdError;
use std::fmt;
use std::io;

#[cfg(feature = "dns")]
use hickory_resolver::{error::ResolveError, proto::error::ProtoError};
use rustls::pki_types::InvalidDnsNameError;

use crate::certificate::CertificateError;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),
    /// TLS error, including a peer certificate rejected during the handshake
    Tls(rustls::Error),
    /// The peer certificate could not be decoded
    Certificate(CertificateError),
    /// Invalid or unreadable configuration: trust store, client certificate or key
    Config(String),
    /// The operation is not allowed in the current state of the session
    InvalidState(&'static str),
    /// Authentication failed
    Auth(sasl::AuthError),
    /// None of the mechanisms offered by the server may be used
    NoMechanism,
    /// TLS is required but the server does not offer it
    NoTls,
    /// Error resolving DNS and establishing a connection
    #[cfg(feature = "dns")]
    Connection(ConnectorError),
    /// DNS label conversion error, no details available from module
    /// `idna`
    #[cfg(feature = "dns")]
    Idna,
    /// The server domain is not a valid DNS name
    DnsName(InvalidDnsNameError),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(fmt, "IO error: {}", e),
            Error::Tls(e) => write!(fmt, "TLS error: {}", e),
            Error::Certificate(e) => write!(fmt, "certificate error: {}", e),
            Error::Config(e) => write!(fmt, "configuration error: {}", e),
            Error::InvalidState(e) => write!(fmt, "invalid state: {}", e),
            Error::Auth(e) => write!(fmt, "authentication error: {}", e),
            Error::NoMechanism => write!(fmt, "no usable SASL mechanism offered"),
            Error::NoTls => write!(fmt, "server does not offer TLS"),
            #[cfg(feature = "dns")]
            Error::Connection(e) => write!(fmt, "connection error: {}", e),
            #[cfg(feature = "dns")]
            Error::Idna => write!(fmt, "IDNA error"),
            Error::DnsName(e) => write!(fmt, "DNS name error: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Tls(e) => Some(e),
            Error::Certificate(e) => Some(e),
            Error::Auth(e) => Some(e),
            #[cfg(feature = "dns")]
            Error::Connection(e) => Some(e),
            Error::DnsName(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e)
    }
}

impl From<CertificateError> for Error {
    fn from(e: CertificateError) -> Self {
        Error::Certificate(e)
    }
}

impl From<sasl::AuthError> for Error {
    fn from(e: sasl::AuthError) -> Self {
        Error::Auth(e)
    }
}

impl From<InvalidDnsNameError> for Error {
    fn from(e: InvalidDnsNameError) -> Self {
        Error::DnsName(e)
    }
}

#[cfg(feature = "dns")]
impl From<ConnectorError> for Error {
    fn from(e: ConnectorError) -> Self {
        Error::Connection(e)
    }
}

/// Error establishing connection
#[cfg(feature = "dns")]
#[derive(Debug)]
pub enum ConnectorError {
    /// All attempts failed, no error available
    AllFailed,
    /// DNS protocol error
    Dns(ProtoError),
    /// DNS resolution error
    Resolve(ResolveError),
}

#[cfg(feature = "dns")]
impl StdError for ConnectorError {}

#[cfg(feature = "dns")]
impl fmt::Display for ConnectorError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::AllFailed => write!(fmt, "all connection attempts failed"),
            ConnectorError::Dns(e) => write!(fmt, "DNS protocol error: {}", e),
            ConnectorError::Resolve(e) => write!(fmt, "DNS resolution error: {}", e),
        }
    }
}

/// Whether an I/O error only means "try again later".
pub fn is_recoverable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
