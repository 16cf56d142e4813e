//! The secure session layer of an XMPP client, on Tokio.
//!
//! A [`Session`] owns the connection's [`Transport`], plain at first and upgraded to TLS
//! by STARTTLS (or TLS from the start in legacy mode), and runs the SASL exchange with
//! mechanisms from the [`sasl`] crate, feeding them channel binding data from the live
//! TLS session. Parsing the XML stream is left to the caller, which hands over decoded
//! SASL payloads and gets back the ones to send.

#![deny(unsafe_code, bare_trait_objects)]
#![deny(missing_docs)]

pub mod certificate;
#[cfg(feature = "dns")]
pub mod connect;
mod error;
pub mod session;
pub mod socket;
pub mod tls;
pub mod transport;

pub use crate::certificate::{CertElement, Certificate, CertificateError};
#[cfg(feature = "dns")]
pub use crate::connect::connect;
#[cfg(feature = "dns")]
pub use crate::error::ConnectorError;
pub use crate::error::{is_recoverable, Error};
pub use crate::session::{Config, ServerConfig, Session, TlsPolicy};
pub use crate::socket::Socket;
pub use crate::tls::{
    BindingType, PasswordCache, PasswordCallback, TlsConfig, TlsSession, TlsState,
};
pub use crate::transport::{Transport, TransportKind};

// Re-exports
pub use sasl;
