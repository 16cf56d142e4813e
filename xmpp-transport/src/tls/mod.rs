//! TLS support: configuration, passphrase cache and the session itself.

mod config;
mod password;
mod session;
mod verifier;

pub use self::config::{CertFailHandler, TlsConfig, TlsConfigBuilder};
pub use self::password::{PasswordCache, PasswordCallback};
pub use self::session::{BindingType, TlsSession, TlsState};
