//! Provides the SASL "EXTERNAL" mechanism, authenticating with the TLS client certificate.

use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

/// A struct for the SASL EXTERNAL mechanism.
#[derive(Debug, Default)]
pub struct External {
    authzid: Option<String>,
}

impl External {
    /// Constructs a new EXTERNAL mechanism, optionally requesting an authorization identity.
    pub fn new(authzid: Option<String>) -> External {
        External { authzid }
    }
}

impl Mechanism for External {
    fn name(&self) -> &str {
        "EXTERNAL"
    }

    fn from_credentials(credentials: Credentials) -> Result<External, MechanismError> {
        Ok(External::new(credentials.authzid))
    }

    fn initial(&mut self) -> Vec<u8> {
        self.authzid
            .as_ref()
            .map(|authzid| authzid.as_bytes().to_vec())
            .unwrap_or_default()
    }
}
