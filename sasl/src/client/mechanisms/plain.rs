//! Provides the SASL "PLAIN" mechanism.

use zeroize::Zeroize;

use crate::client::{Mechanism, MechanismError};
use crate::common::{Credentials, Identity, Password, Secret};

/// A struct for the SASL PLAIN mechanism.
pub struct Plain {
    authzid: Option<String>,
    username: String,
    password: String,
}

impl Plain {
    /// Constructs a new struct for authenticating using the SASL PLAIN mechanism.
    ///
    /// It is recommended that instead you use a `Credentials` struct and turn it into the
    /// requested mechanism using `from_credentials`.
    pub fn new<N: Into<String>, P: Into<String>>(username: N, password: P) -> Plain {
        Plain {
            authzid: None,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Sets the identity to act as.
    pub fn with_authzid<A: Into<String>>(mut self, authzid: A) -> Plain {
        self.authzid = Some(authzid.into());
        self
    }
}

impl Drop for Plain {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn from_credentials(credentials: Credentials) -> Result<Plain, MechanismError> {
        let password = match credentials.secret {
            Secret::Password(Password::Plain(password)) => password,
            _ => return Err(MechanismError::PlainRequiresPlaintextPassword),
        };
        let username = match credentials.identity {
            Identity::Username(username) => username,
            Identity::None => return Err(MechanismError::PlainRequiresUsername),
        };
        let plain = Plain::new(username, password);
        Ok(match credentials.authzid {
            Some(authzid) => plain.with_authzid(authzid),
            None => plain,
        })
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut auth = Vec::new();
        if let Some(authzid) = &self.authzid {
            auth.extend(authzid.bytes());
        }
        auth.push(0);
        auth.extend(self.username.bytes());
        auth.push(0);
        auth.extend(self.password.bytes());
        auth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_works() {
        let creds = Credentials::default()
            .with_username("user")
            .with_password("pencil");
        let mut mechanism = Plain::from_credentials(creds).unwrap();
        assert_eq!(mechanism.initial(), b"\0user\0pencil");
    }

    #[test]
    fn plain_carries_authzid() {
        let mut mechanism = Plain::new("user", "pencil").with_authzid("admin@example.org");
        assert_eq!(mechanism.initial(), b"admin@example.org\0user\0pencil");
    }

    #[test]
    fn plain_rejects_challenges() {
        let mut mechanism = Plain::new("user", "pencil");
        mechanism.initial();
        assert_eq!(
            mechanism.response(b"more?"),
            Err(MechanismError::UnexpectedChallenge)
        );
    }

    #[test]
    fn plain_requires_password() {
        let creds = Credentials::default().with_username("user");
        assert_eq!(
            Plain::from_credentials(creds).err(),
            Some(MechanismError::PlainRequiresPlaintextPassword)
        );
    }
}
