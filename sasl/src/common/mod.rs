use std::collections::HashMap;
use std::fmt;
use std::string::FromUtf8Error;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};

/// SCRAM hash providers and key derivation.
pub mod scram;

/// The identity a client authenticates as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    /// No identity, only usable with ANONYMOUS.
    None,
    /// The authentication identity, i.e. the localpart of a JID.
    Username(String),
}

impl From<String> for Identity {
    fn from(s: String) -> Identity {
        Identity::Username(s)
    }
}

impl<'a> From<&'a str> for Identity {
    fn from(s: &'a str) -> Identity {
        Identity::Username(s.to_owned())
    }
}

/// A struct containing SASL credentials.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// The requested identity.
    pub identity: Identity,
    /// The identity to act as, if it differs from the authenticated one.
    pub authzid: Option<String>,
    /// The domain of the server being authenticated against.
    pub domain: Option<String>,
    /// The secret used to authenticate.
    pub secret: Secret,
    /// Channel binding data, for *-PLUS mechanisms.
    pub channel_binding: ChannelBinding,
}

impl Default for Credentials {
    fn default() -> Credentials {
        Credentials {
            identity: Identity::None,
            authzid: None,
            domain: None,
            secret: Secret::None,
            channel_binding: ChannelBinding::None,
        }
    }
}

impl Credentials {
    /// Creates a new Credentials with the specified username.
    pub fn with_username<N: Into<String>>(mut self, username: N) -> Credentials {
        self.identity = Identity::Username(username.into());
        self
    }

    /// Creates a new Credentials with the specified plaintext password.
    pub fn with_password<P: Into<String>>(mut self, password: P) -> Credentials {
        self.secret = Secret::password_plain(password);
        self
    }

    /// Creates a new Credentials with the specified authorization identity.
    pub fn with_authzid<A: Into<String>>(mut self, authzid: A) -> Credentials {
        self.authzid = Some(authzid.into());
        self
    }

    /// Creates a new Credentials for the specified server domain.
    pub fn with_domain<D: Into<String>>(mut self, domain: D) -> Credentials {
        self.domain = Some(domain.into());
        self
    }

    /// Creates a new Credentials with the specified channel binding.
    pub fn with_channel_binding(mut self, channel_binding: ChannelBinding) -> Credentials {
        self.channel_binding = channel_binding;
        self
    }
}

/// Represents a SASL secret, like a password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Secret {
    /// No extra data needed.
    None,
    /// Password required.
    Password(Password),
}

impl Secret {
    /// Wraps a plaintext password.
    pub fn password_plain<S: Into<String>>(password: S) -> Secret {
        Secret::Password(Password::Plain(password.into()))
    }

    /// Wraps a password which was already salted with PBKDF2, as stored by some clients
    /// after a first successful SCRAM exchange.
    pub fn password_pbkdf2<S: Into<String>>(
        method: S,
        salt: Vec<u8>,
        iterations: u32,
        data: Vec<u8>,
    ) -> Secret {
        Secret::Password(Password::Pbkdf2 {
            method: method.into(),
            salt,
            iterations,
            data,
        })
    }
}

/// Represents a password.
#[derive(Clone, PartialEq, Eq)]
pub enum Password {
    /// A plaintext password.
    Plain(String),
    /// A password digest derived using PBKDF2.
    Pbkdf2 {
        /// The SCRAM hash name this digest was derived for, e.g. `SHA-256`.
        method: String,
        /// Salt given by the server.
        salt: Vec<u8>,
        /// Iteration count given by the server.
        iterations: u32,
        /// The salted password.
        data: Vec<u8>,
    },
}

impl fmt::Debug for Password {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Password::Plain(_) => write!(fmt, "Plain(<redacted>)"),
            Password::Pbkdf2 {
                method, iterations, ..
            } => write!(fmt, "Pbkdf2({}, {} iterations, <redacted>)", method, iterations),
        }
    }
}

impl From<String> for Password {
    fn from(s: String) -> Password {
        Password::Plain(s)
    }
}

impl<'a> From<&'a str> for Password {
    fn from(s: &'a str) -> Password {
        Password::Plain(s.to_owned())
    }
}

#[doc(hidden)]
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(a, b)| a ^ b).collect()
}

/// Compares two byte strings without leaking where they differ.
#[doc(hidden)]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

#[doc(hidden)]
pub fn parse_frame(frame: &[u8]) -> Result<HashMap<String, String>, FromUtf8Error> {
    let inner = String::from_utf8(frame.to_owned())?;
    let mut ret = HashMap::new();
    for s in inner.split(',') {
        let mut tmp = s.splitn(2, '=');
        if let (Some(k), Some(v)) = (tmp.next(), tmp.next()) {
            ret.entry(k.to_owned()).or_insert_with(|| v.to_owned());
        }
    }
    Ok(ret)
}

/// Channel binding configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelBinding {
    /// No channel binding data.
    None,
    /// Advertise that the client does not think the server supports channel binding.
    Unsupported,
    /// p=tls-unique channel binding data (for TLS 1.2).
    TlsUnique(Vec<u8>),
    /// p=tls-server-end-point channel binding data, the hash of the server certificate.
    TlsServerEndPoint(Vec<u8>),
    /// p=tls-exporter channel binding data (for TLS 1.3).
    TlsExporter(Vec<u8>),
}

impl ChannelBinding {
    /// Return the channel binding flag of the gs2 header.
    pub fn flag(&self) -> String {
        match self.name() {
            Some(name) => format!("p={}", name),
            None if *self == ChannelBinding::Unsupported => String::from("y"),
            None => String::from("n"),
        }
    }

    /// Return the full gs2 header, including the optional authorization identity.
    pub fn gs2_header(&self, authzid: Option<&str>) -> Vec<u8> {
        let mut header = self.flag().into_bytes();
        header.push(b',');
        if let Some(authzid) = authzid {
            header.extend(b"a=");
            header.extend(scram::escape_name(authzid).bytes());
        }
        header.push(b',');
        header
    }

    /// Return the name of the channel binding type, if any data is carried.
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            ChannelBinding::None | ChannelBinding::Unsupported => None,
            ChannelBinding::TlsUnique(_) => Some("tls-unique"),
            ChannelBinding::TlsServerEndPoint(_) => Some("tls-server-end-point"),
            ChannelBinding::TlsExporter(_) => Some("tls-exporter"),
        }
    }

    /// Return the channel binding data for this channel binding mechanism.
    pub fn data(&self) -> &[u8] {
        match *self {
            ChannelBinding::None | ChannelBinding::Unsupported => &[],
            ChannelBinding::TlsUnique(ref data)
            | ChannelBinding::TlsServerEndPoint(ref data)
            | ChannelBinding::TlsExporter(ref data) => data,
        }
    }

    /// Whether actual binding data is available, which *-PLUS mechanisms require.
    pub fn is_bound(&self) -> bool {
        self.name().is_some() && !self.data().is_empty()
    }

    /// Checks whether this channel binding mechanism is supported.
    pub fn supports(&self, mechanism: &str) -> bool {
        self.name() == Some(mechanism)
    }
}

/// Encodes a SASL payload for the `<auth/>` and `<response/>` elements.
///
/// An empty payload is transmitted as a single `=`.
pub fn encode_payload(data: &[u8]) -> String {
    if data.is_empty() {
        String::from("=")
    } else {
        Base64.encode(data)
    }
}

/// Decodes a payload received in `<challenge/>` or `<success/>`.
pub fn decode_payload(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let text = text.trim();
    if text.is_empty() || text == "=" {
        Ok(Vec::new())
    } else {
        Base64.decode(text)
    }
}
