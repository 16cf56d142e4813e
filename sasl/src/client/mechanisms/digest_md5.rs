//! Provides the SASL "DIGEST-MD5" mechanism (RFC 2831), `qop=auth` only.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use md5::{Digest, Md5};
use zeroize::Zeroize;

use crate::client::{Mechanism, MechanismError};
use crate::common::{constant_time_eq, Credentials, Identity, Password, Secret};

const NONCE_COUNT: &str = "00000001";

enum DigestState {
    Init,
    SentResponse { response_auth: String },
    Verified,
}

/// A struct for the SASL DIGEST-MD5 mechanism.
pub struct DigestMd5 {
    username: String,
    password: String,
    host: String,
    service: String,
    cnonce: String,
    state: DigestState,
}

impl DigestMd5 {
    /// Constructs a new struct for authenticating against `host` using the SASL DIGEST-MD5
    /// mechanism.
    pub fn new<N, P, H>(username: N, password: P, host: H) -> Result<DigestMd5, MechanismError>
    where
        N: Into<String>,
        P: Into<String>,
        H: Into<String>,
    {
        let mut data = [0u8; 16];
        getrandom::getrandom(&mut data)?;
        Ok(DigestMd5::build(
            username.into(),
            password.into(),
            host.into(),
            Base64.encode(data),
        ))
    }

    // Used for testing.
    #[doc(hidden)]
    #[cfg(test)]
    pub fn new_with_cnonce(username: &str, password: &str, host: &str, cnonce: &str) -> DigestMd5 {
        DigestMd5::build(
            username.to_owned(),
            password.to_owned(),
            host.to_owned(),
            cnonce.to_owned(),
        )
    }

    fn build(username: String, password: String, host: String, cnonce: String) -> DigestMd5 {
        DigestMd5 {
            username,
            password,
            host,
            service: String::from("xmpp"),
            cnonce,
            state: DigestState::Init,
        }
    }

    /// Overrides the service name used in the digest-uri, `xmpp` by default.
    pub fn with_service<S: Into<String>>(mut self, service: S) -> DigestMd5 {
        self.service = service.into();
        self
    }

    fn digest_uri(&self) -> String {
        format!("{}/{}", self.service, self.host)
    }

    fn compute(&self, realm: &str, nonce: &str, a2: &str) -> String {
        let mut secret = Md5::new();
        secret.update(self.username.as_bytes());
        secret.update(b":");
        secret.update(realm.as_bytes());
        secret.update(b":");
        secret.update(self.password.as_bytes());
        let mut a1 = secret.finalize().to_vec();
        a1.extend(format!(":{}:{}", nonce, self.cnonce).bytes());
        let ha1 = hex_md5(&a1);
        a1.zeroize();
        let ha2 = hex_md5(a2.as_bytes());
        hex_md5(
            format!(
                "{}:{}:{}:{}:auth:{}",
                ha1, nonce, NONCE_COUNT, self.cnonce, ha2
            )
            .as_bytes(),
        )
    }

    fn first_response(&self, challenge: &[u8]) -> Result<(Vec<u8>, String), MechanismError> {
        let directives = parse_challenge(challenge)?;
        if directives.contains_key("rspauth") {
            return Err(MechanismError::InvalidState);
        }
        let nonce = directives
            .get("nonce")
            .ok_or(MechanismError::NoDigestNonce)?;
        if let Some(qop) = directives.get("qop") {
            if !qop.split(',').any(|q| q.trim() == "auth") {
                return Err(MechanismError::UnsupportedQop);
            }
        }
        let realm = directives
            .get("realm")
            .map(String::as_str)
            .unwrap_or(&self.host);
        let digest_uri = self.digest_uri();
        let response = self.compute(realm, nonce, &format!("AUTHENTICATE:{}", digest_uri));
        let response_auth = self.compute(realm, nonce, &format!(":{}", digest_uri));

        let mut out = format!(
            "username=\"{}\",realm=\"{}\",nonce=\"{}\",cnonce=\"{}\",nc={},qop=auth,digest-uri=\"{}\",response={}",
            quote(&self.username),
            quote(realm),
            quote(nonce),
            quote(&self.cnonce),
            NONCE_COUNT,
            quote(&digest_uri),
            response
        );
        if directives.get("charset").map(String::as_str) == Some("utf-8") {
            out.push_str(",charset=utf-8");
        }
        Ok((out.into_bytes(), response_auth))
    }

    fn verify(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        let expected = match &self.state {
            DigestState::SentResponse { response_auth } => response_auth,
            _ => return Err(MechanismError::InvalidState),
        };
        let directives = parse_challenge(data)?;
        let rspauth = directives
            .get("rspauth")
            .ok_or(MechanismError::NoResponseAuth)?;
        if !constant_time_eq(rspauth.as_bytes(), expected.as_bytes()) {
            return Err(MechanismError::InvalidResponseAuth);
        }
        self.state = DigestState::Verified;
        Ok(())
    }
}

impl Drop for DigestMd5 {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

fn hex_md5(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parses a comma-separated list of `key=value` or `key="quoted value"` directives.
fn parse_challenge(data: &[u8]) -> Result<HashMap<String, String>, MechanismError> {
    let text = std::str::from_utf8(data).map_err(|_| MechanismError::CannotDecodeChallenge)?;
    let mut directives = HashMap::new();
    let mut chars = text.chars().peekable();
    loop {
        while chars.peek().map_or(false, |c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        loop {
            match chars.next() {
                Some('=') => break,
                Some(',') | None => return Err(MechanismError::CannotDecodeChallenge),
                Some(c) => key.push(c),
            }
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(c) => value.push(c),
                        None => return Err(MechanismError::CannotDecodeChallenge),
                    },
                    Some(c) => value.push(c),
                    None => return Err(MechanismError::CannotDecodeChallenge),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim_end().to_owned();
        }

        directives
            .entry(key.trim().to_ascii_lowercase())
            .or_insert(value);
    }
    Ok(directives)
}

impl Mechanism for DigestMd5 {
    fn name(&self) -> &str {
        "DIGEST-MD5"
    }

    fn from_credentials(credentials: Credentials) -> Result<DigestMd5, MechanismError> {
        let password = match credentials.secret {
            Secret::Password(Password::Plain(password)) => password,
            _ => return Err(MechanismError::DigestRequiresPlaintextPassword),
        };
        let username = match credentials.identity {
            Identity::Username(username) => username,
            Identity::None => return Err(MechanismError::DigestRequiresUsername),
        };
        let host = credentials
            .domain
            .ok_or(MechanismError::DigestRequiresDomain)?;
        DigestMd5::new(username, password, host)
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        match self.state {
            DigestState::Init => {
                let (response, response_auth) = self.first_response(challenge)?;
                self.state = DigestState::SentResponse { response_auth };
                Ok(response)
            }
            DigestState::SentResponse { .. } => {
                self.verify(challenge)?;
                Ok(Vec::new())
            }
            DigestState::Verified => Err(MechanismError::InvalidState),
        }
    }

    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        match self.state {
            DigestState::Verified => Ok(()),
            DigestState::SentResponse { .. } => self.verify(data),
            DigestState::Init => Err(MechanismError::InvalidState),
        }
    }
}
