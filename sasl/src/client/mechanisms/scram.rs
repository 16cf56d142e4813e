//! Provides the SASL "SCRAM-*" mechanisms and a way to implement more.

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use zeroize::{Zeroize, Zeroizing};

use crate::client::{Mechanism, MechanismError};
use crate::common::scram::{escape_name, generate_nonce, ScramProvider};
use crate::common::{
    constant_time_eq, parse_frame, xor, ChannelBinding, Credentials, Identity, Password, Secret,
};

use std::marker::PhantomData;

enum ScramState {
    Init,
    SentInitialMessage {
        initial_message: Vec<u8>,
        gs2_header: Vec<u8>,
    },
    GotServerData {
        server_signature: Zeroizing<Vec<u8>>,
    },
    Verified,
}

/// A struct for the SASL SCRAM-* and SCRAM-*-PLUS mechanisms.
pub struct Scram<S: ScramProvider> {
    name: String,
    username: String,
    authzid: Option<String>,
    password: Password,
    client_nonce: String,
    state: ScramState,
    channel_binding: ChannelBinding,
    _marker: PhantomData<S>,
}

impl<S: ScramProvider> Scram<S> {
    /// Constructs a new struct for authenticating using the SASL SCRAM-* and SCRAM-*-PLUS
    /// mechanisms, depending on the passed channel binding.
    ///
    /// It is recommended that instead you use a `Credentials` struct and turn it into the
    /// requested mechanism using `from_credentials`.
    pub fn new<N: Into<String>, P: Into<Password>>(
        username: N,
        password: P,
        channel_binding: ChannelBinding,
    ) -> Result<Scram<S>, MechanismError> {
        Ok(Scram::build(
            username.into(),
            password.into(),
            generate_nonce()?,
            channel_binding,
        ))
    }

    // Used for testing.
    #[doc(hidden)]
    #[cfg(test)]
    pub fn new_with_nonce<N: Into<String>, P: Into<Password>>(
        username: N,
        password: P,
        nonce: String,
    ) -> Scram<S> {
        Scram::build(username.into(), password.into(), nonce, ChannelBinding::None)
    }

    fn build(
        username: String,
        password: Password,
        client_nonce: String,
        channel_binding: ChannelBinding,
    ) -> Scram<S> {
        let name = if channel_binding.is_bound() {
            format!("SCRAM-{}-PLUS", S::name())
        } else {
            format!("SCRAM-{}", S::name())
        };
        Scram {
            name,
            username,
            authzid: None,
            password,
            client_nonce,
            state: ScramState::Init,
            channel_binding,
            _marker: PhantomData,
        }
    }

    /// Sets the identity to act as, sent in the gs2 header.
    pub fn with_authzid<A: Into<String>>(mut self, authzid: A) -> Scram<S> {
        self.authzid = Some(authzid.into());
        self
    }

    fn client_final(
        &self,
        initial_message: &[u8],
        gs2_header: &[u8],
        challenge: &[u8],
    ) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>), MechanismError> {
        let frame = parse_frame(challenge).map_err(|_| MechanismError::CannotDecodeChallenge)?;
        if let Some(reason) = frame.get("e") {
            return Err(MechanismError::ServerError(reason.to_owned()));
        }
        if frame.contains_key("m") {
            return Err(MechanismError::UnsupportedExtension);
        }
        let server_nonce = frame.get("r").ok_or(MechanismError::NoServerNonce)?;
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(MechanismError::NonceMismatch);
        }
        let salt = frame.get("s").ok_or(MechanismError::NoServerSalt)?;
        let salt = Base64
            .decode(salt)
            .map_err(|_| MechanismError::CannotDecodeChallenge)?;
        let iterations: u32 = frame
            .get("i")
            .ok_or(MechanismError::NoServerIterations)?
            .parse()
            .map_err(|_| MechanismError::InvalidServerIterations)?;
        if iterations == 0 {
            return Err(MechanismError::InvalidServerIterations);
        }

        let mut client_final_message_bare = Vec::new();
        client_final_message_bare.extend(b"c=");
        let mut cb_data: Vec<u8> = Vec::new();
        cb_data.extend(gs2_header);
        cb_data.extend(self.channel_binding.data());
        client_final_message_bare.extend(Base64.encode(&cb_data).bytes());
        client_final_message_bare.extend(b",r=");
        client_final_message_bare.extend(server_nonce.bytes());

        let salted_password = Zeroizing::new(S::derive(&self.password, &salt, iterations)?);
        let client_key = Zeroizing::new(S::hmac(b"Client Key", &salted_password)?);
        let server_key = Zeroizing::new(S::hmac(b"Server Key", &salted_password)?);
        let mut auth_message = Vec::new();
        auth_message.extend(initial_message);
        auth_message.push(b',');
        auth_message.extend(challenge);
        auth_message.push(b',');
        auth_message.extend(&client_final_message_bare);
        let stored_key = Zeroizing::new(S::hash(&client_key));
        let client_signature = Zeroizing::new(S::hmac(&auth_message, &stored_key)?);
        let client_proof = Zeroizing::new(xor(&client_key, &client_signature));
        let server_signature = Zeroizing::new(S::hmac(&auth_message, &server_key)?);

        let mut client_final_message = client_final_message_bare;
        client_final_message.extend(b",p=");
        client_final_message.extend(Base64.encode(client_proof.as_slice()).bytes());
        Ok((client_final_message, server_signature))
    }

    fn verify(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        let server_signature = match &self.state {
            ScramState::GotServerData { server_signature } => server_signature,
            _ => return Err(MechanismError::InvalidState),
        };
        let frame = parse_frame(data).map_err(|_| MechanismError::CannotDecodeSuccessResponse)?;
        if let Some(reason) = frame.get("e") {
            return Err(MechanismError::ServerError(reason.to_owned()));
        }
        let signature = frame
            .get("v")
            .ok_or(MechanismError::NoSignatureInSuccessResponse)?;
        let signature = Base64
            .decode(signature)
            .map_err(|_| MechanismError::CannotDecodeSuccessResponse)?;
        if !constant_time_eq(&signature, server_signature) {
            return Err(MechanismError::InvalidSignatureInSuccessResponse);
        }
        self.state = ScramState::Verified;
        Ok(())
    }
}

impl<S: ScramProvider> Drop for Scram<S> {
    fn drop(&mut self) {
        match &mut self.password {
            Password::Plain(password) => password.zeroize(),
            Password::Pbkdf2 { data, .. } => data.zeroize(),
        }
    }
}

impl<S: ScramProvider> Mechanism for Scram<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn from_credentials(credentials: Credentials) -> Result<Scram<S>, MechanismError> {
        let password = match credentials.secret {
            Secret::Password(password) => password,
            Secret::None => return Err(MechanismError::ScramRequiresPassword),
        };
        let username = match credentials.identity {
            Identity::Username(username) => username,
            Identity::None => return Err(MechanismError::ScramRequiresUsername),
        };
        let scram = Scram::new(username, password, credentials.channel_binding)?;
        Ok(match credentials.authzid {
            Some(authzid) => scram.with_authzid(authzid),
            None => scram,
        })
    }

    fn initial(&mut self) -> Vec<u8> {
        let gs2_header = self.channel_binding.gs2_header(self.authzid.as_deref());
        let mut bare = Vec::new();
        bare.extend(b"n=");
        bare.extend(escape_name(&self.username).bytes());
        bare.extend(b",r=");
        bare.extend(self.client_nonce.bytes());
        let mut data = Vec::new();
        data.extend(&gs2_header);
        data.extend(&bare);
        self.state = ScramState::SentInitialMessage {
            initial_message: bare,
            gs2_header,
        };
        data
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        let (client_final, server_signature) = match &self.state {
            ScramState::SentInitialMessage {
                initial_message,
                gs2_header,
            } => self.client_final(initial_message, gs2_header, challenge)?,
            ScramState::GotServerData { .. } => {
                // server-final-message delivered as a challenge, answered with an empty response.
                self.verify(challenge)?;
                return Ok(Vec::new());
            }
            _ => return Err(MechanismError::InvalidState),
        };
        self.state = ScramState::GotServerData { server_signature };
        Ok(client_final)
    }

    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        match self.state {
            ScramState::Verified => Ok(()),
            ScramState::GotServerData { .. } => self.verify(data),
            _ => Err(MechanismError::InvalidState),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scram::{Sha1, Sha256, Sha512};
    use hmac::{Hmac, Mac};
    use sha2::Digest;

    #[test]
    fn scram_sha1_works() {
        // Source: https://wiki.xmpp.org/web/SASLandSCRAM-SHA-1
        let username = "user";
        let password = "pencil";
        let client_nonce = "fyko+d2lbbFgONRv9qkxdawL";
        let client_init = b"n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL";
        let server_init = b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
        let client_final =
            b"c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts=";
        let server_final = b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ=";
        let mut mechanism =
            Scram::<Sha1>::new_with_nonce(username, password, client_nonce.to_owned());
        assert_eq!(mechanism.name(), "SCRAM-SHA-1");
        let init = mechanism.initial();
        assert_eq!(
            String::from_utf8(init).unwrap(),
            String::from_utf8(client_init[..].to_owned()).unwrap()
        );
        let resp = mechanism.response(&server_init[..]).unwrap();
        assert_eq!(
            String::from_utf8(resp).unwrap(),
            String::from_utf8(client_final[..].to_owned()).unwrap()
        );
        mechanism.success(&server_final[..]).unwrap();
    }

    #[test]
    fn scram_sha256_works() {
        // Source: RFC 7677
        let username = "user";
        let password = "pencil";
        let client_nonce = "rOprNGfwEbeRWgbNEkqO";
        let client_init = b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO";
        let server_init = b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let client_final = b"c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
        let server_final = b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";
        let mut mechanism =
            Scram::<Sha256>::new_with_nonce(username, password, client_nonce.to_owned());
        let init = mechanism.initial();
        assert_eq!(
            String::from_utf8(init).unwrap(),
            String::from_utf8(client_init[..].to_owned()).unwrap()
        );
        let resp = mechanism.response(&server_init[..]).unwrap();
        assert_eq!(
            String::from_utf8(resp).unwrap(),
            String::from_utf8(client_final[..].to_owned()).unwrap()
        );
        mechanism.success(&server_final[..]).unwrap();
    }

    fn hmac_sha512(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<sha2::Sha512>::new_from_slice(key).unwrap();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    #[test]
    fn scram_sha512_plus_binds_channel() {
        let binding = vec![0x42; 32];
        let mut mechanism = Scram::<Sha512>::new(
            "user",
            "pencil",
            ChannelBinding::TlsExporter(binding.clone()),
        )
        .unwrap();
        mechanism.client_nonce = String::from("clientnonce");
        assert_eq!(mechanism.name(), "SCRAM-SHA-512-PLUS");
        assert_eq!(
            mechanism.initial(),
            b"p=tls-exporter,,n=user,r=clientnonce"
        );

        let salt = b"saltsalt";
        let server_first = format!("r=clientnonceSERVER,s={},i=4096", Base64.encode(salt));
        let response = mechanism.response(server_first.as_bytes()).unwrap();

        let mut salted = [0u8; 64];
        pbkdf2::pbkdf2::<Hmac<sha2::Sha512>>(b"pencil", salt, 4096, &mut salted).unwrap();
        let client_key = hmac_sha512(&salted, b"Client Key");
        let stored_key = sha2::Sha512::digest(&client_key);
        let mut cbind = b"p=tls-exporter,,".to_vec();
        cbind.extend(&binding);
        let without_proof = format!("c={},r=clientnonceSERVER", Base64.encode(&cbind));
        let auth_message = format!("n=user,r=clientnonce,{},{}", server_first, without_proof);
        let signature = hmac_sha512(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key.iter().zip(&signature).map(|(a, b)| a ^ b).collect();
        let expected = format!("{},p={}", without_proof, Base64.encode(proof));
        assert_eq!(String::from_utf8(response).unwrap(), expected);

        let server_key = hmac_sha512(&salted, b"Server Key");
        let server_signature = hmac_sha512(&server_key, auth_message.as_bytes());
        let server_final = format!("v={}", Base64.encode(server_signature));
        assert_eq!(mechanism.success(server_final.as_bytes()), Ok(()));
    }

    #[test]
    fn unsupported_binding_sends_y_flag() {
        let mut mechanism =
            Scram::<Sha1>::new("user", "pencil", ChannelBinding::Unsupported).unwrap();
        assert_eq!(mechanism.name(), "SCRAM-SHA-1");
        assert!(mechanism.initial().starts_with(b"y,,n=user,r="));
    }

    #[test]
    fn authzid_and_escaping() {
        let mut mechanism = Scram::<Sha1>::new_with_nonce("us=er", "pencil", "abc".to_owned())
            .with_authzid("admin");
        assert_eq!(mechanism.initial(), b"n,a=admin,n=us=3Der,r=abc");
        let resp = mechanism
            .response(b"r=abcdef,s=QSXCR+Q6sek8bf92,i=16")
            .unwrap();
        let expected_cbind = format!("c={},", Base64.encode(b"n,a=admin,"));
        assert!(String::from_utf8(resp)
            .unwrap()
            .starts_with(&expected_cbind));
    }

    #[test]
    fn nonce_must_extend_ours() {
        let mut mechanism = Scram::<Sha1>::new_with_nonce("user", "pencil", "abc".to_owned());
        mechanism.initial();
        assert_eq!(
            mechanism.response(b"r=xyzdef,s=QSXCR+Q6sek8bf92,i=4096"),
            Err(MechanismError::NonceMismatch)
        );
    }

    #[test]
    fn identical_nonce_is_accepted() {
        let mut mechanism = Scram::<Sha1>::new_with_nonce("user", "pencil", "abc".to_owned());
        mechanism.initial();
        assert!(mechanism
            .response(b"r=abc,s=QSXCR+Q6sek8bf92,i=16")
            .is_ok());
    }

    #[test]
    fn bad_server_first_messages() {
        let cases = vec![
            (
                "m=ext,r=abcdef,s=QSXCR+Q6sek8bf92,i=4096",
                MechanismError::UnsupportedExtension,
            ),
            (
                "r=abcdef,s=QSXCR+Q6sek8bf92,i=0",
                MechanismError::InvalidServerIterations,
            ),
            (
                "r=abcdef,s=QSXCR+Q6sek8bf92,i=-5",
                MechanismError::InvalidServerIterations,
            ),
            ("r=abcdef,i=4096", MechanismError::NoServerSalt),
            ("s=QSXCR+Q6sek8bf92,i=4096", MechanismError::NoServerNonce),
            (
                "e=other-error",
                MechanismError::ServerError("other-error".to_owned()),
            ),
        ];
        for (challenge, error) in cases {
            let mut mechanism = Scram::<Sha1>::new_with_nonce("user", "pencil", "abc".to_owned());
            mechanism.initial();
            assert_eq!(mechanism.response(challenge.as_bytes()), Err(error));
        }
    }

    fn past_first_round() -> Scram<Sha1> {
        let mut mechanism = Scram::<Sha1>::new_with_nonce(
            "user",
            "pencil",
            "fyko+d2lbbFgONRv9qkxdawL".to_owned(),
        );
        mechanism.initial();
        mechanism
            .response(b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap();
        mechanism
    }

    #[test]
    fn wrong_server_signature_fails() {
        let mut signature = Base64.decode("rmF9pqV8S7suAoZWja4dJRkFsKQ=").unwrap();
        signature[5] ^= 1;
        let mut response = b"v=".to_vec();
        response.extend(Base64.encode(&signature).bytes());

        let mut mechanism = past_first_round();
        assert_eq!(
            mechanism.success(&response),
            Err(MechanismError::InvalidSignatureInSuccessResponse)
        );
    }

    #[test]
    fn server_error_is_reported() {
        let mut mechanism = past_first_round();
        assert_eq!(
            mechanism.success(b"e=invalid-proof"),
            Err(MechanismError::ServerError("invalid-proof".to_owned()))
        );
    }

    #[test]
    fn success_without_signature_fails() {
        let mut mechanism = past_first_round();
        assert_eq!(
            mechanism.success(b""),
            Err(MechanismError::NoSignatureInSuccessResponse)
        );
    }

    #[test]
    fn server_final_as_challenge() {
        let mut mechanism = past_first_round();
        assert_eq!(
            mechanism.response(b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ="),
            Ok(Vec::new())
        );
        assert_eq!(mechanism.success(b""), Ok(()));
    }
}
