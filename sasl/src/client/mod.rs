use crate::common::scram::DeriveError;
use crate::common::Credentials;
use hmac::digest::InvalidLength;
use std::fmt;

/// Everything that can go wrong inside a single mechanism.
#[derive(Debug, PartialEq)]
pub enum MechanismError {
    /// ANONYMOUS was given a secret.
    AnonymousRequiresNoCredentials,

    /// PLAIN needs an authentication identity.
    PlainRequiresUsername,
    /// PLAIN needs the password in clear.
    PlainRequiresPlaintextPassword,

    /// The system random number generator failed.
    CannotGenerateNonce,
    /// SCRAM needs an authentication identity.
    ScramRequiresUsername,
    /// SCRAM needs a password or a salted password.
    ScramRequiresPassword,

    /// DIGEST-MD5 needs an authentication identity.
    DigestRequiresUsername,
    /// DIGEST-MD5 needs the password in clear.
    DigestRequiresPlaintextPassword,
    /// DIGEST-MD5 needs the server domain for its digest-uri.
    DigestRequiresDomain,
    /// The challenge did not carry a nonce.
    NoDigestNonce,
    /// The server does not offer the `auth` quality of protection.
    UnsupportedQop,
    /// The rspauth value did not match.
    InvalidResponseAuth,
    /// The server claimed success without proving knowledge of the password.
    NoResponseAuth,

    /// A -PLUS mechanism was requested without channel binding data.
    ChannelBindingUnavailable,

    /// The challenge could not be parsed.
    CannotDecodeChallenge,
    /// The mechanism does not expect any challenge at this point.
    UnexpectedChallenge,
    /// The server-first-message carried no nonce.
    NoServerNonce,
    /// The server nonce does not extend the client nonce.
    NonceMismatch,
    /// The server-first-message carried no salt.
    NoServerSalt,
    /// The server-first-message carried no iteration count.
    NoServerIterations,
    /// The iteration count was zero or not a number.
    InvalidServerIterations,
    /// The server sent a mandatory extension (`m=`).
    UnsupportedExtension,
    /// Deriving the salted password failed.
    DeriveError(DeriveError),
    /// HMAC refused the key.
    InvalidKeyLength(InvalidLength),
    /// The message came at the wrong point of the exchange.
    InvalidState,

    /// The success data could not be parsed.
    CannotDecodeSuccessResponse,
    /// The server signature did not match.
    InvalidSignatureInSuccessResponse,
    /// The success data did not carry a server signature.
    NoSignatureInSuccessResponse,
    /// The server reported an error with `e=`.
    ServerError(String),
}

impl From<DeriveError> for MechanismError {
    fn from(err: DeriveError) -> MechanismError {
        MechanismError::DeriveError(err)
    }
}

impl From<InvalidLength> for MechanismError {
    fn from(err: InvalidLength) -> MechanismError {
        MechanismError::InvalidKeyLength(err)
    }
}

impl From<getrandom::Error> for MechanismError {
    fn from(_err: getrandom::Error) -> MechanismError {
        MechanismError::CannotGenerateNonce
    }
}

impl fmt::Display for MechanismError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{}",
            match self {
                MechanismError::AnonymousRequiresNoCredentials =>
                    "ANONYMOUS mechanism requires no credentials",

                MechanismError::PlainRequiresUsername => "PLAIN requires a username",
                MechanismError::PlainRequiresPlaintextPassword =>
                    "PLAIN requires a plaintext password",

                MechanismError::CannotGenerateNonce => "can't generate nonce",
                MechanismError::ScramRequiresUsername => "SCRAM requires a username",
                MechanismError::ScramRequiresPassword => "SCRAM requires a password",

                MechanismError::DigestRequiresUsername => "DIGEST-MD5 requires a username",
                MechanismError::DigestRequiresPlaintextPassword =>
                    "DIGEST-MD5 requires a plaintext password",
                MechanismError::DigestRequiresDomain => "DIGEST-MD5 requires a server domain",
                MechanismError::NoDigestNonce => "no nonce in digest challenge",
                MechanismError::UnsupportedQop => "server doesn't offer qop=auth",
                MechanismError::InvalidResponseAuth => "invalid rspauth from server",
                MechanismError::NoResponseAuth => "no rspauth from server",

                MechanismError::ChannelBindingUnavailable => "channel binding data unavailable",

                MechanismError::CannotDecodeChallenge => "can't decode challenge",
                MechanismError::UnexpectedChallenge => "unexpected challenge",
                MechanismError::NoServerNonce => "no server nonce",
                MechanismError::NonceMismatch => "server nonce doesn't extend client nonce",
                MechanismError::NoServerSalt => "no server salt",
                MechanismError::NoServerIterations => "no server iterations",
                MechanismError::InvalidServerIterations => "invalid server iterations",
                MechanismError::UnsupportedExtension => "unsupported mandatory extension",
                MechanismError::DeriveError(err) => return write!(fmt, "derive error: {}", err),
                MechanismError::InvalidKeyLength(err) =>
                    return write!(fmt, "invalid key length: {}", err),
                MechanismError::InvalidState => "not in the right state to receive this response",

                MechanismError::CannotDecodeSuccessResponse => "can't decode success response",
                MechanismError::InvalidSignatureInSuccessResponse =>
                    "invalid signature in success response",
                MechanismError::NoSignatureInSuccessResponse => "no signature in success response",
                MechanismError::ServerError(reason) =>
                    return write!(fmt, "server error: {}", reason),
            }
        )
    }
}

impl std::error::Error for MechanismError {}

/// A trait which defines SASL mechanisms.
pub trait Mechanism {
    /// The name of the mechanism.
    fn name(&self) -> &str;

    /// Creates this mechanism from `Credentials`.
    fn from_credentials(credentials: Credentials) -> Result<Self, MechanismError>
    where
        Self: Sized;

    /// Provides initial payload of the SASL mechanism.
    fn initial(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Creates a response to the SASL challenge.
    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Err(MechanismError::UnexpectedChallenge)
    }

    /// Verifies the server success response, if there is one.
    fn success(&mut self, _data: &[u8]) -> Result<(), MechanismError> {
        Ok(())
    }
}

pub mod mechanisms;
