use std::fmt;

use crate::client::MechanismError;

/// Why an authentication exchange ended without success.
#[derive(Debug, PartialEq)]
pub enum AuthError {
    /// The credentials cannot be used with the chosen mechanism.
    Credentials(MechanismError),
    /// The server broke the mechanism's protocol.
    Protocol(MechanismError),
    /// The server could not prove it knows the password.
    AuthFailed,
    /// A -PLUS mechanism was chosen but no channel binding data is available.
    BindingUnavailable,
    /// The server aborted the exchange with an `e=` attribute.
    Server(String),
    /// The server answered with `<failure/>`, carrying its condition.
    Rejected(String),
    /// The engine was used before `start` or after it finished.
    InvalidState,
}

impl AuthError {
    /// A short machine-readable reason, suitable for logs and error reports.
    pub fn reason(&self) -> &str {
        match self {
            AuthError::Credentials(_) => "credentials",
            AuthError::Protocol(_) => "protocol",
            AuthError::AuthFailed => "auth-failed",
            AuthError::BindingUnavailable => "binding-unavailable",
            AuthError::Server(reason) => reason,
            AuthError::Rejected(condition) => condition,
            AuthError::InvalidState => "invalid-state",
        }
    }
}

impl From<MechanismError> for AuthError {
    fn from(err: MechanismError) -> AuthError {
        match err {
            MechanismError::InvalidSignatureInSuccessResponse
            | MechanismError::InvalidResponseAuth => AuthError::AuthFailed,
            MechanismError::ServerError(reason) => AuthError::Server(reason),
            MechanismError::ChannelBindingUnavailable => AuthError::BindingUnavailable,
            err => AuthError::Protocol(err),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::Credentials(err) => write!(fmt, "unusable credentials: {}", err),
            AuthError::Protocol(err) => write!(fmt, "protocol error: {}", err),
            AuthError::AuthFailed => write!(fmt, "server failed to authenticate itself"),
            AuthError::BindingUnavailable => write!(fmt, "channel binding unavailable"),
            AuthError::Server(reason) => write!(fmt, "server error: {}", reason),
            AuthError::Rejected(condition) => write!(fmt, "authentication rejected: {}", condition),
            AuthError::InvalidState => write!(fmt, "authentication not in progress"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::Credentials(err) | AuthError::Protocol(err) => Some(err),
            _ => None,
        }
    }
}
