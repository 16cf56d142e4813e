//! Mechanism negotiation and the client side of a SASL exchange.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, trace, warn};

use crate::client::mechanisms::{Anonymous, DigestMd5, External, Plain, Scram};
use crate::client::Mechanism;
use crate::common::scram::{Sha1, Sha256, Sha512};
use crate::common::{ChannelBinding, Credentials};
use crate::error::AuthError;

/// Every mechanism this engine implements.
///
/// The declaration order is the preference order: when several are usable, the first one
/// offered by the server wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MechanismKind {
    /// EXTERNAL, using the TLS client certificate.
    External,
    /// SCRAM-SHA-512-PLUS.
    ScramSha512Plus,
    /// SCRAM-SHA-256-PLUS.
    ScramSha256Plus,
    /// SCRAM-SHA-1-PLUS.
    ScramSha1Plus,
    /// SCRAM-SHA-512.
    ScramSha512,
    /// SCRAM-SHA-256.
    ScramSha256,
    /// SCRAM-SHA-1.
    ScramSha1,
    /// DIGEST-MD5.
    DigestMd5,
    /// PLAIN.
    Plain,
    /// ANONYMOUS.
    Anonymous,
}

impl MechanismKind {
    /// All mechanisms, most preferred first.
    pub const ALL: [MechanismKind; 10] = [
        MechanismKind::External,
        MechanismKind::ScramSha512Plus,
        MechanismKind::ScramSha256Plus,
        MechanismKind::ScramSha1Plus,
        MechanismKind::ScramSha512,
        MechanismKind::ScramSha256,
        MechanismKind::ScramSha1,
        MechanismKind::DigestMd5,
        MechanismKind::Plain,
        MechanismKind::Anonymous,
    ];

    /// The IANA name of the mechanism.
    pub fn name(self) -> &'static str {
        match self {
            MechanismKind::External => "EXTERNAL",
            MechanismKind::ScramSha512Plus => "SCRAM-SHA-512-PLUS",
            MechanismKind::ScramSha256Plus => "SCRAM-SHA-256-PLUS",
            MechanismKind::ScramSha1Plus => "SCRAM-SHA-1-PLUS",
            MechanismKind::ScramSha512 => "SCRAM-SHA-512",
            MechanismKind::ScramSha256 => "SCRAM-SHA-256",
            MechanismKind::ScramSha1 => "SCRAM-SHA-1",
            MechanismKind::DigestMd5 => "DIGEST-MD5",
            MechanismKind::Plain => "PLAIN",
            MechanismKind::Anonymous => "ANONYMOUS",
        }
    }

    /// Looks a mechanism up by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<MechanismKind> {
        let name = name.trim();
        MechanismKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// Whether this is a channel-binding (-PLUS) mechanism.
    pub fn is_plus(self) -> bool {
        matches!(
            self,
            MechanismKind::ScramSha512Plus
                | MechanismKind::ScramSha256Plus
                | MechanismKind::ScramSha1Plus
        )
    }

    /// Whether this is one of the SCRAM family.
    pub fn is_scram(self) -> bool {
        self.is_plus()
            || matches!(
                self,
                MechanismKind::ScramSha512 | MechanismKind::ScramSha256 | MechanismKind::ScramSha1
            )
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.name())
    }
}

/// What the connection and the configuration allow, used to pick a mechanism.
#[derive(Clone, Debug, Default)]
pub struct SelectionPolicy {
    /// The transport is secured by TLS.
    pub encrypted: bool,
    /// Use PLAIN even without TLS.
    pub allow_plain_unencrypted: bool,
    /// Channel binding data can be obtained from the transport.
    pub channel_binding: bool,
    /// A TLS client certificate is configured for the secured transport. The server may
    /// not have asked for it, in which case EXTERNAL fails at the server.
    pub client_certificate: bool,
    /// There is no identity to authenticate as.
    pub anonymous: bool,
    /// Mechanisms the user turned off.
    pub disabled: BTreeSet<MechanismKind>,
}

impl SelectionPolicy {
    /// Whether the mechanism may be used under this policy.
    pub fn permits(&self, kind: MechanismKind) -> bool {
        if self.disabled.contains(&kind) {
            return false;
        }
        match kind {
            MechanismKind::External => self.client_certificate,
            MechanismKind::Anonymous => self.anonymous,
            _ if self.anonymous => false,
            MechanismKind::Plain => self.encrypted || self.allow_plain_unencrypted,
            kind if kind.is_plus() => self.channel_binding,
            _ => true,
        }
    }

    /// Picks the strongest permitted mechanism among those offered by the server.
    pub fn select<'a, I>(&self, offered: I) -> Option<MechanismKind>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let selected = offered
            .into_iter()
            .filter_map(MechanismKind::from_name)
            .filter(|kind| self.permits(*kind))
            .min();
        match selected {
            Some(kind) => debug!("Selected SASL mechanism {}", kind),
            None => warn!("No usable SASL mechanism offered"),
        }
        selected
    }
}

/// Returns the channel binding a mechanism must be started with.
///
/// `binding` is what the transport can provide, `server_offers_plus` whether any -PLUS
/// mechanism was advertised.
pub fn binding_for(
    kind: MechanismKind,
    binding: ChannelBinding,
    server_offers_plus: bool,
) -> ChannelBinding {
    if kind.is_plus() {
        binding
    } else if kind.is_scram() && binding.is_bound() && !server_offers_plus {
        ChannelBinding::Unsupported
    } else {
        ChannelBinding::None
    }
}

/// A message received from the server during the exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerMessage<'a> {
    /// The decoded content of `<challenge/>`.
    Challenge(&'a [u8]),
    /// `<success/>`, with its decoded additional data if any.
    Success(Option<&'a [u8]>),
    /// `<failure/>`, with the defined condition.
    Failure(&'a str),
}

/// What the client has to do after a server message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Send this payload in a `<response/>`.
    Respond(Vec<u8>),
    /// The server is authenticated and so are we.
    Success,
}

enum AnyMechanism {
    Plain(Plain),
    DigestMd5(DigestMd5),
    ScramSha1(Scram<Sha1>),
    ScramSha256(Scram<Sha256>),
    ScramSha512(Scram<Sha512>),
    Anonymous(Anonymous),
    External(External),
}

impl AnyMechanism {
    fn as_mechanism(&mut self) -> &mut dyn Mechanism {
        match self {
            AnyMechanism::Plain(m) => m,
            AnyMechanism::DigestMd5(m) => m,
            AnyMechanism::ScramSha1(m) => m,
            AnyMechanism::ScramSha256(m) => m,
            AnyMechanism::ScramSha512(m) => m,
            AnyMechanism::Anonymous(m) => m,
            AnyMechanism::External(m) => m,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EngineState {
    Ready,
    InProgress,
    Done,
}

/// A single SASL exchange with one mechanism.
pub struct Engine {
    kind: MechanismKind,
    mechanism: AnyMechanism,
    state: EngineState,
}

impl fmt::Debug for Engine {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Engine")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish()
    }
}

impl Engine {
    /// Prepares an exchange with the given mechanism.
    ///
    /// -PLUS mechanisms refuse to start without channel binding data; there is no silent
    /// downgrade to the plain variant.
    pub fn new(kind: MechanismKind, mut credentials: Credentials) -> Result<Engine, AuthError> {
        if kind.is_plus() && !credentials.channel_binding.is_bound() {
            return Err(AuthError::BindingUnavailable);
        }
        if !kind.is_plus() && credentials.channel_binding.is_bound() {
            trace!("Dropping channel binding data for {}", kind);
            credentials.channel_binding = ChannelBinding::None;
        }
        let mechanism = match kind {
            MechanismKind::Plain => Plain::from_credentials(credentials).map(AnyMechanism::Plain),
            MechanismKind::DigestMd5 => {
                DigestMd5::from_credentials(credentials).map(AnyMechanism::DigestMd5)
            }
            MechanismKind::ScramSha1 | MechanismKind::ScramSha1Plus => {
                Scram::from_credentials(credentials).map(AnyMechanism::ScramSha1)
            }
            MechanismKind::ScramSha256 | MechanismKind::ScramSha256Plus => {
                Scram::from_credentials(credentials).map(AnyMechanism::ScramSha256)
            }
            MechanismKind::ScramSha512 | MechanismKind::ScramSha512Plus => {
                Scram::from_credentials(credentials).map(AnyMechanism::ScramSha512)
            }
            MechanismKind::Anonymous => {
                Anonymous::from_credentials(credentials).map(AnyMechanism::Anonymous)
            }
            MechanismKind::External => {
                External::from_credentials(credentials).map(AnyMechanism::External)
            }
        }
        .map_err(AuthError::Credentials)?;
        Ok(Engine {
            kind,
            mechanism,
            state: EngineState::Ready,
        })
    }

    /// The mechanism of this exchange.
    pub fn kind(&self) -> MechanismKind {
        self.kind
    }

    /// Whether the exchange has ended, successfully or not.
    pub fn is_done(&self) -> bool {
        self.state == EngineState::Done
    }

    /// Produces the initial response, sent along with `<auth/>`.
    pub fn start(&mut self) -> Result<Vec<u8>, AuthError> {
        if self.state != EngineState::Ready {
            return Err(AuthError::InvalidState);
        }
        self.state = EngineState::InProgress;
        debug!("Starting SASL {} exchange", self.kind);
        Ok(self.mechanism.as_mechanism().initial())
    }

    /// Feeds a server message into the exchange.
    ///
    /// Any error ends the exchange; further calls return [`AuthError::InvalidState`].
    pub fn step(&mut self, message: ServerMessage<'_>) -> Result<Step, AuthError> {
        if self.state != EngineState::InProgress {
            return Err(AuthError::InvalidState);
        }
        let result = match message {
            ServerMessage::Challenge(challenge) => self
                .mechanism
                .as_mechanism()
                .response(challenge)
                .map(Step::Respond)
                .map_err(AuthError::from),
            ServerMessage::Success(data) => self
                .mechanism
                .as_mechanism()
                .success(data.unwrap_or_default())
                .map(|()| Step::Success)
                .map_err(AuthError::from),
            ServerMessage::Failure(condition) => Err(AuthError::Rejected(condition.to_owned())),
        };
        match &result {
            Ok(Step::Respond(_)) => trace!("SASL {} answered a challenge", self.kind),
            Ok(Step::Success) => {
                debug!("SASL {} succeeded", self.kind);
                self.state = EngineState::Done;
            }
            Err(err) => {
                warn!("SASL {} failed: {}", self.kind, err);
                self.state = EngineState::Done;
            }
        }
        result
    }
}
