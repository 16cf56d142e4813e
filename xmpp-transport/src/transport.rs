//! The transport a connection reads and writes through, plain or TLS.

use std::io;
use std::mem;

use sasl::ChannelBinding;

use crate::certificate::Certificate;
use crate::socket::Socket;
use crate::tls::{PasswordCache, TlsConfig, TlsSession};
use crate::Error;

/// Which variant a [`Transport`] currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Bytes go to the socket as is.
    Plain,
    /// Bytes go through a TLS session.
    Secured,
    /// Closed, or lost to a failed upgrade.
    Closed,
}

enum Channel<S> {
    Plain(S),
    Secured(Box<TlsSession<S>>),
    Closed,
}

/// A byte channel to the server with the same operations whether or not it is
/// encrypted.
///
/// A plain transport can be upgraded to TLS once with [`Transport::start_tls`]; it never
/// goes back to plain.
pub struct Transport<S> {
    channel: Channel<S>,
    last_error: Option<io::ErrorKind>,
}

impl<S> std::fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl<S> Transport<S> {
    /// The active variant.
    pub fn kind(&self) -> TransportKind {
        match self.channel {
            Channel::Plain(_) => TransportKind::Plain,
            Channel::Secured(_) => TransportKind::Secured,
            Channel::Closed => TransportKind::Closed,
        }
    }

    /// Whether data is encrypted.
    pub fn is_secured(&self) -> bool {
        self.kind() == TransportKind::Secured
    }

    /// Kind of the last failed operation's error.
    pub fn last_error(&self) -> Option<io::ErrorKind> {
        self.last_error
    }
}

impl<S: Socket> Transport<S> {
    /// Wraps a connected socket without encryption.
    pub fn plain(socket: S) -> Transport<S> {
        Transport {
            channel: Channel::Plain(socket),
            last_error: None,
        }
    }

    /// Runs a TLS handshake right away, for legacy `xmpps` connections.
    pub async fn secured(
        socket: S,
        config: &TlsConfig,
        domain: &str,
        passwords: &mut PasswordCache,
    ) -> Result<Transport<S>, Error> {
        let mut session = TlsSession::new(socket, config, domain, passwords)?;
        session.start().await?;
        Ok(Transport {
            channel: Channel::Secured(Box::new(session)),
            last_error: None,
        })
    }

    /// Upgrades a plain transport to TLS in place.
    ///
    /// On failure the socket is gone and the transport is [`TransportKind::Closed`].
    pub async fn start_tls(
        &mut self,
        config: &TlsConfig,
        domain: &str,
        passwords: &mut PasswordCache,
    ) -> Result<(), Error> {
        let socket = match mem::replace(&mut self.channel, Channel::Closed) {
            Channel::Plain(socket) => socket,
            other => {
                self.channel = other;
                return Err(Error::InvalidState("STARTTLS needs a plain transport"));
            }
        };
        let mut session = TlsSession::new(socket, config, domain, passwords)?;
        session.start().await?;
        self.channel = Channel::Secured(Box::new(session));
        self.last_error = None;
        Ok(())
    }

    /// Reads without blocking. `Ok(0)` is end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let res = match &mut self.channel {
            Channel::Plain(socket) => socket.try_read(buf),
            Channel::Secured(session) => session.read(buf),
            Channel::Closed => Err(not_connected()),
        };
        self.record(res)
    }

    /// Writes without blocking. Partial writes happen: resend the rest.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res = match &mut self.channel {
            Channel::Plain(socket) => socket.try_write(buf),
            Channel::Secured(session) => session.write(buf),
            Channel::Closed => Err(not_connected()),
        };
        self.record(res)
    }

    /// Bytes the next `read` returns without a socket read.
    pub fn pending(&mut self) -> usize {
        match &mut self.channel {
            Channel::Secured(session) => session.pending(),
            _ => 0,
        }
    }

    /// Flushes data the transport buffered on its own.
    pub fn clear_pending_write(&mut self) -> io::Result<()> {
        let res = match &mut self.channel {
            Channel::Plain(_) => Ok(()),
            Channel::Secured(session) => session.clear_pending_write(),
            Channel::Closed => Err(not_connected()),
        };
        self.record(res)
    }

    /// Waits until a read may make progress.
    pub async fn readable(&self) -> io::Result<()> {
        match &self.channel {
            Channel::Plain(socket) => socket.readable().await,
            Channel::Secured(session) => session.socket().readable().await,
            Channel::Closed => Err(not_connected()),
        }
    }

    /// Waits until a write may make progress.
    pub async fn writable(&self) -> io::Result<()> {
        match &self.channel {
            Channel::Plain(socket) => socket.writable().await,
            Channel::Secured(session) => session.socket().writable().await,
            Channel::Closed => Err(not_connected()),
        }
    }

    /// Whether `error` only means "retry later".
    pub fn is_recoverable(error: &io::Error) -> bool {
        crate::error::is_recoverable(error)
    }

    /// The TLS session, when secured.
    pub fn tls(&self) -> Option<&TlsSession<S>> {
        match &self.channel {
            Channel::Secured(session) => Some(&**session),
            _ => None,
        }
    }

    /// The server's certificate, when secured and one was sent.
    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.tls().and_then(TlsSession::peer_certificate)
    }

    /// Channel binding for SCRAM, [`ChannelBinding::None`] over a plain transport.
    pub fn channel_binding(&self) -> ChannelBinding {
        self.tls()
            .map(TlsSession::channel_binding)
            .unwrap_or(ChannelBinding::None)
    }

    /// Shuts the transport down, TLS first.
    pub async fn close(&mut self) {
        if let Channel::Secured(session) = &mut self.channel {
            if let Err(e) = session.stop().await {
                log::debug!("Closing TLS session: {e}");
            }
        }
        self.channel = Channel::Closed;
    }

    fn record<T>(&mut self, res: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &res {
            self.last_error = Some(e.kind());
        }
        res
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport closed")
}
