//! The TLS session state machine on top of a non-blocking socket.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, ProtocolVersion};
use sasl::ChannelBinding;

use super::config::TlsConfig;
use super::password::PasswordCache;
use crate::certificate::Certificate;
use crate::error::is_recoverable;
use crate::socket::{Socket, SocketIo};
use crate::Error;

/// RFC 9266 exporter label.
const EXPORTER_LABEL: &[u8] = b"EXPORTER-Channel-Binding";

/// Lifecycle of a [`TlsSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsState {
    /// Created, handshake not started.
    Unstarted,
    /// Handshake running.
    Handshaking,
    /// Handshake complete, application data flows.
    Established,
    /// The handshake failed; the session is unusable.
    Failed,
    /// Orderly shutdown done.
    Closed,
}

/// Channel binding types this backend can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingType {
    /// RFC 9266, TLS 1.3.
    TlsExporter,
    /// RFC 5929, hash of the server certificate.
    TlsServerEndPoint,
}

impl BindingType {
    /// The channel binding name used in the SCRAM gs2 header.
    pub fn label(self) -> &'static str {
        match self {
            BindingType::TlsExporter => "tls-exporter",
            BindingType::TlsServerEndPoint => "tls-server-end-point",
        }
    }
}

/// A client TLS session that owns its socket.
pub struct TlsSession<S> {
    socket: S,
    conn: ClientConnection,
    state: TlsState,
    binding: Option<BindingType>,
    peer: Option<Certificate>,
}

impl<S> fmt::Debug for TlsSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("state", &self.state)
            .field("binding", &self.binding)
            .field("peer", &self.peer)
            .finish()
    }
}

impl<S: Socket> TlsSession<S> {
    /// Prepares a session for `server_name` without touching the socket.
    ///
    /// Loads the trust anchors and client credentials, prompting through `passwords` for
    /// an encrypted client key.
    pub fn new(
        socket: S,
        config: &TlsConfig,
        server_name: &str,
        passwords: &mut PasswordCache,
    ) -> Result<TlsSession<S>, Error> {
        let name = ServerName::try_from(server_name.to_owned())?;
        let client_config = config.client_config(passwords)?;
        let conn = ClientConnection::new(Arc::new(client_config), name)?;
        Ok(TlsSession {
            socket,
            conn,
            state: TlsState::Unstarted,
            binding: None,
            peer: None,
        })
    }

    /// Runs the whole handshake.
    ///
    /// Only valid once, from [`TlsState::Unstarted`]. Returns when the session is
    /// established or has failed.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.state != TlsState::Unstarted {
            return Err(Error::InvalidState("TLS handshake already started"));
        }
        self.state = TlsState::Handshaking;
        log::debug!("Starting TLS handshake");
        if let Err(e) = self.handshake().await {
            log::debug!("TLS handshake failed: {e}");
            self.state = TlsState::Failed;
            return Err(e);
        }
        self.state = TlsState::Established;
        log::debug!(
            "TLS handshake complete, protocol {:?}",
            self.conn.protocol_version()
        );

        self.peer = self
            .conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .and_then(|der| match Certificate::from_der(der.as_ref()) {
                Ok(cert) => Some(cert),
                Err(e) => {
                    log::warn!("Could not decode the peer certificate: {e}");
                    None
                }
            });
        self.init_channel_binding();
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), Error> {
        loop {
            while self.conn.wants_write() {
                let res = self.conn.write_tls(&mut SocketIo(&self.socket));
                match res {
                    Ok(_) => {}
                    Err(e) if is_recoverable(&e) => self.socket.writable().await?,
                    Err(e) => return Err(e.into()),
                }
            }
            if !self.conn.is_handshaking() {
                return Ok(());
            }
            let res = self.conn.read_tls(&mut SocketIo(&self.socket));
            match res {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
                Ok(_) => {
                    if let Err(e) = self.conn.process_new_packets() {
                        // Try to tell the peer why.
                        let _ = self.flush_tls();
                        return Err(Error::Tls(e));
                    }
                }
                Err(e) if is_recoverable(&e) => self.socket.readable().await?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Sends close_notify. Socket errors are ignored: the session is closed either way.
    pub async fn stop(&mut self) -> Result<(), Error> {
        if self.state != TlsState::Established {
            return Err(Error::InvalidState("TLS session not established"));
        }
        self.conn.send_close_notify();
        loop {
            match self.flush_tls() {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.socket.writable().await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("Error while sending close_notify: {e}");
                    break;
                }
                Ok(()) => break,
            }
        }
        self.state = TlsState::Closed;
        log::debug!("TLS session closed");
        Ok(())
    }

    /// Picks the channel binding type for this session and returns its name.
    ///
    /// `None` before the handshake completed or when no binding type fits the
    /// negotiated protocol.
    pub fn init_channel_binding(&mut self) -> Option<&'static str> {
        if self.state != TlsState::Established {
            return None;
        }
        let binding = match self.conn.protocol_version()? {
            ProtocolVersion::TLSv1_3 => BindingType::TlsExporter,
            ProtocolVersion::TLSv1_2 if self.peer.is_some() => BindingType::TlsServerEndPoint,
            _ => return None,
        };
        if self.binding != Some(binding) {
            log::debug!("Channel binding type {}", binding.label());
        }
        self.binding = Some(binding);
        Some(binding.label())
    }

    /// The binding bytes, `None` unless established with a binding type.
    pub fn channel_binding_data(&self) -> Option<Vec<u8>> {
        if self.state != TlsState::Established {
            return None;
        }
        match self.binding? {
            BindingType::TlsExporter => self
                .conn
                .export_keying_material(vec![0u8; 32], EXPORTER_LABEL, None)
                .map_err(|e| log::debug!("Keying material export failed: {e}"))
                .ok(),
            BindingType::TlsServerEndPoint => self.peer.as_ref().map(Certificate::end_point_hash),
        }
    }

    /// The channel binding to hand to SCRAM, [`ChannelBinding::None`] when unavailable.
    pub fn channel_binding(&self) -> ChannelBinding {
        match (self.binding, self.channel_binding_data()) {
            (Some(BindingType::TlsExporter), Some(data)) => ChannelBinding::TlsExporter(data),
            (Some(BindingType::TlsServerEndPoint), Some(data)) => {
                ChannelBinding::TlsServerEndPoint(data)
            }
            _ => ChannelBinding::None,
        }
    }

    /// Reads decrypted data.
    ///
    /// `WouldBlock` when no complete record is available yet, `Ok(0)` after the peer's
    /// close_notify.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_established()?;
        loop {
            match self.conn.reader().read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                res => return res,
            }
            let res = self.conn.read_tls(&mut SocketIo(&self.socket));
            res?;
            self.conn
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            // Post-handshake messages such as key updates may need an answer.
            if let Err(e) = self.flush_tls() {
                if !is_recoverable(&e) {
                    return Err(e);
                }
            }
        }
    }

    /// Encrypts and queues some of `buf`, returning how much was taken.
    ///
    /// `WouldBlock` when earlier records are still waiting for the socket; retry with
    /// the same data.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_established()?;
        self.flush_tls()?;
        let n = self.conn.writer().write(buf)?;
        if let Err(e) = self.flush_tls() {
            if !is_recoverable(&e) {
                return Err(e);
            }
        }
        Ok(n)
    }

    /// Tries to send every queued record.
    pub fn clear_pending_write(&mut self) -> io::Result<()> {
        self.flush_tls()
    }

    /// Whether encrypted records are still queued for the socket.
    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Decrypted bytes a `read` returns without touching the socket.
    pub fn pending(&mut self) -> usize {
        if self.state != TlsState::Established {
            return 0;
        }
        self.conn
            .process_new_packets()
            .map(|state| state.plaintext_bytes_to_read())
            .unwrap_or(0)
    }

    fn flush_tls(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            let written = self.conn.write_tls(&mut SocketIo(&self.socket))?;
            if written == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
        }
        Ok(())
    }

    fn check_established(&self) -> io::Result<()> {
        if self.state == TlsState::Established {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS session not established",
            ))
        }
    }

    /// Current state.
    pub fn state(&self) -> TlsState {
        self.state
    }

    /// The negotiated protocol version.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// The chosen channel binding type.
    pub fn binding_type(&self) -> Option<BindingType> {
        self.binding
    }

    /// The peer's end-entity certificate, if it sent one.
    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.peer.as_ref()
    }

    /// The underlying socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }
}
