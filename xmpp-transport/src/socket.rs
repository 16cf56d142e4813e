//! The non-blocking byte channel under a transport.

use std::future::Future;
use std::io;

use tokio::net::TcpStream;

/// A connected, non-blocking socket.
///
/// `try_read`/`try_write` never block: they fail with [`io::ErrorKind::WouldBlock`] when
/// the socket is not ready, and `readable`/`writable` wait for readiness.
pub trait Socket {
    /// Reads what is available, `Ok(0)` on end of stream.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes as much as the socket accepts right now.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Resolves once the socket may be readable.
    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Resolves once the socket may be writable.
    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send;
}

impl Socket for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send {
        TcpStream::readable(self)
    }

    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send {
        TcpStream::writable(self)
    }
}

/// Blocking-style view of a [`Socket`], as rustls wants for `read_tls`/`write_tls`.
pub(crate) struct SocketIo<'a, S>(pub &'a S);

impl<S: Socket> io::Read for SocketIo<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl<S: Socket> io::Write for SocketIo<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
