//! Listener abstraction used by the accept loop.
//!
//! [`Listener`] is implemented for [`tokio::net::TcpListener`]; other
//! implementations (in-memory or fault-injecting listeners) plug into
//! [`Server::serve_with_listener`](crate::Server::serve_with_listener).

use core::future::Future;
use std::{io, net::SocketAddr};
use tokio::net::{TcpListener, TcpStream};

/// A source of inbound connections.
pub trait Listener: Send + 'static {
    /// Connection type handed to the [`Handler`](crate::Handler).
    type Conn: Send + 'static;

    /// Waits for the next inbound connection.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Conn, SocketAddr)>> + Send;

    /// Returns the locally bound address.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Releases the underlying socket. Called exactly once, during shutdown.
    fn close(self) -> io::Result<()>;
}

impl Listener for TcpListener {
    type Conn = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }

    fn close(self) -> io::Result<()> {
        drop(self);
        Ok(())
    }
}

/// Returns `true` for accept errors worth retrying after a short backoff.
///
/// Timeout-class errors plus the per-connection failures (`ECONNABORTED`,
/// `ECONNRESET`) a peer can cause before the handshake completes. Everything
/// else is fatal to the accept loop.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
