//! The connection-processing capability consumed by [`Server`](crate::Server).
//!
//! A [`Handler`] owns everything that happens *on* a connection: protocol
//! decoding, command execution, persistence. The server only decides *when*
//! it runs and hands it a cancellation token that fires once shutdown begins.

use core::future::Future;
use tokio_util::sync::CancellationToken;

/// Boxed error returned by handler lifecycle hooks.
pub type BoxError = Box<dyn core::error::Error + Send + Sync>;

/// Per-connection processing capability.
///
/// The server calls the hooks in a fixed order:
///
/// - [`start`](Handler::start) exactly once, before anything is bound.
/// - [`handle`](Handler::handle) once per accepted connection, possibly many
///   at the same time.
/// - [`close`](Handler::close) exactly once during shutdown, after the token
///   handed to `handle` is cancelled and before the listener is closed.
///
/// Cancellation is cooperative. A `handle` future that never observes its
/// token keeps `serve` from returning.
pub trait Handler<C>: Send + Sync + 'static {
    /// Initializes downstream resources. Errors abort `serve` before bind.
    fn start(&self) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Processes one connection until it ends or `token` is cancelled.
    fn handle(&self, token: CancellationToken, conn: C) -> impl Future<Output = ()> + Send;

    /// Releases downstream resources. Errors are logged by the server.
    fn close(&self) -> impl Future<Output = Result<(), BoxError>> + Send;
}
