//! The server lifecycle.
//!
//! [`Server`] ties a [`Handler`], a [`WorkerPool`] and a [`SignalSource`]
//! together and exposes the two operations a host needs: [`Server::serve`]
//! and [`Server::stop`].
//!
//! ## Lifecycle
//!
//! ```text
//!   serve()                 signal | stop() | fatal accept error
//!  Idle ─────► Running ───────────────────────────────► Draining ─► Stopped
//!                │                                          │
//!                └─ accept loop ─► pool ─► Handler::handle  └─ cancel token,
//!                                                              Handler::close,
//!                                                              close listener,
//!                                                              drain tasks
//! ```
//!
//! ## Submodules
//!
//! - [`acceptor`] - the accept loop and connection dispatch.
//! - [`shutdown`] - signal sources and the close sequence.
//! - [`state`] - [`ServerState`].

mod acceptor;
pub mod shutdown;
mod state;

pub use state::ServerState;

use crate::{Error, Handler, Listener, Result, WorkerPool, sync::OnceTrigger};
use acceptor::listen_and_serve;
use core::{future::Future, panic::AssertUnwindSafe, time::Duration};
use futures::FutureExt;
use shutdown::{OsSignals, SignalSource, watch_shutdown, watch_signals};
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{oneshot, watch},
};
use tokio_util::sync::CancellationToken;

/// Delay before retrying after a timeout-class accept error.
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

/// A TCP server shell that dispatches connections to a [`Handler`].
///
/// `serve` runs its startup sequence at most once per instance: concurrent
/// and later calls wait for, and return, the outcome of the first one.
/// `stop` may be called any number of times from anywhere; only the first
/// call has an effect.
///
/// The run itself lives on a spawned task. Dropping a `serve` future only
/// stops that caller from waiting: the server keeps running until a signal,
/// [`stop`](Server::stop) or a fatal error, and any later `serve` call
/// returns the outcome of that run.
pub struct Server<H, S = OsSignals> {
    handler: Arc<H>,
    pool: Arc<WorkerPool>,
    signals: Arc<S>,
    accept_backoff: Duration,
    stop: CancellationToken,
    stop_once: OnceTrigger,
    serve_once: OnceTrigger,
    shared: Arc<Shared>,
}

/// Lifecycle facts published by the run and read by the [`Server`].
struct Shared {
    state: watch::Sender<ServerState>,
    outcome: watch::Sender<Option<Result<()>>>,
    local_addr: OnceLock<SocketAddr>,
}

impl Shared {
    fn finish(&self, result: Result<()>) {
        self.state.send_replace(ServerState::Stopped);
        match &result {
            Ok(()) => tracing::info!("Server stopped"),
            Err(e) => tracing::error!("Server stopped with error: {e}"),
        }
        self.outcome.send_replace(Some(result));
    }
}

impl<H> Server<H, OsSignals> {
    /// Creates a server listening for operating-system exit signals.
    pub fn new(handler: H, pool: Arc<WorkerPool>) -> Self {
        Self {
            handler: Arc::new(handler),
            pool,
            signals: Arc::new(OsSignals),
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
            stop: CancellationToken::new(),
            stop_once: OnceTrigger::new(),
            serve_once: OnceTrigger::new(),
            shared: Arc::new(Shared {
                state: watch::Sender::new(ServerState::Idle),
                outcome: watch::Sender::new(None),
                local_addr: OnceLock::new(),
            }),
        }
    }
}

impl<H, S> Server<H, S> {
    /// Replaces the signal source.
    #[must_use]
    pub fn with_signals<T: SignalSource>(self, signals: T) -> Server<H, T> {
        Server {
            handler: self.handler,
            pool: self.pool,
            signals: Arc::new(signals),
            accept_backoff: self.accept_backoff,
            stop: self.stop,
            stop_once: self.stop_once,
            serve_once: self.serve_once,
            shared: self.shared,
        }
    }

    /// Sets the delay applied after a timeout-class accept error.
    #[must_use]
    pub const fn with_accept_backoff(mut self, backoff: Duration) -> Self {
        self.accept_backoff = backoff;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ServerState {
        *self.shared.state.borrow()
    }

    /// Resolves once the lifecycle has reached `target` or moved past it.
    pub async fn wait_for_state(&self, target: ServerState) {
        let mut rx = self.shared.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state >= target).await;
    }

    /// Address the listener is bound to, once the server is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr.get().copied()
    }

    /// Requests a graceful shutdown without waiting for it.
    ///
    /// Safe to call before, during or after `serve`, and from several tasks
    /// at once. A stop issued before `serve` makes `serve` shut down as soon
    /// as it has started.
    pub fn stop(&self) {
        if self.stop_once.fire(|| self.stop.cancel()) {
            tracing::debug!("Stop requested");
        }
    }
}

impl<H, S> Server<H, S>
where
    H: Send + Sync + 'static,
    S: SignalSource,
{
    /// Starts the handler, binds `address` and serves until shutdown.
    ///
    /// Blocks until every dispatched connection has finished. Returns `Ok(())`
    /// after a signal or [`stop`](Server::stop), and the fatal accept error
    /// otherwise.
    ///
    /// # Errors
    ///
    /// - [`Error::HandlerStart`] if [`Handler::start`] fails; nothing is
    ///   bound.
    /// - [`Error::Bind`] if `address` cannot be bound.
    /// - [`Error::Accept`] if the listener fails with a non-transient error.
    /// - [`Error::Aborted`] if the run panicked.
    pub async fn serve(&self, address: &str) -> Result<()>
    where
        H: Handler<TcpStream>,
    {
        let address = address.to_owned();
        self.launch(move |lifecycle| async move { lifecycle.bind_and_run(&address).await });
        self.outcome().await
    }

    /// Like [`serve`](Server::serve), with an already bound listener.
    ///
    /// Only the first call uses its listener; later calls drop theirs.
    pub async fn serve_with_listener<L>(&self, listener: L) -> Result<()>
    where
        L: Listener,
        H: Handler<L::Conn>,
    {
        self.launch(move |lifecycle| async move {
            lifecycle.start_handler::<L::Conn>().await?;
            lifecycle.run(listener).await
        });
        self.outcome().await
    }

    /// Spawns the run if no earlier call has claimed it.
    fn launch<F>(&self, body: impl FnOnce(Lifecycle<H, S>) -> F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.serve_once.fire(|| {
            let shared = Arc::clone(&self.shared);
            let body = body(Lifecycle {
                handler: Arc::clone(&self.handler),
                pool: Arc::clone(&self.pool),
                signals: Arc::clone(&self.signals),
                accept_backoff: self.accept_backoff,
                stop: self.stop.clone(),
                shared: Arc::clone(&self.shared),
            });

            tokio::spawn(async move {
                let result = AssertUnwindSafe(body)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!("Server run panicked");
                        Err(Error::Aborted)
                    });
                shared.finish(result);
            });
        });
    }

    async fn outcome(&self) -> Result<()> {
        let mut rx = self.shared.outcome.subscribe();
        rx.wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone())
            .unwrap_or(Err(Error::Aborted))
    }
}

/// Everything one run needs, owned so it can outlive the `serve` caller.
struct Lifecycle<H, S> {
    handler: Arc<H>,
    pool: Arc<WorkerPool>,
    signals: Arc<S>,
    accept_backoff: Duration,
    stop: CancellationToken,
    shared: Arc<Shared>,
}

impl<H, S> Lifecycle<H, S>
where
    S: SignalSource,
{
    async fn bind_and_run(&self, address: &str) -> Result<()>
    where
        H: Handler<TcpStream>,
    {
        self.start_handler::<TcpStream>().await?;

        let listener = match TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(e) => {
                if let Err(close_err) = self.handler.close().await {
                    tracing::error!("Failed to close handler: {close_err}");
                }
                return Err(Error::bind(address, e));
            }
        };

        self.run(listener).await
    }

    async fn start_handler<C>(&self) -> Result<()>
    where
        H: Handler<C>,
    {
        self.handler.start().await.map_err(|e| {
            tracing::error!("Handler failed to start: {e}");
            Error::from(e)
        })
    }

    async fn run<L>(&self, listener: L) -> Result<()>
    where
        L: Listener,
        H: Handler<L::Conn>,
    {
        match listener.local_addr() {
            Ok(addr) => {
                let _ = self.shared.local_addr.set(addr);
                tracing::info!(
                    "Server starting on {addr} with {} workers",
                    self.pool.num_workers()
                );
            }
            Err(e) => tracing::warn!("Server starting on an unknown address: {e}"),
        }
        self.shared.state.send_replace(ServerState::Running);

        let token = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let close_listener = CancellationToken::new();
        let (fatal_tx, fatal_rx) = oneshot::channel();

        let ((), (), fatal) = tokio::join!(
            watch_signals(&*self.signals, &self.stop, &token, &shutdown),
            watch_shutdown::<H, L::Conn>(
                &self.handler,
                &shutdown,
                fatal_rx,
                &token,
                &close_listener,
                &self.shared.state,
            ),
            listen_and_serve(
                listener,
                &self.handler,
                &self.pool,
                &token,
                &close_listener,
                fatal_tx,
                self.accept_backoff,
            ),
        );

        fatal.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoxError, ManualSignals};

    struct NoopHandler;

    impl Handler<TcpStream> for NoopHandler {
        async fn start(&self) -> core::result::Result<(), BoxError> {
            Ok(())
        }

        async fn handle(&self, _token: CancellationToken, _conn: TcpStream) {}

        async fn close(&self) -> core::result::Result<(), BoxError> {
            Ok(())
        }
    }

    struct PanickingHandler;

    impl Handler<TcpStream> for PanickingHandler {
        async fn start(&self) -> core::result::Result<(), BoxError> {
            panic!("start failure");
        }

        async fn handle(&self, _token: CancellationToken, _conn: TcpStream) {}

        async fn close(&self) -> core::result::Result<(), BoxError> {
            Ok(())
        }
    }

    fn server() -> Server<NoopHandler, ManualSignals> {
        let pool = Arc::new(WorkerPool::new(2, 4).unwrap());
        Server::new(NoopHandler, pool).with_signals(ManualSignals::new())
    }

    #[tokio::test]
    async fn starts_idle() {
        let server = server();
        assert_eq!(server.state(), ServerState::Idle);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn stop_before_serve_shuts_down_immediately() {
        let server = server();
        server.stop();
        server.serve("127.0.0.1:0").await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_some());
    }

    #[tokio::test]
    async fn serve_after_completion_replays_the_outcome() {
        let server = server();
        server.stop();
        server.serve("127.0.0.1:0").await.unwrap();
        let first = server.local_addr();
        server.serve("127.0.0.1:0").await.unwrap();
        assert_eq!(server.local_addr(), first);
    }

    #[tokio::test]
    async fn bind_failure_is_returned() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let server = server();
        let err = server.serve(&addr).await.unwrap_err();
        assert!(matches!(err, Error::Bind { ref address, .. } if *address == addr));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn panicking_run_reports_aborted_to_every_caller() {
        let pool = Arc::new(WorkerPool::new(1, 1).unwrap());
        let server = Server::new(PanickingHandler, pool).with_signals(ManualSignals::new());

        assert!(matches!(
            server.serve("127.0.0.1:0").await,
            Err(Error::Aborted)
        ));
        assert!(matches!(
            server.serve("127.0.0.1:0").await,
            Err(Error::Aborted)
        ));
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
