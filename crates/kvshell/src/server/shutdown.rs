//! Shutdown coordination.
//!
//! Three independent sources can end a `serve` call: a process termination
//! signal, [`Server::stop`](crate::Server::stop), and a fatal accept error.
//! Two watchers fold them into one irrevocable transition:
//!
//! - [`watch_signals`] waits for a signal or the stop request and raises the
//!   shutdown notification.
//! - [`watch_shutdown`] waits for that notification or a fatal error, then
//!   cancels the connection token, closes the handler and finally tells the
//!   accept loop to close the listener.
//!
//! Signal delivery is abstracted behind [`SignalSource`] so hosts and tests can
//! inject their own triggers ([`ManualSignals`]).

use super::ServerState;
use crate::{Error, Handler};
use core::{fmt, future::Future};
use std::{io, sync::Arc};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Process signals that request a graceful shutdown.
///
/// All variants are equivalent: each one triggers the same shutdown path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitSignal {
    Hangup,
    Quit,
    Terminate,
    Interrupt,
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hangup => write!(f, "SIGHUP"),
            Self::Quit => write!(f, "SIGQUIT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// A source of [`ExitSignal`]s.
pub trait SignalSource: Send + Sync + 'static {
    /// Resolves with the first exit signal delivered after the call.
    ///
    /// An error means the source could not be installed; the server then
    /// relies on [`Server::stop`](crate::Server::stop) alone.
    fn recv(&self) -> impl Future<Output = io::Result<ExitSignal>> + Send;
}

/// Operating-system signals: SIGHUP, SIGQUIT, SIGTERM and SIGINT on unix,
/// Ctrl+C elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

impl SignalSource for OsSignals {
    #[cfg(unix)]
    async fn recv(&self) -> io::Result<ExitSignal> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = signal(SignalKind::hangup())?;
        let mut quit = signal(SignalKind::quit())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;

        let signal = tokio::select! {
            _ = hangup.recv() => ExitSignal::Hangup,
            _ = quit.recv() => ExitSignal::Quit,
            _ = terminate.recv() => ExitSignal::Terminate,
            _ = interrupt.recv() => ExitSignal::Interrupt,
        };
        Ok(signal)
    }

    #[cfg(not(unix))]
    async fn recv(&self) -> io::Result<ExitSignal> {
        tokio::signal::ctrl_c().await?;
        Ok(ExitSignal::Interrupt)
    }
}

/// Programmatically raised signals.
///
/// Clones share state: raising on one clone wakes receivers of all of them.
/// A signal raised before anyone listens is still observed.
#[derive(Debug, Clone)]
pub struct ManualSignals {
    tx: Arc<watch::Sender<Option<ExitSignal>>>,
}

impl Default for ManualSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualSignals {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(None)),
        }
    }

    /// Delivers `signal` to every current and future receiver.
    pub fn raise(&self, signal: ExitSignal) {
        self.tx.send_replace(Some(signal));
    }
}

impl SignalSource for ManualSignals {
    async fn recv(&self) -> io::Result<ExitSignal> {
        let mut rx = self.tx.subscribe();
        let signal = *rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| io::Error::other("signal source dropped"))?;
        signal.ok_or_else(|| io::Error::other("signal source reset"))
    }
}

/// Raises `shutdown` on the first exit signal or stop request.
///
/// Returns without raising if `token` is cancelled first, which happens when
/// a fatal accept error started the shutdown on its own.
pub(crate) async fn watch_signals<S: SignalSource>(
    signals: &S,
    stop: &CancellationToken,
    token: &CancellationToken,
    shutdown: &CancellationToken,
) {
    let signal = async {
        match signals.recv().await {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!("Failed to install signal handlers: {e}");
                core::future::pending().await
            }
        }
    };

    tokio::select! {
        signal = signal => tracing::warn!("Received {signal}"),
        () = stop.cancelled() => tracing::debug!("Stop requested"),
        () = token.cancelled() => return,
    }

    shutdown.cancel();
}

/// Runs the close sequence once `shutdown` fires or a fatal error arrives.
///
/// Order is fixed: state moves to [`ServerState::Draining`], the connection
/// `token` is cancelled, the handler is closed, and only then is
/// `close_listener` cancelled. Close failures are logged, never returned.
pub(crate) async fn watch_shutdown<H, C>(
    handler: &H,
    shutdown: &CancellationToken,
    fatal: oneshot::Receiver<Error>,
    token: &CancellationToken,
    close_listener: &CancellationToken,
    state: &watch::Sender<ServerState>,
) where
    H: Handler<C>,
{
    tokio::select! {
        () = shutdown.cancelled() => tracing::warn!("Server closing..."),
        Ok(err) = fatal => tracing::error!("Server error: {err}"),
    }

    state.send_replace(ServerState::Draining);
    token.cancel();

    if let Err(e) = handler.close().await {
        tracing::error!("Failed to close handler: {e}");
    }

    close_listener.cancel();
}
