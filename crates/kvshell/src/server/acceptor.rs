use crate::{
    Error, Handler, Listener, WorkerPool, is_transient,
    metrics::{
        decrement_connections_inflight, increment_accept_errors, increment_connections_accepted,
        increment_connections_inflight,
    },
};
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

/// Accepts connections until `close_listener` fires, then closes the
/// listener and waits for every dispatched connection task to finish.
///
/// Each accepted connection becomes one pool task running
/// [`Handler::handle`] with a clone of `token`. Transient accept errors are
/// retried after `backoff`. The first fatal error is sent once on `fatal` and
/// stops accepting; the loop then idles until the shutdown watcher asks for
/// the listener to be closed.
///
/// Returns the fatal error, if any.
pub(crate) async fn listen_and_serve<L, H>(
    mut listener: L,
    handler: &Arc<H>,
    pool: &WorkerPool,
    token: &CancellationToken,
    close_listener: &CancellationToken,
    fatal: oneshot::Sender<Error>,
    backoff: Duration,
) -> Option<Error>
where
    L: Listener,
    H: Handler<L::Conn>,
{
    let tracker = TaskTracker::new();
    let mut fatal_tx = Some(fatal);
    let mut fatal_err = None;

    loop {
        // `biased` so a closed listener wins over a ready accept.
        let accepted = tokio::select! {
            biased;
            () = close_listener.cancelled() => break,
            accepted = listener.accept(), if fatal_err.is_none() => accepted,
        };

        match accepted {
            Ok((conn, peer)) => {
                increment_connections_accepted();
                tracing::debug!("Accepted connection from {peer}");

                let handler = Arc::clone(handler);
                let token = token.clone();
                let task = tracker.track_future(
                    async move {
                        let _inflight = InflightGuard::new();
                        handler.handle(token, conn).await;
                    }
                    .instrument(tracing::debug_span!("connection", %peer)),
                );

                if let Err(e) = pool.submit(task).await {
                    tracing::error!("Dropping connection from {peer}: {e}");
                }
            }
            Err(e) if is_transient(&e) => {
                increment_accept_errors(true);
                tracing::debug!("Transient accept error, retrying in {backoff:?}: {e}");

                tokio::select! {
                    biased;
                    () = close_listener.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
            }
            Err(e) => {
                increment_accept_errors(false);
                let err = Error::Accept(Arc::new(e));
                if let Some(tx) = fatal_tx.take() {
                    let _ = tx.send(err.clone());
                }
                fatal_err = Some(err);
            }
        }
    }

    if let Err(e) = listener.close() {
        tracing::error!("Failed to close listener: {e}");
    }

    tracker.close();
    if !tracker.is_empty() {
        tracing::info!("Waiting for {} connections to drain", tracker.len());
    }
    tracker.wait().await;

    fatal_err
}

/// Keeps the in-flight gauge balanced even when a handler panics.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        increment_connections_inflight();
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        decrement_connections_inflight();
    }
}
