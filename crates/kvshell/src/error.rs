//! Error types for the server runtime.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the connection lifecycle can report to its host. Wrapped sources are kept
//! behind `Arc` so that the enum stays `Clone`: the outcome of the first
//! `serve` call is replayed to every later caller.
//!
//! ## Error Cases
//! - `HandlerStart`: the connection handler could not initialize.
//! - `Bind`: the listening address could not be bound.
//! - `Accept`: the listener failed with a non-transient error.
//! - `InvalidWorkerCount` / `InvalidQueueDepth`: bad pool construction input.
//! - `PoolClosed`: work was submitted after the pool was shut down.
//! - `Aborted`: the server run panicked before reporting an outcome.

use std::{io, sync::Arc};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the server runtime.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// [`Handler::start`](crate::Handler::start) failed; nothing was bound.
    #[error("{0}")]
    HandlerStart(#[source] Arc<dyn core::error::Error + Send + Sync>),

    /// Binding the listening socket failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// The listener returned an error that is not timeout-class.
    #[error("accept failed: {0}")]
    Accept(#[source] Arc<io::Error>),

    /// A worker pool needs at least one worker.
    #[error("worker count must be greater than 0")]
    InvalidWorkerCount,

    /// A worker pool needs room for at least one queued task.
    #[error("queue depth must be greater than 0")]
    InvalidQueueDepth,

    /// The worker pool no longer accepts work.
    #[error("worker pool is closed")]
    PoolClosed,

    /// The server run panicked, so it has no outcome of its own.
    #[error("server run aborted")]
    Aborted,
}

impl Error {
    pub(crate) fn bind(address: &str, source: io::Error) -> Self {
        Self::Bind {
            address: address.to_owned(),
            source: Arc::new(source),
        }
    }
}

impl From<crate::BoxError> for Error {
    fn from(err: crate::BoxError) -> Self {
        Self::HandlerStart(Arc::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_start_displays_the_inner_message() {
        let err = Error::from(crate::BoxError::from("init failed"));
        assert_eq!(err.to_string(), "init failed");
        assert!(matches!(err, Error::HandlerStart(_)));
    }

    #[test]
    fn clones_share_the_same_source() {
        let err = Error::Accept(Arc::new(io::Error::other("boom")));
        let clone = err.clone();
        match (&err, &clone) {
            (Error::Accept(a), Error::Accept(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn bind_error_names_the_address() {
        let err = Error::bind("127.0.0.1:1", io::Error::from(io::ErrorKind::AddrInUse));
        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:1"));
    }
}
