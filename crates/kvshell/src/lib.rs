#![doc = include_str!("../README.md")]

mod error;
mod handler;
mod listener;
mod metrics;
pub mod pool;
pub mod server;
pub mod sync;

pub use error::{Error, Result};
pub use handler::{BoxError, Handler};
pub use listener::{Listener, is_transient};
pub use pool::manager::WorkerPool;
pub use server::{
    Server, ServerState,
    shutdown::{ExitSignal, ManualSignals, OsSignals, SignalSource},
};
// Public re-export so handlers can name the token type without depending on
// `tokio-util` directly.
pub use tokio_util::sync::CancellationToken;
