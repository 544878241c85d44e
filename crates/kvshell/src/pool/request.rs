use core::{future::Future, pin::Pin};
use tokio::sync::oneshot;

/// A unit of work accepted by the pool.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Messages delivered to workers through the shared queue.
pub enum WorkRequest {
    /// Run the task to completion.
    Run(Task),
    /// Stop the receiving worker and acknowledge on `response`.
    Shutdown { response: oneshot::Sender<()> },
}

impl core::fmt::Debug for WorkRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Run(_) => f.write_str("WorkRequest::Run"),
            Self::Shutdown { .. } => f.write_str("WorkRequest::Shutdown"),
        }
    }
}
