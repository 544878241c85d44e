//! Bounded worker pool.
//!
//! A fixed number of Tokio tasks pull type-erased futures from one shared,
//! bounded queue and run them to completion one at a time. This gives the
//! server a hard cap on concurrently executing connection handlers and
//! backpressure on the accept loop when that cap is reached.
//!
//! ## Structure
//!
//! - [`manager`] - [`WorkerPool`](manager::WorkerPool), the submission side.
//! - [`worker`] - the per-worker receive/execute loop.
//! - [`request`] - messages flowing from the manager to workers.

pub mod manager;
pub mod request;
pub mod worker;
