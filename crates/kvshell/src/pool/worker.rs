use super::request::{Task, WorkRequest};
use crate::metrics::increment_task_panics;
use core::{any::Any, panic::AssertUnwindSafe};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Shared receiving end of the pool queue.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<WorkRequest>>>;

/// Worker task responsible for executing [`WorkRequest::Run`] tasks.
///
/// All workers compete for the same receiver, so an idle worker always picks
/// up the next queued task. The queue lock is held only while waiting for a
/// request, never while a task runs.
///
/// A panicking task is caught, logged and counted. The worker then continues
/// with the next request.
///
/// The loop ends on [`WorkRequest::Shutdown`] or once every sender is gone
/// and the queue is empty.
pub async fn worker_loop(worker_id: usize, rx: SharedReceiver) {
    tracing::trace!("Worker {worker_id} started");

    loop {
        let work = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };

        match work {
            Some(WorkRequest::Run(task)) => run_task(worker_id, task).await,
            Some(WorkRequest::Shutdown { response }) => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::debug!("Worker {worker_id} shutdown ack dropped");
                }
                break;
            }
            None => break,
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}

async fn run_task(worker_id: usize, task: Task) {
    if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
        increment_task_panics();
        tracing::error!(
            worker_id,
            "Task panicked: {}",
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "<non-string panic payload>");
    }

    async fn explode() {
        panic!("boom");
    }

    #[tokio::test]
    async fn worker_survives_panicking_task() {
        let (tx, rx) = mpsc::channel(4);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));
        let worker = tokio::spawn(worker_loop(0, Arc::clone(&rx)));

        let (done_tx, done_rx) = oneshot::channel();
        tx.send(WorkRequest::Run(Box::pin(explode())))
            .await
            .unwrap();
        tx.send(WorkRequest::Run(Box::pin(async move {
            done_tx.send(()).unwrap();
        })))
        .await
        .unwrap();
        done_rx.await.unwrap();

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(WorkRequest::Shutdown { response: ack_tx })
            .await
            .unwrap();
        ack_rx.await.unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn worker_exits_when_senders_are_gone() {
        let (tx, rx) = mpsc::channel::<WorkRequest>(1);
        let worker = tokio::spawn(worker_loop(7, Arc::new(Mutex::new(rx))));
        drop(tx);
        worker.await.unwrap();
    }
}
