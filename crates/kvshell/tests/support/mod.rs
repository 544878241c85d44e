//! Shared fixtures for the server integration tests.

#![allow(dead_code)]

use kvshell::{BoxError, CancellationToken, Handler, Listener};
use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;

/// Ordered record of lifecycle events shared by handler and listener.
#[derive(Default)]
pub struct Events {
    log: Mutex<Vec<&'static str>>,
}

impl Events {
    pub fn push(&self, event: &'static str) {
        self.log.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.snapshot().iter().position(|e| *e == event)
    }
}

/// What a [`Recorder`] does with each connection.
#[derive(Clone, Copy)]
pub enum Behavior {
    /// Return immediately.
    Return,
    /// Wait until the token is cancelled.
    AwaitCancel,
    /// Sleep a random duration in `1..=max_ms`, ignoring the token.
    SleepRandom { max_ms: u64 },
    /// Panic without completing.
    Panic,
}

/// Handler that counts every hook invocation.
pub struct Recorder {
    pub events: Arc<Events>,
    pub behavior: Behavior,
    pub fail_start: Option<&'static str>,
    pub starts: AtomicUsize,
    pub closes: AtomicUsize,
    pub entered: AtomicUsize,
    pub completed: AtomicUsize,
    pub cancelled_on_entry: AtomicUsize,
    pub seen: Mutex<Vec<u32>>,
}

impl Recorder {
    pub fn new(events: Arc<Events>, behavior: Behavior) -> Self {
        Self {
            events,
            behavior,
            fail_start: None,
            starts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            entered: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            cancelled_on_entry: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(events: Arc<Events>, message: &'static str) -> Self {
        Self {
            fail_start: Some(message),
            ..Self::new(events, Behavior::Return)
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn run(&self, token: &CancellationToken) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if token.is_cancelled() {
            self.cancelled_on_entry.fetch_add(1, Ordering::SeqCst);
        }

        match self.behavior {
            Behavior::Return => {}
            Behavior::AwaitCancel => token.cancelled().await,
            Behavior::SleepRandom { max_ms } => {
                let ms = rand::random_range(1..=max_ms);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Behavior::Panic => panic!("handler failure"),
        }

        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Handler<u32> for Recorder {
    async fn start(&self) -> Result<(), BoxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.events.push("handler.start");
        match self.fail_start {
            Some(message) => Err(message.into()),
            None => Ok(()),
        }
    }

    async fn handle(&self, token: CancellationToken, conn: u32) {
        self.seen.lock().unwrap().push(conn);
        self.run(&token).await;
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.events.push("handler.close");
        Ok(())
    }
}

impl Handler<tokio::net::TcpStream> for Recorder {
    async fn start(&self) -> Result<(), BoxError> {
        <Self as Handler<u32>>::start(self).await
    }

    async fn handle(&self, token: CancellationToken, _conn: tokio::net::TcpStream) {
        self.run(&token).await;
    }

    async fn close(&self) -> Result<(), BoxError> {
        <Self as Handler<u32>>::close(self).await
    }
}

/// Listener replaying a script of accept results, then pending forever.
pub struct ScriptedListener {
    script: mpsc::UnboundedReceiver<io::Result<u32>>,
    events: Arc<Events>,
    pub accepted: Arc<AtomicUsize>,
}

impl ScriptedListener {
    pub fn new(events: Arc<Events>) -> (Self, mpsc::UnboundedSender<io::Result<u32>>) {
        let (tx, script) = mpsc::unbounded_channel();
        let listener = Self {
            script,
            events,
            accepted: Arc::new(AtomicUsize::new(0)),
        };
        (listener, tx)
    }
}

impl Listener for ScriptedListener {
    type Conn = u32;

    async fn accept(&mut self) -> io::Result<(u32, SocketAddr)> {
        match self.script.recv().await {
            Some(Ok(conn)) => {
                self.accepted.fetch_add(1, Ordering::SeqCst);
                Ok((conn, SocketAddr::from(([127, 0, 0, 1], 40000))))
            }
            Some(Err(e)) => Err(e),
            None => core::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 6379)))
    }

    fn close(self) -> io::Result<()> {
        self.events.push("listener.close");
        Ok(())
    }
}

/// Polls `condition` every millisecond until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
