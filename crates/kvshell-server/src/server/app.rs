//! Wires configuration, worker pool and handler into a runnable server.

use super::config::ServerConfig;
use kvshell::{Handler, Server, WorkerPool};
use std::sync::Arc;
use tokio::net::TcpStream;

/// A configured [`Server`] plus the pool it dispatches onto.
pub struct Application<H> {
    server: Server<H>,
    pool: Arc<WorkerPool>,
    config: ServerConfig,
}

impl<H> Application<H>
where
    H: Handler<TcpStream>,
{
    /// Builds the worker pool and server described by `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(handler: H, config: ServerConfig) -> kvshell::Result<Self> {
        let pool = Arc::new(
            WorkerPool::new(config.num_workers, config.queue_depth)?
                .with_shutdown_timeout(config.shutdown_timeout),
        );
        let server =
            Server::new(handler, Arc::clone(&pool)).with_accept_backoff(config.accept_backoff);

        Ok(Self {
            server,
            pool,
            config,
        })
    }

    pub fn server(&self) -> &Server<H> {
        &self.server
    }

    /// Serves on the configured address until a signal, [`stop`] or a fatal
    /// error.
    ///
    /// [`stop`]: Application::stop
    pub async fn run(&self) -> kvshell::Result<()> {
        log_startup_info(&self.config);
        self.server.serve(&self.config.address()).await
    }

    /// Requests a graceful shutdown; `run` returns once draining is done.
    pub fn stop(&self) {
        self.server.stop();
    }

    /// Stops the worker pool. Call after `run` has returned.
    pub async fn shutdown(&self) -> kvshell::Result<()> {
        self.pool.shutdown().await
    }
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting kvshell on {} with full config: {:#?}",
            config.address(),
            config
        );
    } else {
        tracing::info!(
            "Starting kvshell on {} with {} workers",
            config.address(),
            config.num_workers
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::handler::EchoHandler;
    use core::time::Duration;
    use kvshell::ServerState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(port: u16) -> ServerConfig {
        ServerConfig {
            bind: String::from("127.0.0.1"),
            port,
            num_workers: 4,
            queue_depth: 8,
            accept_backoff: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn echoes_over_tcp_and_stops_cleanly() {
        let app = Arc::new(Application::new(EchoHandler::default(), config(0)).unwrap());

        let running = tokio::spawn({
            let app = Arc::clone(&app);
            async move { app.run().await }
        });
        app.server().wait_for_state(ServerState::Running).await;
        let addr = app.server().local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"PING\r\n").await.unwrap();
        let mut reply = [0_u8; 6];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"PING\r\n");

        app.stop();
        running.await.unwrap().unwrap();
        app.shutdown().await.unwrap();

        // The handler closed the connection during the drain.
        assert_eq!(client.read(&mut reply).await.unwrap(), 0);
        assert_eq!(app.server().handler().connections(), 1);
        assert_eq!(app.server().handler().bytes_echoed(), 6);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let app = Application::new(EchoHandler::default(), config(port)).unwrap();
        let err = app.run().await.unwrap_err();
        assert!(matches!(err, kvshell::Error::Bind { .. }));
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_an_empty_pool() {
        let config = ServerConfig {
            num_workers: 0,
            ..config(0)
        };
        assert!(matches!(
            Application::new(EchoHandler::default(), config),
            Err(kvshell::Error::InvalidWorkerCount)
        ));
    }
}
