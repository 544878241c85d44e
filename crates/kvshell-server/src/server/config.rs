use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `kvshell-server` binary.
///
/// These settings control where the server listens and how much connection
/// work it runs concurrently. All values are parsed from CLI arguments or
/// environment variables (a `.env` file is honoured), with defaults suitable
/// for production.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "kvshell-server",
    version,
    about = "A Redis-style TCP server shell with graceful shutdown"
)]
pub struct CliArgs {
    /// Host or IP address to bind.
    ///
    /// Environment variable: `KVSHELL_BIND`
    #[arg(long, env = "KVSHELL_BIND", default_value_t = String::from("0.0.0.0"))]
    pub bind: String,

    /// TCP port to listen on. `0` picks an ephemeral port.
    ///
    /// Environment variable: `KVSHELL_PORT`
    #[arg(long, env = "KVSHELL_PORT", default_value_t = 6379)]
    pub port: u16,

    /// Number of pool workers, i.e. the maximum number of connections served
    /// at the same time.
    ///
    /// Connections are long-lived, so the default is generous: 64 per CPU.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = num_cpus::get() * 64)]
    pub num_workers: usize,

    /// Number of accepted connections that may wait for a free worker.
    ///
    /// Once the queue is full the accept loop stops accepting until a worker
    /// frees up, leaving further clients in the kernel backlog.
    ///
    /// Environment variable: `QUEUE_DEPTH`
    #[arg(long, env = "QUEUE_DEPTH", default_value_t = 1024)]
    pub queue_depth: usize,

    /// Delay in milliseconds before retrying after a transient accept error.
    ///
    /// Environment variable: `ACCEPT_BACKOFF_MS`
    #[arg(long, env = "ACCEPT_BACKOFF_MS", default_value_t = 5)]
    pub accept_backoff_ms: u64,

    /// Seconds to wait for each worker to acknowledge pool shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub num_workers: usize,
    pub queue_depth: usize,
    pub accept_backoff: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// The `host:port` string handed to [`kvshell::Server::serve`].
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.bind.trim().is_empty() {
            bail!("KVSHELL_BIND must not be empty");
        }

        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.queue_depth == 0 {
            bail!("QUEUE_DEPTH must be greater than 0");
        }

        if args.shutdown_timeout == 0 {
            bail!("SHUTDOWN_TIMEOUT must be greater than 0");
        }

        Ok(Self {
            bind: args.bind,
            port: args.port,
            num_workers: args.num_workers,
            queue_depth: args.queue_depth,
            accept_backoff: Duration::from_millis(args.accept_backoff_ms),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
