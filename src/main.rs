use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tunnelproxy::config::ProxyConfig;

#[derive(Parser, Debug)]
#[command(version = env!("TUNNELPROXY_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
pub struct Opts {
    /// Configuration file (defaults to the per-user config location)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// listen on this network address
    #[arg(long, short = 'b')]
    bind: Option<String>,

    /// Relay buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Idle timeout in seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// OS send/receive buffer size for tunnel sockets
    #[arg(long)]
    socket_buffer_size: Option<usize>,

    /// Only accept CONNECT requests
    #[arg(long)]
    tunnel_only: bool,

    /// Allow targets starting with this prefix (repeatable)
    #[arg(long = "allow", short = 'a')]
    allow: Vec<String>,
}

impl Opts {
    fn apply(self, mut config: ProxyConfig) -> ProxyConfig {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(size) = self.buffer_size {
            config.buffer_size = size;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout = secs;
        }
        if self.socket_buffer_size.is_some() {
            config.socket_buffer_size = self.socket_buffer_size;
        }
        if self.tunnel_only {
            config.tunnel_only = true;
        }
        if !self.allow.is_empty() {
            config.allow = self.allow;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut opts = Opts::parse();
    let config = ProxyConfig::load(opts.config.take().as_deref())?;
    let config = opts.apply(config);

    if config.raise_nofile_limit {
        match rlimit::increase_nofile_limit(u64::MAX) {
            Ok(limit) => info!("open file limit set to {}", limit),
            Err(err) => warn!("cannot raise open file limit: {}", err),
        }
    }

    let shutdown = CancellationToken::new();
    let server = config.server_builder()?.build(shutdown.clone());

    let listener = TcpListener::bind(&config.bind).await?;
    info!("listening on {}", listener.local_addr()?);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
        }
        shutdown.cancel();
    });

    server.run(listener).await;
    Ok(())
}
