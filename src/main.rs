//! pine - log the 9P2000 traffic between a client and a server
//!
//! # Usage
//!
//! ```bash
//! # Listen on TCP, forward to a Unix socket
//! pine --local tcp!localhost!5640 --remote unix!/tmp/ns.glenda/acme
//!
//! # Fixed-size observer buffers, JSON logs on stderr
//! pine --local unix!/tmp/pine.sock --remote tcp!fs!564 --msize 8192 --json-logs
//! ```
//!
//! Rendered messages go to stdout, logs to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use pine::protocol::DEFAULT_MAX_FRAME_LEN;
use pine::{Address, BufferMode, ProxyBuilder, ProxyConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// pine - transparent socket relay that prints 9P2000 messages
#[derive(Parser, Debug)]
#[command(name = "pine")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Local address to listen on (tcp!host!port or unix!/path/file.sock)
    #[arg(long)]
    local: Address,

    /// Remote address to forward to (tcp!host!port or unix!/path/file.sock)
    #[arg(long)]
    remote: Address,

    /// Fixed observer buffer size in bytes; growable buffers when omitted
    #[arg(long)]
    msize: Option<usize>,

    /// Largest frame to decode; larger frames are skipped
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    max_frame: usize,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs)?;

    let config = proxy_config(&cli)?;
    let proxy = ProxyBuilder::from_config(config)
        .bind()
        .await
        .with_context(|| format!("could not listen on {}", cli.local))?;

    tracing::info!(
        local = %cli.local,
        remote = %cli.remote,
        msize = ?cli.msize,
        "Listening"
    );

    tokio::select! {
        _ = proxy.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("could not wait for ctrl-c")?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

/// Build and check the proxy settings before touching any socket.
fn proxy_config(cli: &Cli) -> Result<ProxyConfig> {
    let mut config = ProxyConfig::new(cli.local.clone(), cli.remote.clone());
    config.observer.max_frame_len = cli.max_frame;
    if let Some(msize) = cli.msize {
        config.observer.buffer = BufferMode::Fixed(msize);
    }
    config
        .validate()
        .context("invalid observer settings, check --msize and --max-frame")?;
    Ok(config)
}

/// Initialize the tracing subscriber for logging to stderr
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
