//! Session server demo.
//!
//! Serves the newline-delimited text protocol on TCP and answers every
//! request with `yo`.
//!
//! ```text
//!  TCP ─▶ TcpAcceptor ─▶ Stream ─▶ Server::serve_stream ─▶ SerialDispatcher ─▶ handler
//!                                      │
//!                                      └─▶ ConnectionTracker (drained on shutdown)
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use session_server::config::{self, ServerConfig};
use session_server::lifecycle::signals::shutdown_signal;
use session_server::observability::{logging, metrics};
use session_server::{handler_fn, LineProtocol, ServerBuilder, ServiceError, TcpAcceptor};

#[derive(Parser)]
#[command(name = "session-server")]
#[command(about = "Line-protocol server built on the session establishment core", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind.to_string();
    }

    logging::init(&config.observability);

    tracing::info!("session-server v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        degraded_close_timeout_secs = config.session.degraded_close_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = ServerBuilder::from_config(LineProtocol, &config)?
        .handler(handler_fn(|_request: String| async { Ok::<_, ServiceError>("yo".to_string()) }))
        .build()?;

    let acceptor = TcpAcceptor::new(config.listener.max_connections).close_grace(config.listener.close_grace());
    let listening = server.serve(acceptor).await?;
    tracing::info!(address = %listening.local_addr(), "Listening for connections");

    shutdown_signal().await;

    let drained = listening.shutdown(config.session.drain_timeout()).await;
    tracing::info!(drained, "Shutdown complete");
    Ok(())
}
