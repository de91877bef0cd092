//! Chat relay - Entry Point
//!
//! Binds the TCP listener and runs the accept loop with the ChatServer actor.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use line_relay::{serve, RelayArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_relay=info")),
        )
        .init();

    let args = RelayArgs::parse();

    // Start TCP listener
    let listener = TcpListener::bind(&args.addr).await?;
    info!("Chat relay listening on {}", listener.local_addr()?);

    serve(listener, args.relay_config()).await;

    Ok(())
}
