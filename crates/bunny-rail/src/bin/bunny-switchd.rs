//! In-memory switch agent serving the control protocol.
//!
//! Usage:
//!   cargo run -p bunny-rail --bin bunny-switchd -- --listen 127.0.0.1:5555

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bunny_rail::SwitchServer;

/// Switch agent stand-in.
#[derive(Parser)]
#[command(name = "bunny-switchd", version, about = "Serve the point, redirect and function tables from memory")]
struct Cli {
    /// Address:port to accept control connections on.
    #[arg(long, env = "BUNNY_CONTROL_PLANE", default_value = "127.0.0.1:5555")]
    listen: String,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let server = SwitchServer::bind(&cli.listen).with_context(|| format!("cannot bind {}", cli.listen))?;

    tracing::info!("bunny-switchd v{} starting", env!("CARGO_PKG_VERSION"));
    let store = server.run()?;
    tracing::info!(
        robots = ?store.robots(),
        "switch agent stopped"
    );
    Ok(())
}
