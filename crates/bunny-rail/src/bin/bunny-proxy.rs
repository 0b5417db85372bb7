//! Upload proxy: receives trajectory batches and streams them into the
//! controller's point table.
//!
//! Usage:
//!   cargo run -p bunny-rail --bin bunny-proxy -- --listen 127.0.0.1:10000 --control-plane 127.0.0.1:5555

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bunny_rail::{Linkage, ProxyConfig, SessionManager, TcpConnector, UploadServer};

/// Trajectory upload proxy.
#[derive(Parser)]
#[command(name = "bunny-proxy", version, about = "Stream uploaded trajectories into the controller ring buffer")]
struct Cli {
    /// JSON config file; flags and BUNNY_* variables override it.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address:port to accept uploads on.
    #[arg(long)]
    listen: Option<String>,

    /// Address:port of the switch agent.
    #[arg(long)]
    control_plane: Option<String>,

    /// Robot path the uploads apply to.
    #[arg(long)]
    robot_id: Option<i64>,

    /// Point-table capacity per robot.
    #[arg(long)]
    capacity: Option<u32>,

    /// Duration of the last point of each batch (ms).
    #[arg(long)]
    last_duration_ms: Option<u64>,

    /// Largest accepted payload (bytes).
    #[arg(long)]
    max_payload: Option<usize>,

    /// Row linkage: "forward" or "looping".
    #[arg(long)]
    linkage: Option<Linkage>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::from_json_file(path)
                .with_context(|| format!("cannot load {}", path.display()))?,
            None => ProxyConfig::default(),
        };
        config.apply_env();

        if let Some(v) = &self.listen {
            config.listen = v.clone();
        }
        if let Some(v) = &self.control_plane {
            config.control_plane = v.clone();
        }
        if let Some(v) = self.robot_id {
            config.robot_id = v;
        }
        if let Some(v) = self.capacity {
            config.capacity = v;
        }
        if let Some(v) = self.last_duration_ms {
            config.last_duration_ms = v;
        }
        if let Some(v) = self.max_payload {
            config.max_payload = v;
        }
        if let Some(v) = self.linkage {
            config.linkage = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    let robot_id = config.wire_robot_id()?;

    let timeout = (config.connect_timeout_ms > 0).then(|| Duration::from_millis(config.connect_timeout_ms));
    let connector = TcpConnector::new(config.control_plane.as_str(), timeout)
        .with_context(|| format!("bad control plane address {}", config.control_plane))?;
    let session = SessionManager::new(connector, config.capacity, config.parse_options())?;
    let mut server = UploadServer::bind(&config.listen, session, robot_id, config.max_payload)
        .with_context(|| format!("cannot bind {}", config.listen))?;

    tracing::info!(
        "bunny-proxy v{} forwarding to {}",
        env!("CARGO_PKG_VERSION"),
        config.control_plane
    );
    server.run()?;
    Ok(())
}
