//! abr-proxy
//!
//! An intercepting HTTP proxy for adaptive video streaming.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                  ABR PROXY                    │
//!                         │                                               │
//!     Player request      │  ┌─────────┐   ┌──────────┐   ┌───────────┐  │
//!     ────────────────────┼─▶│   net   │──▶│ session  │──▶│    abr    │  │
//!                         │  │  loop   │   │  client  │   │ controller│  │
//!                         │  └─────────┘   └────┬─────┘   └───────────┘  │
//!                         │                     │ rewritten request       │
//!                         │                     ▼                         │
//!     Player response     │  ┌─────────┐   ┌──────────┐                   │
//!     ◀───────────────────┼──│   net   │◀──│ session  │◀──────────────────┼──── Origin
//!                         │  │  loop   │   │  origin  │  throughput       │
//!                         │  └─────────┘   └──────────┘  samples          │
//!                         │                                               │
//!                         │  config · observability · lifecycle · resolver│
//!                         └──────────────────────────────────────────────┘
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use abr_proxy::config::loader::load_config;
use abr_proxy::config::validation::validate_config;
use abr_proxy::config::ProxyConfig;
use abr_proxy::observability::{logging, metrics};
use abr_proxy::{resolver, ProxyServer};

#[derive(Parser, Debug)]
#[command(name = "abr-proxy")]
#[command(about = "Adaptive bitrate proxy for HTTP video streaming", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to accept players on.
    #[arg(long)]
    listen_port: Option<u16>,

    /// EWMA weight of the newest throughput sample, in (0, 1].
    #[arg(long)]
    alpha: Option<f64>,

    /// Origin address; skips name resolution.
    #[arg(long)]
    www_ip: Option<IpAddr>,

    /// Local address to connect to the origin from.
    #[arg(long)]
    fake_ip: Option<IpAddr>,

    /// Origin hostname.
    #[arg(long)]
    origin_host: Option<String>,

    /// Origin port.
    #[arg(long)]
    origin_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(port) = self.listen_port {
            let current: std::net::SocketAddr = config.listener.bind_address.parse()?;
            config.listener.bind_address = std::net::SocketAddr::new(current.ip(), port).to_string();
        }
        if let Some(alpha) = self.alpha {
            config.abr.alpha = alpha;
        }
        if let Some(ip) = self.www_ip {
            config.origin.www_ip = Some(ip);
        }
        if let Some(ip) = self.fake_ip {
            config.origin.bind_ip = Some(ip);
        }
        if let Some(host) = &self.origin_host {
            config.origin.host = host.clone();
        }
        if let Some(port) = self.origin_port {
            config.origin.port = port;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config)?;

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init_logging(&config.observability);
    tracing::info!("abr-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        origin = %config.origin.host,
        www_ip = ?config.origin.www_ip,
        fake_ip = ?config.origin.bind_ip,
        alpha = config.abr.alpha,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let resolver = resolver::from_config(&config.origin);
    let mut server = ProxyServer::bind(config, resolver)?;
    server.run()?;

    tracing::info!("Shutdown complete");
    Ok(())
}
