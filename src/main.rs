use std::io::{self, BufRead, Write};
use std::net::IpAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metric_relay::{
    agent::parse_interval_command,
    collector::CommandSource,
    config::Config,
    protocol::MetricKind,
    telemetry, IntervalControl, Node,
};

#[derive(Parser)]
#[command(
    name = "metric-relay",
    about = "Peer-to-peer relay for kernel metric samples",
    version
)]
struct Cli {
    /// UDP port of this process's relay (0 picks a free port)
    #[arg(short = 'p', long)]
    relay_port: Option<u16>,

    /// Seconds between two samples
    #[arg(short, long)]
    interval: Option<u64>,

    /// Well-known discovery port
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Host of the discovery authority
    #[arg(long)]
    discovery_host: Option<IpAddr>,

    /// Serve the inspection API on this port
    #[arg(long)]
    http_port: Option<u16>,

    /// Metric to collect; asked on stdin when absent
    #[arg(short, long)]
    metric: Option<String>,

    /// Shell command replacing the default collector
    #[arg(long)]
    collector_command: Option<String>,

    /// Do not print received samples
    #[arg(long)]
    no_display: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.relay_port {
            config.relay_port = port;
        }
        if let Some(secs) = self.interval {
            config.sample_interval_secs = secs;
        }
        if let Some(port) = self.discovery_port {
            config.discovery_port = port;
        }
        if let Some(host) = self.discovery_host {
            config.discovery_host = host;
        }
        if self.http_port.is_some() {
            config.http_port = self.http_port;
        }
        if self.collector_command.is_some() {
            config.collector_command = self.collector_command.clone();
        }
        if self.no_display {
            config.display = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load()?;
    cli.apply(&mut config);
    config.validate()?;
    tracing::info!("Configuration loaded");

    let kind = match (&cli.metric, config.metric) {
        (Some(name), _) => MetricKind::parse(name)?,
        (None, Some(kind)) => kind,
        (None, None) => tokio::task::spawn_blocking(prompt_metric_kind).await??,
    };
    config.metric = Some(kind);

    let source = match &config.collector_command {
        Some(command) => CommandSource::shell(kind, command),
        None => CommandSource::for_kind(kind),
    };

    let metrics = match config.http_port {
        Some(_) => Some(telemetry::install_recorder()?),
        None => None,
    };

    let node = Node::start_with_metrics(&config, source, metrics)
        .await
        .context("failed to start node")?;
    tracing::info!(
        relay = %node.relay_addr(),
        discovery = %node.discovery_addr(),
        metric = %kind,
        "Sending metrics, type :<seconds> to change the interval"
    );

    spawn_interval_reader(node.interval_control());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    node.shutdown().await;

    Ok(())
}

fn prompt_metric_kind() -> Result<MetricKind> {
    print!("Select a metric to send (cpu): ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(MetricKind::parse(&line)?)
}

/// Reads `:<seconds>` commands from stdin on a plain thread so a pending read
/// never holds the runtime open at shutdown.
fn spawn_interval_reader(control: IntervalControl) {
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_interval_command(&line) {
                Some(interval) => {
                    control.set(interval);
                    tracing::info!(interval_secs = interval.as_secs(), "Sampling interval changed");
                }
                None if line.trim().is_empty() => {}
                None => tracing::warn!(input = %line.trim(), "Expected :<seconds>"),
            }
        }
    });
}
