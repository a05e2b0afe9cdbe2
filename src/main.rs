/*
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gridctld::config::ClusterConfig;
use gridctld::controller::Controller;
use gridctld::notifier::{LoggingTransport, Notifier};
use gridctld::pidfile::Pidfile;
use gridctld::selector::linear::LinearSelector;
use gridctld::selector::AnySelector;

/// Cluster workload manager controller daemon.
#[derive(Debug, Parser)]
#[command(name = "gridctld", version, about)]
struct Cli {
    /// Path to the cluster topology YAML file.
    #[arg(long, default_value = "/etc/gridctld/cluster.yaml")]
    config: PathBuf,

    /// Path to the daemon's pidfile.
    #[arg(long, default_value = "/var/run/gridctld.pid")]
    pidfile: PathBuf,

    /// Path to the reservation persistence snapshot.
    #[arg(long, default_value = "/var/spool/gridctld/reservations.bin")]
    reservation_state: PathBuf,

    /// Log level filter (trace, debug, info, warn, error), or an
    /// `EnvFilter` directive string.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run in the foreground without taking the pidfile lock, for
    /// local testing.
    #[arg(long)]
    foreground: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let _pidfile = if cli.foreground {
        None
    } else {
        Some(Pidfile::create(&cli.pidfile)?)
    };

    let mut cluster = ClusterConfig::new();
    cluster.load_from_file(&cli.config)?;
    tracing::info!(nodes = cluster.node_count(), partitions = cluster.partitions().len(), "cluster loaded");

    let controller = Controller::new(
        cluster,
        AnySelector::Linear(LinearSelector),
        Notifier::new(Box::new(LoggingTransport)),
    );

    if cli.reservation_state.exists() {
        controller.load_reservations(&cli.reservation_state)?;
        tracing::info!(path = %cli.reservation_state.display(), "reservation state restored");
    }

    tracing::info!("gridctld controller ready");
    let _ = controller;
    Ok(())
}
