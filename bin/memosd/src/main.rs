//! MemOSD - in-memory object storage daemon
//!
//! This binary runs one storage node: it joins the cluster through the
//! monitors and serves object reads and writes from RAM until stopped.

use anyhow::{Context, Result, bail};
use clap::Parser;
use memosd_common::{OsdOptions, parse_osd_id};
use memosd_server::OsdServer;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "memosd")]
#[command(about = "MemOSD in-memory object storage daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/memosd/osd.toml")]
    config: String,

    /// Monitor addresses, comma separated
    #[arg(long)]
    mon_addrs: Option<String>,

    /// Name of this daemon: its numeric OSD id
    #[arg(long)]
    name: Option<String>,

    /// Cluster fsid
    #[arg(long)]
    fsid: Option<Uuid>,

    /// Listen address for peer connections
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Directory holding object-class plugins
    #[arg(long)]
    class_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Treat writes of 4 KiB and larger as no-ops (network benchmarking)
    #[arg(long)]
    noop_write: bool,

    /// Placement weight announced to the monitors
    #[arg(long)]
    weight: Option<String>,
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    osd: OsdSection,
}

#[derive(Debug, Deserialize, Default)]
struct OsdSection {
    #[serde(default)]
    mon_addrs: Vec<SocketAddr>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fsid: Option<Uuid>,
    #[serde(default)]
    listen: Option<SocketAddr>,
    #[serde(default)]
    class_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    noop_write: bool,
    #[serde(default = "default_weight")]
    weight: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_weight() -> String {
    "0.0010".to_string()
}

fn default_listen() -> SocketAddr {
    "0.0.0.0:6802".parse().unwrap()
}

fn parse_mon_addrs(value: &str) -> Result<Vec<SocketAddr>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .with_context(|| format!("invalid monitor address {s:?}"))
        })
        .collect()
}

fn merge_options(args: Args, config: Config) -> Result<(OsdOptions, String)> {
    // CLI takes precedence over the config file.
    let mon_addrs = match &args.mon_addrs {
        Some(value) => parse_mon_addrs(value)?,
        None => config.osd.mon_addrs,
    };
    if mon_addrs.is_empty() {
        bail!("no 'mon_addrs' option is provided");
    }

    let name = args
        .name
        .or(config.osd.name)
        .context("no 'name' option is provided, which should be an id of osd")?;
    let osd_id = parse_osd_id(&name)?;

    let log_level = if args.log_level != "info" {
        args.log_level
    } else {
        config.osd.log_level
    };

    let options = OsdOptions {
        mon_addrs,
        osd_id,
        fsid: args.fsid.or(config.osd.fsid).unwrap_or_else(Uuid::nil),
        listen: args
            .listen
            .or(config.osd.listen)
            .unwrap_or_else(default_listen),
        class_dir: args.class_dir.or(config.osd.class_dir),
        log_level: log_level.clone(),
        noop_write: args.noop_write || config.osd.noop_write,
        weight: args.weight.unwrap_or(config.osd.weight),
    };
    Ok((options, log_level))
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

async fn run(options: OsdOptions) -> Result<()> {
    info!("Starting MemOSD");
    info!(osd = options.osd_id, fsid = %options.fsid, "identity");
    info!(mons = ?options.mon_addrs, "monitors");
    if options.noop_write {
        warn!("noop-write enabled: large writes will be discarded");
    }
    if options.class_dir.is_some() {
        warn!("class_dir configured but no class loader is built in; CALL ops will be rejected");
    }

    let mut server = OsdServer::new(options, None)?;
    server.start().await.context("failed to start osd server")?;

    shutdown_signal().await;
    info!("Shutting down...");
    server.stop().await;
    info!("OSD shut down gracefully");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load config file if it exists.
    let config: Config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {e}");
            Config::default()
        })
    } else {
        Config::default()
    };

    let (options, log_level) = merge_options(args, config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, run(options))
}
