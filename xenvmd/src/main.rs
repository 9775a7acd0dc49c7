//! `xenvmd` — the XenVM allocator/journal daemon process.
//!
//! Parses CLI flags, loads and validates configuration, opens the volume
//! group and redo journal, and starts the free-pool top-up controller and
//! the RPC front-end. Runs until the process is signalled to terminate.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use xenvm::allocator::{AllocatorConfig, DEFAULT_TICK_INTERVAL};
use xenvm::config::{ConfigOverrides, Configuration};
use xenvm::dispatch::DaemonState;
use xenvm::error::ConfigError;
use xenvm::host::HostRegistry;
use xenvm::journal::Journal;
use xenvm::vg::VgStore;
use xenvm::{allocator, rpc};

/// Placeholder total-extent count for a freshly initialised volume group.
///
/// Real physical-volume size introspection is block-device I/O and is not
/// implemented here; an already-persisted volume group's snapshot carries
/// its own `total_extents` and this constant is never consulted again
/// after first open.
const DEFAULT_TOTAL_EXTENTS: u64 = 1 << 18;

/// xenvmd — distributed LVM2 volume-group allocator/journal daemon.
#[derive(Parser)]
#[command(name = "xenvmd", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Overrides the configured TCP listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides the configured Unix-domain socket path.
    #[arg(long)]
    path: Option<String>,

    /// Directory for the daemon's state: the VG snapshot, the journal, and
    /// per-host ring files.
    #[arg(long, default_value = "./xenvm-state")]
    state_dir: PathBuf,

    /// Placeholder flag for running detached. Daemonization, pidfile
    /// creation under a Unix session, and pty detachment are not
    /// implemented here; this flag only selects whether a pidfile is
    /// written alongside a configured Unix socket.
    #[arg(long, default_value_t = false)]
    daemon: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "startup failed");
        eprintln!("xenvmd: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ConfigError> {
    let overrides = ConfigOverrides { listen_port: cli.port, listen_path: cli.path };
    let config = Configuration::load(&cli.config, overrides)?;

    std::fs::create_dir_all(&cli.state_dir)
        .map_err(|e| ConfigError::Startup { reason: format!("{}: {e}", cli.state_dir.display()) })?;
    let ring_dir = cli.state_dir.join("rings");
    std::fs::create_dir_all(&ring_dir)
        .map_err(|e| ConfigError::Startup { reason: format!("{}: {e}", ring_dir.display()) })?;

    let vg = Arc::new(
        VgStore::open(cli.state_dir.join("vg.json"), &config.vg_name, DEFAULT_TOTAL_EXTENTS)
            .map_err(|e| ConfigError::Startup { reason: e.to_string() })?,
    );
    let hosts = Arc::new(HostRegistry::new(vg.clone(), ring_dir));

    let vg_for_apply = vg.clone();
    let hosts_for_apply = hosts.clone();
    let (journal, summary) = Journal::start(cli.state_dir.join("journal.ring"), move |op| {
        allocator::apply_op(&vg_for_apply, &hosts_for_apply, op)
    })
    .map_err(|e| ConfigError::Startup { reason: e.to_string() })?;
    info!(applied = summary.applied, "journal replay complete");

    if cli.daemon && config.listen_path.is_some() {
        let pidfile = format!("{}.lock", config.listen_path.as_deref().unwrap_or_default());
        if let Err(e) = std::fs::write(&pidfile, std::process::id().to_string()) {
            error!(pidfile, error = %e, "failed to write pidfile");
        }
    }

    let alloc_config = AllocatorConfig {
        allocation_quantum_extents: config.allocation_quantum_extents(),
        low_water_mark_extents: config.low_water_mark_extents(),
        tick_interval: DEFAULT_TICK_INTERVAL,
    };
    let state = Arc::new(DaemonState::new(vg, hosts, journal, alloc_config));
    state.spawn_allocator();

    let router = rpc::router(state);
    info!(port = ?config.listen_port, path = ?config.listen_path, "xenvmd ready");
    rpc::serve(router, config.listen_port, config.listen_path)
        .await
        .map_err(|e| ConfigError::Startup { reason: e.to_string() })?;

    Ok(())
}
