//! DRIFT node entry point.

use clap::Parser;
use dft_cache::Checker;
use dft_raft::{Node, NodeConfig};
use drift::config::Config;
use drift::{files, server, shutdown};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "drift")]
#[command(about = "DRIFT - a small distributed filesystem")]
#[command(version)]
struct Args {
    /// Unique server ID.
    #[arg(long, env = "DRIFT_ID")]
    id: Option<String>,

    /// Client RPC listen address.
    #[arg(long, env = "DRIFT_CLIENT_ADDR")]
    client_addr: Option<String>,

    /// Consensus RPC listen address.
    #[arg(long, env = "DRIFT_RAFT_ADDR")]
    raft_addr: Option<String>,

    /// Address peers use to reach this node (defaults to the raft address).
    #[arg(long, env = "DRIFT_RAFT_ADVERTISE")]
    raft_advertise: Option<String>,

    /// Metrics exporter address; omit to disable.
    #[arg(long, env = "DRIFT_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Root for the log, stable, and snapshot stores.
    #[arg(long, env = "DRIFT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Root of the per-path blob cache.
    #[arg(long, env = "DRIFT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Comma-separated initial peer raft addresses (bootstrap only).
    #[arg(long, env = "DRIFT_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Seed the initial configuration from self + peers.
    #[arg(long, env = "DRIFT_BOOTSTRAP")]
    bootstrap: bool,

    /// Load configuration from a TOML file; flags are ignored except
    /// --gen-config.
    #[arg(short, long, env = "DRIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Write a default configuration file and exit.
    #[arg(long, value_name = "PATH")]
    gen_config: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve_config(args: &Args) -> Result<Config, dft_core::DriftError> {
    if let Some(path) = &args.config {
        return Config::from_file(path);
    }
    let mut config = Config::default();
    if let Some(id) = &args.id {
        config.id = id.clone();
    }
    if let Some(addr) = &args.client_addr {
        config.client_addr = addr.clone();
    }
    if let Some(addr) = &args.raft_addr {
        config.raft_addr = addr.clone();
    }
    config.raft_advertise = args.raft_advertise.clone();
    config.metrics_addr = args.metrics_addr.clone();
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    config.peers = args.peers.iter().filter(|p| !p.is_empty()).cloned().collect();
    config.bootstrap = args.bootstrap;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Some(path) = &args.gen_config {
        if let Err(err) = Config::write_default(path) {
            eprintln!("failed to generate config: {err}");
            std::process::exit(1);
        }
        println!("generated default config at {}", path.display());
        return;
    }

    init_tracing();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(target: "drift", error = %err, "Invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        target: "drift",
        id = %config.id,
        client_addr = %config.client_addr,
        raft_addr = %config.raft_addr,
        data_dir = %config.data_dir.display(),
        cache_dir = %config.cache_dir.display(),
        bootstrap = config.bootstrap,
        "Starting DRIFT node"
    );

    if let Err(err) = std::fs::create_dir_all(&config.data_dir) {
        error!(target: "drift", error = %err, "Failed to create data directory");
        std::process::exit(1);
    }

    let mut node_config = NodeConfig::new(
        config.id.clone(),
        config.raft_addr.clone(),
        config.data_dir.clone(),
    );
    node_config.raft_advertise = config.raft_advertise.clone();
    node_config.peers = config.peers.clone();
    node_config.bootstrap = config.bootstrap;
    node_config.election_timeout = config.election_timeout();
    node_config.heartbeat_interval = config.heartbeat_interval();
    node_config.snapshot_threshold = config.snapshot_threshold;

    let node = match Node::start(node_config).await {
        Ok(node) => node,
        Err(err) => {
            error!(target: "drift", error = %err, "Failed to start node");
            std::process::exit(2);
        }
    };
    files::set_node(Arc::clone(&node));

    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    if let Err(err) = std::fs::create_dir_all(&config.cache_dir) {
        error!(target: "drift", error = %err, "Failed to create cache directory");
        std::process::exit(1);
    }

    if let Some(interval) = config.check_interval() {
        let checker = Checker::new(Arc::clone(&node), config.cache_dir.clone());
        tokio::spawn(checker.run(interval, shutdown_tx.subscribe()));
    }

    if let Some(addr) = &config.metrics_addr {
        match addr.parse() {
            Ok(addr) => {
                let rx = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    if let Err(err) = dft_metrics::serve(addr, rx).await {
                        error!(target: "drift", error = %err, "Metrics exporter failed");
                    }
                });
            }
            Err(err) => {
                error!(target: "drift", error = %err, "Invalid metrics address");
                std::process::exit(1);
            }
        }
    }

    let server_node = Arc::clone(&node);
    let server_shutdown = shutdown_tx.subscribe();
    let client_addr = config.client_addr.clone();
    let mut server_task = tokio::spawn(async move {
        server::run(&client_addr, server_node, server_shutdown).await
    });

    let signals = shutdown::install_signal_handlers(shutdown_tx.clone());

    let exit_code = tokio::select! {
        () = signals => {
            info!(target: "drift", "Shutting down");
            node.shutdown().await;
            0
        }
        result = node.wait() => {
            match result {
                Ok(()) => 0,
                Err(err) => {
                    error!(target: "drift", error = %err, "Node stopped on fatal error");
                    3
                }
            }
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => 0,
                Ok(Err(err)) => {
                    error!(target: "drift", error = %err, "Client service failed");
                    2
                }
                Err(err) => {
                    error!(target: "drift", error = %err, "Client service panicked");
                    2
                }
            }
        }
    };

    let _ = shutdown_tx.send(());
    std::process::exit(exit_code);
}
