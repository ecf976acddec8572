#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Administrative CLI for DRIFT clusters.
//!
//! Write commands follow a single NotLeader redirect, so pointing `dft` at
//! any node of the cluster works.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dft")]
#[command(about = "DRIFT cluster administration")]
#[command(version)]
struct Cli {
    /// Client address of any cluster node.
    #[arg(short, long, env = "DRIFT_ADDR", default_value = "127.0.0.1:13000")]
    addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file under a key.
    Put {
        key: String,
        /// File to read the contents from; stdin when omitted.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print a key's contents to stdout.
    Get { key: String },
    /// Delete a key and tombstone its metadata.
    Delete { key: String },
    /// Show the replicated metadata for a path.
    Meta { path: String },
    /// Add a server to the cluster configuration.
    AddPeer { id: String, address: String },
    /// Remove a server from the cluster configuration.
    RemovePeer { id: String },
    /// Replay all keys reported by one node through the cluster.
    Restore { source: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Put { key, file } => {
            let data = match file {
                Some(path) => std::fs::read(path),
                None => {
                    use std::io::Read;
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf).map(|_| buf)
                }
            };
            match data {
                Ok(data) => commands::put(&cli.addr, key, &data).await,
                Err(err) => {
                    eprintln!("read input: {err}");
                    std::process::exit(1);
                }
            }
        }
        Command::Get { key } => commands::get(&cli.addr, key).await,
        Command::Delete { key } => commands::delete(&cli.addr, key).await,
        Command::Meta { path } => commands::meta(&cli.addr, path).await,
        Command::AddPeer { id, address } => commands::add_peer(&cli.addr, id, address).await,
        Command::RemovePeer { id } => commands::remove_peer(&cli.addr, id).await,
        Command::Restore { source } => commands::restore(&cli.addr, source).await,
    };

    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
