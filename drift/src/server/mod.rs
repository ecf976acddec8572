//! Client-facing RPC service backed by the replicated store.

mod connection;

pub use connection::handle_connection;

use dft_core::Result;
use dft_raft::Node;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Binds the client listener and serves connections until shutdown.
pub async fn run(
    addr: &str,
    node: Arc<Node>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(target: "drift::server", addr, "Client service listening");

    loop {
        let conn = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((conn, _)) => conn,
                Err(err) => {
                    warn!(target: "drift::server", error = %err, "Accept failed");
                    continue;
                }
            },
        };
        let _ = conn.set_nodelay(true);
        tokio::spawn(handle_connection(conn, Arc::clone(&node)));
    }
    Ok(())
}
