//! Signal-driven shutdown: SIGTERM/SIGINT fan out over a broadcast channel
//! that every task selects on.

use tokio::sync::broadcast;
use tracing::{info, warn};

#[cfg(unix)]
#[allow(clippy::expect_used)] // Signal handlers are startup-critical; abort is correct on failure
pub fn install_signal_handlers(
    shutdown_tx: broadcast::Sender<()>,
) -> impl std::future::Future<Output = ()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!(target: "drift::shutdown", "SIGTERM received, shutting down");
            }
            _ = sigint.recv() => {
                info!(target: "drift::shutdown", "SIGINT received, shutting down");
            }
        }
        let _ = shutdown_tx.send(());
    }
}

#[cfg(not(unix))]
pub fn install_signal_handlers(
    shutdown_tx: broadcast::Sender<()>,
) -> impl std::future::Future<Output = ()> {
    async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "drift::shutdown", error = %err, "Failed to listen for Ctrl+C");
            return;
        }
        info!(target: "drift::shutdown", "Ctrl+C received, shutting down");
        let _ = shutdown_tx.send(());
    }
}
