#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! RPC counters exported in Prometheus text format.
//!
//! Counters are process-global atomics bumped on the hot path; the exporter
//! is a minimal HTTP/1 listener serving `/metrics`.

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub static PUTS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static GETS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static DELETES_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static META_SYNCS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static META_GETS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static PEER_CHANGES_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static REPORTS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static RPC_ERRORS_TOTAL: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn record(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Renders every counter in Prometheus text exposition format.
#[must_use]
pub fn render() -> String {
    let mut out = String::with_capacity(1024);
    let counters: [(&str, &str, &AtomicU64); 8] = [
        ("drift_rpc_put_total", "Total number of Put RPCs", &PUTS_TOTAL),
        ("drift_rpc_get_total", "Total number of Get RPCs", &GETS_TOTAL),
        (
            "drift_rpc_delete_total",
            "Total number of Delete RPCs",
            &DELETES_TOTAL,
        ),
        (
            "drift_rpc_sync_metadata_total",
            "Total number of SyncMetadata RPCs",
            &META_SYNCS_TOTAL,
        ),
        (
            "drift_rpc_metadata_total",
            "Total number of Metadata RPCs",
            &META_GETS_TOTAL,
        ),
        (
            "drift_rpc_peer_change_total",
            "Total number of AddPeer and RemovePeer RPCs",
            &PEER_CHANGES_TOTAL,
        ),
        (
            "drift_rpc_report_total",
            "Total number of Report RPCs",
            &REPORTS_TOTAL,
        ),
        (
            "drift_rpc_error_total",
            "Total number of RPCs answered with an error status",
            &RPC_ERRORS_TOTAL,
        ),
    ];
    for (name, help, counter) in counters {
        out.push_str("# HELP ");
        out.push_str(name);
        out.push(' ');
        out.push_str(help);
        out.push_str("\n# TYPE ");
        out.push_str(name);
        out.push_str(" counter\n");
        out.push_str(name);
        out.push(' ');
        out.push_str(&counter.load(Ordering::Relaxed).to_string());
        out.push('\n');
    }
    out
}

/// Serves `/metrics` until shutdown. Binds eagerly so a busy port surfaces
/// at startup rather than on the first scrape.
pub async fn serve(addr: SocketAddr, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(target: "drift::metrics", %addr, "Metrics exporter listening");

    loop {
        let conn = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((conn, _)) => conn,
                Err(err) => {
                    warn!(target: "drift::metrics", error = %err, "Accept failed");
                    continue;
                }
            },
        };
        tokio::spawn(async move {
            let io = TokioIo::new(conn);
            let service = service_fn(handle);
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!(target: "drift::metrics", error = %err, "Metrics connection error");
            }
        });
    }
    Ok(())
}

async fn handle(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<http_body_util::Full<bytes::Bytes>>, Infallible> {
    let response = if req.uri().path() == "/metrics" {
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4")
            .body(http_body_util::Full::new(bytes::Bytes::from(render())))
    } else {
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(http_body_util::Full::new(bytes::Bytes::from_static(
                b"not found",
            )))
    };
    match response {
        Ok(response) => Ok(response),
        Err(_) => Ok(Response::new(http_body_util::Full::new(
            bytes::Bytes::new(),
        ))),
    }
}
