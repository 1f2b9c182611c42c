pub mod bootstrap;
pub mod runtime;
mod state;

pub use state::RouterState;

use crate::metrics::Metrics;
use crate::proxy::{self, BoxBody};
use anyhow::Result;
use http::{Method, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

const HEALTH_PATH: &str = "/application/health";

fn full_body(data: impl Into<bytes::Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Run the router server with graceful shutdown support.
///
/// The caller binds the listener (so tests can bind port 0 and read the
/// address back). When `shutdown` is notified the server stops accepting new
/// connections and waits up to `DRAIN_TIMEOUT` for in-flight connections to
/// complete.
pub async fn run_router_server(
    listener: TcpListener,
    state: RouterState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

    info!(
        "server: canary router listening, addr={}",
        listener.local_addr()?
    );

    let read_timeout = Duration::from_secs(state.config.router_server.read_timeout);
    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => v,
            Err(e) => {
                error!("server: accept failed, error={}", e);
                continue;
            }
        };

        let state = state.clone();
        let active_conns = active_conns.clone();
        active_conns.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let state_inner = state.clone();
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state_inner.clone();
                async move { serve_route(req, state, peer_addr).await }
            });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .http1()
                .timer(TokioTimer::new())
                .keep_alive(true)
                .header_read_timeout(read_timeout)
                .http2()
                .timer(TokioTimer::new())
                .keep_alive_interval(Some(Duration::from_secs(20)))
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!(
                        "server: connection error, peer={}, error={}",
                        peer_addr, e
                    );
                }
            }

            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    drain(&active_conns, DRAIN_TIMEOUT).await;
    Ok(())
}

async fn serve_route(
    req: Request<Incoming>,
    state: RouterState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    if req.uri().path() == HEALTH_PATH {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .body(full_body("OK"))
            .unwrap());
    }

    proxy::handle_request(req, state, peer_addr).await
}

async fn drain(active_conns: &AtomicI64, timeout: Duration) {
    let active = active_conns.load(Ordering::Relaxed);
    if active == 0 {
        return;
    }

    info!("server: waiting for {} active connections to drain", active);
    let wait = async {
        while active_conns.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    match tokio::time::timeout(timeout, wait).await {
        Ok(_) => info!("server: all connections drained"),
        Err(_) => info!(
            "server: drain timeout ({}s), {} connections still active",
            timeout.as_secs(),
            active_conns.load(Ordering::Relaxed)
        ),
    }
}

/// Run the instrumentation listener: `GET /metrics` in Prometheus text
/// exposition format, 404 for anything else.
pub async fn run_metrics_server(listener: TcpListener, metrics: Metrics) -> Result<()> {
    info!(
        "server: metrics endpoint listening, addr={}",
        listener.local_addr()?
    );

    loop {
        let (stream, _) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let metrics = metrics.clone();
                async move { serve_metrics(req, metrics) }
            });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: metrics connection error, error={}", e);
                }
            }
        });
    }
}

fn serve_metrics(req: Request<Incoming>, metrics: Metrics) -> Result<Response<BoxBody>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(full_body(metrics.render()))
            .unwrap()),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(full_body("not found"))
            .unwrap()),
    }
}
