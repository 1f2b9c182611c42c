use crate::config::RouterConfig;
use crate::server;
use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
}

/// Router lifecycle: load config → build state → bind → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    let config = RouterConfig::load(&args.config_path)?;
    init_tracing(&config.log.level);

    info!(
        "config: loaded, file={}, main={}, canary={}, sidecar={}",
        args.config_path.display(),
        config.main_target,
        config.canary_target,
        if config.sidecar_url.is_empty() {
            "<disabled>"
        } else {
            &config.sidecar_url
        },
    );

    let state = server::RouterState::new(config, env!("CARGO_PKG_VERSION"))?;

    // Instrumentation runs on its own listener so scrapes never contend
    // with proxied traffic.
    let metrics_listener = TcpListener::bind(state.instrumentation_addr()).await?;
    let metrics = state.metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_metrics_server(metrics_listener, metrics).await {
            error!("server: metrics endpoint failed, error={}", e);
        }
    });

    let listener = TcpListener::bind(state.router_addr()).await?;

    let shutdown = Arc::new(Notify::new());
    let router_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_router_server(listener, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = router_handle.await? {
        error!("server: router task error: {}", e);
    }

    info!("server: shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("server: received SIGINT, shutting down"),
        _ = terminate => info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
