use crate::breaker::{ErrorLimiter, RequestLimiter};
use crate::config::RouterConfig;
use crate::metrics::Metrics;
use crate::proxy::UpstreamProxy;
use crate::sidecar::SidecarClient;
use anyhow::Result;
use std::sync::Arc;

/// Shared router state, cheaply cloneable. Everything here is constructed
/// once at startup and immutable afterwards; the only mutable pieces are the
/// atomic counters inside the two limiters.
#[derive(Clone)]
pub struct RouterState {
    pub config: Arc<RouterConfig>,
    pub version: Arc<str>,
    pub main_proxy: Arc<UpstreamProxy>,
    pub canary_proxy: Arc<UpstreamProxy>,
    /// `None` when `sidecar-url` is empty, which disables consultation.
    pub sidecar: Option<Arc<SidecarClient>>,
    pub request_limit: Arc<RequestLimiter>,
    pub error_limit: Arc<ErrorLimiter>,
    pub metrics: Metrics,
}

impl RouterState {
    pub fn new(config: RouterConfig, version: &str) -> Result<Self> {
        let client_cfg = &config.proxy_client.to_main_and_canary;

        let main_proxy = UpstreamProxy::new(
            "main",
            &config.main_target,
            &config.main_header_host,
            client_cfg,
            config.log.debug_response_body,
        )?;

        let canary_proxy = UpstreamProxy::new(
            "canary",
            &config.canary_target,
            &config.canary_header_host,
            client_cfg,
            config.log.debug_response_body,
        )?;

        let sidecar = if config.sidecar_url.is_empty() {
            None
        } else {
            Some(Arc::new(SidecarClient::new(
                &config.sidecar_url,
                &config.proxy_client.to_sidecar,
            )?))
        };

        let request_limit = RequestLimiter::new(config.circuit_breaker.request_limit_canary);
        let error_limit = ErrorLimiter::new(config.circuit_breaker.error_limit_canary);

        let metrics = Metrics::install();

        Ok(Self {
            config: Arc::new(config),
            version: Arc::from(version),
            main_proxy: Arc::new(main_proxy),
            canary_proxy: Arc::new(canary_proxy),
            sidecar,
            request_limit: Arc::new(request_limit),
            error_limit: Arc::new(error_limit),
            metrics,
        })
    }

    pub fn router_addr(&self) -> String {
        format!(
            "{}:{}",
            self.config.router_server.host, self.config.router_server.port
        )
    }

    pub fn instrumentation_addr(&self) -> String {
        format!(
            "{}:{}",
            self.config.instrumentation.host, self.config.instrumentation.port
        )
    }
}
