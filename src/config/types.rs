use serde::{Deserialize, Serialize};

/// Top-level router configuration.
///
/// Field names follow the kebab-case keys of the config file
/// (`main-target`, `circuit-breaker.request-limit-canary`, ...). The whole
/// tree is immutable after `RouterConfig::load`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouterConfig {
    /// Production upstream URL. Required.
    #[serde(default)]
    pub main_target: String,

    /// Candidate upstream URL. Required.
    #[serde(default)]
    pub canary_target: String,

    /// Decision service URL. Empty disables sidecar consultation entirely.
    #[serde(default)]
    pub sidecar_url: String,

    /// Optional Host header override for the main upstream.
    #[serde(default)]
    pub main_header_host: String,

    /// Optional Host header override for the canary upstream.
    #[serde(default)]
    pub canary_header_host: String,

    /// When set, this prefix is stripped from the request path before
    /// forwarding (and before the sidecar sees the request).
    #[serde(default)]
    pub trim_prefix: String,

    /// Sidecar status code meaning "route to main".
    #[serde(default = "default_main_sidecar_status")]
    pub main_sidecar_status: u16,

    /// Sidecar status code meaning "route to canary".
    #[serde(default = "default_canary_sidecar_status")]
    pub canary_sidecar_status: u16,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub router_server: HttpServerConfig,

    #[serde(default)]
    pub proxy_client: MultiHttpClientConfig,

    #[serde(default)]
    pub instrumentation: InstrumentationConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            main_target: String::new(),
            canary_target: String::new(),
            sidecar_url: String::new(),
            main_header_host: String::new(),
            canary_header_host: String::new(),
            trim_prefix: String::new(),
            main_sidecar_status: default_main_sidecar_status(),
            canary_sidecar_status: default_canary_sidecar_status(),
            circuit_breaker: CircuitBreakerConfig::default(),
            router_server: HttpServerConfig::default(),
            proxy_client: MultiHttpClientConfig::default(),
            instrumentation: InstrumentationConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// One-shot canary budgets. Zero disables the corresponding limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CircuitBreakerConfig {
    #[serde(default)]
    pub request_limit_canary: u64,

    #[serde(default)]
    pub error_limit_canary: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_router_port")]
    pub port: u16,

    /// Seconds allowed for reading the request head.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_router_port(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Client tuning for the two hops the router makes: main/canary forwarding
/// and sidecar consultation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MultiHttpClientConfig {
    #[serde(default)]
    pub to_main_and_canary: HttpClientConfig,

    #[serde(default = "default_sidecar_client")]
    pub to_sidecar: HttpClientConfig,
}

impl Default for MultiHttpClientConfig {
    fn default() -> Self {
        Self {
            to_main_and_canary: HttpClientConfig::default(),
            to_sidecar: default_sidecar_client(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpClientConfig {
    /// Seconds to wait for upstream response headers.
    #[serde(default = "default_client_timeout")]
    pub timeout: u64,

    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,

    /// Seconds an idle pooled connection is kept alive.
    #[serde(default = "default_idle_conn_timeout")]
    pub idle_conn_timeout: u64,

    /// When true the forwarded request never solicits compressed responses.
    #[serde(default)]
    pub disable_compression: bool,

    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: default_client_timeout(),
            max_idle_conns: default_max_idle_conns(),
            idle_conn_timeout: default_idle_conn_timeout(),
            disable_compression: false,
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsConfig {
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Address of the Prometheus scrape listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstrumentationConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_instrumentation_port")]
    pub port: u16,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_instrumentation_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Include request bodies in debug dumps.
    #[serde(default)]
    pub debug_request_body: bool,

    /// Include response bodies in debug dumps.
    #[serde(default)]
    pub debug_response_body: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            debug_request_body: false,
            debug_response_body: false,
        }
    }
}

fn default_main_sidecar_status() -> u16 {
    204
}

fn default_canary_sidecar_status() -> u16 {
    200
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_router_port() -> u16 {
    8080
}

fn default_instrumentation_port() -> u16 {
    8888
}

fn default_read_timeout() -> u64 {
    5
}

fn default_write_timeout() -> u64 {
    15
}

fn default_idle_timeout() -> u64 {
    120
}

fn default_client_timeout() -> u64 {
    5
}

fn default_sidecar_client() -> HttpClientConfig {
    HttpClientConfig {
        timeout: 2,
        ..HttpClientConfig::default()
    }
}

fn default_max_idle_conns() -> usize {
    1000
}

fn default_idle_conn_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}
