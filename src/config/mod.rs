pub mod types;


pub use types::*;

use anyhow::Result;
use std::path::Path;

impl RouterConfig {
    /// Load configuration from a file and apply environment variable
    /// overrides for infrastructure settings. The format is chosen by
    /// extension: `.json` (the deploy default) or `.toml`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("can't read config {}: {}", path.display(), e))?;

        let mut config: RouterConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .json or .toml"),
            None => anyhow::bail!("config file has no extension, use .json or .toml"),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for deployment knobs. Routing behavior
    /// (targets, statuses, breakers) is file-only.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CANARY_ROUTER_HOST") {
            self.router_server.host = v;
        }
        if let Ok(v) = std::env::var("CANARY_ROUTER_PORT") {
            if let Ok(n) = v.parse::<u16>() {
                self.router_server.port = n;
            }
        }
        if let Ok(v) = std::env::var("CANARY_ROUTER_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("CANARY_ROUTER_SIDECAR_URL") {
            self.sidecar_url = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_target_url("main-target", &self.main_target)?;
        validate_target_url("canary-target", &self.canary_target)?;
        if !self.sidecar_url.is_empty() {
            validate_target_url("sidecar-url", &self.sidecar_url)?;
        }
        if self.router_server.port == 0 {
            anyhow::bail!("router-server.port must be non-zero");
        }
        Ok(())
    }
}

fn validate_target_url(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        anyhow::bail!("{} is required", field);
    }
    let uri: http::Uri = value
        .parse()
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", field, e))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => anyhow::bail!("{} must be an absolute http(s) URL", field),
    }
    if uri.authority().is_none() {
        anyhow::bail!("{} is missing a host", field);
    }
    Ok(())
}
