use crate::config::HttpClientConfig;
use crate::error::RouterError;
use bytes::Bytes;
use http::header::HOST;
use http::request::Parts;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Status code reserved for sidecar-internal errors. The response body is
/// surfaced as the consultation failure reason.
pub const STATUS_SIDECAR_ERROR: u16 = 503;

/// JSON envelope describing the client-facing request, as the sidecar sees
/// it. The body travels as a UTF-8 string so the sidecar can inspect it
/// without re-reading the original stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginRequest {
    pub method: String,
    pub url: String,
    pub header: HashMap<String, Vec<String>>,
    pub body: String,
}

impl OriginRequest {
    /// Build the envelope from already-materialized request parts. `parts`
    /// reflects the request after prefix trimming, so the sidecar sees the
    /// same path the chosen upstream will.
    pub fn from_parts(parts: &Parts, body: &Bytes) -> Self {
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut header: HashMap<String, Vec<String>> = HashMap::new();
        for name in parts.headers.keys() {
            let values = parts
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_owned))
                .collect();
            header.insert(name.as_str().to_string(), values);
        }

        Self {
            method: parts.method.as_str().to_string(),
            url: format!("http://{}{}", host, path_and_query),
            header,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

/// Client for the out-of-band decision service.
///
/// The sidecar's own response body is discarded; only the status code feeds
/// the routing decision. The exception is status 503, whose body is the
/// error text reported back to the pipeline.
pub struct SidecarClient {
    url: String,
    client: reqwest::Client,
}

impl SidecarClient {
    pub fn new(url: &str, config: &HttpClientConfig) -> Result<Self, RouterError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .pool_max_idle_per_host(config.max_idle_conns)
            .pool_idle_timeout(Duration::from_secs(config.idle_conn_timeout));

        if config.tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| RouterError::Config(format!("sidecar client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the envelope and return the sidecar's status code. Transport
    /// failures and 503 responses are consultation failures; the caller
    /// routes to main with the error text as the reason.
    pub async fn consult(&self, parts: &Parts, body: &Bytes) -> Result<u16, RouterError> {
        let envelope = OriginRequest::from_parts(parts, body);

        let resp = self
            .client
            .post(&self.url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| RouterError::Sidecar(e.to_string()))?;

        let status = resp.status().as_u16();
        if status == STATUS_SIDECAR_ERROR {
            let text = resp.text().await.unwrap_or_default();
            return Err(RouterError::Sidecar(text));
        }

        Ok(status)
    }
}
