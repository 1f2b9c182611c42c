use crate::config::HttpClientConfig;
use crate::error::RouterError;
use crate::proxy::context::BoxBody;
use http::header::{
    ACCEPT_ENCODING, CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE,
    TRANSFER_ENCODING, UPGRADE,
};
use http::request::Parts;
use http::{HeaderName, HeaderValue, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A rustls `ServerCertVerifier` that accepts any certificate without
/// validation. Used when `tls.insecure-skip-verify` is set for internal
/// traffic where encryption is desired but upstream identity is not checked.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Forwards requests to one fixed upstream (main or canary).
///
/// Owns a pooled HTTP client tuned from `proxy-client.to-main-and-canary`.
/// All transport failures are contained here and surface as `RouterError`;
/// the pipeline maps them to `502 Bad Gateway`.
pub struct UpstreamProxy {
    name: &'static str,
    scheme: String,
    authority: String,
    /// Path prefix of the target URL, prepended to every forwarded path.
    base_path: String,
    host_override: Option<HeaderValue>,
    disable_compression: bool,
    response_header_timeout: Duration,
    debug_response_body: bool,
    client: Client<HttpsConnector<HttpConnector>, BoxBody>,
}

impl UpstreamProxy {
    pub fn new(
        name: &'static str,
        target: &str,
        header_host: &str,
        config: &HttpClientConfig,
        debug_response_body: bool,
    ) -> Result<Self, RouterError> {
        let uri: Uri = target
            .parse()
            .map_err(|e| RouterError::Config(format!("{} target: {}", name, e)))?;

        let scheme = uri.scheme_str().unwrap_or("http").to_string();
        let authority = uri
            .authority()
            .ok_or_else(|| RouterError::Config(format!("{} target is missing a host", name)))?
            .to_string();
        let base_path = uri.path().trim_end_matches('/').to_string();

        let host_override = if header_host.is_empty() {
            None
        } else {
            Some(
                HeaderValue::from_str(header_host)
                    .map_err(|e| RouterError::Config(format!("{} header host: {}", name, e)))?,
            )
        };

        Ok(Self {
            name,
            scheme,
            authority,
            base_path,
            host_override,
            disable_compression: config.disable_compression,
            response_header_timeout: Duration::from_secs(config.timeout),
            debug_response_body,
            client: build_proxy_client(config),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Forward the request and return the upstream response for streaming
    /// back to the client. `parts` carries the (already prefix-trimmed)
    /// client request head; `body` is either the live incoming stream or a
    /// replay buffer from the sidecar consultation.
    pub async fn forward(
        &self,
        parts: &Parts,
        body: BoxBody,
        peer_addr: SocketAddr,
    ) -> Result<Response<Incoming>, RouterError> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut uri = String::with_capacity(
            self.scheme.len() + 3 + self.authority.len() + self.base_path.len() + path_and_query.len(),
        );
        uri.push_str(&self.scheme);
        uri.push_str("://");
        uri.push_str(&self.authority);
        uri.push_str(&self.base_path);
        uri.push_str(path_and_query);

        let mut headers = parts.headers.clone();
        remove_hop_headers(&mut headers);
        append_forwarded_for(&mut headers, peer_addr);
        if self.disable_compression {
            headers.remove(ACCEPT_ENCODING);
        }

        let host = match &self.host_override {
            Some(value) => value.clone(),
            None => HeaderValue::from_str(&self.authority)
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        };
        headers.insert(HOST, host);

        let mut builder = Request::builder().method(parts.method.clone()).uri(&uri);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }

        let upstream_req = builder
            .body(body)
            .map_err(|e| RouterError::Upstream(e.to_string()))?;

        let result = tokio::time::timeout(
            self.response_header_timeout,
            self.client.request(upstream_req),
        )
        .await;

        match result {
            Ok(Ok(resp)) => {
                if tracing::enabled!(tracing::Level::DEBUG) {
                    self.dump_response(&resp);
                }
                Ok(resp)
            }
            Ok(Err(e)) => {
                warn!("proxy: error, proxy={}, uri={}, error={}", self.name, uri, e);
                Err(RouterError::Upstream(e.to_string()))
            }
            Err(_) => {
                warn!("proxy: response header timeout, proxy={}, uri={}", self.name, uri);
                Err(RouterError::UpstreamTimeout)
            }
        }
    }

    fn dump_response(&self, resp: &Response<Incoming>) {
        // Body frames are not buffered here; with debug-response-body set the
        // head dump notes that the body streams through untouched.
        debug!(
            "proxy: response, from={}, status={}, headers={:?}{}",
            self.name,
            resp.status(),
            resp.headers(),
            if self.debug_response_body {
                ", body=<streamed>"
            } else {
                ""
            },
        );
    }
}

/// Append the TCP peer IP to `X-Forwarded-For` (comma-separated per
/// RFC 7239 semantics) so upstreams can identify the original client.
/// Applied here, at forward time, so the header only reaches the chosen
/// upstream; the sidecar envelope reflects the request as the client sent it.
fn append_forwarded_for(headers: &mut http::HeaderMap, peer_addr: SocketAddr) {
    let peer_ip = peer_addr.ip().to_string();

    let value = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{}, {}", existing, peer_ip),
        None => peer_ip,
    };

    if let Ok(v) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", v);
    }
}

fn remove_hop_headers(headers: &mut http::HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        UPGRADE,
    ];

    for h in hop_headers {
        headers.remove(h);
    }
}

/// Build a pooled hyper client that supports both http and https targets.
/// HTTP/2 is negotiated via ALPN on TLS connections; plain connections stay
/// on HTTP/1.1.
fn build_proxy_client(
    config: &HttpClientConfig,
) -> Client<HttpsConnector<HttpConnector>, BoxBody> {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);
    http.set_keepalive(Some(Duration::from_secs(config.idle_conn_timeout)));
    http.enforce_http(false);

    let https = if config.tls.insecure_skip_verify {
        let tls_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();

        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http)
    } else {
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http)
    };

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(config.idle_conn_timeout))
        .pool_max_idle_per_host(config.max_idle_conns)
        .build(https)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_target_without_host() {
        let cfg = HttpClientConfig::default();
        assert!(UpstreamProxy::new("main", "/relative", "", &cfg, false).is_err());
    }

    #[test]
    fn test_new_accepts_target_with_path() {
        let cfg = HttpClientConfig::default();
        let proxy = UpstreamProxy::new("main", "http://10.0.0.1:8080/base/", "", &cfg, false)
            .unwrap();
        assert_eq!(proxy.scheme, "http");
        assert_eq!(proxy.authority, "10.0.0.1:8080");
        assert_eq!(proxy.base_path, "/base");
    }

    #[test]
    fn test_new_rejects_bad_header_host() {
        let cfg = HttpClientConfig::default();
        assert!(UpstreamProxy::new("canary", "http://10.0.0.1", "bad\nhost", &cfg, false).is_err());
    }

    #[test]
    fn test_append_forwarded_for() {
        let peer: SocketAddr = "10.1.2.3:4444".parse().unwrap();

        let mut headers = http::HeaderMap::new();
        append_forwarded_for(&mut headers, peer);
        assert_eq!(headers["x-forwarded-for"], "10.1.2.3");

        let mut headers = http::HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.0.2.1"));
        append_forwarded_for(&mut headers, peer);
        assert_eq!(headers["x-forwarded-for"], "192.0.2.1, 10.1.2.3");
    }

    #[test]
    fn test_hop_headers_removed() {
        let mut headers = http::HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        remove_hop_headers(&mut headers);
        assert!(!headers.contains_key(CONNECTION));
        assert!(!headers.contains_key(TRANSFER_ENCODING));
        assert!(headers.contains_key("x-request-id"));
    }
}
