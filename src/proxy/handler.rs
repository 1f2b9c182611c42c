use crate::proxy::context::{empty_body, full_body, BoxBody, RequestContext};
use crate::server::RouterState;
use bytes::Bytes;
use futures_util::FutureExt;
use http::request::Parts;
use http::uri::PathAndQuery;
use http::{Response, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Request;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, warn};

/// Which upstream a request resolves to. Main is the safe default on every
/// error path.
#[derive(Clone, Copy, PartialEq)]
enum Target {
    Main,
    Canary,
}

/// Handle one proxied request through the routing pipeline:
///
/// 1. PANIC GUARD:  any panic becomes a 500 with the panic text
/// 2. PREFIX TRIM:  optional `trim-prefix` strip
/// 3. OVERRIDE:     `X-Canary: true|false` wins over everything
/// 4. BREAKERS:     request/error budgets gate the canary path
/// 5. SIDECAR:      out-of-band decision over the JSON envelope
/// 6. FORWARD:      stream to the chosen upstream, record metrics on exit
pub async fn handle_request(
    req: Request<Incoming>,
    state: RouterState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    Ok(guarded(&method, &path, route_request(req, &state, peer_addr)).await)
}

/// Scoped recovery boundary: resolves the routing future, converting a panic
/// into `500 Internal Server Error` with the panic message as the body. The
/// server stays available for subsequent requests.
async fn guarded<F>(method: &str, path: &str, fut: F) -> Response<BoxBody>
where
    F: Future<Output = Response<BoxBody>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(resp) => resp,
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            error!(
                "panic: recovered in request handling, method={}, path={}, panic={}",
                method, path, msg
            );
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(full_body(msg))
                .unwrap()
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown error".to_string()
    }
}

async fn route_request(
    mut req: Request<Incoming>,
    state: &RouterState,
    peer_addr: SocketAddr,
) -> Response<BoxBody> {
    let mut ctx = RequestContext::new(
        req.method().to_string(),
        req.uri().path().to_string(),
        state.version.to_string(),
    );

    if !state.config.trim_prefix.is_empty() {
        apply_trim_prefix(&mut req, &state.config.trim_prefix);
    }

    // X-Canary override wins over the sidecar and both breakers.
    let x_canary = req
        .headers()
        .get("X-Canary")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    if let Some(raw) = x_canary {
        if let Some(to_canary) = parse_x_canary(&raw) {
            ctx.set_reason(format!("Routed via X-Canary header value: {}", raw));
            let target = if to_canary { Target::Canary } else { Target::Main };
            let (parts, body) = req.into_parts();
            return serve(state, target, &parts, body.boxed(), None, peer_addr, &mut ctx).await;
        }
    }

    let Some(sidecar) = &state.sidecar else {
        // No decision service configured; everything goes to main untagged.
        let (parts, body) = req.into_parts();
        return serve(state, Target::Main, &parts, body.boxed(), None, peer_addr, &mut ctx).await;
    };

    if state.request_limit.is_enabled() && !state.request_limit.should_admit() {
        ctx.set_reason("Canary request limit reached");
        let (parts, body) = req.into_parts();
        return serve(state, Target::Main, &parts, body.boxed(), None, peer_addr, &mut ctx).await;
    }

    if state.error_limit.is_enabled() && state.error_limit.is_exhausted() {
        ctx.set_reason("Canary error limit reached");
        let (parts, body) = req.into_parts();
        return serve(state, Target::Main, &parts, body.boxed(), None, peer_addr, &mut ctx).await;
    }

    // Materialize the body so the same bytes feed the sidecar envelope and,
    // afterwards, whichever upstream wins the decision.
    let (parts, body) = req.into_parts();
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(
                "proxy: failed to read request body, method={}, error={}",
                parts.method, e
            );
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(empty_body())
                .unwrap();
        }
    };

    let target = match sidecar.consult(&parts, &body_bytes).await {
        Err(e) => {
            error!("sidecar: error when calling sidecar: {}", e);
            ctx.set_reason(e.to_string());
            Target::Main
        }
        Ok(code) if code == state.config.main_sidecar_status => {
            ctx.set_reason(format!("Sidecar returns status code {}", code));
            Target::Main
        }
        Ok(code) if code == state.config.canary_sidecar_status => {
            // The claim is atomic: two racing requests may both pass the
            // earlier pre-check and only one wins the last slot.
            if state.request_limit.claim_slot() {
                ctx.set_reason(format!("Sidecar returns status code {}", code));
                Target::Canary
            } else {
                ctx.set_reason(format!(
                    "Sidecar returns status code {}, but canary limit reached",
                    code
                ));
                Target::Main
            }
        }
        Ok(code) => {
            ctx.set_reason(format!("Sidecar returns non standard status code {}", code));
            Target::Main
        }
    };

    let replay = full_body(body_bytes.clone());
    serve(state, target, &parts, replay, Some(&body_bytes), peer_addr, &mut ctx).await
}

/// Forward to the chosen upstream, run the post-response canary error
/// accounting, and record the measurement on the way out.
async fn serve(
    state: &RouterState,
    target: Target,
    parts: &Parts,
    body: BoxBody,
    body_bytes: Option<&Bytes>,
    peer_addr: SocketAddr,
    ctx: &mut RequestContext,
) -> Response<BoxBody> {
    let proxy = match target {
        Target::Main => &state.main_proxy,
        Target::Canary => &state.canary_proxy,
    };

    if tracing::enabled!(tracing::Level::DEBUG) {
        dump_request(proxy.name(), parts, body_bytes, state.config.log.debug_request_body);
    }

    let resp = match proxy.forward(parts, body, peer_addr).await {
        Ok(upstream_resp) => {
            let status = upstream_resp.status().as_u16();
            if target == Target::Canary {
                state.error_limit.observe(status);
            }
            build_downstream_response(upstream_resp)
        }
        Err(e) => {
            warn!("proxy: error, proxy={}, error={}", proxy.name(), e);
            Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .body(empty_body())
                .unwrap()
        }
    };

    ctx.record(proxy.name(), resp.status().as_u16());
    resp
}

fn build_downstream_response(upstream_resp: Response<Incoming>) -> Response<BoxBody> {
    let (parts, body) = upstream_resp.into_parts();
    let mut builder = Response::builder().status(parts.status);
    for (name, value) in &parts.headers {
        builder = builder.header(name, value);
    }
    builder.body(body.boxed()).unwrap()
}

fn dump_request(target: &str, parts: &Parts, body_bytes: Option<&Bytes>, include_body: bool) {
    match body_bytes.filter(|_| include_body) {
        Some(bytes) => debug!(
            "proxy: request, to={}, method={}, uri={}, headers={:?}, body={}",
            target,
            parts.method,
            parts.uri,
            parts.headers,
            String::from_utf8_lossy(bytes),
        ),
        None => debug!(
            "proxy: request, to={}, method={}, uri={}, headers={:?}",
            target, parts.method, parts.uri, parts.headers,
        ),
    }
}

/// `X-Canary` accepts exactly `"true"` and `"false"`. Anything else
/// (including `TRUE`, `1`, `0`, `t`, `f`) is rejected and the request falls
/// through to the sidecar/breaker path.
fn parse_x_canary(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Strip `prefix` from the request path, on a segment boundary only. A
/// trailing slash on the configured prefix is ignored, so `/foo` and `/foo/`
/// behave the same.
fn trim_path_prefix(path: &str, prefix: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        None
    }
}

fn apply_trim_prefix(req: &mut Request<Incoming>, prefix: &str) {
    let Some(new_path) = trim_path_prefix(req.uri().path(), prefix) else {
        return;
    };

    let pq = match req.uri().query() {
        Some(q) => format!("{}?{}", new_path, q),
        None => new_path,
    };

    let Ok(path_and_query) = pq.parse::<PathAndQuery>() else {
        return;
    };

    let mut uri_parts = req.uri().clone().into_parts();
    uri_parts.path_and_query = Some(path_and_query);
    if let Ok(uri) = Uri::from_parts(uri_parts) {
        *req.uri_mut() = uri;
    }
}
