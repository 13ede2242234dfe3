//! Request routing: CONNECT tunnels and plain HTTP proxying.
//!
//! CONNECT to a registry host is intercepted:
//!
//! 1. Answer `200`, take over the upgraded connection
//! 2. Accept TLS from the client with a leaf certificate for the host
//! 3. Serve HTTP/1.1 on the decrypted stream; each request goes through
//!    the [`RequestInterceptor`](super::hook::RequestInterceptor) and, if
//!    forwarded, is sent upstream over a fresh TLS connection
//!
//! CONNECT to any other host is tunneled blind. Plain HTTP requests are
//! either the liveness probe (origin-form) or absolute-form proxy requests,
//! which also pass through the hook.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::header::{HOST, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::error::GatewayError;
use super::hook::{InterceptAction, RequestHead};
use super::server::GatewayContext;
use super::tls::{create_tls_acceptor, host_to_server_name};
use super::{PING_PATH, PING_TOKEN};

/// Response body type used throughout the gateway.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Default port for CONNECT targets and TLS upstreams.
const HTTPS_PORT: u16 = 443;

/// Headers that only concern the hop between client and gateway.
const PROXY_HEADERS: &[&str] = &["proxy-connection", "proxy-authorization"];

/// Handle a CONNECT request.
pub async fn handle_connect(
    req: Request<Incoming>,
    ctx: Arc<GatewayContext>,
) -> Result<Response<ProxyBody>, GatewayError> {
    let authority = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .ok_or_else(|| GatewayError::InvalidRequest("CONNECT without authority".into()))?;
    let (host, port) = parse_host_port(&authority)?;
    let intercept = ctx.policy.is_registry_host(&host);

    debug!(host = %host, port = port, intercept = intercept, "CONNECT");

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let result = if intercept {
                    intercepted_tunnel(upgraded, host.clone(), port, ctx).await
                } else {
                    blind_tunnel(upgraded, &host, port).await
                };
                if let Err(e) = result {
                    debug!("Tunnel ended for {}:{}: {}", host, port, e);
                }
            }
            Err(e) => {
                warn!("HTTP upgrade failed for {}:{}: {}", host, port, e);
            }
        }
    });

    Ok(Response::new(empty_body()))
}

/// Relay bytes between the client and `host:port` without looking at them.
async fn blind_tunnel(upgraded: Upgraded, host: &str, port: u16) -> Result<(), GatewayError> {
    let mut upstream =
        TcpStream::connect((host, port))
            .await
            .map_err(|e| GatewayError::UpstreamConnect {
                addr: format!("{}:{}", host, port),
                message: e.to_string(),
            })?;

    let mut client = TokioIo::new(upgraded);
    let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    debug!(
        "Blind tunnel to {}:{} closed ({} bytes up, {} bytes down)",
        host, port, sent, received
    );
    Ok(())
}

/// Terminate TLS for a registry host and run every request through the hook.
async fn intercepted_tunnel(
    upgraded: Upgraded,
    host: String,
    port: u16,
    ctx: Arc<GatewayContext>,
) -> Result<(), GatewayError> {
    let acceptor = create_tls_acceptor(ctx.cert_cache.clone(), Some(host.clone()))?;
    let client_tls = acceptor
        .accept(TokioIo::new(upgraded))
        .await
        .map_err(|e| GatewayError::Tls(format!("Client TLS handshake failed: {}", e)))?;

    debug!("TLS established with client for {}:{}", host, port);

    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        let host = host.clone();
        async move {
            let url = tunnel_url(&host, port, &req);
            Ok::<_, GatewayError>(intercept_and_forward(req, url, &host, port, &ctx).await)
        }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(client_tls), service)
        .await
        .map_err(GatewayError::from)
}

/// Handle a non-CONNECT request.
pub async fn handle_http(
    req: Request<Incoming>,
    ctx: Arc<GatewayContext>,
) -> Result<Response<ProxyBody>, GatewayError> {
    let Some(host) = req.uri().host().map(str::to_string) else {
        if req.uri().path().starts_with(PING_PATH) {
            return Ok(text_response(StatusCode::OK, PING_TOKEN));
        }
        return Ok(text_response(
            StatusCode::BAD_REQUEST,
            "This is a proxy: send absolute-form requests or CONNECT",
        ));
    };

    let url = req.uri().to_string();
    debug!(url = %url, "HTTP proxy request");

    if ctx.policy.is_registry_host(&host) {
        // Registries are only reachable over TLS.
        Ok(intercept_and_forward(req, url, &host, HTTPS_PORT, &ctx).await)
    } else {
        let head = request_head(&req, url);
        match ctx.interceptor.intercept(&head).await {
            InterceptAction::RespondWith {
                status,
                body,
                headers,
            } => Ok(respond_with(status, body, headers)),
            InterceptAction::Forward => match forward_http_request(req).await {
                Ok(resp) => Ok(resp),
                Err(e) => {
                    warn!("Upstream request to {} failed: {}", host, e);
                    Ok(text_response(StatusCode::BAD_GATEWAY, &e.to_string()))
                }
            },
        }
    }
}

/// Run the hook for one request and then answer or forward it over TLS.
///
/// Upstream failures become `502` responses so the tool sees a failed fetch
/// rather than a dropped connection.
async fn intercept_and_forward(
    req: Request<Incoming>,
    url: String,
    host: &str,
    port: u16,
    ctx: &GatewayContext,
) -> Response<ProxyBody> {
    let head = request_head(&req, url);

    match ctx.interceptor.intercept(&head).await {
        InterceptAction::RespondWith {
            status,
            body,
            headers,
        } => respond_with(status, body, headers),
        InterceptAction::Forward => match forward_tls(req, host, port, ctx).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Upstream request to {} failed: {}", head.url, e);
                text_response(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        },
    }
}

/// Send a request to `host:port` over a new TLS connection.
async fn forward_tls(
    req: Request<Incoming>,
    host: &str,
    port: u16,
    ctx: &GatewayContext,
) -> Result<Response<ProxyBody>, GatewayError> {
    let upstream =
        TcpStream::connect((host, port))
            .await
            .map_err(|e| GatewayError::UpstreamConnect {
                addr: format!("{}:{}", host, port),
                message: e.to_string(),
            })?;

    let connector = ctx.upstream_connector().await?;
    let upstream_tls = connector
        .connect(host_to_server_name(host)?, upstream)
        .await
        .map_err(|e| GatewayError::Tls(format!("Upstream TLS handshake failed: {}", e)))?;

    let (mut sender, conn) =
        hyper::client::conn::http1::handshake::<_, Incoming>(TokioIo::new(upstream_tls)).await?;
    let host_label = host.to_string();
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection to {} ended: {}", host_label, e);
        }
    });

    let req = into_origin_form(req, host, port)?;
    let response = sender.send_request(req).await?;
    Ok(response.map(|body| body.boxed()))
}

/// Forward a plain HTTP request to a non-registry host.
async fn forward_http_request(req: Request<Incoming>) -> Result<Response<ProxyBody>, GatewayError> {
    use hyper_util::client::legacy::Client;
    use hyper_util::rt::TokioExecutor;

    let client: Client<_, Incoming> = Client::builder(TokioExecutor::new()).build_http();

    let response = client
        .request(req)
        .await
        .map_err(|e| GatewayError::UpstreamConnect {
            addr: "upstream".to_string(),
            message: e.to_string(),
        })?;

    Ok(response.map(|body| body.boxed()))
}

/// Rewrite an absolute-form or origin-form request for an origin server.
fn into_origin_form(
    req: Request<Incoming>,
    host: &str,
    port: u16,
) -> Result<Request<Incoming>, GatewayError> {
    let (mut parts, body) = req.into_parts();

    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    parts.uri = path
        .parse::<Uri>()
        .map_err(|e| GatewayError::InvalidRequest(format!("Invalid request path: {}", e)))?;

    for name in PROXY_HEADERS {
        parts.headers.remove(*name);
    }
    if !parts.headers.contains_key(HOST) {
        let value = HeaderValue::from_str(&authority(host, port, HTTPS_PORT))
            .map_err(|e| GatewayError::InvalidRequest(format!("Invalid host: {}", e)))?;
        parts.headers.insert(HOST, value);
    }

    Ok(Request::from_parts(parts, body))
}

/// Absolute URL of a request received inside an intercepted tunnel.
fn tunnel_url(host: &str, port: u16, req: &Request<Incoming>) -> String {
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    format!("https://{}{}", authority(host, port, HTTPS_PORT), path)
}

/// `host[:port]`, omitting the default port and bracketing IPv6 literals.
fn authority(host: &str, port: u16, default_port: u16) -> String {
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    if port == default_port {
        host
    } else {
        format!("{}:{}", host, port)
    }
}

fn request_head<B>(req: &Request<B>, url: String) -> RequestHead {
    RequestHead {
        method: req.method().clone(),
        url,
        headers: req.headers().clone(),
    }
}

/// Parse `host:port` from a CONNECT authority.
///
/// - `registry.npmjs.org:443` -> ("registry.npmjs.org", 443)
/// - `registry.npmjs.org` -> ("registry.npmjs.org", 443)
/// - `[::1]:8443` -> ("::1", 8443)
pub fn parse_host_port(authority: &str) -> Result<(String, u16), GatewayError> {
    let invalid_port =
        |port: &str| GatewayError::InvalidRequest(format!("Invalid port: {}", port));

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| GatewayError::InvalidRequest(format!("Invalid authority: {}", authority)))?;
        let port = match after.strip_prefix(':') {
            Some(port) => port.parse::<u16>().map_err(|_| invalid_port(port))?,
            None => HTTPS_PORT,
        };
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| invalid_port(port))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), HTTPS_PORT)),
    }
}

/// Create an empty response body.
fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a response body with content.
fn full_body(content: String) -> ProxyBody {
    Full::new(Bytes::from(content))
        .map_err(|never| match never {})
        .boxed()
}

/// A `text/plain` response.
pub fn text_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    respond_with(
        status,
        message.to_string(),
        vec![("Content-Type".into(), "text/plain".into())],
    )
}

/// Build the response an interceptor asked for.
fn respond_with(
    status: StatusCode,
    body: String,
    headers: Vec<(String, String)>,
) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;

    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!("Dropping invalid response header {:?}", name),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_parse_host_port_with_port() {
        let (host, port) = parse_host_port("registry.npmjs.org:443").unwrap();
        assert_eq!(host, "registry.npmjs.org");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_host_port_default() {
        let (host, port) = parse_host_port("registry.yarnpkg.com").unwrap();
        assert_eq!(host, "registry.yarnpkg.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_host_port_invalid_port() {
        assert!(parse_host_port("registry.npmjs.org:https").is_err());
    }

    #[test]
    fn test_parse_host_port_ipv6() {
        assert_eq!(
            parse_host_port("[::1]:8443").unwrap(),
            ("::1".to_string(), 8443)
        );
        assert_eq!(parse_host_port("[::1]").unwrap(), ("::1".to_string(), 443));
        assert!(parse_host_port("[::1").is_err());
    }

    #[test]
    fn test_authority() {
        assert_eq!(authority("registry.npmjs.org", 443, 443), "registry.npmjs.org");
        assert_eq!(authority("localhost", 8443, 443), "localhost:8443");
        assert_eq!(authority("::1", 8443, 443), "[::1]:8443");
    }

    #[tokio::test]
    async fn test_forbidden_response() {
        let resp = respond_with(
            StatusCode::FORBIDDEN,
            "too new".to_string(),
            vec![("Content-Type".into(), "text/plain".into())],
        );
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(resp.headers()["content-type"], "text/plain");

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"too new");
    }

    #[test]
    fn test_invalid_header_dropped() {
        let resp = respond_with(
            StatusCode::FORBIDDEN,
            String::new(),
            vec![("bad header".into(), "x".into())],
        );
        assert!(resp.headers().is_empty());
    }
}
