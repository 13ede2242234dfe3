//! Gateway server: TCP accept loop and per-connection HTTP/1.1 service.
//!
//! The tool may talk to the gateway over TLS (npm, yarn 2+ with an
//! `https://` proxy URL) or in the clear (yarn 1, the liveness probe). The
//! first byte of each connection decides: `0x16` is a TLS handshake record,
//! anything else is HTTP.
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let listener = bind("127.0.0.1", 8080).await?;
//! GatewayServer::new(context, shutdown_rx).run(listener).await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OnceCell, watch};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use super::connect::{ProxyBody, handle_connect, handle_http};
use super::error::GatewayError;
use super::hook::RequestInterceptor;
use super::tls::{CertificateCache, create_tls_acceptor, create_tls_connector};
use crate::policy::FreshnessPolicy;

/// First byte of a TLS handshake record.
const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Everything a connection handler needs, shared by all connections.
pub struct GatewayContext {
    pub(crate) policy: Arc<FreshnessPolicy>,
    pub(crate) interceptor: Arc<dyn RequestInterceptor>,
    pub(crate) cert_cache: Arc<CertificateCache>,
    listen_host: String,
    connector: OnceCell<TlsConnector>,
}

impl GatewayContext {
    /// Create the shared context.
    ///
    /// `listen_host` names the certificate presented to clients that speak
    /// TLS to the gateway itself.
    pub fn new(
        policy: Arc<FreshnessPolicy>,
        interceptor: Arc<dyn RequestInterceptor>,
        cert_cache: Arc<CertificateCache>,
        listen_host: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            interceptor,
            cert_cache,
            listen_host: listen_host.into(),
            connector: OnceCell::new(),
        }
    }

    /// Upstream TLS connector, built on first use.
    pub async fn upstream_connector(&self) -> Result<&TlsConnector, GatewayError> {
        self.connector
            .get_or_try_init(|| async { create_tls_connector() })
            .await
    }
}

/// Bind the gateway's listen address.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, GatewayError> {
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    TcpListener::bind((bare_host, port))
        .await
        .map_err(|e| GatewayError::Bind {
            addr: format!("{}:{}", host, port),
            source: e,
        })
}

/// The gateway server.
pub struct GatewayServer {
    context: Arc<GatewayContext>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    /// Create a server.
    pub fn new(context: GatewayContext, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            context: Arc::new(context),
            shutdown_rx,
        }
    }

    /// Serve connections from `listener` until the shutdown signal is sent.
    pub async fn run(self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Gateway listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);
                            self.spawn_connection_handler(stream);
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_connection_handler(&self, stream: TcpStream) {
        let context = self.context.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, context).await {
                if e.is_disconnect() {
                    debug!("Connection ended: {}", e);
                } else {
                    warn!("Connection error: {}", e);
                }
            }
        });
    }
}

/// Handle one client connection, in TLS or in the clear.
async fn handle_connection(
    stream: TcpStream,
    context: Arc<GatewayContext>,
) -> Result<(), GatewayError> {
    let mut first = [0u8; 1];
    if stream.peek(&mut first).await? == 0 {
        return Ok(());
    }

    if first[0] == TLS_HANDSHAKE_RECORD {
        let acceptor =
            create_tls_acceptor(context.cert_cache.clone(), Some(context.listen_host.clone()))?;
        let tls = acceptor
            .accept(stream)
            .await
            .map_err(|e| GatewayError::Tls(format!("Proxy TLS handshake failed: {}", e)))?;
        serve_proxy(tls, context).await
    } else {
        serve_proxy(stream, context).await
    }
}

/// Serve HTTP/1.1 proxy requests, with upgrades for CONNECT.
async fn serve_proxy<I>(io: I, context: Arc<GatewayContext>) -> Result<(), GatewayError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let context = context.clone();
        async move { proxy_request(req, context).await }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades()
        .await
        .map_err(GatewayError::from)
}

async fn proxy_request(
    req: Request<Incoming>,
    context: Arc<GatewayContext>,
) -> Result<Response<ProxyBody>, GatewayError> {
    if req.method() == Method::CONNECT {
        handle_connect(req, context).await
    } else {
        handle_http(req, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{CA_COMMON_NAME, EphemeralCa};
    use crate::gateway::hook::{InterceptAction, RequestHead};
    use crate::policy::{MetadataSource, PolicyError, PublishTimes};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use url::Url;

    struct NoMetadata;

    #[async_trait]
    impl MetadataSource for NoMetadata {
        async fn fetch_publish_times(
            &self,
            package: &str,
            _registry: &Url,
        ) -> Result<PublishTimes, PolicyError> {
            Err(PolicyError::lookup_failed(package, "offline"))
        }
    }

    struct ForwardAll;

    #[async_trait]
    impl RequestInterceptor for ForwardAll {
        async fn intercept(&self, _head: &RequestHead) -> InterceptAction {
            InterceptAction::Forward
        }
    }

    fn context() -> GatewayContext {
        let policy = FreshnessPolicy::new(
            Url::parse("https://registry.npmjs.org/").unwrap(),
            &[],
            14,
            Arc::new(NoMetadata),
        );
        let ca = Arc::new(EphemeralCa::issue(CA_COMMON_NAME).unwrap());
        GatewayContext::new(
            Arc::new(policy),
            Arc::new(ForwardAll),
            Arc::new(CertificateCache::new(ca)),
            "127.0.0.1",
        )
    }

    async fn raw_request(addr: std::net::SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(GatewayServer::new(context(), shutdown_rx).run(listener));

        let response = raw_request(
            addr,
            "GET /__proxy_ping HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("PONG"));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_origin_form_request_is_rejected() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(GatewayServer::new(context(), shutdown_rx).run(listener));

        let response = raw_request(
            addr,
            "GET /left-pad HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, GatewayError::Bind { .. }));
    }
}
