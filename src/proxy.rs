use crate::client::{ClientStats, UpstreamBody, UpstreamClient};
use crate::config::Config;
use crate::error::{ProxyError, UpstreamError};
use crate::loadbalancer::{self, SelectionCursor};
use crate::rewrite::BodyRewriter;
use crate::routes::RouteTable;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{HeaderMap, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper::http::response;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Body type of responses sent back to clients
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Routes, balances, forwards and rewrites a single request at a time
///
/// Shared by every connection task. The route table is read-only; the only
/// mutable state is one [`SelectionCursor`] per route.
pub struct ProxyEngine {
    routes: RouteTable,
    cursors: Box<[SelectionCursor]>,
    rewriter: BodyRewriter,
    client: UpstreamClient,
    request_timeout: Option<Duration>,
}

impl ProxyEngine {
    pub fn new(routes: RouteTable, rewriter: BodyRewriter) -> Self {
        let cursors = (0..routes.len()).map(|_| SelectionCursor::new()).collect();
        Self {
            routes,
            cursors,
            rewriter,
            client: UpstreamClient::default(),
            request_timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut engine = Self::new(config.route_table()?, config.rewriter())
            .with_client(UpstreamClient::new(config.server.client_config()));
        engine.request_timeout = config.server.request_timeout();
        Ok(engine)
    }

    pub fn with_client(mut self, client: UpstreamClient) -> Self {
        self.client = client;
        self
    }

    /// Bound the time spent waiting for a backend response, body included
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn rewriter(&self) -> &BodyRewriter {
        &self.rewriter
    }

    /// Selection cursor of the route at `index` (see [`crate::routes::RouteMatch::index`])
    pub fn cursor(&self, index: usize) -> Option<&SelectionCursor> {
        self.cursors.get(index)
    }

    pub fn client_stats(&self) -> Arc<ClientStats> {
        self.client.stats()
    }

    /// Proxy one request, converting every failure into a client response
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + 'static,
    {
        let path = req.uri().path().to_owned();
        let method = req.method().clone();

        match self.proxy(req).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    ProxyError::RouteNotFound { .. } => {
                        debug!(path, %method, "No route for request");
                    }
                    ProxyError::Upstream(cause) => {
                        warn!(path, %method, kind = cause.kind(), error = %cause, "Upstream request failed");
                    }
                }
                e.to_response()
            }
        }
    }

    async fn proxy<B>(&self, req: Request<B>) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + 'static,
    {
        let path = req.uri().path().to_owned();
        let method = req.method().clone();

        let route = self
            .routes
            .find(&path)
            .ok_or_else(|| ProxyError::RouteNotFound { path: path.clone() })?;

        let backend = loadbalancer::select(route.backends, &self.cursors[route.index]);
        debug!(path, prefix = route.prefix, backend = %backend, "Selected backend");

        let outbound = build_upstream_request(req, backend)?;

        let exchange = async {
            let response = self.client.send(outbound).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await.map_err(UpstreamError::ReadBody)?.to_bytes();
            Ok::<_, UpstreamError>((parts, body))
        };

        let (parts, body) = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| UpstreamError::Timeout(limit))??,
            None => exchange.await?,
        };

        let body = self.rewriter.apply(body);

        info!(
            path,
            status = parts.status.as_u16(),
            response = %String::from_utf8_lossy(&body),
            "Request proxied"
        );

        Ok(relay_response(&method, parts, body))
    }
}

/// Build the outbound request: same method, backend base + inbound path and
/// query, inbound headers copied as-is except `Host`
fn build_upstream_request<B>(
    req: Request<B>,
    backend: &str,
) -> Result<Request<UpstreamBody>, UpstreamError>
where
    B: Body<Data = Bytes, Error = hyper::Error> + Send + 'static,
{
    let (parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let uri: Uri = format!("{}{}", backend, path_and_query)
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| UpstreamError::InvalidBackendUrl {
            url: backend.to_string(),
            reason: e.to_string(),
        })?;

    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(UpstreamError::InvalidBackendUrl {
            url: backend.to_string(),
            reason: "missing scheme or host".to_string(),
        });
    }

    let mut builder = Request::builder().method(parts.method).uri(uri);

    // Host is derived from the backend URL by the client
    for (key, value) in parts.headers.iter() {
        if key != HOST {
            builder = builder.header(key, value);
        }
    }

    builder
        .body(body.boxed_unsync())
        .map_err(UpstreamError::RequestBuild)
}

/// Copy every header of `src` into `dst`; values for a name present in both
/// replace those already in `dst`
fn copy_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for name in src.keys() {
        dst.remove(name);
        for value in src.get_all(name) {
            dst.append(name.clone(), value.clone());
        }
    }
}

/// Whether a response to `method` with `status` carries a payload body
fn carries_payload(method: &Method, status: StatusCode) -> bool {
    *method != Method::HEAD
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

/// Build the client response from the backend's status and headers and the
/// rewritten body
///
/// When the response carries a payload, framing headers are dropped so hyper
/// frames the rewritten body itself. HEAD, 1xx, 204 and 304 responses keep
/// the backend's `Content-Length`, which describes a body that is not sent.
/// The status is committed with the head; if writing the body fails later,
/// hyper aborts the connection and the status cannot change.
fn relay_response(method: &Method, parts: response::Parts, body: Bytes) -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(body).map_err(|never| match never {}).boxed());
    *response.status_mut() = parts.status;

    let headers = response.headers_mut();
    copy_headers(&parts.headers, headers);
    if carries_payload(method, parts.status) {
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
    }

    response
}

/// The wildcard HTTP listener feeding every request into a [`ProxyEngine`]
pub struct ProxyServer {
    bind_addr: SocketAddr,
    engine: Arc<ProxyEngine>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    pub fn new(
        bind_addr: SocketAddr,
        engine: Arc<ProxyEngine>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            engine,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Proxy server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let engine = Arc::clone(&self.engine);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, engine).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    engine: Arc<ProxyEngine>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let engine = Arc::clone(&engine);
        async move {
            debug!(client = %addr, method = %req.method(), uri = %req.uri(), "Incoming request");
            Ok::<_, Infallible>(engine.handle(req).await)
        }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}
