//! Outbound HTTP client for backend requests
//!
//! A thin wrapper around the pooled hyper client that keeps request
//! statistics. Both `http://` and `https://` backends are reachable; TLS
//! server certificates are verified against the webpki root set unless a
//! custom rustls configuration is supplied. Requests are sent as built by the
//! proxy engine: no retries, no header rewriting beyond what hyper itself adds
//! (`Host` when missing).

use crate::error::UpstreamError;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Body type of outbound requests
pub type UpstreamBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// Statistics for the upstream client
#[derive(Debug, Default)]
pub struct ClientStats {
    /// Total number of requests dispatched to backends
    pub total_requests: AtomicU64,
    /// Requests that failed before a response head arrived
    pub failed_requests: AtomicU64,
}

impl ClientStats {
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn get_failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }
}

/// Configuration for the upstream connection pool
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum idle connections per backend host
    pub max_idle_per_host: usize,
    /// Idle connection timeout
    pub idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Pooled HTTP(S) client used to reach backends
pub struct UpstreamClient {
    client: Client<HttpsConnector<HttpConnector>, UpstreamBody>,
    stats: Arc<ClientStats>,
}

impl UpstreamClient {
    /// Client trusting the webpki root certificates
    pub fn new(config: ClientConfig) -> Self {
        Self::with_tls_config(config, default_tls_config())
    }

    /// Client verifying backend certificates with the given rustls configuration
    pub fn with_tls_config(config: ClientConfig, tls: rustls::ClientConfig) -> Self {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        debug!(
            max_idle = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Upstream client initialized"
        );

        Self {
            client,
            stats: Arc::new(ClientStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ClientStats> {
        Arc::clone(&self.stats)
    }

    /// Send a fully built request and wait for the response head
    pub async fn send(
        &self,
        req: Request<UpstreamBody>,
    ) -> Result<Response<Incoming>, UpstreamError> {
        self.stats.record_request();

        self.client.request(req).await.map_err(|e| {
            self.stats.record_failure();
            UpstreamError::Connect(e)
        })
    }
}

/// rustls client configuration trusting the webpki root certificates
pub fn default_tls_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("ring provider supports the default protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth()
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}
