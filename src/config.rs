use crate::client::ClientConfig;
use crate::rewrite::{BodyRewriter, RewriteRule};
use crate::routes::RouteTable;
use hyper::Uri;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the proxy
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Path prefix -> backend group
    #[serde(default = "default_routes")]
    pub routes: BTreeMap<String, RouteConfig>,

    /// Response body substitutions, applied in order
    #[serde(default = "default_rewrite")]
    pub rewrite: Vec<RewriteRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            routes: default_routes(),
            rewrite: default_rewrite(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Max time to wait for a backend response, body included.
    /// Unset means wait indefinitely.
    pub request_timeout_secs: Option<u64>,

    /// Maximum idle connections per backend host (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}:{}': {}", self.bind, self.port, e))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            max_idle_per_host: self.pool_max_idle_per_host,
            idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            request_timeout_secs: None,
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

/// Backends serving one path prefix
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    /// Backend base URLs (`http[s]://host[:port]`), one entry per replica
    pub backends: Vec<String>,
}

impl RouteConfig {
    /// Validate the route configuration
    pub fn validate(&self, prefix: &str) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if prefix.is_empty() {
            errors.push("Route prefix must not be empty".to_string());
        }

        if self.backends.is_empty() {
            errors.push(format!("Route '{}': 'backends' must not be empty", prefix));
        }

        for backend in &self.backends {
            if let Err(reason) = validate_backend_url(backend) {
                errors.push(format!("Route '{}': backend '{}' {}", prefix, backend, reason));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A backend base URL must be exactly `http://authority` or `https://authority`
fn validate_backend_url(url: &str) -> Result<(), String> {
    let uri: Uri = url.parse().map_err(|e| format!("is not a valid URL: {}", e))?;

    let (scheme, authority) = match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => (scheme, authority),
        _ => return Err("must be an absolute URL with scheme and host".to_string()),
    };

    if scheme != "http" && scheme != "https" {
        return Err(format!(
            "uses unsupported scheme '{}' (only http and https are supported)",
            scheme
        ));
    }

    if url != format!("{}://{}", scheme, authority) {
        return Err("must not contain a path, query or trailing slash".to_string());
    }

    Ok(())
}

// Default value functions
fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_routes() -> BTreeMap<String, RouteConfig> {
    let backend = "https://jsonplaceholder.typicode.com".to_string();
    let mut routes = BTreeMap::new();
    routes.insert(
        "/todos/".to_string(),
        RouteConfig {
            backends: vec![backend.clone(), backend.clone(), backend],
        },
    );
    routes
}

fn default_rewrite() -> Vec<RewriteRule> {
    vec![RewriteRule::new("userId", "user_id")]
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to the built-in defaults if the file is missing
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        for (prefix, route) in &self.routes {
            if let Err(mut e) = route.validate(prefix) {
                errors.append(&mut e);
            }
        }

        for (i, rule) in self.rewrite.iter().enumerate() {
            if rule.from.is_empty() {
                errors.push(format!("Rewrite rule #{}: 'from' must not be empty", i + 1));
            }
        }

        if let Err(e) = self.server.bind_addr() {
            errors.push(e.to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }

    pub fn route_table(&self) -> anyhow::Result<RouteTable> {
        let entries = self
            .routes
            .iter()
            .map(|(prefix, route)| (prefix.clone(), route.backends.clone()));
        Ok(RouteTable::new(entries)?)
    }

    pub fn rewriter(&self) -> BodyRewriter {
        BodyRewriter::new(self.rewrite.clone())
    }
}
