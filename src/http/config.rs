//! Server configuration
//!
//! Everything the accept loop and the protocol layers need is collected by
//! [`ServerConfigBuilder`] and validated once in
//! [`build`](ServerConfigBuilder::build).

use super::filter::{FilterChainBuilder, FilterPriority, RequestFilter, ResponseFilter};
use super::h2::Settings;
use super::tls::TlsConfig;
use super::{Error, FilterChain, Result, Router, Routes, MAX_HEADER_SIZE, READ_CHUNK_SIZE};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Default HTTP/1.1 read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default HTTP/2 idle timeout
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default bound on flushing queued frames after GOAWAY
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP/1.1 connection limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Http1Config {
    /// How long a request may take to arrive, and how long an idle
    /// keep-alive connection is held open
    pub read_timeout: Duration,
    /// Request line plus headers
    pub max_header_size: usize,
    /// Size of a single transport read
    pub read_chunk_size: usize,
}

impl Default for Http1Config {
    fn default() -> Self {
        Http1Config {
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_header_size: MAX_HEADER_SIZE,
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }
}

/// HTTP/2 connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct H2Config {
    /// SETTINGS sent to every client
    pub settings: Settings,
    /// A connection without any inbound frame for this long is closed
    pub idle_timeout: Duration,
    /// Bound on flushing queued frames after GOAWAY
    pub drain_timeout: Duration,
}

impl Default for H2Config {
    fn default() -> Self {
        H2Config {
            settings: Settings::server_defaults(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Server configuration (immutable after building)
#[derive(Clone)]
pub struct ServerConfig {
    pub(crate) name: String,
    pub(crate) bind: SocketAddr,
    pub(crate) router: Arc<dyn Router>,
    pub(crate) filters: Arc<FilterChain>,
    pub(crate) tls: Option<TlsConfig>,
    pub(crate) http1: Http1Config,
    pub(crate) h2: H2Config,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Server name reported to handlers
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the listener binds to
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind
    }

    pub fn filters(&self) -> &Arc<FilterChain> {
        &self.filters
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    pub fn http1(&self) -> &Http1Config {
        &self.http1
    }

    pub fn h2(&self) -> &H2Config {
        &self.h2
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("name", &self.name)
            .field("bind", &self.bind)
            .field("filters", &self.filters)
            .field("tls", &self.tls.is_some())
            .field("http1", &self.http1)
            .field("h2", &self.h2)
            .finish()
    }
}

/// Builder for [`ServerConfig`]
pub struct ServerConfigBuilder {
    name: String,
    address: String,
    port: u16,
    router: Option<Arc<dyn Router>>,
    filters: FilterChainBuilder,
    tls: Option<TlsConfig>,
    http1: Http1Config,
    h2: H2Config,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        ServerConfigBuilder {
            name: "localhost".to_string(),
            address: Ipv4Addr::UNSPECIFIED.to_string(),
            port: 0,
            router: None,
            filters: FilterChain::builder(),
            tls: None,
            http1: Http1Config::default(),
            h2: H2Config::default(),
        }
    }
}

impl ServerConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// IP address to bind; defaults to all interfaces
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Port to bind; 0 picks a free port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Serve requests from a route table
    pub fn routes(self, routes: Routes) -> Self {
        self.router(Arc::new(routes))
    }

    /// Serve requests from any router
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn request_filter(
        mut self,
        priority: FilterPriority,
        filter: impl RequestFilter + 'static,
    ) -> Self {
        self.filters.add_request_filter(priority, Arc::new(filter));
        self
    }

    pub fn response_filter(
        mut self,
        priority: FilterPriority,
        filter: impl ResponseFilter + 'static,
    ) -> Self {
        self.filters.add_response_filter(priority, Arc::new(filter));
        self
    }

    /// Terminate TLS on accepted connections
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn http1(mut self, http1: Http1Config) -> Self {
        self.http1 = http1;
        self
    }

    pub fn h2(mut self, h2: H2Config) -> Self {
        self.h2 = h2;
        self
    }

    pub fn build(self) -> Result<ServerConfig> {
        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("Invalid bind address: {}", self.address)))?;

        if self.http1.max_header_size == 0 || self.http1.read_chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "Header limit and read chunk size must be non-zero".to_string(),
            ));
        }
        if self.http1.read_timeout.is_zero() || self.h2.idle_timeout.is_zero() {
            return Err(Error::InvalidConfig("Timeouts must be non-zero".to_string()));
        }
        self.h2
            .settings
            .validate()
            .map_err(|e| Error::InvalidConfig(format!("HTTP/2 settings: {}", e)))?;

        Ok(ServerConfig {
            name: self.name,
            bind: SocketAddr::new(ip, self.port),
            router: self.router.unwrap_or_else(|| Arc::new(Routes::new())),
            filters: Arc::new(self.filters.build()),
            tls: self.tls,
            http1: self.http1,
            h2: self.h2,
        })
    }
}
