//! Client and connection configuration
//!
//! Both configs are built with validating builders and are immutable
//! afterwards. [`ClientConfig::from_env`] reads the usual AWS environment
//! variables.

use crate::http::h2::{
    Settings, SettingsBuilder, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::http::tls::{TlsConfig, TlsError, TlsVersion};
use crate::http::ALPN_H2;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the region
pub const ENV_REGION: &str = "AWS_REGION";
/// Fallback region variable used by older tooling
pub const ENV_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
/// Overrides the service endpoint, e.g. to point at a local test server
pub const ENV_ENDPOINT: &str = "TRANSCRIBE_STREAMING_ENDPOINT";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No region configured (set {} or {})", ENV_REGION, ENV_DEFAULT_REGION)]
    MissingRegion,
}

/// Settings for each HTTP/2 connection a client opens
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    connect_timeout: Duration,
    poll_interval: Duration,
    initial_window_size: u32,
    max_frame_size: u32,
    header_table_size: u32,
    verify_peer: bool,
    min_tls_version: TlsVersion,
    ca_file: Option<PathBuf>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            verify_peer: true,
            min_tls_version: TlsVersion::Tls12,
            ca_file: None,
        }
    }
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Time allowed for TCP connect, TLS handshake and SETTINGS exchange
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Longest the transport thread sleeps without a socket event or wakeup
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Receive window advertised for each stream
    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn header_table_size(&self) -> u32 {
        self.header_table_size
    }

    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    pub fn min_tls_version(&self) -> TlsVersion {
        self.min_tls_version
    }

    /// SETTINGS sent in the connection preface
    pub fn local_settings(&self) -> Settings {
        Settings {
            header_table_size: Some(self.header_table_size),
            enable_push: Some(false),
            max_concurrent_streams: None,
            initial_window_size: Some(self.initial_window_size),
            max_frame_size: Some(self.max_frame_size),
            max_header_list_size: None,
        }
    }

    /// TLS client config offering only HTTP/2 via ALPN
    pub fn tls_config(&self) -> Result<TlsConfig, TlsError> {
        let mut builder = TlsConfig::client()
            .min_version(self.min_tls_version)
            .alpn(&[ALPN_H2])
            .verify_peer(self.verify_peer);
        if let Some(ca_file) = &self.ca_file {
            builder = builder.ca_file(ca_file);
        }
        builder.build()
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.initial_window_size = size;
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.config.header_table_size = size;
        self
    }

    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.config.verify_peer = verify;
        self
    }

    pub fn min_tls_version(mut self, version: TlsVersion) -> Self {
        self.config.min_tls_version = version;
        self
    }

    /// Extra CA certificates (PEM) to trust when verifying the server
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_file = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        let config = self.config;
        if config.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid("connect timeout must be non-zero".to_string()));
        }
        if config.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll interval must be non-zero".to_string()));
        }
        if config.initial_window_size == 0 {
            return Err(ConfigError::Invalid("initial window size must be non-zero".to_string()));
        }
        SettingsBuilder::new()
            .initial_window_size(config.initial_window_size)
            .max_frame_size(config.max_frame_size)
            .header_table_size(config.header_table_size)
            .build()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }
}

/// Settings for a [`TranscribeStreamingClient`](crate::TranscribeStreamingClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    region: String,
    endpoint: Option<String>,
    body_capacity: usize,
    connection: ConnectionConfig,
}

impl ClientConfig {
    pub fn builder(region: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            region: region.into(),
            endpoint: None,
            body_capacity: 16,
            connection: ConnectionConfig::default(),
        }
    }

    /// Read the region and optional endpoint override from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let region = lookup(ENV_REGION)
            .or_else(|| lookup(ENV_DEFAULT_REGION))
            .filter(|r| !r.trim().is_empty())
            .ok_or(ConfigError::MissingRegion)?;

        let mut builder = Self::builder(region.trim());
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|e| !e.trim().is_empty()) {
            builder = builder.endpoint(endpoint.trim());
        }
        builder.build()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Service endpoint URL
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://transcribestreaming.{}.amazonaws.com", self.region),
        }
    }

    /// Audio events buffered between the producer and the transport
    pub fn body_capacity(&self) -> usize {
        self.body_capacity
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    region: String,
    endpoint: Option<String>,
    body_capacity: usize,
    connection: ConnectionConfig,
}

impl ClientConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn body_capacity(mut self, capacity: usize) -> Self {
        self.body_capacity = capacity;
        self
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        if self.region.is_empty() {
            return Err(ConfigError::MissingRegion);
        }
        if self.body_capacity == 0 {
            return Err(ConfigError::Invalid("body capacity must be non-zero".to_string()));
        }
        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| ConfigError::Invalid(format!("endpoint {:?}: {}", endpoint, e)))?;
        }
        Ok(ClientConfig {
            region: self.region,
            endpoint: self.endpoint,
            body_capacity: self.body_capacity,
            connection: self.connection,
        })
    }
}
