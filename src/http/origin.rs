//! Connection targets
//!
//! An [`Origin`] is the (scheme, host, port) triple that identifies which
//! connection a request may share.

use super::{Error, Result, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use std::fmt;
use url::Url;

/// URL scheme supported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plaintext HTTP/2 with prior knowledge
    Http,
    /// HTTP/2 over TLS, negotiated with ALPN
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => DEFAULT_HTTP_PORT,
            Scheme::Https => DEFAULT_HTTPS_PORT,
        }
    }
}

/// Identity of a connection target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Origin {
    /// Build an origin, using the scheme's default port when `port` is None
    pub fn new(scheme: Scheme, host: impl Into<String>, port: Option<u16>) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(Error::InvalidOrigin("missing host".to_string()));
        }
        Ok(Origin {
            scheme,
            port: port.unwrap_or_else(|| scheme.default_port()),
            host: host.to_ascii_lowercase(),
        })
    }

    /// Parse the origin out of a URL string
    pub fn parse(url: &str) -> Result<Self> {
        Self::from_url(&Url::parse(url)?)
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(Error::InvalidOrigin(format!(
                    "unsupported scheme {:?}",
                    other
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidOrigin(format!("no host in {}", url)))?;
        // IPv6 literals come back bracketed; sockets want the bare address
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Self::new(scheme, host, url.port())
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the `:authority` pseudo-header
    ///
    /// The port is omitted when it is the scheme default.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())
    }
}

/// Request target for a URL: its path (at least `/`) plus `?query` if any
pub fn request_path(url: &Url) -> String {
    let path = if url.path().is_empty() { "/" } else { url.path() };
    match url.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    }
}
