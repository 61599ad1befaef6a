//! TLS configuration
//!
//! Client-side TLS settings. The builder only records choices; the OpenSSL
//! context is created in [`ClientConfigBuilder::build`] so every OpenSSL
//! failure surfaces as a [`TlsError`].

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use std::path::PathBuf;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// TLS client configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) connector: SslConnector,
    pub(crate) verify_peer: bool,
    alpn: Vec<String>,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Protocols offered in the ALPN extension, in preference order
    pub fn alpn_protocols(&self) -> &[String] {
        &self.alpn
    }

    /// Connect to a server with TLS
    ///
    /// `servername` is sent as SNI and, when peer verification is on,
    /// checked against the certificate.
    pub fn connect(
        &self,
        stream: std::net::TcpStream,
        servername: &str,
    ) -> Result<super::TlsSessionOps, TlsError> {
        super::session::TlsSessionOps::connect(stream, self, servername)
    }
}

/// Client configuration builder
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    min_version: TlsVersion,
    max_version: Option<TlsVersion>,
    alpn: Vec<String>,
    verify_peer: bool,
    ca_file: Option<PathBuf>,
    cipher_list: Option<String>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        ClientConfigBuilder {
            min_version: TlsVersion::Tls12,
            max_version: None,
            alpn: Vec::new(),
            verify_peer: true,
            ca_file: None,
            cipher_list: None,
        }
    }
}

impl ClientConfigBuilder {
    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self.max_version = Some(version);
        self
    }

    /// Lowest acceptable TLS version
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Set ALPN protocols
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Trust the CA certificates in this PEM file in addition to the system
    /// store
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if let Some(max) = self.max_version {
            if max < self.min_version {
                return Err(TlsError::InvalidConfig(format!(
                    "maximum version {} is below minimum {}",
                    max.as_str(),
                    self.min_version.as_str()
                )));
            }
        }

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        builder.set_min_proto_version(Some(self.min_version.to_openssl_version()))?;
        builder.set_max_proto_version(self.max_version.map(|v| v.to_openssl_version()))?;

        if let Some(ciphers) = &self.cipher_list {
            builder.set_cipher_list(ciphers)?;
        }

        if !self.alpn.is_empty() {
            // Wire format: each protocol prefixed by its length
            let mut alpn_bytes = Vec::new();
            for proto in &self.alpn {
                if proto.is_empty() || proto.len() > 255 {
                    return Err(TlsError::InvalidConfig(format!(
                        "invalid ALPN protocol {:?}",
                        proto
                    )));
                }
                alpn_bytes.push(proto.len() as u8);
                alpn_bytes.extend_from_slice(proto.as_bytes());
            }
            builder.set_alpn_protos(&alpn_bytes)?;
        }

        if self.verify_peer {
            builder.set_verify(SslVerifyMode::PEER);
            if let Some(ca_file) = &self.ca_file {
                builder.set_ca_file(ca_file)?;
            }
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }

        Ok(TlsConfig {
            connector: builder.build(),
            verify_peer: self.verify_peer,
            alpn: self.alpn,
        })
    }
}
