//! TLS configuration
//!
//! Server-side TLS settings are collected by [`TlsConfigBuilder`] and turned
//! into an OpenSSL context once, in [`TlsConfigBuilder::build`]. The built
//! [`TlsConfig`] is cheap to clone and shared by every accepted connection.

use openssl::pkey::PKey;
use openssl::ssl::{AlpnError, SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use std::fs;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

/// Protocols offered through ALPN when none are configured
pub const DEFAULT_ALPN: &[&str] = &["h2", "http/1.1"];

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// Client certificate verification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientVerify {
    /// Don't request client certificates
    #[default]
    None,
    /// Request client certificate but don't require it
    Optional,
    /// Require client certificate
    Required,
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

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    alpn: Vec<String>,
}

impl TlsConfig {
    /// Create a new server configuration builder
    pub fn server() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Protocols offered through ALPN, in preference order
    pub fn alpn_protocols(&self) -> &[String] {
        &self.alpn
    }

    /// Run the server handshake on an accepted connection
    pub fn accept(&self, stream: TcpStream) -> Result<super::TlsSessionOps, TlsError> {
        super::session::TlsSessionOps::accept(stream, self)
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").field("alpn", &self.alpn).finish()
    }
}

/// Server TLS configuration builder
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    ca_file: Option<PathBuf>,
    client_verify: ClientVerify,
    cipher_list: Option<String>,
    ciphersuites: Option<String>,
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    alpn: Option<Vec<String>>,
}

impl TlsConfigBuilder {
    /// Certificate chain in PEM; also holds the private key unless
    /// [`key_file`](Self::key_file) is set
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cert_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Private key in PEM
    pub fn key_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.key_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// CA bundle used to verify client certificates
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.ca_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set client certificate verification mode
    pub fn client_verify(mut self, mode: ClientVerify) -> Self {
        self.client_verify = mode;
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: impl Into<String>) -> Self {
        self.ciphersuites = Some(ciphers.into());
        self
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set ALPN protocols in preference order
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = Some(protocols.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if let (Some(min), Some(max)) = (self.min_version, self.max_version) {
            if min > max {
                return Err(TlsError::InvalidConfig(format!(
                    "minimum version {} above maximum {}",
                    min.as_str(),
                    max.as_str()
                )));
            }
        }

        let mut ctx = SslContextBuilder::new(SslMethod::tls_server())?;

        if let Some(min) = self.min_version {
            ctx.set_min_proto_version(Some(min.to_openssl_version()))?;
        }
        if let Some(max) = self.max_version {
            ctx.set_max_proto_version(Some(max.to_openssl_version()))?;
        }
        if let Some(ciphers) = &self.cipher_list {
            ctx.set_cipher_list(ciphers)?;
        }
        if let Some(suites) = &self.ciphersuites {
            ctx.set_ciphersuites(suites)?;
        }

        match &self.cert_file {
            Some(path) => {
                let cert_pem = fs::read(path)?;
                let key_pem = match &self.key_file {
                    Some(key_path) => fs::read(key_path)?,
                    None => cert_pem.clone(),
                };
                load_identity(&mut ctx, &cert_pem, &key_pem)?;
            }
            None => {
                let pem = super::builtin_cert::BUILTIN_CERT.as_bytes();
                load_identity(&mut ctx, pem, pem)?;
            }
        }
        ctx.check_private_key()
            .map_err(|e| TlsError::Certificate(format!("Key does not match certificate: {}", e)))?;

        if let Some(ca) = &self.ca_file {
            ctx.set_ca_file(ca)?;
        }
        ctx.set_verify(match self.client_verify {
            ClientVerify::None => SslVerifyMode::NONE,
            ClientVerify::Optional => SslVerifyMode::PEER,
            ClientVerify::Required => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        });

        let alpn = self
            .alpn
            .unwrap_or_else(|| DEFAULT_ALPN.iter().map(|p| p.to_string()).collect());
        if !alpn.is_empty() {
            let offered: Vec<Vec<u8>> = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
            ctx.set_alpn_select_callback(move |_ssl, client_protos| {
                select_alpn(&offered, client_protos).ok_or(AlpnError::NOACK)
            });
        }

        Ok(TlsConfig {
            ctx: ctx.build(),
            alpn,
        })
    }
}

fn load_identity(
    ctx: &mut SslContextBuilder,
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<(), TlsError> {
    let mut chain = X509::stack_from_pem(cert_pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?
        .into_iter();
    let leaf = chain
        .next()
        .ok_or_else(|| TlsError::Certificate("No certificate in PEM data".to_string()))?;
    ctx.set_certificate(&leaf)?;
    for extra in chain {
        ctx.add_extra_chain_cert(extra)?;
    }

    let key = PKey::private_key_from_pem(key_pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
    ctx.set_private_key(&key)?;
    Ok(())
}

/// Pick the first of our protocols the client also offers
///
/// `client_protos` is the length-prefixed ALPN wire list.
fn select_alpn<'a>(offered: &[Vec<u8>], client_protos: &'a [u8]) -> Option<&'a [u8]> {
    let mut client = Vec::new();
    let mut pos = 0;
    while pos < client_protos.len() {
        let len = client_protos[pos] as usize;
        pos += 1;
        if pos + len > client_protos.len() {
            break;
        }
        client.push(&client_protos[pos..pos + len]);
        pos += len;
    }

    offered
        .iter()
        .find_map(|ours| client.iter().find(|theirs| **theirs == ours.as_slice()).copied())
}
