// Socket and TLS setup for relay connections
//
// The Connector trait is the seam between the worker and the network so the
// worker can be driven against in-memory streams in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{RelayError, RelayResult};

/// Any bidirectional byte stream a relay can run over.
pub trait RelayIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RelayIo for T {}

pub type BoxedStream = Box<dyn RelayIo>;

/// Network primitives consumed by the connection worker.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a plain stream to `host:port` within `timeout`.
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> RelayResult<BoxedStream>;

    /// Run a TLS client handshake over `stream`, verifying `hostname`.
    async fn tls_connect(
        &self,
        stream: BoxedStream,
        hostname: &str,
        timeout: Duration,
    ) -> RelayResult<BoxedStream>;
}

/// Tokio TCP connector with rustls for TLS upstreams.
pub struct TcpConnector {
    tls: TlsConnector,
}

impl TcpConnector {
    /// Build a connector trusting the bundled web PKI roots.
    pub fn new() -> RelayResult<Self> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| RelayError::Connect(format!("TLS setup failed: {e}")))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self::with_tls_config(Arc::new(config)))
    }

    /// Use a caller supplied rustls client configuration.
    #[must_use]
    pub fn with_tls_config(config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            tls: TlsConnector::from(config),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> RelayResult<BoxedStream> {
        if host.is_empty() {
            return Err(RelayError::Connect("no host to connect to".to_string()));
        }

        let addr = format!("{host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                RelayError::Connect(format!(
                    "connection to {addr} timed out after {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| RelayError::Connect(format!("failed to connect to {addr}: {e}")))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {addr}: {e}");
        }

        Ok(Box::new(stream))
    }

    async fn tls_connect(
        &self,
        stream: BoxedStream,
        hostname: &str,
        timeout: Duration,
    ) -> RelayResult<BoxedStream> {
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|e| {
                RelayError::Connect(format!("invalid TLS server name '{hostname}': {e}"))
            })?;

        let tls_stream = tokio::time::timeout(timeout, self.tls.connect(server_name, stream))
            .await
            .map_err(|_| RelayError::Connect(format!("TLS handshake with {hostname} timed out")))?
            .map_err(|e| RelayError::Connect(format!("Could not connect TLS ({e})")))?;

        Ok(Box::new(tls_stream))
    }
}
