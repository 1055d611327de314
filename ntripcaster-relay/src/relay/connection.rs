// Connection context for one relay attempt
//
// A RelayConnection is created per attempt by the worker. It owns the socket
// (behind a buffered reader so bytes read past the handshake are kept), the
// response headers and the transfer-encoding state. The ConnectionHandle is
// the cheap, cloneable part that lives in the registry while the feed runs.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use super::chunk::ChunkDecoder;
use super::transport::BoxedStream;

/// Identity and close signal of a live relay connection.
///
/// Equality is by id only.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Ask the owning worker to end the feed.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once `close` has been called on any clone of this handle.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Header store with case-insensitive names, kept in arrival order.
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    vars: IndexMap<String, String>,
}

impl HeaderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.vars.insert(name.to_ascii_lowercase(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Application protocol spoken on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComProtocol {
    Ntrip1,
    Ntrip2,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    Identity,
    Chunked,
}

pub struct RelayConnection {
    handle: ConnectionHandle,
    /// Upstream host this connection was made for.
    pub host: String,
    /// Local mountpoint the feed will be published under.
    pub mount: String,
    pub headers: HeaderStore,
    pub protocol: ComProtocol,
    pub transfer_encoding: TransferEncoding,
    pub chunk: Option<ChunkDecoder>,
    pub connected_at: Option<DateTime<Utc>>,
    stream: Option<BufReader<BoxedStream>>,
}

impl RelayConnection {
    #[must_use]
    pub fn new(
        handle: ConnectionHandle,
        host: impl Into<String>,
        mount: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            host: host.into(),
            mount: mount.into(),
            headers: HeaderStore::new(),
            protocol: ComProtocol::Ntrip1,
            transfer_encoding: TransferEncoding::Identity,
            chunk: None,
            connected_at: None,
            stream: None,
        }
    }

    #[must_use]
    pub const fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.handle.id
    }

    /// Attach the (possibly TLS wrapped) socket and stamp the connect time.
    pub fn attach(&mut self, stream: BoxedStream) {
        self.stream = Some(BufReader::new(stream));
        self.connected_at = Some(Utc::now());
    }

    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_mut(&mut self) -> Option<&mut BufReader<BoxedStream>> {
        self.stream.as_mut()
    }

    /// Mark the body as chunked and (re)initialise the decoder.
    pub fn enable_chunked(&mut self) {
        self.transfer_encoding = TransferEncoding::Chunked;
        match self.chunk.as_mut() {
            Some(decoder) => decoder.reset(),
            None => self.chunk = Some(ChunkDecoder::new()),
        }
    }

    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.transfer_encoding == TransferEncoding::Chunked
    }

    #[must_use]
    pub fn source_agent(&self) -> Option<&str> {
        self.headers.get("Source-Agent")
    }
}

impl fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConnection")
            .field("id", &self.handle.id)
            .field("host", &self.host)
            .field("mount", &self.mount)
            .field("protocol", &self.protocol)
            .field("transfer_encoding", &self.transfer_encoding)
            .field("attached", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}
