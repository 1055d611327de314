// Source table and the default ingestion pipeline
//
// Every logged-in relay becomes a source under its local mountpoint. The
// table refuses a second source on a live mountpoint and caps the number of
// sources. Payload is published on a broadcast channel per source; listener
// fan-out subscribes there.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing as log;

use crate::error::{RelayError, RelayResult};
use crate::relay::connection::RelayConnection;
use crate::relay::descriptor::RelayDescriptor;
use crate::relay::ingest::Ingest;

const READ_BUFFER_SIZE: usize = 4096;
const BROADCAST_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Relay source with existing Mountpoint {0}")]
    MountInUse(String),

    #[error("Server full ({0} sources)")]
    ServerFull(usize),
}

/// A live source and its counters.
#[derive(Debug)]
pub struct Source {
    pub mount: String,
    pub connection_id: u64,
    pub source_agent: String,
    pub connected_at: DateTime<Utc>,
    bytes_read: AtomicU64,
    data: broadcast::Sender<Bytes>,
}

impl Source {
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Receive payload published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.data.subscribe()
    }

    fn publish(&self, payload: Bytes) {
        self.bytes_read
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        // No listeners is not an error.
        let _ = self.data.send(payload);
    }
}

pub struct SourceTable {
    sources: DashMap<String, Arc<Source>>,
    /// Slots taken, reserved while the mount's shard is locked.
    live: AtomicUsize,
    max_sources: usize,
}

impl SourceTable {
    #[must_use]
    pub fn new(max_sources: usize) -> Self {
        Self {
            sources: DashMap::new(),
            live: AtomicUsize::new(0),
            max_sources,
        }
    }

    pub fn register(
        &self,
        mount: &str,
        connection_id: u64,
        source_agent: impl Into<String>,
    ) -> Result<Arc<Source>, SourceError> {
        match self.sources.entry(mount.to_string()) {
            Entry::Occupied(_) => Err(SourceError::MountInUse(mount.to_string())),
            Entry::Vacant(slot) => {
                self.live
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < self.max_sources).then_some(n + 1)
                    })
                    .map_err(|_| SourceError::ServerFull(self.max_sources))?;

                let (data, _) = broadcast::channel(BROADCAST_CAPACITY);
                let source = Arc::new(Source {
                    mount: mount.to_string(),
                    connection_id,
                    source_agent: source_agent.into(),
                    connected_at: Utc::now(),
                    bytes_read: AtomicU64::new(0),
                    data,
                });
                slot.insert(Arc::clone(&source));
                Ok(source)
            }
        }
    }

    /// Remove the source on `mount` if it still belongs to `connection_id`.
    pub fn unregister(&self, mount: &str, connection_id: u64) -> bool {
        let removed = self
            .sources
            .remove_if(mount, |_, s| s.connection_id == connection_id)
            .is_some();
        if removed {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    #[must_use]
    pub fn get(&self, mount: &str) -> Option<Arc<Source>> {
        self.sources.get(mount).map(|s| Arc::clone(s.value()))
    }

    #[must_use]
    pub fn mounts(&self) -> Vec<String> {
        let mut mounts: Vec<String> = self.sources.iter().map(|s| s.key().clone()).collect();
        mounts.sort();
        mounts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Default [`Ingest`]: publishes relay payload into the [`SourceTable`].
pub struct SourceIngest {
    table: Arc<SourceTable>,
}

impl SourceIngest {
    #[must_use]
    pub fn new(table: Arc<SourceTable>) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn table(&self) -> &Arc<SourceTable> {
        &self.table
    }
}

#[async_trait]
impl Ingest for SourceIngest {
    async fn ingest(&self, mut connection: RelayConnection, relay: &RelayDescriptor) {
        let mount = connection.mount.clone();
        let id = connection.id();
        let agent = connection.source_agent().unwrap_or_default().to_string();

        let source = match self.table.register(&mount, id, agent) {
            Ok(source) => source,
            Err(e) => {
                log::warn!(
                    relay = %relay.key(),
                    mount = %mount,
                    error = %e,
                    "Relay source refused"
                );
                return;
            }
        };
        // The worker drops this future when the connection is kicked.
        let _registration = Registration {
            table: Arc::clone(&self.table),
            mount: mount.clone(),
            connection_id: id,
        };
        log::info!(mount = %mount, connection_id = id, "Accepted relay source");

        match pump(&mut connection, &source).await {
            Ok(()) => log::info!(mount = %mount, bytes = source.bytes_read(), "Relay source ended"),
            Err(e) => log::warn!(
                mount = %mount,
                bytes = source.bytes_read(),
                error = %e,
                "Relay source failed"
            ),
        }
    }
}

/// Unregisters the source when ingestion ends or is dropped.
struct Registration {
    table: Arc<SourceTable>,
    mount: String,
    connection_id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.table.unregister(&self.mount, self.connection_id);
    }
}

/// Read the feed until EOF, decoding a chunked body when armed.
async fn pump(conn: &mut RelayConnection, source: &Source) -> RelayResult<()> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut decoded = BytesMut::new();

    loop {
        let stream = conn
            .stream_mut()
            .ok_or_else(|| RelayError::Transmission("connection has no socket".to_string()))?;
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        match conn.chunk.as_mut() {
            Some(decoder) => {
                if decoder.decode(&buf[..n], &mut decoded)? > 0 {
                    source.publish(decoded.split().freeze());
                }
                if decoder.is_finished() {
                    return Ok(());
                }
            }
            None => source.publish(Bytes::copy_from_slice(&buf[..n])),
        }
    }
}
