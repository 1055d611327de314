// Ingest trait: hand-off point from a logged-in relay to the stream pipeline

use async_trait::async_trait;

use super::connection::RelayConnection;
use super::descriptor::RelayDescriptor;

/// Consumer of a logged-in relay feed.
///
/// `ingest` owns the connection and returns only when the feed ends, either
/// because the upstream closed or the pipeline gave up on it.
#[async_trait]
pub trait Ingest: Send + Sync {
    async fn ingest(&self, connection: RelayConnection, relay: &RelayDescriptor);
}
