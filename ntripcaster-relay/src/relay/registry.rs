// Relay registry
//
// All configured pull relays, keyed by (host, port, path, local mount).
// A single mutex guards the map. It is held only for lookups and mutations,
// never across network I/O: the scheduler copies descriptors out before
// spawning workers, and workers come back through attach_connection /
// finish_attempt to commit their result.

use std::collections::BTreeMap;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::connection::ConnectionHandle;
use super::descriptor::{AttemptToken, RelayDescriptor, RelayKey};
use super::request::RequestDescriptor;
use crate::error::{RelayError, RelayResult};

pub(crate) struct RelayTable {
    pub(crate) relays: BTreeMap<RelayKey, RelayDescriptor>,
    next_attempt: AttemptToken,
}

impl RelayTable {
    pub(crate) fn next_attempt(&mut self) -> AttemptToken {
        self.next_attempt += 1;
        self.next_attempt
    }
}

pub struct RelayRegistry {
    inner: Mutex<RelayTable>,
}

impl RelayRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RelayTable {
                relays: BTreeMap::new(),
                next_attempt: 0,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RelayTable> {
        self.inner.lock()
    }

    /// Insert a relay, or replace the entry with the same key.
    ///
    /// A replacement keeps the connection and reconnection state of the entry
    /// it replaces; the caller's values for those fields are discarded. A new
    /// entry is scheduled for an immediate attempt.
    pub fn insert_or_replace(&self, mut relay: RelayDescriptor) {
        let key = relay.key();
        let mut table = self.inner.lock();

        match table.relays.get(&key) {
            Some(prior) => {
                relay.inherit_state(prior);
                debug!(relay = %key, "Replaced already existing relay");
            }
            None => {
                relay.connection = None;
                relay.reconnect_count = 0;
                relay.last_reconnect_at = None;
                relay.pending = false;
                relay.attempt = None;
                relay.reconnect_now = true;
                info!(relay = %key, "Added pulling relay");
            }
        }

        table.relays.insert(key, relay);
    }

    #[must_use]
    pub fn find_by_key(
        &self,
        target: &RequestDescriptor,
        local_mount: Option<&str>,
    ) -> Option<RelayDescriptor> {
        let key = RelayKey::new(target, local_mount);
        self.inner.lock().relays.get(&key).cloned()
    }

    /// Linear scan for the relay whose live connection is `handle`.
    #[must_use]
    pub fn find_by_connection(&self, handle: &ConnectionHandle) -> Option<RelayDescriptor> {
        self.inner
            .lock()
            .relays
            .values()
            .find(|r| r.connection.as_ref() == Some(handle))
            .cloned()
    }

    pub fn remove(&self, relay: &RelayDescriptor) -> RelayResult<RelayDescriptor> {
        self.remove_key(&relay.key())
    }

    pub fn remove_by_key(
        &self,
        target: &RequestDescriptor,
        local_mount: Option<&str>,
    ) -> RelayResult<RelayDescriptor> {
        self.remove_key(&RelayKey::new(target, local_mount))
    }

    pub fn remove_by_connection(&self, handle: &ConnectionHandle) -> RelayResult<RelayDescriptor> {
        let mut table = self.inner.lock();
        let key = table
            .relays
            .iter()
            .find(|(_, r)| r.connection.as_ref() == Some(handle))
            .map(|(k, _)| k.clone())
            .ok_or_else(|| RelayError::NotFound(format!("connection {}", handle.id())))?;
        Self::take(&mut table, &key)
    }

    fn remove_key(&self, key: &RelayKey) -> RelayResult<RelayDescriptor> {
        let mut table = self.inner.lock();
        Self::take(&mut table, key)
    }

    fn take(table: &mut RelayTable, key: &RelayKey) -> RelayResult<RelayDescriptor> {
        let removed = table
            .relays
            .remove(key)
            .ok_or_else(|| RelayError::NotFound(key.to_string()))?;
        info!(relay = %key, "Removed relay");
        Ok(removed)
    }

    /// Snapshot of every relay in key order.
    #[must_use]
    pub fn list(&self) -> Vec<RelayDescriptor> {
        self.inner.lock().relays.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().relays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a successful login: the entry now owns `handle` and is no
    /// longer pending. Returns false when the entry is gone or belongs to a
    /// different attempt.
    pub fn attach_connection(
        &self,
        key: &RelayKey,
        attempt: AttemptToken,
        handle: ConnectionHandle,
    ) -> bool {
        let mut table = self.inner.lock();
        match table.relays.get_mut(key) {
            Some(relay) if relay.attempt == Some(attempt) => {
                relay.connection = Some(handle);
                relay.pending = false;
                true
            }
            _ => false,
        }
    }

    /// Clear `connection` and `pending` after an attempt ends, whatever the
    /// outcome.
    pub fn finish_attempt(&self, key: &RelayKey, attempt: AttemptToken) -> bool {
        let mut table = self.inner.lock();
        match table.relays.get_mut(key) {
            Some(relay) if relay.attempt == Some(attempt) => {
                relay.connection = None;
                relay.pending = false;
                relay.attempt = None;
                true
            }
            _ => false,
        }
    }

    /// Close the live connection with id `connection_id`.
    ///
    /// The owning worker notices, returns from ingestion and clears the entry.
    pub fn kick(&self, connection_id: u64) -> RelayResult<RelayKey> {
        let table = self.inner.lock();
        let (key, handle) = table
            .relays
            .iter()
            .find_map(|(k, r)| {
                r.connection
                    .as_ref()
                    .filter(|c| c.id() == connection_id)
                    .map(|c| (k.clone(), c.clone()))
            })
            .ok_or_else(|| RelayError::NotFound(format!("connection {connection_id}")))?;
        drop(table);

        handle.close();
        info!(relay = %key, connection_id, "Kicked relay connection");
        Ok(key)
    }
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new()
    }
}
