//! Process-wide caster state, built once at startup and passed explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{Config, RelaySettings};
use crate::relay::connection::ConnectionHandle;
use crate::relay::ingest::Ingest;
use crate::relay::registry::RelayRegistry;
use crate::relay::transport::Connector;

/// Identification sent to upstream casters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub product: String,
    pub version: String,
}

impl AgentInfo {
    #[must_use]
    pub fn new(product: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            version: version.into(),
        }
    }

    /// `User-Agent` header value.
    #[must_use]
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.product, self.version)
    }

    /// `Source-Agent` recorded for a relay that did not name its server.
    #[must_use]
    pub fn relay_source_agent(&self) -> String {
        format!("{} (relay)", self.user_agent())
    }

    /// `Source-Agent` recorded for raw pass-through relays.
    #[must_use]
    pub fn direct_source_agent(&self) -> String {
        format!("{} (direct access)", self.user_agent())
    }
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self::new("NTRIP NtripCaster", env!("CARGO_PKG_VERSION"))
    }
}

pub struct CasterContext {
    pub registry: RelayRegistry,
    pub agent: AgentInfo,
    settings: RwLock<RelaySettings>,
    connector: Arc<dyn Connector>,
    ingest: Arc<dyn Ingest>,
    next_connection_id: AtomicU64,
}

impl CasterContext {
    #[must_use]
    pub fn new(
        agent: AgentInfo,
        settings: RelaySettings,
        connector: Arc<dyn Connector>,
        ingest: Arc<dyn Ingest>,
    ) -> Self {
        Self {
            registry: RelayRegistry::new(),
            agent,
            settings: RwLock::new(settings),
            connector,
            ingest,
            next_connection_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn from_config(
        config: &Config,
        connector: Arc<dyn Connector>,
        ingest: Arc<dyn Ingest>,
    ) -> Self {
        Self::new(
            AgentInfo::new(config.caster.product.clone(), env!("CARGO_PKG_VERSION")),
            config.relay_settings(),
            connector,
            ingest,
        )
    }

    #[must_use]
    pub fn settings(&self) -> RelaySettings {
        *self.settings.read()
    }

    /// Swap in new settings, e.g. after a rehash.
    pub fn update_settings(&self, settings: RelaySettings) {
        *self.settings.write() = settings;
    }

    #[must_use]
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    #[must_use]
    pub fn ingest(&self) -> &Arc<dyn Ingest> {
        &self.ingest
    }

    /// Allocate a handle with a fresh connection id.
    pub fn new_connection_handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }
}
