// Relay descriptors and their registry identity
//
// A RelayDescriptor is one configured pull relay plus its reconnect state.
// The registry keys entries by RelayKey; the scheduler hands workers a copy
// stamped with an AttemptToken.

use std::fmt;

use tokio::time::Instant;

use super::connection::ConnectionHandle;
use super::request::RequestDescriptor;

/// How the worker talks to the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// HTTP/NTRIP login handshake before ingesting.
    #[default]
    Protocol,
    /// Plain TCP connect, no handshake.
    RawPassthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NtripVersion {
    #[default]
    V1,
    V2,
}

/// Token stamped on a registry entry when the scheduler hands it to a worker.
///
/// Commit steps only apply to an entry still carrying the worker's token.
pub type AttemptToken = u64;

/// Registry identity of a relay: `(host, port, path, local mount)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayKey {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub local_mount: Option<String>,
}

impl RelayKey {
    #[must_use]
    pub fn new(target: &RequestDescriptor, local_mount: Option<&str>) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            path: target.path.clone(),
            local_mount: local_mount.map(str::to_string),
        }
    }
}

impl fmt::Display for RelayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)?;
        if let Some(mount) = &self.local_mount {
            write!(f, " -> {mount}")?;
        }
        Ok(())
    }
}

/// Definition and reconnection state of one pull relay.
///
/// The registry owns the canonical value; workers get clones. The state
/// fields (`connection` and below) are maintained by the registry and the
/// scheduler.
#[derive(Debug, Clone, Default)]
pub struct RelayDescriptor {
    pub target: RequestDescriptor,
    pub proxy: Option<RequestDescriptor>,
    pub local_mount: Option<String>,
    /// Base64 of `user:pass`, sent as a Basic authorization value.
    pub credentials: Option<String>,
    pub mode: RelayMode,
    pub ntrip_version: NtripVersion,
    pub tls: bool,

    pub connection: Option<ConnectionHandle>,
    pub reconnect_count: u32,
    pub last_reconnect_at: Option<Instant>,
    pub reconnect_now: bool,
    pub pending: bool,
    pub attempt: Option<AttemptToken>,
}

impl RelayDescriptor {
    #[must_use]
    pub fn new(target: RequestDescriptor) -> Self {
        let mode = if target.is_empty() {
            RelayMode::RawPassthrough
        } else {
            RelayMode::Protocol
        };
        Self {
            target,
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn key(&self) -> RelayKey {
        RelayKey::new(&self.target, self.local_mount.as_deref())
    }

    #[must_use]
    pub const fn connected_or_pending(&self) -> bool {
        self.connection.is_some() || self.pending
    }

    /// Where the socket goes: the proxy when set, the target otherwise.
    #[must_use]
    pub fn connect_endpoint(&self) -> &RequestDescriptor {
        self.proxy
            .as_ref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.target)
    }

    #[must_use]
    pub fn uses_proxy(&self) -> bool {
        self.proxy.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Carry connection and reconnection state over from a replaced entry.
    pub(crate) fn inherit_state(&mut self, prior: &Self) {
        self.connection = prior.connection.clone();
        self.reconnect_count = prior.reconnect_count;
        self.last_reconnect_at = prior.last_reconnect_at;
        self.reconnect_now = prior.reconnect_now;
        self.pending = prior.pending;
        self.attempt = prior.attempt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(mount: Option<&str>) -> RelayDescriptor {
        let mut relay = RelayDescriptor::new(RequestDescriptor::new("host", 2101, "/MOUNT"));
        relay.local_mount = mount.map(str::to_string);
        relay
    }

    #[test]
    fn test_empty_target_is_raw() {
        let relay = RelayDescriptor::new(RequestDescriptor::new("", 0, "/X"));
        assert_eq!(relay.mode, RelayMode::RawPassthrough);
    }

    #[test]
    fn test_key_includes_local_mount() {
        assert_ne!(relay(Some("/a")).key(), relay(Some("/b")).key());
        assert_ne!(relay(None).key(), relay(Some("/a")).key());
        assert_eq!(relay(Some("/a")).key(), relay(Some("/a")).key());
    }

    #[test]
    fn test_clone_is_deep() {
        let mut original = relay(Some("/test"));
        original.credentials = Some("dXNlcjpwYXNz".to_string());

        let mut copy = original.clone();
        copy.local_mount.as_mut().unwrap().push_str("-changed");
        copy.credentials = Some("other".to_string());

        assert_eq!(original.local_mount.as_deref(), Some("/test"));
        assert_eq!(original.credentials.as_deref(), Some("dXNlcjpwYXNz"));
    }

    #[test]
    fn test_connect_endpoint_prefers_proxy() {
        let mut relay = relay(None);
        assert_eq!(relay.connect_endpoint().host, "host");
        relay.proxy = Some(RequestDescriptor::new("proxy", 3128, "/"));
        assert_eq!(relay.connect_endpoint().host, "proxy");
        assert!(relay.uses_proxy());
    }
}
