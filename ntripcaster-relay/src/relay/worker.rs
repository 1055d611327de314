// Connection worker
//
// One worker per attempt. It owns a copy of the descriptor and never reads
// the registry entry while doing network I/O; the only registry writes are
// the two commit steps, both keyed by the attempt token.

use std::sync::Arc;

use nanoid::nanoid;
use tracing as log;

use super::connection::RelayConnection;
use super::descriptor::{AttemptToken, RelayDescriptor, RelayKey, RelayMode};
use super::handshake::{login, login_raw};
use crate::context::CasterContext;
use crate::error::{RelayError, RelayResult};

const MOUNT_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

pub struct ConnectionWorker {
    ctx: Arc<CasterContext>,
    relay: RelayDescriptor,
}

impl ConnectionWorker {
    #[must_use]
    pub fn new(ctx: Arc<CasterContext>, relay: RelayDescriptor) -> Self {
        Self { ctx, relay }
    }

    /// Run the attempt to completion and release the registry entry.
    pub async fn run(self) {
        let key = self.relay.key();
        let Some(token) = self.relay.attempt else {
            log::warn!(relay = %key, "Relay worker started without an attempt token");
            return;
        };

        match self.attempt(&key, token).await {
            Ok(()) => log::info!(relay = %key, "Relay feed ended"),
            Err(e) => log::warn!(relay = %key, kind = e.kind(), error = %e, "Relay attempt failed"),
        }

        if !self.ctx.registry.finish_attempt(&key, token) {
            log::debug!(relay = %key, "Relay entry changed during attempt, left untouched");
        }
    }

    /// Local mountpoint for this attempt.
    fn mount(&self) -> String {
        if let Some(mount) = &self.relay.local_mount {
            mount.clone()
        } else if self.relay.target.is_empty() {
            format!("/{}", nanoid!(8, &MOUNT_ALPHABET))
        } else {
            self.relay.target.path.clone()
        }
    }

    async fn attempt(&self, key: &RelayKey, token: AttemptToken) -> RelayResult<()> {
        let timeout = self.ctx.settings().network_timeout;
        let connector = self.ctx.connector();
        let endpoint = self.relay.connect_endpoint();

        let handle = self.ctx.new_connection_handle();
        let mut conn = RelayConnection::new(handle.clone(), endpoint.host.clone(), self.mount());

        log::debug!(
            host = %endpoint.host,
            port = endpoint.port,
            mount = %conn.mount,
            "Connecting relay"
        );
        let stream = connector.connect(&endpoint.host, endpoint.port, timeout).await?;

        match self.relay.mode {
            RelayMode::RawPassthrough => {
                conn.attach(stream);
                login_raw(&mut conn, &self.ctx.agent);
            }
            RelayMode::Protocol => {
                let stream = if self.relay.tls {
                    connector
                        .tls_connect(stream, &self.relay.target.host, timeout)
                        .await?
                } else {
                    stream
                };
                conn.attach(stream);
                login(&mut conn, &self.relay, &self.ctx.agent, timeout).await?;
            }
        }

        if !self.ctx.registry.attach_connection(key, token, handle.clone()) {
            return Err(RelayError::NotFound(key.to_string()));
        }
        log::info!(
            connection_id = handle.id(),
            mount = %conn.mount,
            source_agent = conn.source_agent().unwrap_or_default(),
            "Relay logged in"
        );

        tokio::select! {
            () = self.ctx.ingest().ingest(conn, &self.relay) => {}
            () = handle.closed() => {
                log::info!(connection_id = handle.id(), "Relay connection closed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelaySettings;
    use crate::context::AgentInfo;
    use crate::relay::ingest::Ingest;
    use crate::relay::parse::parse_relay_spec;
    use crate::relay::transport::{BoxedStream, Connector};
    use async_trait::async_trait;
    use std::time::Duration;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, host: &str, port: u16, _: Duration) -> RelayResult<BoxedStream> {
            Err(RelayError::Connect(format!("{host}:{port} refused")))
        }

        async fn tls_connect(
            &self,
            _: BoxedStream,
            host: &str,
            _: Duration,
        ) -> RelayResult<BoxedStream> {
            Err(RelayError::Connect(format!("{host}: no tls")))
        }
    }

    struct NullIngest;

    #[async_trait]
    impl Ingest for NullIngest {
        async fn ingest(&self, _: RelayConnection, _: &RelayDescriptor) {}
    }

    fn ctx() -> Arc<CasterContext> {
        Arc::new(CasterContext::new(
            AgentInfo::default(),
            RelaySettings::default(),
            Arc::new(RefusingConnector),
            Arc::new(NullIngest),
        ))
    }

    #[test]
    fn test_mount_selection() {
        let ctx = ctx();
        let worker = ConnectionWorker::new(
            Arc::clone(&ctx),
            parse_relay_spec("-m local http://host:2101/MOUNT").unwrap(),
        );
        assert_eq!(worker.mount(), "/local");

        let worker = ConnectionWorker::new(
            Arc::clone(&ctx),
            parse_relay_spec("http://host:2101/MOUNT").unwrap(),
        );
        assert_eq!(worker.mount(), "/MOUNT");

        let worker = ConnectionWorker::new(
            Arc::clone(&ctx),
            parse_relay_spec("-p source:9000 /").unwrap(),
        );
        let mount = worker.mount();
        assert_eq!(mount.len(), 9);
        assert!(mount.starts_with('/'));
        assert!(mount[1..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_failed_connect_clears_pending() {
        let ctx = ctx();
        ctx.registry
            .insert_or_replace(parse_relay_spec("http://host:2101/MOUNT").unwrap());

        let mut relay = {
            let mut table = ctx.registry.lock();
            let token = table.next_attempt();
            let entry = table.relays.values_mut().next().unwrap();
            entry.pending = true;
            entry.attempt = Some(token);
            entry.clone()
        };
        relay.credentials = Some("changed-in-copy".to_string());

        ConnectionWorker::new(Arc::clone(&ctx), relay).run().await;

        let stored = ctx.registry.list().remove(0);
        assert!(!stored.pending);
        assert!(stored.connection.is_none());
        assert!(stored.attempt.is_none());
        assert!(stored.credentials.is_none());
    }

    #[tokio::test]
    async fn test_worker_without_token_does_nothing() {
        let ctx = ctx();
        let relay = parse_relay_spec("http://host:2101/MOUNT").unwrap();
        ctx.registry.insert_or_replace(relay.clone());
        ctx.registry.lock().relays.values_mut().next().unwrap().pending = true;

        ConnectionWorker::new(Arc::clone(&ctx), relay).run().await;
        assert!(ctx.registry.list()[0].pending);
    }
}
