// Reconnection scheduler
//
// Periodic sweep over the registry. Selection happens under the registry
// lock and only flips state on the entries; workers are spawned after the
// lock is released, each with its own copy of the descriptor.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{self as log, Instrument};

use super::descriptor::{RelayDescriptor, RelayKey};
use super::worker::ConnectionWorker;
use crate::config::RelaySettings;
use crate::context::CasterContext;

/// Whether `relay` should get a new attempt at `now`.
#[must_use]
pub fn is_due(relay: &RelayDescriptor, now: Instant, settings: &RelaySettings) -> bool {
    if relay.connected_or_pending() {
        return false;
    }
    if relay.reconnect_now {
        return true;
    }

    let interval_elapsed = relay
        .last_reconnect_at
        .is_none_or(|last| now.saturating_duration_since(last) >= settings.reconnect_interval);
    let tries_left = settings
        .reconnect_tries
        .is_none_or(|max| relay.reconnect_count < max);

    interval_elapsed && tries_left
}

pub struct RelayScheduler {
    ctx: Arc<CasterContext>,
}

impl RelayScheduler {
    #[must_use]
    pub fn new(ctx: Arc<CasterContext>) -> Self {
        Self { ctx }
    }

    /// Mark every due relay as pending and return copies of them.
    ///
    /// Each selected entry gets a fresh attempt token, which its copy carries.
    pub fn select_due(&self, now: Instant) -> Vec<RelayDescriptor> {
        let settings = self.ctx.settings();
        let mut table = self.ctx.registry.lock();

        let due: Vec<RelayKey> = table
            .relays
            .iter()
            .filter(|(_, relay)| is_due(relay, now, &settings))
            .map(|(key, _)| key.clone())
            .collect();

        let mut selected = Vec::with_capacity(due.len());
        for key in due {
            let token = table.next_attempt();
            if let Some(relay) = table.relays.get_mut(&key) {
                relay.pending = true;
                relay.reconnect_now = false;
                relay.last_reconnect_at = Some(now);
                relay.reconnect_count = relay.reconnect_count.saturating_add(1);
                relay.attempt = Some(token);
                selected.push(relay.clone());
            }
        }
        selected
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> Vec<JoinHandle<()>> {
        self.sweep_at(Instant::now())
    }

    /// Run one sweep as of `now` and spawn a worker per selected relay.
    pub fn sweep_at(&self, now: Instant) -> Vec<JoinHandle<()>> {
        self.select_due(now)
            .into_iter()
            .map(|relay| {
                let span = log::info_span!(
                    "relay_worker",
                    relay = %relay.key(),
                    attempt = relay.reconnect_count
                );
                let worker = ConnectionWorker::new(Arc::clone(&self.ctx), relay);
                tokio::spawn(worker.run().instrument(span))
            })
            .collect()
    }

    /// Sweep on the configured interval until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut period = self.ctx.settings().sweep_interval;
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!(interval_ms = period.as_millis(), "Relay scheduler started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    log::info!("Relay scheduler shutting down");
                    return;
                }
                _ = timer.tick() => {
                    let spawned = self.sweep();
                    if !spawned.is_empty() {
                        log::debug!(count = spawned.len(), "Spawned relay workers");
                    }

                    // Pick up a sweep interval changed by a rehash.
                    let current = self.ctx.settings().sweep_interval;
                    if current != period {
                        period = current;
                        timer = interval(period);
                        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    }
                }
            }
        }
    }
}
