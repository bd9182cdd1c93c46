//! Server-side synchronization: identity assignment, inbound state, broadcasts

use crate::state_store::StateStore;
use crate::transport::{ConnectionTransport, TransportError, TransportEvent};
use log::{debug, error, info, warn};
use shared::protocol::{self, CodecError};
use shared::{ConnectionId, Packet, PacketType, DEFAULT_BROADCAST_INTERVAL_MS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// How often broadcast statistics are logged, in ticks
const STATS_LOG_INTERVAL: u64 = 200;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Time between two broadcast ticks
    pub broadcast_interval: Duration,
    /// Drop a connection's state entry when it disconnects.
    ///
    /// Off by default: the last known state of a departed participant keeps
    /// being broadcast. Departed entries are still evicted once the broadcast
    /// would exceed the transport's payload limit (about 3,270 entries over UDP).
    pub remove_on_disconnect: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: Duration::from_millis(DEFAULT_BROADCAST_INTERVAL_MS),
            remove_on_disconnect: false,
        }
    }
}

/// Outcome of one broadcast tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Entries serialized into the broadcast
    pub entries: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Owns the state store and drives it from transport events and a broadcast clock.
pub struct SyncCoordinator<T: ConnectionTransport> {
    store: StateStore,
    transport: Arc<T>,
    config: CoordinatorConfig,
    ticks: AtomicU64,
}

impl<T: ConnectionTransport + 'static> SyncCoordinator<T> {
    pub fn new(transport: Arc<T>, config: CoordinatorConfig) -> Self {
        Self {
            store: StateStore::new(),
            transport,
            config,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Number of broadcast ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Tells a new connection which id it was given. Does not touch the store.
    pub async fn on_connect(&self, id: ConnectionId) {
        info!("Client connected! ID={}", id);

        let packet = Packet::ClientConnect { id };
        match packet.encode() {
            Ok(bytes) => {
                if let Err(e) = self.transport.send_to(id, &bytes).await {
                    warn!("Failed to send identity to client {}: {}", id, e);
                }
            }
            Err(e) => error!("Failed to encode identity for client {}: {}", id, e),
        }
    }

    pub async fn on_disconnect(&self, id: ConnectionId) {
        info!("Client disconnected! ID={}", id);

        if self.config.remove_on_disconnect && self.store.remove(id).await.is_some() {
            debug!("Removed state entry for client {}", id);
        }
    }

    /// Applies one inbound packet. Only `ClientUpdate` changes anything.
    pub async fn on_packet_received(&self, id: ConnectionId, bytes: &[u8]) {
        match protocol::decode(bytes) {
            Ok((PacketType::ClientUpdate, mut reader)) => match reader.read_state() {
                Ok(state) => {
                    self.store.upsert(id, state).await;
                }
                Err(e) => warn!("Dropping malformed ClientUpdate from client {}: {}", id, e),
            },
            Ok((tag, _)) => debug!("Ignoring {:?} packet from client {}", tag, id),
            Err(CodecError::UnknownTag(tag)) => {
                debug!("Ignoring unknown tag {} from client {}", tag, id)
            }
            Err(e) => warn!("Dropping malformed packet from client {}: {}", id, e),
        }
    }

    /// Serializes the store and sends it to every live connection.
    ///
    /// The store lock is released before the first send. A connection that
    /// vanished since the transport listed it shows up as a failed send.
    ///
    /// When the broadcast outgrows the transport's payload limit, entries of
    /// connections that are no longer live are evicted and the packet is
    /// rebuilt. If the live entries alone are still too large the tick is
    /// skipped and every connection counts as failed.
    pub async fn broadcast_tick(&self) -> BroadcastReport {
        let connections = self.transport.connections().await;

        let (buffer, entries) = match self.encode_within_limit(&connections).await {
            Some(encoded) => encoded,
            None => {
                self.ticks.fetch_add(1, Ordering::Relaxed);
                return BroadcastReport {
                    failed: connections.len(),
                    ..BroadcastReport::default()
                };
            }
        };

        let mut report = BroadcastReport {
            entries,
            ..BroadcastReport::default()
        };

        let mut oversize_logged = false;
        for id in connections {
            match self.transport.send_to(id, &buffer).await {
                Ok(()) => report.delivered += 1,
                Err(e @ TransportError::PayloadTooLarge { .. }) => {
                    report.failed += 1;
                    if !oversize_logged {
                        warn!("Broadcast rejected by transport: {}", e);
                        oversize_logged = true;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to broadcast to client {}: {}", id, e);
                }
            }
        }

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if tick % STATS_LOG_INTERVAL == 0 && report.delivered + report.failed > 0 {
            debug!(
                "Tick {}: {} entries, {} delivered, {} failed, {} bytes",
                tick,
                report.entries,
                report.delivered,
                report.failed,
                buffer.len()
            );
        }

        report
    }

    /// Encodes the broadcast, evicting entries of departed connections once
    /// the packet no longer fits the transport. None when nothing can be sent.
    async fn encode_within_limit(&self, live: &[ConnectionId]) -> Option<(Vec<u8>, usize)> {
        let encoded = match self.store.encode_broadcast().await {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode broadcast: {}", e);
                return None;
            }
        };

        let max = match self.transport.max_payload_size() {
            Some(max) if encoded.0.len() > max => max,
            _ => return Some(encoded),
        };

        let evicted = self.store.retain_only(live).await;
        warn!(
            "Broadcast of {} entries ({} bytes) exceeds the {} byte limit, evicted {} departed entries",
            encoded.1,
            encoded.0.len(),
            max,
            evicted
        );

        match self.store.encode_broadcast().await {
            Ok(encoded) if encoded.0.len() <= max => Some(encoded),
            Ok(encoded) => {
                error!(
                    "Broadcast of {} live entries ({} bytes) still exceeds {} bytes, skipping tick",
                    encoded.1,
                    encoded.0.len(),
                    max
                );
                None
            }
            Err(e) => {
                error!("Failed to encode broadcast: {}", e);
                None
            }
        }
    }

    /// Console input. Commands start with `/` and are only logged.
    ///
    /// Returns true when the line was a command.
    pub fn on_console_input(&self, line: &str) -> bool {
        if line.starts_with('/') {
            info!("You called the {} command!", line.trim_end());
            true
        } else {
            if !line.trim().is_empty() {
                debug!("Console: {}", line);
            }
            false
        }
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { id } => self.on_connect(id).await,
            TransportEvent::Disconnected { id } => self.on_disconnect(id).await,
            TransportEvent::Data { id, payload } => self.on_packet_received(id, &payload).await,
        }
    }

    async fn run_broadcast_loop(&self) {
        let mut tick_interval = interval(self.config.broadcast_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick_interval.tick().await;
            self.broadcast_tick().await;
        }
    }

    /// Runs until the event channel closes. Broadcasts run on a separate task.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        let broadcaster = {
            let coordinator = Arc::clone(&self);
            tokio::spawn(async move { coordinator.run_broadcast_loop().await })
        };

        info!(
            "Coordinator started, broadcasting every {:?} (remove on disconnect: {})",
            self.config.broadcast_interval, self.config.remove_on_disconnect
        );

        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }

        info!("Transport event stream closed, stopping broadcasts");
        broadcaster.abort();
    }
}
