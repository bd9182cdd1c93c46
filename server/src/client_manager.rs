//! Peer bookkeeping for the UDP transport
//!
//! UDP has no connections, so the transport keeps its own table of which
//! addresses it has heard from:
//! - First datagram from an address registers a peer and assigns its id
//! - Every later datagram refreshes the peer's activity time
//! - Peers that stay silent past the timeout are dropped
//!
//! Ids start at 1 and are never handed out twice in one server process.

use log::info;
use shared::ConnectionId;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A remote endpoint the transport has accepted
#[derive(Debug)]
pub struct Client {
    /// Identity assigned by the server
    pub id: ConnectionId,
    /// Where datagrams for this client are sent
    pub addr: SocketAddr,
    /// Last time any datagram arrived from this client
    pub last_seen: Instant,
}

impl Client {
    /// Creates a client record that counts as active right now
    pub fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Marks the client as heard from just now
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// All peers known to the transport, capacity-limited.
pub struct ClientManager {
    /// Connected clients indexed by their id
    clients: BTreeMap<ConnectionId, Client>,
    /// Next id to hand out
    next_client_id: ConnectionId,
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty table that accepts at most `max_clients` peers.
    ///
    /// The first id handed out is 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new peer and assigns it the next unused id.
    ///
    /// Ids only ever increase, so a reconnecting address gets a fresh id.
    /// Returns None if the server is at capacity or the id space is exhausted.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id = self.next_client_id.checked_add(1)?;

        info!("Client {} registered from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Forgets a peer. Its id is not handed out again.
    ///
    /// Returns true if the client was found and removed
    pub fn remove_client(&mut self, client_id: ConnectionId) -> bool {
        if let Some(client) = self.clients.remove(&client_id) {
            info!("Client {} at {} removed", client.id, client.addr);
            true
        } else {
            false
        }
    }

    /// Looks up the id registered for `addr`.
    ///
    /// A linear scan; the table is bounded by `max_clients`.
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
    }

    /// Where datagrams for `client_id` should be sent
    pub fn addr_of(&self, client_id: ConnectionId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Refreshes the activity time; false if the client is unknown
    pub fn touch(&mut self, client_id: ConnectionId) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
            true
        } else {
            false
        }
    }

    /// Removes clients silent for longer than `timeout` and returns their ids
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ConnectionId> {
        let timed_out: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(*client_id);
        }

        timed_out
    }

    /// Ids of every registered client, ascending
    /// Ids of every registered peer, ascending
    pub fn client_ids(&self) -> Vec<ConnectionId> {
        self.clients.keys().copied().collect()
    }

    /// Number of registered peers
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
