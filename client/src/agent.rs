//! Local movement integration and state reporting for one participant

use log::{debug, error, info, warn};
use shared::protocol::CodecError;
use shared::{
    ConnectionId, ConnectionStatus, Direction, KinematicState, Packet, Snapshot, Vector2,
    PLAYER_SPEED, SPAWN_POSITION, VELOCITY_DAMPING,
};

/// Owns this client's kinematic state and speaks the client side of the protocol.
///
/// The agent never touches a socket. [`ClientSyncAgent::tick`] hands back the
/// packet to send and the network layer delivers it, reporting connection
/// changes through [`ClientSyncAgent::set_status`].
#[derive(Debug)]
pub struct ClientSyncAgent {
    state: KinematicState,
    id: Option<ConnectionId>,
    status: ConnectionStatus,
    /// Last broadcast received, kept for display
    remote: Snapshot,
    updates_sent: u64,
    reported_unassigned: bool,
}

impl Default for ClientSyncAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSyncAgent {
    pub fn new() -> Self {
        Self::with_state(KinematicState::at_rest(SPAWN_POSITION))
    }

    pub fn with_state(state: KinematicState) -> Self {
        Self {
            state,
            id: None,
            status: ConnectionStatus::Disconnected,
            remote: Snapshot::default(),
            updates_sent: 0,
            reported_unassigned: false,
        }
    }

    pub fn state(&self) -> KinematicState {
        self.state
    }

    /// Identity assigned by the server, if one has arrived yet
    pub fn id(&self) -> Option<ConnectionId> {
        self.id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn remote_snapshot(&self) -> &Snapshot {
        &self.remote
    }

    pub fn updates_sent(&self) -> u64 {
        self.updates_sent
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!("Connection status: {:?} -> {:?}", self.status, status);
            self.status = status;
        }
        if status != ConnectionStatus::Connected {
            self.id = None;
            self.reported_unassigned = false;
        }
    }

    /// Advances local movement by `dt` seconds and returns the encoded
    /// `ClientUpdate` to send. Returns None while not connected.
    ///
    /// Order matters: the input sets velocity first, then damping toward zero
    /// applies on every tick, held input or not.
    pub fn tick(&mut self, input: Vector2, dt: f32) -> Option<Vec<u8>> {
        if !self.status.is_connected() {
            return None;
        }

        if input.length() > 0.0 {
            self.state.velocity = input.normalize() * PLAYER_SPEED;
        }

        self.state.velocity = self
            .state
            .velocity
            .lerp(Vector2::ZERO, VELOCITY_DAMPING * dt);

        self.state.position += self.state.velocity * dt;

        if self.id.is_none() && !self.reported_unassigned {
            // The server still attributes it by connection, not by payload
            debug!("Reporting state before the server assigned an identity");
            self.reported_unassigned = true;
        }

        match Packet::ClientUpdate(self.state).encode() {
            Ok(bytes) => {
                self.updates_sent += 1;
                Some(bytes)
            }
            Err(e) => {
                error!("Failed to encode ClientUpdate: {}", e);
                None
            }
        }
    }

    /// Records the identity the server attributed to this client
    pub fn on_identity_assigned(&mut self, id: ConnectionId) {
        match self.id {
            Some(previous) if previous != id => {
                warn!("Server reassigned identity {} -> {}", previous, id)
            }
            Some(_) => {}
            None => info!("Connected! Client ID: {}", id),
        }
        self.id = Some(id);
    }

    /// Applies one server datagram; anything unexpected is dropped
    pub fn handle_packet(&mut self, bytes: &[u8]) {
        match Packet::decode(bytes, Direction::ToClient) {
            Ok(Packet::ClientConnect { id }) => self.on_identity_assigned(id),
            Ok(Packet::WorldUpdate(snapshot)) => self.remote = snapshot,
            Ok(packet) => debug!("Ignoring {:?} packet", packet.packet_type()),
            Err(CodecError::UnknownTag(tag)) => debug!("Ignoring unknown tag {}", tag),
            Err(e) => warn!("Dropping malformed packet from server: {}", e),
        }
    }
}
