//! Types and constants shared by the synchronization server and its clients.
//!
//! Everything that crosses the wire lives here: the kinematic value types, the
//! connection status seen by the client front end, and the [`protocol`] module
//! that turns packets into bytes and back.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

pub mod protocol;

pub use protocol::{CodecError, Direction, Packet, PacketReader, PacketType};

/// Server-assigned identity of one live connection.
pub type ConnectionId = u32;

/// Speed reached instantly when a movement direction is held, in units per second.
pub const PLAYER_SPEED: f32 = 50.0;
/// Velocity is interpolated toward zero by `VELOCITY_DAMPING * dt` every tick.
pub const VELOCITY_DAMPING: f32 = 2.0;
/// Where a freshly started client places itself before any input.
pub const SPAWN_POSITION: Vector2 = Vector2::new(50.0, 50.0);
/// Sleep between two server broadcast ticks.
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2::new(0.0, 0.0);

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Unit vector in the same direction, or zero for a zero-length vector
    pub fn normalize(self) -> Self {
        let magnitude = self.length();
        if magnitude > 0.0 {
            Self::new(self.x / magnitude, self.y / magnitude)
        } else {
            Self::ZERO
        }
    }

    /// Linear interpolation `self * (1 - t) + target * t`, component-wise
    pub fn lerp(self, target: Vector2, t: f32) -> Self {
        Self::new(
            self.x * (1.0 - t) + target.x * t,
            self.y * (1.0 - t) + target.y * t,
        )
    }

    /// Bitwise equality, distinguishing `-0.0` from `0.0` and comparing NaN payloads
    pub fn bit_eq(&self, other: &Vector2) -> bool {
        self.x.to_bits() == other.x.to_bits() && self.y.to_bits() == other.y.to_bits()
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vector2 {
    fn add_assign(&mut self, rhs: Vector2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vector2 {
    type Output = Vector2;

    fn mul(self, rhs: f32) -> Vector2 {
        Vector2::new(self.x * rhs, self.y * rhs)
    }
}

/// One participant's last reported or computed motion state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KinematicState {
    pub position: Vector2,
    pub velocity: Vector2,
}

impl KinematicState {
    pub const fn new(position: Vector2, velocity: Vector2) -> Self {
        Self { position, velocity }
    }

    /// State of a participant that has not moved yet
    pub const fn at_rest(position: Vector2) -> Self {
        Self::new(position, Vector2::ZERO)
    }

    pub fn bit_eq(&self, other: &KinematicState) -> bool {
        self.position.bit_eq(&other.position) && self.velocity.bit_eq(&other.velocity)
    }
}

/// Point-in-time copy of every participant's state, ordered by connection id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub entries: Vec<(ConnectionId, KinematicState)>,
}

impl Snapshot {
    pub fn new(entries: Vec<(ConnectionId, KinematicState)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// State recorded for `id` in this snapshot, if any
    pub fn get(&self, id: ConnectionId) -> Option<&KinematicState> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, state)| state)
    }

    /// Entries in ascending connection id order, as they appear on the wire
    pub fn iter(&self) -> impl Iterator<Item = &(ConnectionId, KinematicState)> {
        self.entries.iter()
    }
}

/// Connection state as presented to the client front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    FailedToConnect,
}

impl ConnectionStatus {
    /// True only in the `Connected` state, the one in which the client
    /// reports its state every tick
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}
