//! Wire format for the synchronization protocol
//!
//! Every packet is a single tag byte followed by a payload whose layout is
//! implied by the tag. Numbers are little-endian; floats are IEEE-754 binary32.
//!
//! ```text
//! ClientConnect  [5][id: u32]
//! ClientUpdate   [6][pos.x pos.y vel.x vel.y: f32]                     client -> server
//! ClientUpdate   [6][count: u32]([id: u32][pos.x pos.y vel.x vel.y])*  server -> client
//! reserved tags  [tag]
//! ```
//!
//! The two `ClientUpdate` shapes share a tag, so decoding needs to know which
//! way the packet travelled ([`Direction`]).

use crate::{ConnectionId, KinematicState, Snapshot};
use serde::Serialize;
use thiserror::Error;

pub const TAG_SIZE: usize = 1;
pub const CONNECTION_ID_SIZE: usize = 4;
pub const STATE_SIZE: usize = 16;
pub const SNAPSHOT_COUNT_SIZE: usize = 4;
pub const SNAPSHOT_RECORD_SIZE: usize = CONNECTION_ID_SIZE + STATE_SIZE;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("packet truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown packet tag {0:#04x}")]
    UnknownTag(u8),

    #[error("snapshot with {0} entries exceeds the u32 count field")]
    TooManyEntries(usize),

    #[error("payload encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
}

impl CodecError {
    /// True for input that must be dropped and reported, false for tolerated tags
    pub fn is_malformed(&self) -> bool {
        !matches!(self, CodecError::UnknownTag(_))
    }
}

/// Closed set of packet tags. Only `ClientConnect` and `ClientUpdate` carry a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    None = 0,
    Message = 1,
    ClientConnectionRequest = 2,
    ConnectionStatus = 3,
    ClientList = 4,
    ClientConnect = 5,
    ClientUpdate = 6,
    ClientDisconnect = 7,
    ClientUpdateResponse = 8,
    MessageHistory = 9,
    ServerShutdown = 10,
    ClientKick = 11,
}

impl PacketType {
    pub const ALL: [PacketType; 12] = [
        PacketType::None,
        PacketType::Message,
        PacketType::ClientConnectionRequest,
        PacketType::ConnectionStatus,
        PacketType::ClientList,
        PacketType::ClientConnect,
        PacketType::ClientUpdate,
        PacketType::ClientDisconnect,
        PacketType::ClientUpdateResponse,
        PacketType::MessageHistory,
        PacketType::ServerShutdown,
        PacketType::ClientKick,
    ];

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PacketType::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(CodecError::UnknownTag(value))
    }
}

/// Which side of the connection a packet is travelling toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
}

/// A fully decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Server -> client identity assignment
    ClientConnect { id: ConnectionId },
    /// Client -> server report of its own state
    ClientUpdate(KinematicState),
    /// Server -> client broadcast of every known state (tagged `ClientUpdate` on the wire)
    WorldUpdate(Snapshot),
    /// Any tag without a payload contract in the direction it was received
    Reserved(PacketType),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ClientConnect { .. } => PacketType::ClientConnect,
            Packet::ClientUpdate(_) | Packet::WorldUpdate(_) => PacketType::ClientUpdate,
            Packet::Reserved(tag) => *tag,
        }
    }

    /// Exact number of bytes [`Packet::encode`] produces
    pub fn encoded_len(&self) -> usize {
        TAG_SIZE
            + match self {
                Packet::ClientConnect { .. } => CONNECTION_ID_SIZE,
                Packet::ClientUpdate(_) => STATE_SIZE,
                Packet::WorldUpdate(snapshot) => world_update_payload_len(snapshot.len()),
                Packet::Reserved(_) => 0,
            }
    }

    /// Serializes into a freshly allocated buffer owned by the caller
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Packet::WorldUpdate(snapshot) => encode_world_update(
                snapshot.entries.len(),
                snapshot.entries.iter().map(|(id, state)| (*id, *state)),
            ),
            _ => {
                let mut buffer = Vec::with_capacity(self.encoded_len());
                buffer.push(self.packet_type().as_byte());
                match self {
                    Packet::ClientConnect { id } => write_value(&mut buffer, id)?,
                    Packet::ClientUpdate(state) => write_value(&mut buffer, state)?,
                    _ => {}
                }
                Ok(buffer)
            }
        }
    }

    /// Decodes a whole packet, using `direction` to pick the `ClientUpdate` shape
    pub fn decode(bytes: &[u8], direction: Direction) -> Result<Packet, CodecError> {
        let (tag, mut reader) = decode(bytes)?;

        let packet = match (tag, direction) {
            (PacketType::ClientConnect, Direction::ToClient) => Packet::ClientConnect {
                id: reader.read_connection_id()?,
            },
            (PacketType::ClientUpdate, Direction::ToServer) => {
                Packet::ClientUpdate(reader.read_state()?)
            }
            (PacketType::ClientUpdate, Direction::ToClient) => {
                Packet::WorldUpdate(reader.read_snapshot()?)
            }
            (tag, _) => Packet::Reserved(tag),
        };

        Ok(packet)
    }
}

fn world_update_payload_len(count: usize) -> usize {
    SNAPSHOT_COUNT_SIZE + count * SNAPSHOT_RECORD_SIZE
}

fn write_value<T: Serialize>(buffer: &mut Vec<u8>, value: &T) -> Result<(), CodecError> {
    bincode::serialize_into(buffer, value)?;
    Ok(())
}

/// Serializes a server broadcast straight from borrowed entries.
///
/// Lets the state store write the packet while it holds its lock without first
/// cloning the map into a [`Snapshot`].
pub fn encode_world_update<I>(count: usize, entries: I) -> Result<Vec<u8>, CodecError>
where
    I: IntoIterator<Item = (ConnectionId, KinematicState)>,
{
    let wire_count = u32::try_from(count).map_err(|_| CodecError::TooManyEntries(count))?;

    let mut buffer = Vec::with_capacity(TAG_SIZE + world_update_payload_len(count));
    buffer.push(PacketType::ClientUpdate.as_byte());
    write_value(&mut buffer, &wire_count)?;

    let mut written = 0usize;
    for (id, state) in entries {
        write_value(&mut buffer, &(id, state))?;
        written += 1;
    }
    debug_assert_eq!(written, count);

    Ok(buffer)
}

/// Reads the leading tag and returns a cursor positioned at the payload
pub fn decode(bytes: &[u8]) -> Result<(PacketType, PacketReader<'_>), CodecError> {
    let (&tag, payload) = bytes.split_first().ok_or(CodecError::Truncated {
        needed: TAG_SIZE,
        available: 0,
    })?;

    Ok((PacketType::try_from(tag)?, PacketReader::new(payload)))
}

/// Cursor over a packet payload; every read checks the remaining length first.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    payload: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { payload }
    }

    pub fn remaining(&self) -> usize {
        self.payload.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.payload.len() < len {
            return Err(CodecError::Truncated {
                needed: len,
                available: self.payload.len(),
            });
        }
        let (head, tail) = self.payload.split_at(len);
        self.payload = tail;
        Ok(head)
    }

    pub fn read_connection_id(&mut self) -> Result<ConnectionId, CodecError> {
        let bytes = self.take(CONNECTION_ID_SIZE)?;
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn read_state(&mut self) -> Result<KinematicState, CodecError> {
        let bytes = self.take(STATE_SIZE)?;
        Ok(bincode::deserialize(bytes)?)
    }

    /// Reads a count-prefixed broadcast. Fails without reading any record if
    /// the payload is too short for the announced count.
    pub fn read_snapshot(&mut self) -> Result<Snapshot, CodecError> {
        let count = self.read_connection_id()? as usize;
        let needed = count
            .checked_mul(SNAPSHOT_RECORD_SIZE)
            .unwrap_or(usize::MAX);
        if self.payload.len() < needed {
            return Err(CodecError::Truncated {
                needed,
                available: self.payload.len(),
            });
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.read_connection_id()?;
            let state = self.read_state()?;
            entries.push((id, state));
        }

        Ok(Snapshot::new(entries))
    }
}
