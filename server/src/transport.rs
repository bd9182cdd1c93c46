//! Seam between the coordinator and whatever moves bytes to clients

use async_trait::async_trait;
use shared::ConnectionId;
use thiserror::Error;

/// Events reported by a transport, consumed in order by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { id: ConnectionId },
    Disconnected { id: ConnectionId },
    Data { id: ConnectionId, payload: Vec<u8> },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is not known to the transport")]
    UnknownConnection(ConnectionId),

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound half of a connection-oriented transport.
#[async_trait]
pub trait ConnectionTransport: Send + Sync {
    /// Sends one buffer to exactly one connection
    async fn send_to(&self, id: ConnectionId, data: &[u8]) -> Result<(), TransportError>;

    /// Connections that are live right now
    async fn connections(&self) -> Vec<ConnectionId>;

    /// Largest buffer a single `send_to` can carry, if the transport has a limit
    fn max_payload_size(&self) -> Option<usize> {
        None
    }
}
