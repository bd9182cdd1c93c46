//! UDP transport: turns datagrams into connection events for the coordinator

use crate::client_manager::ClientManager;
use crate::transport::{ConnectionTransport, TransportError, TransportEvent};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use shared::protocol;
use shared::{ConnectionId, PacketType};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Largest datagram the receiver accepts
const RECV_BUFFER_SIZE: usize = 65536;
/// Largest UDP payload over IPv4 (65,535 minus IP and UDP headers)
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
/// Upper bound on the time between two timeout sweeps
const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct UdpTransportConfig {
    pub max_clients: usize,
    /// Silence after which a peer counts as disconnected
    pub client_timeout: Duration,
}

impl Default for UdpTransportConfig {
    fn default() -> Self {
        Self {
            max_clients: 32,
            client_timeout: Duration::from_secs(5),
        }
    }
}

/// Connection-oriented view over a single UDP socket.
///
/// A datagram from an unseen address opens a connection; a `ClientDisconnect`
/// datagram or a timeout closes it.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    config: UdpTransportConfig,
}

impl UdpTransport {
    /// Binds the server socket to `addr`.
    ///
    /// No tasks run until [`UdpTransport::start`] is called, so nothing is
    /// received before the caller has set up its event channel.
    pub async fn bind(addr: &str, config: UdpTransportConfig) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        Ok(UdpTransport {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            config,
        })
    }

    /// Address the socket is bound to, useful when binding port 0
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Number of peers currently registered
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Spawns the receiver and timeout tasks, which report into `events`.
    ///
    /// Both tasks stop on their own once the receiving end of `events` is
    /// dropped. The returned handles let the caller abort them earlier.
    pub fn start(&self, events: mpsc::Sender<TransportEvent>) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_network_receiver(events.clone()),
            self.spawn_timeout_checker(events),
        ]
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self, events: mpsc::Sender<TransportEvent>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let datagram = &buffer[..len];
                        let mut outgoing = Vec::with_capacity(2);
                        Self::classify_datagram(&clients, datagram, addr, &mut outgoing).await;

                        for event in outgoing {
                            if events.send(event).await.is_err() {
                                info!("Coordinator gone, stopping network receiver");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Maps one datagram onto the events it implies
    async fn classify_datagram(
        clients: &RwLock<ClientManager>,
        datagram: &[u8],
        addr: SocketAddr,
        outgoing: &mut Vec<TransportEvent>,
    ) {
        let is_disconnect = matches!(
            protocol::decode(datagram),
            Ok((PacketType::ClientDisconnect, _))
        );

        let mut clients = clients.write().await;
        let known = clients.find_client_by_addr(addr);

        match (known, is_disconnect) {
            (Some(id), true) => {
                clients.remove_client(id);
                outgoing.push(TransportEvent::Disconnected { id });
            }
            (None, true) => debug!("Disconnect from unknown address {}", addr),
            (Some(id), false) => {
                clients.touch(id);
                outgoing.push(TransportEvent::Data {
                    id,
                    payload: datagram.to_vec(),
                });
            }
            (None, false) => match clients.add_client(addr) {
                Some(id) => {
                    outgoing.push(TransportEvent::Connected { id });
                    outgoing.push(TransportEvent::Data {
                        id,
                        payload: datagram.to_vec(),
                    });
                }
                None => warn!("Refusing {}: server full", addr),
            },
        }
    }

    /// Spawns task that monitors client timeouts
    ///
    /// Sweeps the peer table at most once per second (more often for short
    /// timeouts) and reports every silent peer as `Disconnected`. Timed-out
    /// peers are removed from the table before the event is sent.
    fn spawn_timeout_checker(&self, events: mpsc::Sender<TransportEvent>) -> JoinHandle<()> {
        let clients = Arc::clone(&self.clients);
        let timeout = self.config.client_timeout;
        let period = (timeout / 2).clamp(Duration::from_millis(1), TIMEOUT_CHECK_INTERVAL);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(timeout)
                };

                for id in timed_out {
                    info!("Client {} timed out", id);
                    if events.send(TransportEvent::Disconnected { id }).await.is_err() {
                        return;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl ConnectionTransport for UdpTransport {
    async fn send_to(&self, id: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: data.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let addr = {
            let clients = self.clients.read().await;
            clients.addr_of(id)
        }
        .ok_or(TransportError::UnknownConnection(id))?;

        self.socket.send_to(data, addr).await?;
        Ok(())
    }

    async fn connections(&self) -> Vec<ConnectionId> {
        self.clients.read().await.client_ids()
    }

    fn max_payload_size(&self) -> Option<usize> {
        Some(MAX_DATAGRAM_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CoordinatorConfig, SyncCoordinator};
    use shared::{Direction, KinematicState, Packet, Vector2};
    use tokio_test::assert_ok;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn classify(
        clients: &RwLock<ClientManager>,
        datagram: &[u8],
        from: SocketAddr,
    ) -> Vec<TransportEvent> {
        let mut outgoing = Vec::new();
        UdpTransport::classify_datagram(clients, datagram, from, &mut outgoing).await;
        outgoing
    }

    #[tokio::test]
    async fn test_first_datagram_connects() {
        let clients = RwLock::new(ClientManager::new(4));
        let hello = Packet::Reserved(PacketType::ClientConnectionRequest)
            .encode()
            .unwrap();

        let events = classify(&clients, &hello, addr(9000)).await;
        assert_eq!(
            events,
            vec![
                TransportEvent::Connected { id: 1 },
                TransportEvent::Data {
                    id: 1,
                    payload: hello.clone()
                },
            ]
        );

        let events = classify(&clients, &hello, addr(9000)).await;
        assert_eq!(
            events,
            vec![TransportEvent::Data {
                id: 1,
                payload: hello
            }]
        );
    }

    #[tokio::test]
    async fn test_disconnect_datagram() {
        let clients = RwLock::new(ClientManager::new(4));
        let bye = Packet::Reserved(PacketType::ClientDisconnect).encode().unwrap();

        assert!(classify(&clients, &bye, addr(9001)).await.is_empty());

        classify(&clients, &[0], addr(9001)).await;
        let events = classify(&clients, &bye, addr(9001)).await;
        assert_eq!(events, vec![TransportEvent::Disconnected { id: 1 }]);
        assert!(clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_server_refuses() {
        let clients = RwLock::new(ClientManager::new(1));

        classify(&clients, &[0], addr(9002)).await;
        assert!(classify(&clients, &[0], addr(9003)).await.is_empty());
        assert_eq!(clients.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let transport = UdpTransport::bind("127.0.0.1:0", UdpTransportConfig::default())
            .await
            .unwrap();

        match transport.send_to(42, &[0]).await {
            Err(TransportError::UnknownConnection(42)) => {}
            other => panic!("Expected UnknownConnection, got {:?}", other),
        }
        assert!(transport.connections().await.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let transport = UdpTransport::bind("127.0.0.1:0", UdpTransportConfig::default())
            .await
            .unwrap();
        let server_addr = transport.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let handles = transport.start(tx);

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(&[PacketType::ClientConnectionRequest.as_byte()], server_addr)
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, TransportEvent::Connected { id: 1 });
        assert_eq!(transport.connections().await, vec![1]);

        assert_ok!(transport.send_to(1, &[5, 1, 0, 0, 0]).await);
        let mut buffer = [0u8; 16];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buffer[..len], &[5, 1, 0, 0, 0]);

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_rejected() {
        let transport = UdpTransport::bind("127.0.0.1:0", UdpTransportConfig::default())
            .await
            .unwrap();
        let oversized = vec![0u8; MAX_DATAGRAM_SIZE + 1];

        match transport.send_to(1, &oversized).await {
            Err(TransportError::PayloadTooLarge { size, max }) => {
                assert_eq!(size, MAX_DATAGRAM_SIZE + 1);
                assert_eq!(max, MAX_DATAGRAM_SIZE);
            }
            other => panic!("Expected PayloadTooLarge, got {:?}", other),
        }
        assert_eq!(transport.max_payload_size(), Some(MAX_DATAGRAM_SIZE));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let config = UdpTransportConfig {
            client_timeout: Duration::from_millis(100),
            ..UdpTransportConfig::default()
        };
        let transport = UdpTransport::bind("127.0.0.1:0", config).await.unwrap();
        let server_addr = transport.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let handles = transport.start(tx);

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(&[PacketType::ClientConnectionRequest.as_byte()], server_addr)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            let done = event == TransportEvent::Disconnected { id: 1 };
            events.push(event);
            if done {
                break;
            }
        }

        assert_eq!(events.first(), Some(&TransportEvent::Connected { id: 1 }));
        assert_eq!(events.last(), Some(&TransportEvent::Disconnected { id: 1 }));
        assert!(transport.connections().await.is_empty());

        for handle in handles {
            handle.abort();
        }
    }

    /// Thousands of departed entries must not silence the live peer
    #[tokio::test]
    async fn test_broadcast_survives_ghost_buildup() {
        let transport = Arc::new(
            UdpTransport::bind("127.0.0.1:0", UdpTransportConfig::default())
                .await
                .unwrap(),
        );
        let server_addr = transport.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let handles = transport.start(tx);

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(&[PacketType::ClientConnectionRequest.as_byte()], server_addr)
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, TransportEvent::Connected { id: 1 });

        let coordinator = SyncCoordinator::new(Arc::clone(&transport), CoordinatorConfig::default());
        for id in 1..=3300 {
            coordinator
                .store()
                .upsert(id, KinematicState::at_rest(Vector2::new(id as f32, 0.0)))
                .await;
        }

        let report = coordinator.broadcast_tick().await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.entries, 1);

        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        match Packet::decode(&buffer[..len], Direction::ToClient).unwrap() {
            Packet::WorldUpdate(snapshot) => {
                assert_eq!(snapshot.len(), 1);
                assert!(snapshot.get(1).is_some());
            }
            other => panic!("Unexpected packet {:?}", other),
        }

        for handle in handles {
            handle.abort();
        }
    }
}
