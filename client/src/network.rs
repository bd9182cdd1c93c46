//! UDP link between one agent and the server

use crate::agent::ClientSyncAgent;
use crate::input::InputSource;
use log::{debug, error, info, warn};
use shared::protocol::CodecError;
use shared::{ConnectionStatus, Packet, PacketType};
use std::future::Future;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Largest datagram the client accepts
const RECV_BUFFER_SIZE: usize = 65536;
/// Cap on the timestep fed to the agent after a stall
const MAX_DELTA_TIME: f32 = 1.0 / 20.0;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server address: {0}")]
    InvalidAddress(#[from] AddrParseError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    /// Agent ticks per second
    pub tick_rate: u32,
    /// How long to wait for the server, both when connecting and once connected
    pub connect_timeout: Duration,
    /// Stop after this long; None runs until Ctrl+C
    pub run_for: Option<Duration>,
}

impl ClientConfig {
    /// Default settings for talking to `server_addr`.
    ///
    /// Fails if the address is not a literal `ip:port`.
    pub fn new(server_addr: &str) -> Result<Self, ClientError> {
        Ok(Self {
            server_addr: server_addr.parse()?,
            tick_rate: 60,
            connect_timeout: Duration::from_secs(5),
            run_for: None,
        })
    }

    fn tick_duration(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_rate.max(1) as f32)
    }
}

pub struct Client<I: InputSource> {
    socket: UdpSocket,
    config: ClientConfig,
    agent: ClientSyncAgent,
    input: I,
    connect_started: Instant,
    last_heard: Instant,
}

impl<I: InputSource> Client<I> {
    /// Binds an ephemeral local socket of the same address family as the server.
    ///
    /// Nothing is sent until [`Client::run`] starts.
    pub async fn new(config: ClientConfig, input: I) -> Result<Self, ClientError> {
        let bind_addr = if config.server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(Client {
            socket,
            config,
            agent: ClientSyncAgent::new(),
            input,
            connect_started: Instant::now(),
            last_heard: Instant::now(),
        })
    }

    /// The agent driven by this link, for inspecting state and the last broadcast
    pub fn agent(&self) -> &ClientSyncAgent {
        &self.agent
    }

    /// Current connection status, as tracked by the agent
    pub fn status(&self) -> ConnectionStatus {
        self.agent.status()
    }

    async fn send_packet(&self, bytes: &[u8]) -> Result<(), ClientError> {
        self.socket.send_to(bytes, self.config.server_addr).await?;
        Ok(())
    }

    /// Announces this client; the server answers with its identity
    async fn connect(&mut self) -> Result<(), ClientError> {
        info!("Connecting to {}...", self.config.server_addr);

        let hello = Packet::Reserved(PacketType::ClientConnectionRequest).encode()?;
        self.agent.set_status(ConnectionStatus::Connecting);
        self.connect_started = Instant::now();

        if let Err(e) = self.send_packet(&hello).await {
            self.agent.set_status(ConnectionStatus::FailedToConnect);
            return Err(e);
        }
        Ok(())
    }

    /// Sends `ClientDisconnect` if connected, then marks the link disconnected
    async fn disconnect(&mut self) {
        if self.agent.status().is_connected() {
            match Packet::Reserved(PacketType::ClientDisconnect).encode() {
                Ok(bye) => {
                    if let Err(e) = self.send_packet(&bye).await {
                        warn!("Failed to notify server of disconnect: {}", e);
                    }
                }
                Err(e) => error!("Failed to encode disconnect: {}", e),
            }
        }
        self.agent.set_status(ConnectionStatus::Disconnected);
    }

    /// Feeds one received datagram to the agent.
    ///
    /// Anything not from the server address is dropped. The first server
    /// datagram completes the connection, whatever it carries.
    fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        if from != self.config.server_addr {
            debug!("Ignoring datagram from {}", from);
            return;
        }

        self.last_heard = Instant::now();
        if self.agent.status() == ConnectionStatus::Connecting {
            self.agent.set_status(ConnectionStatus::Connected);
        }
        self.agent.handle_packet(bytes);
    }

    /// Samples input, advances the agent and sends its update if it produced one
    async fn tick(&mut self, dt: f32, elapsed: f32) {
        let direction = self.input.direction(elapsed);

        if let Some(bytes) = self.agent.tick(direction, dt) {
            if let Err(e) = self.send_packet(&bytes).await {
                warn!("Failed to send update: {}", e);
                self.agent.set_status(ConnectionStatus::Disconnected);
            }
        }
    }

    /// Applies the connect and silence timeouts.
    ///
    /// Connecting for too long becomes `FailedToConnect`; a connected server
    /// that has gone quiet for too long becomes `Disconnected`.
    fn check_connection_health(&mut self) {
        let timeout = self.config.connect_timeout;
        match self.agent.status() {
            ConnectionStatus::Connecting if self.connect_started.elapsed() > timeout => {
                warn!("No answer from {} within {:?}", self.config.server_addr, timeout);
                self.agent.set_status(ConnectionStatus::FailedToConnect);
            }
            ConnectionStatus::Connected if self.last_heard.elapsed() > timeout => {
                warn!("Server silent for {:?}, dropping connection", timeout);
                self.agent.set_status(ConnectionStatus::Disconnected);
            }
            _ => {}
        }
    }

    /// Connects and ticks the agent until the configured run time passes,
    /// Ctrl+C arrives, or the connection is lost.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, disconnecting"),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Same loop as [`Client::run`], ending when `shutdown` completes.
    ///
    /// `shutdown` is created once and polled across every loop iteration.
    /// On any exit the server is told about the disconnect if the client was
    /// connected.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), ClientError>
    where
        F: Future<Output = ()>,
    {
        self.connect().await?;
        tokio::pin!(shutdown);

        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        let mut last_tick = started;
        let deadline = self.config.run_for.map(|duration| started + duration);
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                info!("Run time elapsed");
                break;
            }

            match self.agent.status() {
                ConnectionStatus::FailedToConnect => {
                    error!("Failed to connect to {}", self.config.server_addr);
                    break;
                }
                ConnectionStatus::Disconnected => {
                    warn!("Connection lost");
                    break;
                }
                _ => {}
            }

            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, from)) => self.handle_datagram(&buffer[..len], from),
                        Err(e) => error!("Error receiving datagram: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = (now - last_tick).as_secs_f32().min(MAX_DELTA_TIME);
                    last_tick = now;

                    self.tick(dt, (now - started).as_secs_f32()).await;
                    self.check_connection_health();
                },

                _ = &mut shutdown => break,
            }
        }

        self.disconnect().await;
        info!("Sent {} updates", self.agent.updates_sent());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputPattern, ScriptedInput};
    use shared::{Direction, Vector2};
    use tokio::sync::oneshot;
    use tokio_test::assert_ok;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("127.0.0.1:8080").unwrap();
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.run_for.is_none());
    }

    #[test]
    fn test_config_rejects_bad_address() {
        assert!(matches!(
            ClientConfig::new("not an address"),
            Err(ClientError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_tick_duration_guards_zero_rate() {
        let mut config = ClientConfig::new("127.0.0.1:8080").unwrap();
        config.tick_rate = 0;
        assert_eq!(config.tick_duration(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connect_sends_hello_and_identity_completes_it() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut config = ClientConfig::new(&server_addr.to_string()).unwrap();
        config.connect_timeout = Duration::from_secs(2);
        let mut client = Client::new(config, ScriptedInput::with_seed(InputPattern::Idle, 1))
            .await
            .unwrap();

        assert_ok!(client.connect().await);
        assert_eq!(client.status(), ConnectionStatus::Connecting);

        let mut buffer = [0u8; 64];
        let (len, _) = server.recv_from(&mut buffer).await.unwrap();
        assert_eq!(
            Packet::decode(&buffer[..len], Direction::ToServer).unwrap(),
            Packet::Reserved(PacketType::ClientConnectionRequest)
        );

        let identity = Packet::ClientConnect { id: 3 }.encode().unwrap();
        client.handle_datagram(&identity, server_addr);
        assert_eq!(client.status(), ConnectionStatus::Connected);
        assert_eq!(client.agent().id(), Some(3));

        client.tick(1.0 / 60.0, 0.0).await;
        let (len, _) = server.recv_from(&mut buffer).await.unwrap();
        match Packet::decode(&buffer[..len], Direction::ToServer).unwrap() {
            Packet::ClientUpdate(state) => assert_eq!(state.velocity, Vector2::ZERO),
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_datagrams_from_strangers_are_ignored() {
        let server_addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let stranger: SocketAddr = "127.0.0.1:10".parse().unwrap();
        let config = ClientConfig {
            server_addr,
            ..ClientConfig::new("127.0.0.1:9").unwrap()
        };
        let mut client = Client::new(config, ScriptedInput::with_seed(InputPattern::Idle, 1))
            .await
            .unwrap();

        let identity = Packet::ClientConnect { id: 3 }.encode().unwrap();
        client.handle_datagram(&identity, stranger);
        assert_eq!(client.agent().id(), None);
    }

    #[tokio::test]
    async fn test_connect_timeout_fails() {
        let mut config = ClientConfig::new("127.0.0.1:9").unwrap();
        config.connect_timeout = Duration::from_millis(0);
        let mut client = Client::new(config, ScriptedInput::with_seed(InputPattern::Idle, 1))
            .await
            .unwrap();

        client.agent.set_status(ConnectionStatus::Connecting);
        client.connect_started = Instant::now() - Duration::from_millis(10);
        client.check_connection_health();

        assert_eq!(client.status(), ConnectionStatus::FailedToConnect);
    }
    #[tokio::test]
    async fn test_server_silence_drops_connection() {
        let mut config = ClientConfig::new("127.0.0.1:9").unwrap();
        config.connect_timeout = Duration::from_millis(50);
        let mut client = Client::new(config, ScriptedInput::with_seed(InputPattern::Circle, 1))
            .await
            .unwrap();

        client.agent.set_status(ConnectionStatus::Connected);
        client.agent.on_identity_assigned(3);
        client.last_heard = Instant::now();
        client.check_connection_health();
        assert_eq!(client.status(), ConnectionStatus::Connected);

        client.last_heard = Instant::now() - Duration::from_millis(100);
        client.check_connection_health();

        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert_eq!(client.agent().id(), None);
        assert!(client.agent.tick(Vector2::new(1.0, 0.0), 1.0 / 60.0).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_sends_disconnect() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let fake_server = tokio::spawn(async move {
            let mut buffer = [0u8; 64];
            let mut stop_tx = Some(stop_tx);
            let mut updates = 0;

            loop {
                let (len, from) = server.recv_from(&mut buffer).await.unwrap();
                match Packet::decode(&buffer[..len], Direction::ToServer).unwrap() {
                    Packet::Reserved(PacketType::ClientConnectionRequest) => {
                        let identity = Packet::ClientConnect { id: 3 }.encode().unwrap();
                        server.send_to(&identity, from).await.unwrap();
                    }
                    Packet::ClientUpdate(_) => {
                        updates += 1;
                        if updates == 3 {
                            if let Some(stop) = stop_tx.take() {
                                let _ = stop.send(());
                            }
                        }
                    }
                    Packet::Reserved(PacketType::ClientDisconnect) => return updates,
                    _ => {}
                }
            }
        });

        let mut config = ClientConfig::new(&server_addr.to_string()).unwrap();
        config.connect_timeout = Duration::from_secs(2);
        let mut client = Client::new(config, ScriptedInput::with_seed(InputPattern::Square, 1))
            .await
            .unwrap();

        assert_ok!(
            client
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        );

        let updates = tokio::time::timeout(Duration::from_secs(2), fake_server)
            .await
            .unwrap()
            .unwrap();
        assert!(updates >= 3);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }
}
