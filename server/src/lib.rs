//! # Synchronization Server Library
//!
//! The authoritative half of the state-synchronization protocol. Clients
//! integrate their own movement and report it every tick; the server keeps the
//! latest report per connection and periodically broadcasts all of them to
//! everyone.
//!
//! ## Architecture
//!
//! ### Two concurrent contexts
//! Transport events (connect, disconnect, data) arrive through a channel and
//! are applied one at a time by the coordinator. Broadcasting runs on its own
//! task on a fixed cadence. Both touch the [`state_store::StateStore`], whose
//! internal lock makes every entry update atomic.
//!
//! ### No lock held while sending
//! A broadcast holds the store's read lock only while serializing the packet.
//! The sends that follow run unlocked, so a slow peer cannot stall inbound
//! updates from the others.
//!
//! ### Identity assignment
//! On connect the server tells the new client its id with a `ClientConnect`
//! packet and nothing else. A state entry only appears once that client's
//! first `ClientUpdate` arrives.
//!
//! ## Module Organization
//!
//! - `state_store`: the shared map from connection id to kinematic state
//! - `coordinator`: connection lifecycle, inbound packets, broadcast ticks
//! - `transport`: the trait the coordinator sends through, and transport events
//! - `network`: UDP implementation of the transport
//! - `client_manager`: peer table backing the UDP transport
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::coordinator::{CoordinatorConfig, SyncCoordinator};
//! use server::network::{UdpTransport, UdpTransportConfig};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport =
//!         Arc::new(UdpTransport::bind("127.0.0.1:8080", UdpTransportConfig::default()).await?);
//!
//!     let (event_tx, event_rx) = mpsc::channel(1024);
//!     transport.start(event_tx);
//!
//!     let coordinator = Arc::new(SyncCoordinator::new(transport, CoordinatorConfig::default()));
//!     coordinator.run(event_rx).await;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod coordinator;
pub mod network;
pub mod state_store;
pub mod transport;
