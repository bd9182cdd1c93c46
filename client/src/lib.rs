//! # Synchronization Client Library
//!
//! The reporting half of the state-synchronization protocol. Each client owns
//! exactly one kinematic state, its own, and is the authority on how it moves:
//! every tick it integrates the current input and tells the server the result.
//! In return it learns its identity once and receives the server's periodic
//! broadcast of everyone's state.
//!
//! ## Module Organization
//!
//! ### Agent Module (`agent`)
//! - Movement integration: input sets velocity, damping pulls it back to zero
//! - One `ClientUpdate` per tick while connected, none otherwise
//! - Identity assignment and broadcast decoding
//!
//! ### Input Module (`input`)
//! - The `InputSource` seam the front end plugs into
//! - Scripted movement patterns for running without a window
//!
//! ### Network Module (`network`)
//! - UDP socket, connect handshake and timeouts
//! - Fixed-rate tick loop with measured, capped timesteps
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::{InputPattern, ScriptedInput};
//! use client::network::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("127.0.0.1:8080")?;
//!     let mut client = Client::new(config, ScriptedInput::new(InputPattern::Circle)).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod input;
pub mod network;
