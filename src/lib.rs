//! Workspace facade re-exporting the protocol, server and client crates.

pub use client;
pub use server;
pub use shared;
