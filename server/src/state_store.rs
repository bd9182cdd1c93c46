//! Authoritative per-connection kinematic state
//!
//! The store is the one piece of mutable state shared between the transport
//! event handler and the periodic broadcaster. Every access goes through a
//! single read-write lock around an ordered map, so an entry is always
//! observed whole and snapshots come out in ascending connection id order.

use log::debug;
use shared::protocol::{encode_world_update, CodecError};
use shared::{ConnectionId, KinematicState, Snapshot};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct StateStore {
    entries: RwLock<BTreeMap<ConnectionId, KinematicState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites the entry for `id`.
    ///
    /// Returns true when this call created the entry.
    pub async fn upsert(&self, id: ConnectionId, state: KinematicState) -> bool {
        let created = self.entries.write().await.insert(id, state).is_none();
        if created {
            debug!("Created state entry for connection {}", id);
        }
        created
    }

    /// Deletes the entry for `id`, returning its last known state
    pub async fn remove(&self, id: ConnectionId) -> Option<KinematicState> {
        self.entries.write().await.remove(&id)
    }

    /// Last state reported by `id`, if it ever reported one
    pub async fn get(&self, id: ConnectionId) -> Option<KinematicState> {
        self.entries.read().await.get(&id).copied()
    }

    /// Deletes every entry whose id is not in `keep`.
    ///
    /// Returns how many entries were removed.
    pub async fn retain_only(&self, keep: &[ConnectionId]) -> usize {
        let keep: BTreeSet<ConnectionId> = keep.iter().copied().collect();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|id, _| keep.contains(id));
        before - entries.len()
    }

    /// Point-in-time copy of every entry
    pub async fn snapshot(&self) -> Snapshot {
        let entries = self.entries.read().await;
        Snapshot::new(entries.iter().map(|(id, state)| (*id, *state)).collect())
    }

    /// Serializes the broadcast packet for the current contents.
    ///
    /// The read lock is held only while the buffer is written and is released
    /// before this returns. Yields the buffer and the number of entries in it.
    pub async fn encode_broadcast(&self) -> Result<(Vec<u8>, usize), CodecError> {
        let entries = self.entries.read().await;
        let buffer =
            encode_world_update(entries.len(), entries.iter().map(|(id, state)| (*id, *state)))?;
        Ok((buffer, entries.len()))
    }

    /// Number of connections with a stored state
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
