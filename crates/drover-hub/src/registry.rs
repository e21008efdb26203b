//! Connection registry
//!
//! Tracks the connections of one peer role (agents or operators) and hands
//! out the numeric ids the rest of the hub speaks in. Ids are the smallest
//! positive integer not currently in use for that role, so a freed id is
//! reused by the next registration and the two roles have independent id
//! spaces.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dispatch::PeerSender;

/// Which side of the relay a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Agent,
    Operator,
}

impl PeerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerRole::Agent => "agent",
            PeerRole::Operator => "operator",
        }
    }
}

/// Everything the hub tracks about one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: u32,
    pub address: Arc<str>,
    pub port: u16,
    /// Device label reported by an agent's identification event.
    pub device: Option<String>,
    pub connected_at: DateTime<Utc>,
    /// When the peer last sent us anything, pongs included.
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    /// Cleared by the liveness sweep, set again by any inbound traffic.
    pub live: bool,
    pub sender: PeerSender,
}

/// Registry of live connections for a single role.
#[derive(Debug)]
pub struct ConnectionRegistry {
    role: PeerRole,
    connections: HashMap<u32, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new(role: PeerRole) -> Self {
        Self { role, connections: HashMap::new() }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Register a new connection and return its id.
    pub fn register(&mut self, address: Arc<str>, port: u16, sender: PeerSender) -> u32 {
        let id = self.next_free_id();
        let now = Utc::now();
        let record = ConnectionRecord {
            id,
            address,
            port,
            device: None,
            connected_at: now,
            last_activity: now,
            message_count: 0,
            live: true,
            sender,
        };

        tracing::info!(role = self.role.as_str(), id, address = %record.address, port, "connection registered");
        self.connections.insert(id, record);
        id
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister(&mut self, id: u32) -> Option<ConnectionRecord> {
        let removed = self.connections.remove(&id);
        if removed.is_some() {
            tracing::info!(role = self.role.as_str(), id, "connection unregistered");
        }
        removed
    }

    pub fn get(&self, id: u32) -> Option<&ConnectionRecord> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut ConnectionRecord> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.connections.contains_key(&id)
    }

    /// All registered ids, ascending.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Count an inbound frame: bumps the message counter and refreshes the
    /// live flag and activity timestamp.
    pub fn touch(&mut self, id: u32) {
        if let Some(record) = self.connections.get_mut(&id) {
            record.message_count += 1;
            record.live = true;
            record.last_activity = Utc::now();
        }
    }

    /// Refresh the live flag without counting a frame (pong replies).
    pub fn mark_live(&mut self, id: u32) {
        if let Some(record) = self.connections.get_mut(&id) {
            record.live = true;
            record.last_activity = Utc::now();
        }
    }

    fn next_free_id(&self) -> u32 {
        let mut id = 1;
        while self.connections.contains_key(&id) {
            id += 1;
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_peer(registry: &mut ConnectionRegistry) -> u32 {
        let (sender, rx) = PeerSender::channel();
        // Writer half leaks in tests; the queue stays open for the test body.
        std::mem::forget(rx);
        registry.register("127.0.0.1".into(), 9000, sender)
    }

    #[test]
    fn test_ids_start_at_one_and_ascend() {
        let mut registry = ConnectionRegistry::new(PeerRole::Agent);
        assert_eq!(add_peer(&mut registry), 1);
        assert_eq!(add_peer(&mut registry), 2);
        assert_eq!(add_peer(&mut registry), 3);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_smallest_free_id_is_reused() {
        let mut registry = ConnectionRegistry::new(PeerRole::Agent);
        let first = add_peer(&mut registry);
        let second = add_peer(&mut registry);
        let third = add_peer(&mut registry);

        registry.unregister(second);
        assert_eq!(add_peer(&mut registry), second);

        registry.unregister(first);
        registry.unregister(third);
        assert_eq!(add_peer(&mut registry), first);

        assert_eq!(registry.ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_live_ids_are_never_shared() {
        let mut registry = ConnectionRegistry::new(PeerRole::Operator);
        let a = add_peer(&mut registry);
        let b = add_peer(&mut registry);
        assert_ne!(a, b);
        assert!(registry.contains(a));
        assert!(registry.contains(b));
    }

    #[test]
    fn test_unregister_unknown_id_is_a_no_op() {
        let mut registry = ConnectionRegistry::new(PeerRole::Agent);
        let id = add_peer(&mut registry);

        assert!(registry.unregister(42).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_touch_counts_frames_and_refreshes_live_flag() {
        let mut registry = ConnectionRegistry::new(PeerRole::Agent);
        let id = add_peer(&mut registry);

        let registered_at = registry.get(id).unwrap().last_activity;
        registry.get_mut(id).unwrap().live = false;
        registry.touch(id);
        registry.touch(id);

        let record = registry.get(id).unwrap();
        assert_eq!(record.message_count, 2);
        assert!(record.live);
        assert!(record.last_activity >= registered_at);

        // Unknown ids are ignored.
        registry.touch(99);
    }

    #[test]
    fn test_mark_live_does_not_count_a_frame() {
        let mut registry = ConnectionRegistry::new(PeerRole::Agent);
        let id = add_peer(&mut registry);

        registry.get_mut(id).unwrap().live = false;
        registry.mark_live(id);

        let record = registry.get(id).unwrap();
        assert_eq!(record.message_count, 0);
        assert!(record.live);
    }

    #[test]
    fn test_roles_have_independent_registries() {
        let mut agents = ConnectionRegistry::new(PeerRole::Agent);
        let mut operators = ConnectionRegistry::new(PeerRole::Operator);

        assert_eq!(add_peer(&mut agents), 1);
        assert_eq!(add_peer(&mut operators), 1);
        assert_eq!(agents.role(), PeerRole::Agent);
        assert_eq!(operators.role(), PeerRole::Operator);
    }
}
