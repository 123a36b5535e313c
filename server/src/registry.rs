//! Session table for the relay
//!
//! This module tracks every connected session, including:
//! - Session id allocation and capacity enforcement
//! - Routing identity (namespace, room and private-group hashes)
//! - The sticky-state cache replayed to late joiners
//! - The outbound handle used to reach the session's socket
//!
//! The registry itself is not synchronized; the router keeps it behind the
//! same lock as its job queue.

use std::collections::HashMap;

use log::info;

use crate::outbound::Outbound;
use crate::sticky::StickyState;

/// Ids below this are never handed out.
pub const FIRST_SESSION_ID: u16 = 10;

/// One connected client as seen by the router
#[derive(Debug)]
pub struct SessionEntry {
    /// Server-assigned id, stamped into every relayed packet
    pub id: u16,
    /// Client population this session belongs to
    pub namespace: u32,
    /// Current locality scope for LOCAL delivery
    pub room_hash: u32,
    /// Private chat group, 0 for none
    pub crypt_hash: u32,
    pub sticky: StickyState,
    pub outbound: Outbound,
}

impl SessionEntry {
    pub fn new(id: u16, outbound: Outbound) -> Self {
        Self {
            id,
            namespace: 0,
            room_hash: 0,
            crypt_hash: 0,
            sticky: StickyState::default(),
            outbound,
        }
    }
}

/// Tracks all sessions and enforces the configured capacity
pub struct Registry {
    sessions: HashMap<u16, SessionEntry>,
    next_id: u16,
    max_sessions: usize,
}

impl Registry {
    /// Creates an empty registry
    ///
    /// The capacity is clamped to the number of ids available.
    pub fn new(max_sessions: usize) -> Self {
        let available = (u16::MAX - FIRST_SESSION_ID) as usize + 1;
        Self {
            sessions: HashMap::new(),
            next_id: FIRST_SESSION_ID,
            max_sessions: max_sessions.min(available),
        }
    }

    /// Registers a new session
    ///
    /// Returns the new id, or None at capacity. Ids increase monotonically
    /// and wrap around, skipping ids still in use.
    pub fn add_session(&mut self, outbound: Outbound) -> Option<u16> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }

        let mut id = self.next_id;
        while self.sessions.contains_key(&id) {
            id = Self::following(id);
        }
        self.next_id = Self::following(id);

        self.sessions.insert(id, SessionEntry::new(id, outbound));
        info!("session {} opened ({} total)", id, self.sessions.len());
        Some(id)
    }

    fn following(id: u16) -> u16 {
        match id.checked_add(1) {
            Some(next) => next,
            None => FIRST_SESSION_ID,
        }
    }

    /// Removes a session and everything cached for it
    pub fn remove_session(&mut self, id: u16) -> Option<SessionEntry> {
        let entry = self.sessions.remove(&id)?;
        info!("session {} closed ({} total)", id, self.sessions.len());
        Some(entry)
    }

    pub fn get(&self, id: u16) -> Option<&SessionEntry> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut SessionEntry> {
        self.sessions.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionEntry> {
        self.sessions.values()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Returns the number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(registry: &mut Registry) -> Option<u16> {
        registry.add_session(Outbound::channel().0)
    }

    #[test]
    fn test_registry_creation() {
        let registry = Registry::new(5);
        assert_eq!(registry.max_sessions(), 5);
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut registry = Registry::new(3);
        assert_eq!(add(&mut registry), Some(FIRST_SESSION_ID));
        assert_eq!(add(&mut registry), Some(FIRST_SESSION_ID + 1));

        registry.remove_session(FIRST_SESSION_ID);
        assert_eq!(add(&mut registry), Some(FIRST_SESSION_ID + 2));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut registry = Registry::new(1);
        assert!(add(&mut registry).is_some());
        assert!(add(&mut registry).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_wrap_and_skip_live_sessions() {
        let mut registry = Registry::new(4);
        registry.next_id = u16::MAX;
        assert_eq!(add(&mut registry), Some(u16::MAX));
        assert_eq!(add(&mut registry), Some(FIRST_SESSION_ID));

        registry.next_id = u16::MAX;
        assert_eq!(add(&mut registry), Some(FIRST_SESSION_ID + 1));
    }

    #[test]
    fn test_new_session_has_empty_identity() {
        let mut registry = Registry::new(2);
        let id = add(&mut registry).unwrap();
        let entry = registry.get(id).unwrap();
        assert_eq!(entry.id, id);
        assert_eq!((entry.namespace, entry.room_hash, entry.crypt_hash), (0, 0, 0));
        assert_eq!(entry.sticky, StickyState::default());
    }

    #[test]
    fn test_remove_nonexistent_session() {
        let mut registry = Registry::new(2);
        assert!(registry.remove_session(999).is_none());
        assert!(registry.is_empty());
    }
}
