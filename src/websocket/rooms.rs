//! Session Rooms
//!
//! Addressable groups of connected sessions. A session joins `user:<owner>`
//! on attach, `market:<contract>` for every contract it holds a live order
//! in, and `admin` when the user is an administrator. Rooms hold weak
//! delivery handles only; dropping a session never touches order state.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::EventEnvelope;

pub type SessionId = Uuid;
pub type EventSender = mpsc::UnboundedSender<EventEnvelope>;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, HashMap<SessionId, EventSender>>,
    memberships: DashMap<SessionId, HashSet<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &str, session: SessionId, sender: EventSender) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(session, sender);
        self.memberships
            .entry(session)
            .or_default()
            .insert(room.to_string());
    }

    pub fn leave(&self, room: &str, session: SessionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&session);
            if members.is_empty() {
                drop(members);
                self.rooms.remove_if(room, |_, m| m.is_empty());
            }
        }
        if let Some(mut rooms) = self.memberships.get_mut(&session) {
            rooms.remove(room);
        }
    }

    /// Remove a disconnected session from every room it joined.
    pub fn drop_session(&self, session: SessionId) {
        let rooms = self
            .memberships
            .remove(&session)
            .map(|(_, rooms)| rooms)
            .unwrap_or_default();

        for room in rooms {
            if let Some(mut members) = self.rooms.get_mut(&room) {
                members.remove(&session);
            }
        }
    }

    /// Deliver an envelope to every member of a room. Returns the number of
    /// sessions reached; closed channels are skipped silently.
    pub fn send_room(&self, room: &str, envelope: &EventEnvelope) -> usize {
        let Some(members) = self.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for sender in members.values() {
            if sender.send(envelope.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn sessions_in(&self, room: &str) -> Vec<SessionId> {
        self.rooms
            .get(room)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Copy every member of `from` into `to`. Used to grant a user's live
    /// sessions access to a contract room they just earned.
    pub fn mirror_members(&self, from: &str, to: &str) {
        let members: Vec<(SessionId, EventSender)> = self
            .rooms
            .get(from)
            .map(|m| m.iter().map(|(id, tx)| (*id, tx.clone())).collect())
            .unwrap_or_default();

        for (session, sender) in members {
            self.join(to, session, sender);
        }
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_member(&self, room: &str, session: SessionId) -> bool {
        self.rooms
            .get(room)
            .map(|m| m.contains_key(&session))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn envelope() -> EventEnvelope {
        EventEnvelope {
            r#type: "market:update".to_string(),
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    fn attach(registry: &RoomRegistry, room: &str) -> (SessionId, mpsc::UnboundedReceiver<EventEnvelope>) {
        let session = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.join(room, session, tx);
        (session, rx)
    }

    #[test]
    fn test_send_room_reaches_members_only() {
        let registry = RoomRegistry::new();
        let (_a, mut rx_a) = attach(&registry, "market:jan26-silver");
        let (_b, mut rx_b) = attach(&registry, "market:dec25-wheat");

        let delivered = registry.send_room("market:jan26-silver", &envelope());

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_drop_session_clears_all_rooms() {
        let registry = RoomRegistry::new();
        let session = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.join("user:u1", session, tx.clone());
        registry.join("market:jan26-silver", session, tx);

        registry.drop_session(session);

        assert_eq!(registry.member_count("user:u1"), 0);
        assert_eq!(registry.member_count("market:jan26-silver"), 0);
    }

    #[test]
    fn test_mirror_members_grants_room() {
        let registry = RoomRegistry::new();
        let (session, mut rx) = attach(&registry, "user:u1");

        registry.mirror_members("user:u1", "market:jan26-silver");

        assert!(registry.is_member("market:jan26-silver", session));
        registry.send_room("market:jan26-silver", &envelope());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_leave_room_keeps_other_memberships() {
        let registry = RoomRegistry::new();
        let session = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.join("user:u1", session, tx.clone());
        registry.join("market:jan26-silver", session, tx);

        registry.leave("market:jan26-silver", session);

        assert!(!registry.is_member("market:jan26-silver", session));
        assert!(registry.is_member("user:u1", session));
    }
}
