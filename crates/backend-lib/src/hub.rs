// ============================
// voiceroom-backend-lib/src/hub.rs
// ============================
//! Who is currently inside which room.
//!
//! Presence is connection-counted: a user with two open connections in the
//! same room stays present until both leave.
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use voiceroom_common::{RoomId, UserId};

use crate::metrics::{ROOM_ACTIVE, ROOM_JOINED, ROOM_VIEWERS};

/// Live presence for every room with at least one viewer
#[derive(Clone, Default)]
pub struct RoomHub {
    rooms: Arc<DashMap<RoomId, HashMap<UserId, usize>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one connection of `user_id` in `room_id`.
    /// Returns true if the user was not present before.
    pub fn enter(&self, room_id: &str, user_id: &str) -> bool {
        let first = {
            let mut viewers = self.rooms.entry(room_id.to_string()).or_default();
            let connections = viewers.entry(user_id.to_string()).or_insert(0);
            *connections += 1;
            *connections == 1
        };
        if first {
            counter!(ROOM_JOINED).increment(1);
        }
        self.update_gauges(room_id);
        first
    }

    /// Drop one connection of `user_id` from `room_id`.
    /// Returns true if that was the user's last connection there.
    pub fn exit(&self, room_id: &str, user_id: &str) -> bool {
        let mut last = false;
        if let Some(mut viewers) = self.rooms.get_mut(room_id) {
            if let Some(connections) = viewers.get_mut(user_id) {
                *connections -= 1;
                if *connections == 0 {
                    viewers.remove(user_id);
                    last = true;
                }
            }
        }
        self.rooms.remove_if(room_id, |_, viewers| viewers.is_empty());
        self.update_gauges(room_id);
        last
    }

    pub fn is_present(&self, room_id: &str, user_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|viewers| viewers.contains_key(user_id))
    }

    /// Distinct users in `room_id`
    pub fn viewers(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |viewers| viewers.len())
    }

    pub fn present_users(&self, room_id: &str) -> Vec<UserId> {
        self.rooms
            .get(room_id)
            .map(|viewers| viewers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms with at least one viewer
    pub fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    fn update_gauges(&self, room_id: &str) {
        gauge!(ROOM_ACTIVE).set(self.rooms.len() as f64);
        gauge!(ROOM_VIEWERS, "room" => room_id.to_string()).set(self.viewers(room_id) as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_counts_connections() {
        let hub = RoomHub::new();
        assert!(hub.enter("r1", "alice"));
        assert!(!hub.enter("r1", "alice"));
        assert!(hub.enter("r1", "bob"));
        assert_eq!(hub.viewers("r1"), 2);

        assert!(!hub.exit("r1", "alice"));
        assert!(hub.is_present("r1", "alice"));
        assert!(hub.exit("r1", "alice"));
        assert!(!hub.is_present("r1", "alice"));
        assert_eq!(hub.present_users("r1"), vec!["bob".to_string()]);
    }

    #[test]
    fn test_empty_rooms_are_dropped() {
        let hub = RoomHub::new();
        hub.enter("r1", "alice");
        hub.exit("r1", "alice");
        assert!(hub.active_rooms().is_empty());
        assert_eq!(hub.viewers("r1"), 0);

        // exiting a room never entered is a no-op
        assert!(!hub.exit("r2", "bob"));
    }
}
