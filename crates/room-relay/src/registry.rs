//! Room membership registry

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::connection::{Connection, ConnectionId};
use crate::event::Room;

/// Process-local mapping of rooms to the connections joined to them
///
/// A room exists only while it has members. None of the operations fail.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    /// room -> members
    rooms: Arc<DashMap<Room, HashMap<ConnectionId, Connection>>>,
    /// Index: connection_id -> rooms joined
    memberships: Arc<DashMap<ConnectionId, HashSet<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room. Returns false if it was already a member.
    pub fn join(&self, connection: &Connection, room: &Room) -> bool {
        let added = self
            .memberships
            .entry(connection.id.clone())
            .or_default()
            .insert(room.clone());

        if added {
            self.rooms
                .entry(room.clone())
                .or_default()
                .insert(connection.id.clone(), connection.clone());
            debug!(connection_id = %connection.id, room = %room, "Joined room");
        }
        added
    }

    /// Remove a connection from a room. Returns false if it was not a member.
    pub fn leave(&self, connection_id: &str, room: &Room) -> bool {
        let removed = match self.memberships.get_mut(connection_id) {
            Some(mut rooms) => rooms.remove(room),
            None => false,
        };
        self.memberships
            .remove_if(connection_id, |_, rooms| rooms.is_empty());

        if removed {
            self.remove_member(connection_id, room);
            debug!(connection_id, room = %room, "Left room");
        }
        removed
    }

    /// Remove a connection from every room it joined
    pub fn leave_all(&self, connection_id: &str) -> Vec<Room> {
        let rooms: Vec<Room> = self
            .memberships
            .remove(connection_id)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();

        for room in &rooms {
            self.remove_member(connection_id, room);
        }
        rooms
    }

    fn remove_member(&self, connection_id: &str, room: &Room) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(connection_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// All members of `room` other than `connection_id`
    pub fn members_excluding(&self, room: &Room, connection_id: &str) -> Vec<Connection> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter(|(id, _)| id.as_str() != connection_id)
                    .map(|(_, conn)| conn.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rooms a connection is currently in
    pub fn rooms_of(&self, connection_id: &str) -> Vec<Room> {
        self.memberships
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, room: &Room) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
