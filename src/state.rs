//! Chat state registry
//!
//! Maps room names to refs and refs to rooms, and owns the global client
//! and room counters. Rooms are created on first join and never removed;
//! they accumulate for the life of the process.

use std::collections::HashMap;

use tracing::debug;

use crate::room::{Room, RoomMessage};
use crate::types::{ClientId, RoomRef};

/// Notice posted when a client joins a room
pub fn join_notice(client_name: &str) -> String {
    format!("{} has joined this chatroom.", client_name)
}

/// Notice posted when a client leaves or disconnects from a room
pub fn leave_notice(client_name: &str) -> String {
    format!("{} has left this chatroom.", client_name)
}

/// All chatrooms plus the id counters
#[derive(Debug, Default)]
pub struct ChatState {
    next_client_id: u64,
    next_room_ref: u64,
    refs: HashMap<String, RoomRef>,
    rooms: HashMap<RoomRef, Room>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh client id
    pub fn register_client(&mut self) -> ClientId {
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;
        id
    }

    /// Look up a room by reference
    pub fn room(&self, room_ref: RoomRef) -> Option<&Room> {
        self.rooms.get(&room_ref)
    }

    /// Look up a room reference by name (case-sensitive)
    pub fn room_ref(&self, name: &str) -> Option<RoomRef> {
        self.refs.get(name).copied()
    }

    /// Total rooms ever created
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Join a room by name, creating it on first use
    ///
    /// Posts a join notice to everyone in the room, the joiner included.
    pub fn join(&mut self, room_name: &str, client_id: ClientId, client_name: &str) -> RoomRef {
        let room_ref = match self.refs.get(room_name) {
            Some(room_ref) => *room_ref,
            None => {
                let room_ref = RoomRef(self.next_room_ref);
                self.next_room_ref += 1;
                self.refs.insert(room_name.to_string(), room_ref);
                self.rooms
                    .insert(room_ref, Room::new(room_ref, room_name.to_string()));
                debug!("Room '{}' created with ref {}", room_name, room_ref);
                room_ref
            }
        };

        if let Some(room) = self.rooms.get_mut(&room_ref) {
            room.add_client(client_id);
            room.post(client_name, &join_notice(client_name));
        }
        room_ref
    }

    /// Leave a room
    ///
    /// Drops everything still addressed to the client, removes it from the
    /// members and posts a leave notice to those remaining. Returns the
    /// notice, or None if the room does not exist.
    pub fn leave(
        &mut self,
        room_ref: RoomRef,
        client_id: ClientId,
        client_name: &str,
    ) -> Option<RoomMessage> {
        let room = self.rooms.get_mut(&room_ref)?;
        room.remove_client(client_id);

        let text = leave_notice(client_name);
        room.post(client_name, &text);
        Some(RoomMessage {
            room_ref,
            sender: client_name.to_string(),
            text,
        })
    }

    /// Post a chat message to the room's current members
    ///
    /// Returns false if the room does not exist or is empty.
    pub fn chat(&mut self, room_ref: RoomRef, client_name: &str, text: &str) -> bool {
        self.rooms
            .get_mut(&room_ref)
            .is_some_and(|room| room.post(client_name, text))
    }

    /// Leave every listed room on disconnect, notifying the remaining members
    pub fn disconnect(&mut self, client_id: ClientId, client_name: &str, rooms: &[RoomRef]) {
        for room_ref in rooms {
            self.leave(*room_ref, client_id, client_name);
        }
    }

    /// Take every message addressed to `client_id` in the listed rooms
    ///
    /// Rooms are drained in the order given, each oldest first.
    pub fn drain(&mut self, client_id: ClientId, rooms: &[RoomRef]) -> Vec<RoomMessage> {
        let mut drained = Vec::new();
        for room_ref in rooms {
            if let Some(room) = self.rooms.get_mut(room_ref) {
                drained.extend(room.drain_for(client_id));
            }
        }
        drained
    }
}
