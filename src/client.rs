//! Client session definition
//!
//! The per-connection view a worker keeps of the client it serves: the
//! session's join id and the rooms it currently holds a membership in.

use crate::types::{ClientId, RoomRef};

/// A room membership held by this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub room_ref: RoomRef,
    pub join_id: ClientId,
}

/// State of one connection session
#[derive(Debug)]
pub struct ClientSession {
    /// Join id assigned when the connection was claimed
    pub client_id: ClientId,
    memberships: Vec<Membership>,
}

impl ClientSession {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            memberships: Vec::new(),
        }
    }

    /// Whether this session holds the given membership
    pub fn holds(&self, room_ref: RoomRef, join_id: ClientId) -> bool {
        self.memberships
            .iter()
            .any(|m| m.room_ref == room_ref && m.join_id == join_id)
    }

    /// Record a membership; joining the same room twice keeps one record
    pub fn record(&mut self, room_ref: RoomRef) {
        if !self.holds(room_ref, self.client_id) {
            self.memberships.push(Membership {
                room_ref,
                join_id: self.client_id,
            });
        }
    }

    /// Discard a membership record
    pub fn forget(&mut self, room_ref: RoomRef) {
        self.memberships.retain(|m| m.room_ref != room_ref);
    }

    /// Rooms currently held, in join order
    pub fn rooms(&self) -> Vec<RoomRef> {
        self.memberships.iter().map(|m| m.room_ref).collect()
    }

    /// Clear all memberships, returning the rooms they covered
    pub fn take_rooms(&mut self) -> Vec<RoomRef> {
        self.memberships.drain(..).map(|m| m.room_ref).collect()
    }

    /// Check if the session is in any room
    pub fn has_rooms(&self) -> bool {
        !self.memberships.is_empty()
    }
}
