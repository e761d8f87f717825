//! Room struct definition
//!
//! A chatroom: its member set plus a log of messages that still have
//! recipients waiting to drain them.

use std::collections::{HashSet, VecDeque};

use crate::types::{ClientId, RoomRef};

/// A message as delivered to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMessage {
    pub room_ref: RoomRef,
    pub sender: String,
    pub text: String,
}

/// A logged message and the members that have not received it yet
#[derive(Debug)]
struct PendingMessage {
    sender: String,
    text: String,
    recipients: HashSet<ClientId>,
}

/// Chatroom
///
/// Delivery is pull based: a message is addressed to the members present
/// when it is posted, and each member's worker drains it later. An entry
/// leaves the log exactly when its last recipient has drained it or left.
#[derive(Debug)]
pub struct Room {
    /// Stable room reference
    pub room_ref: RoomRef,
    /// Room name as first joined
    pub name: String,
    clients: HashSet<ClientId>,
    messages: VecDeque<PendingMessage>,
}

impl Room {
    /// Create an empty room
    pub fn new(room_ref: RoomRef, name: String) -> Self {
        Self {
            room_ref,
            name,
            clients: HashSet::new(),
            messages: VecDeque::new(),
        }
    }

    /// Add a member. Returns false if it was already a member.
    pub fn add_client(&mut self, client_id: ClientId) -> bool {
        self.clients.insert(client_id)
    }

    /// Remove a member and everything still addressed to it
    ///
    /// Returns false if the client was not a member.
    pub fn remove_client(&mut self, client_id: ClientId) -> bool {
        for message in &mut self.messages {
            message.recipients.remove(&client_id);
        }
        self.messages.retain(|m| !m.recipients.is_empty());
        self.clients.remove(&client_id)
    }

    /// Check if a client is in this room
    pub fn contains(&self, client_id: ClientId) -> bool {
        self.clients.contains(&client_id)
    }

    /// Current members, in no particular order
    pub fn members(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.iter().copied()
    }

    /// Get the number of members
    pub fn member_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of log entries still waiting on a recipient
    pub fn pending_count(&self) -> usize {
        self.messages.len()
    }

    /// Append a message addressed to the current members
    ///
    /// Nothing is logged when the room is empty. Returns whether the
    /// message was logged.
    pub fn post(&mut self, sender: &str, text: &str) -> bool {
        if self.clients.is_empty() {
            return false;
        }
        self.messages.push_back(PendingMessage {
            sender: sender.to_string(),
            text: text.to_string(),
            recipients: self.clients.clone(),
        });
        true
    }

    /// Take every message still addressed to `client_id`, oldest first
    pub fn drain_for(&mut self, client_id: ClientId) -> Vec<RoomMessage> {
        let mut drained = Vec::new();
        for message in &mut self.messages {
            if message.recipients.remove(&client_id) {
                drained.push(RoomMessage {
                    room_ref: self.room_ref,
                    sender: message.sender.clone(),
                    text: message.text.clone(),
                });
            }
        }
        self.messages.retain(|m| !m.recipients.is_empty());
        drained
    }
}
