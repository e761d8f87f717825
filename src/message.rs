//! Message protocol definitions
//!
//! Line-based text protocol. Client frames are parsed by
//! [`crate::codec::FrameParser`]; server frames render to the lines sent
//! on the wire.

use std::fmt;
use std::net::IpAddr;

use crate::error::ProtocolError;
use crate::room::RoomMessage;
use crate::types::{ClientId, RoomRef};

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `HELO <payload>`
    Hello { payload: String },
    /// `KILL_SERVICE`
    Kill,
    /// Join a room by name, creating it if needed
    Join {
        room_name: String,
        client_ip: String,
        port: String,
        client_name: String,
    },
    /// Leave a previously joined room
    Leave {
        room_ref: RoomRef,
        join_id: ClientId,
        client_name: String,
    },
    /// Post a message to a room
    Chat {
        room_ref: RoomRef,
        join_id: ClientId,
        client_name: String,
        message: String,
    },
    /// Leave every room and end the session
    Disconnect { reason: String, client_name: String },
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Reply to HELO
    Hello {
        payload: String,
        ip: IpAddr,
        port: u16,
        student_id: String,
    },
    /// Room joined
    Joined {
        room_name: String,
        server_ip: IpAddr,
        port: u16,
        room_ref: RoomRef,
        join_id: ClientId,
    },
    /// Room left
    Left { room_ref: RoomRef, join_id: ClientId },
    /// Room broadcast
    Chat {
        room_ref: RoomRef,
        client_name: String,
        message: String,
    },
    /// Frame rejected
    Error { code: ErrorCode, description: String },
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Frame did not match any known layout
    MalformedFrame = 1,
}

impl ServerMessage {
    /// Lines of this frame, without terminators
    pub fn lines(&self) -> Vec<String> {
        match self {
            ServerMessage::Hello {
                payload,
                ip,
                port,
                student_id,
            } => vec![
                format!("HELO {}", payload),
                format!("IP:{}", ip),
                format!("Port:{}", port),
                format!("StudentID:{}", student_id),
            ],
            ServerMessage::Joined {
                room_name,
                server_ip,
                port,
                room_ref,
                join_id,
            } => vec![
                format!("JOINED_CHATROOM: {}", room_name),
                format!("SERVER_IP: {}", server_ip),
                format!("PORT: {}", port),
                format!("ROOM_REF: {}", room_ref),
                format!("JOIN_ID: {}", join_id),
            ],
            ServerMessage::Left { room_ref, join_id } => vec![
                format!("LEFT_CHATROOM: {}", room_ref),
                format!("JOIN_ID: {}", join_id),
            ],
            ServerMessage::Chat {
                room_ref,
                client_name,
                message,
            } => vec![
                format!("CHAT: {}", room_ref),
                format!("CLIENT_NAME: {}", client_name),
                format!("MESSAGE: {}", message),
                String::new(),
            ],
            ServerMessage::Error { code, description } => vec![
                format!("ERROR_CODE: {}", *code as u8),
                format!("ERROR_DESCRIPTION: {}", description),
            ],
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

impl From<RoomMessage> for ServerMessage {
    fn from(msg: RoomMessage) -> Self {
        ServerMessage::Chat {
            room_ref: msg.room_ref,
            client_name: msg.sender,
            message: msg.text,
        }
    }
}

/// Convert a rejected frame into an error reply
impl From<&ProtocolError> for ServerMessage {
    fn from(err: &ProtocolError) -> Self {
        ServerMessage::Error {
            code: ErrorCode::MalformedFrame,
            description: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_hello_reply_layout() {
        let msg = ServerMessage::Hello {
            payload: "text".to_string(),
            ip: LOCALHOST,
            port: 8000,
            student_id: "42".to_string(),
        };
        assert_eq!(
            msg.to_string(),
            "HELO text\nIP:127.0.0.1\nPort:8000\nStudentID:42\n"
        );
    }

    #[test]
    fn test_joined_reply_layout() {
        let msg = ServerMessage::Joined {
            room_name: "general".to_string(),
            server_ip: LOCALHOST,
            port: 8000,
            room_ref: RoomRef(0),
            join_id: ClientId(0),
        };
        assert_eq!(
            msg.lines(),
            vec![
                "JOINED_CHATROOM: general",
                "SERVER_IP: 127.0.0.1",
                "PORT: 8000",
                "ROOM_REF: 0",
                "JOIN_ID: 0",
            ]
        );
    }

    #[test]
    fn test_broadcast_ends_with_blank_line() {
        let msg = ServerMessage::from(RoomMessage {
            room_ref: RoomRef(2),
            sender: "bob".to_string(),
            text: "hi".to_string(),
        });
        assert_eq!(msg.to_string(), "CHAT: 2\nCLIENT_NAME: bob\nMESSAGE: hi\n\n");
    }

    #[test]
    fn test_left_reply_layout() {
        let msg = ServerMessage::Left {
            room_ref: RoomRef(1),
            join_id: ClientId(5),
        };
        assert_eq!(msg.to_string(), "LEFT_CHATROOM: 1\nJOIN_ID: 5\n");
    }

    #[test]
    fn test_error_reply_from_protocol_error() {
        let err = ProtocolError::UnknownFrame("NOPE".to_string());
        let msg = ServerMessage::from(&err);
        assert_eq!(
            msg.lines(),
            vec!["ERROR_CODE: 1", "ERROR_DESCRIPTION: Unknown frame: NOPE"]
        );
    }
}
