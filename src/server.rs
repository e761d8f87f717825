//! ChatServer Actor implementation
//!
//! The central actor that owns the [`ChatState`]. Every room read or
//! mutation is a command processed one at a time, which serialises all
//! access to chat state without a lock.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::AppError;
use crate::room::RoomMessage;
use crate::state::ChatState;
use crate::types::{ClientId, RoomRef};

/// Channel buffer size for state commands
pub const COMMAND_BUFFER_SIZE: usize = 256;

/// Commands sent from workers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// Allocate a client id for a new session
    Register { reply: oneshot::Sender<ClientId> },
    /// Join a room by name
    Join {
        client_id: ClientId,
        room_name: String,
        client_name: String,
        reply: oneshot::Sender<RoomRef>,
    },
    /// Leave a room
    Leave {
        client_id: ClientId,
        room_ref: RoomRef,
        client_name: String,
        reply: oneshot::Sender<Option<RoomMessage>>,
    },
    /// Post a chat message
    Chat {
        room_ref: RoomRef,
        client_name: String,
        message: String,
    },
    /// Leave all of a session's rooms
    Disconnect {
        client_id: ClientId,
        client_name: String,
        rooms: Vec<RoomRef>,
    },
    /// Collect pending messages for a client
    Drain {
        client_id: ClientId,
        rooms: Vec<RoomRef>,
        reply: oneshot::Sender<Vec<RoomMessage>>,
    },
}

/// The main ChatServer actor
pub struct ChatServer {
    state: ChatState,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            state: ChatState::new(),
            receiver,
        }
    }

    /// Spawn the actor and return a handle to it
    pub fn spawn() -> ChatHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        tokio::spawn(ChatServer::new(rx).run());
        ChatHandle { sender: tx }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            "ChatServer shutting down with {} rooms",
            self.state.room_count()
        );
    }

    /// Process a single command
    ///
    /// A dropped reply receiver means the worker went away; the state
    /// change still stands.
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Register { reply } => {
                let _ = reply.send(self.state.register_client());
            }
            ServerCommand::Join {
                client_id,
                room_name,
                client_name,
                reply,
            } => {
                let room_ref = self.state.join(&room_name, client_id, &client_name);
                info!(
                    "Client {} ({}) joined room '{}' ({})",
                    client_id, client_name, room_name, room_ref
                );
                let _ = reply.send(room_ref);
            }
            ServerCommand::Leave {
                client_id,
                room_ref,
                client_name,
                reply,
            } => {
                info!("Client {} ({}) left room {}", client_id, client_name, room_ref);
                let _ = reply.send(self.state.leave(room_ref, client_id, &client_name));
            }
            ServerCommand::Chat {
                room_ref,
                client_name,
                message,
            } => {
                if !self.state.chat(room_ref, &client_name, &message) {
                    debug!("Chat from {} to room {} had no audience", client_name, room_ref);
                }
            }
            ServerCommand::Disconnect {
                client_id,
                client_name,
                rooms,
            } => {
                info!(
                    "Client {} ({}) disconnected from {} rooms",
                    client_id,
                    client_name,
                    rooms.len()
                );
                self.state.disconnect(client_id, &client_name, &rooms);
            }
            ServerCommand::Drain {
                client_id,
                rooms,
                reply,
            } => {
                let _ = reply.send(self.state.drain(client_id, &rooms));
            }
        }
    }
}

/// Cloneable handle used by workers to reach the ChatServer actor
#[derive(Debug, Clone)]
pub struct ChatHandle {
    sender: mpsc::Sender<ServerCommand>,
}

impl ChatHandle {
    /// Wrap an existing command sender
    pub fn new(sender: mpsc::Sender<ServerCommand>) -> Self {
        Self { sender }
    }

    async fn send(&self, cmd: ServerCommand) -> Result<(), AppError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| AppError::StateUnavailable)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ServerCommand,
    ) -> Result<T, AppError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| AppError::StateUnavailable)
    }

    /// Allocate a fresh client id
    pub async fn register(&self) -> Result<ClientId, AppError> {
        self.request(|reply| ServerCommand::Register { reply }).await
    }

    /// Join a room by name
    pub async fn join(
        &self,
        client_id: ClientId,
        room_name: &str,
        client_name: &str,
    ) -> Result<RoomRef, AppError> {
        self.request(|reply| ServerCommand::Join {
            client_id,
            room_name: room_name.to_string(),
            client_name: client_name.to_string(),
            reply,
        })
        .await
    }

    /// Leave a room, returning the posted leave notice
    pub async fn leave(
        &self,
        client_id: ClientId,
        room_ref: RoomRef,
        client_name: &str,
    ) -> Result<Option<RoomMessage>, AppError> {
        self.request(|reply| ServerCommand::Leave {
            client_id,
            room_ref,
            client_name: client_name.to_string(),
            reply,
        })
        .await
    }

    /// Post a chat message
    pub async fn chat(
        &self,
        room_ref: RoomRef,
        client_name: &str,
        message: &str,
    ) -> Result<(), AppError> {
        self.send(ServerCommand::Chat {
            room_ref,
            client_name: client_name.to_string(),
            message: message.to_string(),
        })
        .await
    }

    /// Leave every listed room
    pub async fn disconnect(
        &self,
        client_id: ClientId,
        client_name: &str,
        rooms: Vec<RoomRef>,
    ) -> Result<(), AppError> {
        self.send(ServerCommand::Disconnect {
            client_id,
            client_name: client_name.to_string(),
            rooms,
        })
        .await
    }

    /// Collect pending messages for a client in the listed rooms
    pub async fn drain(
        &self,
        client_id: ClientId,
        rooms: Vec<RoomRef>,
    ) -> Result<Vec<RoomMessage>, AppError> {
        self.request(|reply| ServerCommand::Drain {
            client_id,
            rooms,
            reply,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_hands_out_sequential_ids() {
        let chat = ChatServer::spawn();
        assert_eq!(chat.register().await.unwrap(), ClientId(0));
        assert_eq!(chat.register().await.unwrap(), ClientId(1));
    }

    #[tokio::test]
    async fn test_chat_reaches_members_present_at_post_time() {
        let chat = ChatServer::spawn();
        let x = chat.register().await.unwrap();
        let y = chat.register().await.unwrap();

        let room_ref = chat.join(x, "general", "X").await.unwrap();
        assert_eq!(room_ref, RoomRef(0));
        chat.chat(room_ref, "X", "hi").await.unwrap();
        assert_eq!(chat.join(y, "general", "Y").await.unwrap(), room_ref);

        let for_x = chat.drain(x, vec![room_ref]).await.unwrap();
        let for_y = chat.drain(y, vec![room_ref]).await.unwrap();
        assert!(for_x.iter().any(|m| m.text == "hi"));
        assert!(for_y.iter().all(|m| m.text != "hi"));
    }

    #[tokio::test]
    async fn test_leave_returns_notice() {
        let chat = ChatServer::spawn();
        let x = chat.register().await.unwrap();
        let room_ref = chat.join(x, "general", "X").await.unwrap();

        let notice = chat.leave(x, room_ref, "X").await.unwrap().unwrap();
        assert_eq!(notice.text, "X has left this chatroom.");
        assert!(chat.drain(x, vec![room_ref]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_actor_reports_unavailable() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let chat = ChatHandle::new(tx);
        assert!(matches!(
            chat.register().await,
            Err(AppError::StateUnavailable)
        ));
    }
}
