//! Chatroom Relay Library
//!
//! A line-based TCP chat relay. Clients join named chatrooms and exchange
//! text messages; connections are served by an autoscaling pool of
//! workers rather than one task per connection.
//!
//! # Features
//! - HELO / KILL_SERVICE admin frames
//! - Joining, leaving and chatting in named rooms
//! - Pull-based broadcast: each message remembers which members still
//!   have to receive it
//! - Pool that grows and shrinks with queue pressure, with hysteresis
//! - Accept-time rejection under overload
//!
//! # Architecture
//! - `Pool` owns the connection queue and worker registry behind one lock
//! - Each `Worker` claims a connection and runs the protocol for it
//! - `ChatServer` is an actor that owns all room state; workers talk to it
//!   over `mpsc` channels
//!
//! # Example
//! ```ignore
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use chatroom_relay::{listener, ChatServer, Pool, PoolConfig, ServerConfig, WorkerContext};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Arc::new(ServerConfig::new(8000));
//!     let tcp = listener::bind(SocketAddr::from(([0, 0, 0, 0], 8000)), server.backlog).unwrap();
//!     let chat = ChatServer::spawn();
//!     let pool = Pool::start(PoolConfig::default(), WorkerContext::new(chat, server));
//!
//!     listener::run(tcp, pool.clone()).await;
//!     pool.join().await;
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod listener;
pub mod message;
pub mod pool;
pub mod room;
pub mod server;
pub mod state;
pub mod types;
pub mod worker;

// Re-export main types for convenience
pub use client::ClientSession;
pub use codec::FrameParser;
pub use config::{PoolConfig, ServerConfig};
pub use error::{AppError, ProtocolError};
pub use handler::{serve_connection, SessionEnd};
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use pool::{plan_resize, Connection, Pool, PoolStats, Resize};
pub use room::{Room, RoomMessage};
pub use server::{ChatHandle, ChatServer, ServerCommand};
pub use state::ChatState;
pub use types::{ClientId, RoomRef, WorkerId};
pub use worker::WorkerContext;
