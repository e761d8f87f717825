//! Connection handler
//!
//! Runs the protocol state machine for one claimed connection: reads
//! lines, dispatches frames against the chat state and drains room
//! messages addressed to this client.

use std::net::IpAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientSession;
use crate::codec::{FrameParser, LineDecoder};
use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::pool::Connection;
use crate::worker::WorkerContext;

/// Why a session ended without a transport error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer closed the stream
    PeerClosed,
    /// Client sent DISCONNECT
    Disconnected,
    /// Client sent KILL_SERVICE
    Kill,
    /// Worker was stopped
    Stopped,
}

struct Session<'a> {
    ctx: &'a WorkerContext,
    client: ClientSession,
    /// Last name the client used, for cleanup notices
    client_name: Option<String>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
    local_ip: IpAddr,
}

impl Session<'_> {
    async fn send(&mut self, msg: &ServerMessage) -> Result<(), AppError> {
        self.writer.send(msg.lines().join("\n")).await?;
        Ok(())
    }

    /// Deliver everything pending for this client in its rooms
    async fn drain(&mut self) -> Result<(), AppError> {
        if !self.client.has_rooms() {
            return Ok(());
        }
        let messages = self
            .ctx
            .chat
            .drain(self.client.client_id, self.client.rooms())
            .await?;
        for msg in messages {
            self.send(&ServerMessage::from(msg)).await?;
        }
        Ok(())
    }

    /// Handle one frame; Some ends the session
    async fn dispatch(&mut self, msg: ClientMessage) -> Result<Option<SessionEnd>, AppError> {
        let client_id = self.client.client_id;
        match msg {
            ClientMessage::Hello { payload } => {
                let reply = ServerMessage::Hello {
                    payload,
                    ip: self.local_ip,
                    port: self.ctx.server.port,
                    student_id: self.ctx.server.student_id.clone(),
                };
                self.send(&reply).await?;
            }
            ClientMessage::Kill => return Ok(Some(SessionEnd::Kill)),
            ClientMessage::Join {
                room_name,
                client_name,
                ..
            } => {
                let room_ref = self.ctx.chat.join(client_id, &room_name, &client_name).await?;
                self.client.record(room_ref);
                self.client_name = Some(client_name);
                let reply = ServerMessage::Joined {
                    room_name,
                    server_ip: self.local_ip,
                    port: self.ctx.server.port,
                    room_ref,
                    join_id: client_id,
                };
                self.send(&reply).await?;
            }
            ClientMessage::Leave {
                room_ref,
                join_id,
                client_name,
            } => {
                let notice = if self.client.holds(room_ref, join_id) {
                    self.ctx.chat.leave(client_id, room_ref, &client_name).await?
                } else {
                    debug!("Client {} left room {} it never joined", client_id, room_ref);
                    None
                };
                self.send(&ServerMessage::Left { room_ref, join_id }).await?;
                if let Some(notice) = notice {
                    self.send(&ServerMessage::from(notice)).await?;
                    self.client.forget(room_ref);
                }
            }
            ClientMessage::Chat {
                room_ref,
                client_name,
                message,
                ..
            } => {
                self.ctx.chat.chat(room_ref, &client_name, &message).await?;
            }
            ClientMessage::Disconnect { client_name, .. } => {
                let rooms = self.client.take_rooms();
                self.ctx.chat.disconnect(client_id, &client_name, rooms).await?;
                return Ok(Some(SessionEnd::Disconnected));
            }
        }
        Ok(None)
    }
}

/// Serve one connection until it ends
///
/// Rooms still held when the session ends for any reason other than
/// DISCONNECT are left on the client's behalf.
pub async fn serve_connection(
    connection: Connection,
    ctx: &WorkerContext,
    stop: &CancellationToken,
) -> Result<SessionEnd, AppError> {
    let client_id = ctx.chat.register().await?;
    let local_ip = connection.stream.local_addr()?.ip();
    let (read_half, write_half) = connection.stream.into_split();
    debug!("Client {} assigned to {}", client_id, connection.peer);

    let mut reader = FramedRead::new(read_half, LineDecoder::new());
    let mut session = Session {
        ctx,
        client: ClientSession::new(client_id),
        client_name: None,
        writer: FramedWrite::new(write_half, LinesCodec::new()),
        local_ip,
    };

    let result = run_session(&mut session, &mut reader, stop).await;

    if session.client.has_rooms() {
        let rooms = session.client.take_rooms();
        let name = session.client_name.clone().unwrap_or_default();
        info!("Client {} dropped, leaving {} rooms", client_id, rooms.len());
        ctx.chat.disconnect(client_id, &name, rooms).await?;
    }
    let _ = SinkExt::<String>::close(&mut session.writer).await;

    result
}

async fn run_session(
    session: &mut Session<'_>,
    reader: &mut FramedRead<OwnedReadHalf, LineDecoder>,
    stop: &CancellationToken,
) -> Result<SessionEnd, AppError> {
    let mut parser = FrameParser::new();
    let mut ticker = interval(session.ctx.server.drain_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => return Ok(SessionEnd::Stopped),
            _ = ticker.tick() => session.drain().await?,
            line = reader.next() => {
                let Some(line) = line else {
                    return Ok(SessionEnd::PeerClosed);
                };
                let line = match line? {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Client {} sent unreadable line: {}", session.client.client_id, e);
                        parser.reset();
                        session.send(&ServerMessage::from(&e)).await?;
                        continue;
                    }
                };
                debug!("Client {} sent '{}'", session.client.client_id, line);

                for frame in parser.push(&line) {
                    match frame {
                        Ok(msg) => {
                            if let Some(end) = session.dispatch(msg).await? {
                                return Ok(end);
                            }
                        }
                        Err(e) => {
                            warn!("Client {} sent malformed frame: {}", session.client.client_id, e);
                            session.send(&ServerMessage::from(&e)).await?;
                        }
                    }
                }
                session.drain().await?;
            }
        }
    }
}
