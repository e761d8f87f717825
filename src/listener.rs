//! TCP listener
//!
//! Accepts connections and hands them to the pool, rejecting new clients
//! outright while the queue is longer than the pool's maximum size.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket};
use tracing::{error, info, warn};

use crate::pool::{Connection, Pool};

/// Bind a reusable listening socket with the given backlog
pub fn bind(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Whether a new client must be turned away
///
/// Reads the lock-free queue length, so the answer can be stale.
pub fn is_overloaded(pool: &Pool) -> bool {
    pool.queue_len() > pool.config().max_workers
}

/// Accept loop; returns once pool shutdown is requested
pub async fn run(listener: TcpListener, pool: Pool) {
    let shutdown = pool.shutdown_token();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if is_overloaded(&pool) {
                    warn!("Burnout! Server rejected client {}", peer);
                    drop(stream);
                    continue;
                }
                info!("Server received client connection from {}", peer);
                pool.enqueue(Connection::new(stream, peer));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }

    info!("Listener stopped");
}
