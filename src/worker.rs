//! Pool worker
//!
//! A worker repeatedly claims one connection from the pool queue, serves
//! it until the session ends, then goes back for another. It exits when
//! the pool shuts down or retires it while idle.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::handler::{serve_connection, SessionEnd};
use crate::pool::{Pool, WorkerSlot};
use crate::server::ChatHandle;

/// Everything a worker needs to serve a session
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub chat: ChatHandle,
    pub server: Arc<ServerConfig>,
}

impl WorkerContext {
    pub fn new(chat: ChatHandle, server: Arc<ServerConfig>) -> Self {
        Self { chat, server }
    }
}

pub(crate) struct Worker {
    pool: Pool,
    slot: Arc<WorkerSlot>,
}

impl Worker {
    pub(crate) fn new(pool: Pool, slot: Arc<WorkerSlot>) -> Self {
        Self { pool, slot }
    }

    /// Claim and serve connections until stopped
    pub(crate) async fn run(self) {
        let id = self.slot.id;
        debug!("Worker {} waiting for clients", id);

        while let Some(connection) = self.pool.claim(&self.slot).await {
            let peer = connection.peer;
            info!("Worker {} fetched client {}", id, peer);

            let outcome =
                serve_connection(connection, self.pool.context(), &self.slot.stop).await;

            info!("Worker {} closing client socket {}", id, peer);
            self.pool.release(&self.slot);

            match outcome {
                Ok(SessionEnd::Kill) => {
                    info!("Worker {} received KILL_SERVICE", id);
                    self.pool.request_shutdown();
                    break;
                }
                Ok(end) => debug!("Worker {} session with {} ended: {:?}", id, peer, end),
                Err(e) if e.is_connection_reset() => {
                    debug!("Worker {} lost client {}: {}", id, peer, e)
                }
                Err(e) => warn!("Worker {} session with {} failed: {}", id, peer, e),
            }
        }

        self.pool.deregister(&self.slot);
        info!("Worker {} dying", id);
    }
}
