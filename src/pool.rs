//! Autoscaling worker pool
//!
//! Owns the FIFO connection queue, the worker registry and the shutdown
//! token. The queue and the registry share one lock; every resize
//! decision is made while holding it. The pool is the only place workers
//! are created or retired.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::types::WorkerId;
use crate::worker::{Worker, WorkerContext};

/// An accepted connection waiting for a worker
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

/// Resize decision for one enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    None,
    Grow(usize),
    Shrink(usize),
}

/// Decide how to resize given the queue length and worker count
///
/// Nothing happens unless the difference exceeds the tolerance. Growth is
/// capped at `max_workers`; shrinking never goes below `min_workers`.
/// The shrink count is an upper bound: only idle workers are retired.
pub fn plan_resize(config: &PoolConfig, queued: usize, workers: usize) -> Resize {
    if queued.abs_diff(workers) <= config.tolerance {
        return Resize::None;
    }
    if queued > workers {
        let spawn = (queued - workers).min(config.max_workers.saturating_sub(workers));
        if spawn == 0 {
            Resize::None
        } else {
            Resize::Grow(spawn)
        }
    } else {
        let retire = (workers - queued).min(workers.saturating_sub(config.min_workers));
        if retire == 0 {
            Resize::None
        } else {
            Resize::Shrink(retire)
        }
    }
}

/// Collect worker tasks that already exited, returning how many failed
fn reap_finished(tasks: &mut JoinSet<()>) -> usize {
    let mut failed = 0;
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            warn!("Worker task failed: {}", e);
            failed += 1;
        }
    }
    failed
}

/// Registry entry for one worker
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub id: WorkerId,
    busy: AtomicBool,
    /// Child of the pool shutdown token; cancelled alone to retire
    pub stop: CancellationToken,
}

impl WorkerSlot {
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Outcome of a claim attempt
#[derive(Debug)]
pub(crate) enum Claim {
    Connection(Connection),
    Empty,
    Stop,
}

/// Pool size snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub idle: usize,
    pub queued: usize,
}

#[derive(Debug)]
struct Registry {
    connections: VecDeque<Connection>,
    workers: Vec<Arc<WorkerSlot>>,
    tasks: JoinSet<()>,
    next_worker_id: u64,
}

#[derive(Debug)]
struct Shared {
    config: PoolConfig,
    registry: Mutex<Registry>,
    /// Queue length mirror readable without the lock
    queued: AtomicUsize,
    available: Notify,
    shutdown: CancellationToken,
    context: WorkerContext,
}

/// Handle to the worker pool
#[derive(Debug, Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

impl Pool {
    /// Create the pool and spawn `min_workers` workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: PoolConfig, context: WorkerContext) -> Self {
        let pool = Self {
            shared: Arc::new(Shared {
                config,
                registry: Mutex::new(Registry {
                    connections: VecDeque::new(),
                    workers: Vec::new(),
                    tasks: JoinSet::new(),
                    next_worker_id: 0,
                }),
                queued: AtomicUsize::new(0),
                available: Notify::new(),
                shutdown: CancellationToken::new(),
                context,
            }),
        };

        {
            let mut registry = pool.lock();
            for _ in 0..config.min_workers {
                pool.spawn_worker(&mut registry);
            }
        }
        info!("Pool started with {} workers", config.min_workers);
        pool
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(&self, registry: &mut Registry) {
        let id = WorkerId(registry.next_worker_id);
        registry.next_worker_id += 1;

        let slot = Arc::new(WorkerSlot {
            id,
            busy: AtomicBool::new(false),
            stop: self.shared.shutdown.child_token(),
        });
        registry.workers.push(Arc::clone(&slot));
        registry.tasks.spawn(Worker::new(self.clone(), slot).run());
        debug!("Worker {} spawned", id);
    }

    /// Retire up to `count` idle workers, returning how many were retired
    fn retire_idle(&self, registry: &mut Registry, count: usize) -> usize {
        let mut retired = 0;
        registry.workers.retain(|slot| {
            if retired < count && !slot.is_busy() {
                slot.stop.cancel();
                retired += 1;
                debug!("Worker {} retiring", slot.id);
                false
            } else {
                true
            }
        });
        retired
    }

    /// Queue a connection and re-evaluate the pool size
    ///
    /// Returns the resize actually applied.
    pub fn enqueue(&self, connection: Connection) -> Resize {
        let mut registry = self.lock();
        if self.is_shutdown() {
            debug!("Dropping connection from {} during shutdown", connection.peer);
            return Resize::None;
        }
        registry.connections.push_back(connection);
        self.shared
            .queued
            .store(registry.connections.len(), Ordering::Release);
        reap_finished(&mut registry.tasks);

        let applied = match plan_resize(
            &self.shared.config,
            registry.connections.len(),
            registry.workers.len(),
        ) {
            Resize::Grow(count) => {
                for _ in 0..count {
                    self.spawn_worker(&mut registry);
                }
                Resize::Grow(count)
            }
            Resize::Shrink(count) => match self.retire_idle(&mut registry, count) {
                0 => Resize::None,
                retired => Resize::Shrink(retired),
            },
            Resize::None => Resize::None,
        };
        if applied != Resize::None {
            info!(
                "Pool resized ({:?}): {} workers, {} queued",
                applied,
                registry.workers.len(),
                registry.connections.len()
            );
        }
        drop(registry);

        self.shared.available.notify_waiters();
        applied
    }

    /// Pop the oldest queued connection for `slot`
    pub(crate) fn try_claim(&self, slot: &WorkerSlot) -> Claim {
        let mut registry = self.lock();
        if slot.stop.is_cancelled() {
            return Claim::Stop;
        }
        match registry.connections.pop_front() {
            Some(connection) => {
                slot.busy.store(true, Ordering::Release);
                self.shared
                    .queued
                    .store(registry.connections.len(), Ordering::Release);
                Claim::Connection(connection)
            }
            None => Claim::Empty,
        }
    }

    /// Mark `slot` idle again after its connection ended
    pub(crate) fn release(&self, slot: &WorkerSlot) {
        let _registry = self.lock();
        slot.busy.store(false, Ordering::Release);
    }

    /// Remove an exiting worker from the registry
    pub(crate) fn deregister(&self, slot: &WorkerSlot) {
        self.lock().workers.retain(|s| s.id != slot.id);
    }

    /// Wait until a connection may be available or `slot` is stopped
    pub(crate) async fn claim(&self, slot: &WorkerSlot) -> Option<Connection> {
        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_claim(slot) {
                Claim::Connection(connection) => return Some(connection),
                Claim::Stop => return None,
                Claim::Empty => {}
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = slot.stop.cancelled() => {}
            }
        }
    }

    /// Number of queued connections, read without taking the lock
    pub fn queue_len(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    /// Number of registered workers
    pub fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }

    /// Snapshot of the pool size
    pub fn stats(&self) -> PoolStats {
        let registry = self.lock();
        PoolStats {
            workers: registry.workers.len(),
            idle: registry.workers.iter().filter(|s| !s.is_busy()).count(),
            queued: registry.connections.len(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub(crate) fn context(&self) -> &WorkerContext {
        &self.shared.context
    }

    /// Ask every worker and the listener to stop
    ///
    /// Connections still waiting in the queue are closed unserved.
    pub fn request_shutdown(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!("Shutdown requested");
        }
        self.shared.shutdown.cancel();

        let unserved = {
            let mut registry = self.lock();
            self.shared.queued.store(0, Ordering::Release);
            std::mem::take(&mut registry.connections)
        };
        if !unserved.is_empty() {
            debug!("Closing {} queued connections", unserved.len());
        }
        drop(unserved);

        self.shared.available.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Token cancelled when shutdown is requested
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Wait for every worker task to finish
    pub async fn join(&self) {
        let mut tasks = std::mem::take(&mut self.lock().tasks);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!("Worker task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: usize, max: usize, tolerance: usize) -> PoolConfig {
        PoolConfig {
            min_workers: min,
            max_workers: max,
            tolerance,
        }
    }

    #[test]
    fn test_within_tolerance_does_nothing() {
        let config = config(4, 32, 4);
        assert_eq!(plan_resize(&config, 0, 4), Resize::None);
        assert_eq!(plan_resize(&config, 8, 4), Resize::None);
        assert_eq!(plan_resize(&config, 4, 8), Resize::None);
        assert_eq!(plan_resize(&config, 0, 8), Resize::Shrink(4));
    }

    #[test]
    fn test_grows_by_difference() {
        let config = config(5, 32, 4);
        assert_eq!(plan_resize(&config, 10, 5), Resize::Grow(5));
        assert_eq!(plan_resize(&config, 9, 5), Resize::None);
    }

    #[test]
    fn test_growth_capped_at_max() {
        let config = config(4, 32, 4);
        assert_eq!(plan_resize(&config, 40, 30), Resize::Grow(2));
        assert_eq!(plan_resize(&config, 40, 32), Resize::None);
    }

    #[test]
    fn test_shrink_never_below_min() {
        let config = config(4, 32, 4);
        assert_eq!(plan_resize(&config, 1, 20), Resize::Shrink(16));
        assert_eq!(plan_resize(&config, 0, 6), Resize::Shrink(2));
        assert_eq!(plan_resize(&config, 0, 4), Resize::None);
    }

    async fn accepted(listener: &tokio::net::TcpListener) -> (TcpStream, Connection) {
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        (client, Connection::new(stream, peer))
    }

    fn idle_pool(tolerance: usize) -> Pool {
        let context = WorkerContext::new(
            crate::server::ChatServer::spawn(),
            Arc::new(crate::config::ServerConfig::new(0)),
        );
        Pool::start(config(0, 32, tolerance), context)
    }

    #[tokio::test]
    async fn test_claims_are_fifo() {
        let pool = idle_pool(10);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_a, first) = accepted(&listener).await;
        let (_b, second) = accepted(&listener).await;
        let (first_peer, second_peer) = (first.peer, second.peer);

        assert_eq!(pool.enqueue(first), Resize::None);
        assert_eq!(pool.enqueue(second), Resize::None);
        assert_eq!(pool.queue_len(), 2);

        let slot = WorkerSlot {
            id: WorkerId(99),
            busy: AtomicBool::new(false),
            stop: pool.shutdown_token().child_token(),
        };
        match pool.try_claim(&slot) {
            Claim::Connection(c) => assert_eq!(c.peer, first_peer),
            other => panic!("unexpected claim {:?}", other),
        }
        assert!(slot.is_busy());
        match pool.try_claim(&slot) {
            Claim::Connection(c) => assert_eq!(c.peer, second_peer),
            other => panic!("unexpected claim {:?}", other),
        }
        assert!(matches!(pool.try_claim(&slot), Claim::Empty));
        assert_eq!(pool.queue_len(), 0);

        pool.release(&slot);
        assert!(!slot.is_busy());
    }

    #[tokio::test]
    async fn test_shutdown_closes_queue_and_refuses_work() {
        let pool = idle_pool(10);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_a, queued) = accepted(&listener).await;
        pool.enqueue(queued);

        pool.request_shutdown();
        assert_eq!(pool.queue_len(), 0);
        assert_eq!(pool.stats().queued, 0);

        let (_b, late) = accepted(&listener).await;
        assert_eq!(pool.enqueue(late), Resize::None);
        assert_eq!(pool.queue_len(), 0);

        let slot = WorkerSlot {
            id: WorkerId(1),
            busy: AtomicBool::new(false),
            stop: pool.shutdown_token().child_token(),
        };
        assert!(matches!(pool.try_claim(&slot), Claim::Stop));
        pool.join().await;
    }

    #[tokio::test]
    async fn test_reaping_counts_failed_workers() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {});
        tasks.spawn(async { panic!("worker crashed") });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(reap_finished(&mut tasks), 1);
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_resize_only_beyond_tolerance_for_all_sizes() {
        let config = config(4, 32, 4);
        for workers in 4..=32 {
            for queued in 0..=40 {
                let plan = plan_resize(&config, queued, workers);
                if queued.abs_diff(workers) <= config.tolerance {
                    assert_eq!(plan, Resize::None);
                }
                let after = match plan {
                    Resize::Grow(n) => workers + n,
                    Resize::Shrink(n) => workers - n,
                    Resize::None => workers,
                };
                assert!((config.min_workers..=config.max_workers).contains(&after));
            }
        }
    }
}
