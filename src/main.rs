//! Chatroom Relay - Entry Point
//!
//! Starts the ChatServer actor, the worker pool and the TCP listener,
//! then waits for every worker to finish after shutdown.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chatroom_relay::{listener, ChatServer, Pool, PoolConfig, ServerConfig, WorkerContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chatroom_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chatroom_relay=info")),
        )
        .init();

    // A missing port is not an error: print usage and exit cleanly
    let Some(port_arg) = env::args().nth(1) else {
        println!("Server usage: chatroom_relay PORT");
        return Ok(());
    };
    let server = Arc::new(ServerConfig::from_port_arg(&port_arg)?);

    let tcp = listener::bind(
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, server.port)),
        server.backlog,
    )?;

    info!("Preparing worker pool");
    let chat = ChatServer::spawn();
    let pool = Pool::start(
        PoolConfig::default(),
        WorkerContext::new(chat, Arc::clone(&server)),
    );

    let signal_pool = pool.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Server received CTRL-C, stopping all workers");
            signal_pool.request_shutdown();
        }
    });

    info!("Server is ready on port {}", server.port);
    listener::run(tcp, pool.clone()).await;

    pool.join().await;
    info!("All workers finished");

    Ok(())
}
