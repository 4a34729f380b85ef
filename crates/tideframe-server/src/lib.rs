//! The tideframe conversation server.
//!
//! The protocol engine behind a real-time, multi-user conversation
//! service: wire framing, per-connection sessions, a dispatcher over the
//! command registry, the in-memory user/group graph with ACLs,
//! properties and rosters, and async write-through storage over SQLite.
//!
//! Architecture: transports pump bytes into one event queue; a single
//! server task owns every session and all graph state and processes
//! events in order. Blocking work (SQL, DNS) runs on worker pools and
//! rejoins the loop as completed futures.

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod rdns;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;

pub use config::Config;
pub use dispatcher::{Command, CommandFailure, HandlerResult, Registry};
pub use events::ServerEvent;
pub use server::{Server, TargetRef};
pub use session::{Session, SessionKind, TimerName};

use tokio::sync::mpsc;

/// Bind the configured listeners and run the server until shutdown.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let factory = storage::factory_for(
        &config.storage_backend,
        &config.storage_path,
        config.migrations_path.as_deref(),
    )?;
    let storage = storage::AsyncStorage::new(factory);
    let sink = storage::spawn_persister(storage.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    transport::spawn_listeners(&config, events_tx.clone()).await?;

    let server = Server::new(config, storage, sink, events_tx);
    server.run(events_rx).await;
    Ok(())
}
