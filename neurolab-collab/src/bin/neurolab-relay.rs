//! Room relay for collaborative circuit editing.
//!
//! Usage: `neurolab-relay [config.json]`. `NEUROLAB_RELAY_ADDR` overrides
//! the bind address; `RUST_LOG` sets the log level.

use neurolab_collab::{CollabConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => CollabConfig::load(&path)?,
        None => CollabConfig::default(),
    };
    if let Ok(addr) = std::env::var("NEUROLAB_RELAY_ADDR") {
        config.server.bind_addr = addr;
    }

    log::info!(
        "Starting relay on {} (max {} peers per room)",
        config.server.bind_addr,
        config.server.max_peers_per_room
    );
    SyncServer::new(config.server).run().await
}
