use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use crate::peers::directory::PeerDirectory;
use crate::state::commands::EngineCommand;
use crate::state::server_info::ServerInfo;

/// State shared by the HTTP and UDP handlers.
/// Game state itself lives only inside the engine task; handlers reach it
/// through the command queue.
pub struct ServerState {
    command_tx: mpsc::Sender<EngineCommand>,
    server_info: RwLock<ServerInfo>,
    pub peers: Arc<PeerDirectory>,
}

impl ServerState {
    pub fn new(command_tx: mpsc::Sender<EngineCommand>, server_info: ServerInfo, peers: Arc<PeerDirectory>) -> Self {
        Self {
            command_tx,
            server_info: RwLock::new(server_info),
            peers,
        }
    }

    /// Non-blocking enqueue; returns false when the queue is full or closed
    pub fn try_send(&self, cmd: EngineCommand) -> bool {
        self.command_tx.try_send(cmd).is_ok()
    }

    pub fn command_tx(&self) -> mpsc::Sender<EngineCommand> {
        self.command_tx.clone()
    }

    pub async fn server_info(&self) -> ServerInfo {
        self.server_info.read().await.clone()
    }

    /// Replace the published snapshot (called by the engine loop on the cleanup cadence)
    pub async fn publish_server_info(&self, info: ServerInfo) {
        *self.server_info.write().await = info;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::Config;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_server_info() {
        let (tx, _rx) = mpsc::channel(4);
        let config = Arc::new(Config::default());
        let peers = Arc::new(PeerDirectory::new(config.clone()));
        let state = ServerState::new(tx, ServerInfo::from_config(&config, "1"), peers);

        let mut info = state.server_info().await;
        info.current_players = 3;
        state.publish_server_info(info).await;
        assert_eq!(state.server_info().await.current_players, 3);
    }

    #[tokio::test]
    async fn test_try_send_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let config = Arc::new(Config::default());
        let peers = Arc::new(PeerDirectory::new(config.clone()));
        let state = ServerState::new(tx, ServerInfo::from_config(&config, "1"), peers);
        let addr = "127.0.0.1:1".parse().unwrap();

        assert!(state.try_send(EngineCommand::ChatMsg { addr, data: json!({}) }));
        assert!(!state.try_send(EngineCommand::ChatMsg { addr, data: json!({}) }));
    }
}
