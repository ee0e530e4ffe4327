use log::info;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use crate::handlers::{handle_udp_packet, router, AppState};
use crate::state::commands::EngineCommand;
use crate::state::server_state::ServerState;
use crate::tick::engine::GameEngine;
use crate::tick::game_loop::game_loop;
use crate::utils::buffers::MAX_DATAGRAM_BYTES;
use crate::utils::config::Config;

/// Start HTTP and UDP servers
pub async fn start_servers(
    state: Arc<ServerState>,
    config: Arc<Config>,
    udp_socket: Arc<UdpSocket>,
) -> Result<(), Box<dyn std::error::Error>> {
    let http_server = init_http_server(state.clone(), config.clone()).await?;
    let udp_server = init_udp_server(state.clone(), udp_socket.clone());

    tokio::try_join!(http_server, udp_server)?;
    Ok(())
}

/// Bind and serve the REST surface; failing to bind is fatal
async fn init_http_server(
    state: Arc<ServerState>,
    config: Arc<Config>,
) -> Result<tokio::task::JoinHandle<()>, Box<dyn std::error::Error>> {
    let app = router(AppState { state });

    let http_addr = format!("{}:{}", config.hostname, config.port);
    let listener = TcpListener::bind(&http_addr).await.map_err(|e| {
        log::error!("Failed to bind HTTP server to {}: {}", http_addr, e);
        e
    })?;
    info!("HTTP server listening on {}", http_addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("HTTP server error: {}", e);
        }
    }))
}

/// Receive event datagrams; replies that need no engine state go straight back
fn init_udp_server(state: Arc<ServerState>, socket: Arc<UdpSocket>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    let Some(reply) = handle_udp_packet(&buf[..len], addr, &state) else {
                        continue;
                    };
                    match serde_json::to_vec(&reply) {
                        Ok(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, addr).await {
                                log::debug!("Reply to {} failed: {}", addr, e);
                            }
                        }
                        Err(e) => log::error!("Failed to encode reply: {}", e),
                    }
                }
                Err(e) => {
                    log::error!("UDP recv error: {}", e);
                }
            }
        }
    })
}

/// Spawn the task that owns the engine
pub fn spawn_game_loop(
    engine: GameEngine,
    command_rx: mpsc::Receiver<EngineCommand>,
    socket: Arc<UdpSocket>,
    state: Arc<ServerState>,
    config: Arc<Config>,
) -> tokio::task::JoinHandle<()> {
    info!("Starting {} game loop", engine.gamemode_name());
    tokio::spawn(game_loop(engine, command_rx, socket, state, config))
}
