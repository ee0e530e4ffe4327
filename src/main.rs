use std::path::Path;
use std::sync::Arc;
use arenaserver::domain::map::{map_mesh_path, MapData};
use arenaserver::peers::directory::PeerDirectory;
use arenaserver::peers::sync::spawn_peer_sync;
use arenaserver::physics::mesh::{load_mesh, MeshCache};
use arenaserver::physics::PhysicsBridge;
use arenaserver::server;
use arenaserver::state::server_state::ServerState;
use arenaserver::tick::engine::GameEngine;
use arenaserver::tick::game_loop::spawn_prop_mesh_loads;
use arenaserver::tick::unix_now;
use arenaserver::utils::config::Config;
use arenaserver::utils::itemdb::ItemDb;

const ENV_FILE: &str = ".env";
const LOG_FILE: &str = "arenaserver.log";
const COMMAND_QUEUE_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::load(ENV_FILE)?);
    setup_logging(&config.log_level)?;
    log::info!("Configuration loaded from {}", ENV_FILE);

    let version = read_game_version(&config.game_version_file);
    log::info!("Game version {}", version);

    let map = match MapData::load(&config.asset_root, &config.default_map) {
        Ok(map) => Arc::new(map),
        Err(e) => {
            log::error!("Failed to load map {}: {}", config.default_map, e);
            return Err(e.into());
        }
    };

    let mut physics = PhysicsBridge::new();
    let mesh_path = map_mesh_path(&config.asset_root, &config.default_map);
    match load_mesh(&mesh_path) {
        Ok(mesh) => {
            if let Err(e) = physics.add_static_mesh(&mesh) {
                log::warn!("Static map mesh unusable: {}", e);
            }
        }
        Err(e) => log::warn!("No static collision from {}: {}", mesh_path.display(), e),
    }

    // Immutable globals, shared by Arc
    let item_db = Arc::new(ItemDb::load());
    let engine = GameEngine::new(config.clone(), map, item_db, physics, version, unix_now());

    let (command_tx, command_rx) = tokio::sync::mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let peers = Arc::new(PeerDirectory::new(config.clone()));
    let state = Arc::new(ServerState::new(command_tx.clone(), engine.server_info().clone(), peers.clone()));

    let udp_addr = format!("{}:{}", config.hostname, config.port);
    let udp_socket = match tokio::net::UdpSocket::bind(&udp_addr).await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            log::error!("Failed to bind UDP socket to {}: {}", udp_addr, e);
            return Err(e.into());
        }
    };
    log::info!("UDP events on {}", udp_addr);

    let mesh_cache = Arc::new(MeshCache::new(&config.asset_root));
    spawn_prop_mesh_loads(&engine, mesh_cache, command_tx);
    server::spawn_game_loop(engine, command_rx, udp_socket.clone(), state.clone(), config.clone());
    spawn_peer_sync(peers, config.clone());

    server::start_servers(state, config, udp_socket).await
}

fn setup_logging(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = level.parse::<log::LevelFilter>().unwrap_or(log::LevelFilter::Info);
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Utc::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .chain(fern::log_file(LOG_FILE)?)
        .apply()?;
    Ok(())
}

/// Protocol version from `{"version": "..."}`; clients must match it exactly
fn read_game_version(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|contents| serde_json::from_str::<serde_json::Value>(&contents).map_err(|e| e.to_string()))
        .and_then(|json| {
            json.get("version")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| "missing \"version\"".to_string())
        });
    match parsed {
        Ok(version) => version,
        Err(e) => {
            log::warn!("Could not read game version from {}: {}", path.display(), e);
            "unknown".to_string()
        }
    }
}
