use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use crate::physics::mesh::MeshCache;
use crate::state::commands::{drain_and_coalesce, EngineCommand};
use crate::state::events::Target;
use crate::state::server_state::ServerState;
use crate::tick::engine::GameEngine;
use crate::tick::unix_now;
use crate::utils::buffers::{PacketBuffer, MAX_DATAGRAM_BYTES};
use crate::utils::config::Config;

/// Drive the engine: simulation ticks at the configured rate, cleanup on its
/// own slower timer. The two never overlap since both run on this task.
pub async fn game_loop(
    mut engine: GameEngine,
    mut command_rx: mpsc::Receiver<EngineCommand>,
    socket: Arc<UdpSocket>,
    state: Arc<ServerState>,
    config: Arc<Config>,
) {
    let mut tick_timer = interval(Duration::from_millis(config.tick_interval_ms()));
    let mut cleanup_timer = interval(Duration::from_millis(config.cleanup_interval_ms.max(1)));
    tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    cleanup_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut send_buffer = PacketBuffer::default();

    log::info!(
        "Game loop running: {} Hz, cleanup every {} ms",
        config.tick_rate_hz,
        config.cleanup_interval_ms
    );

    loop {
        tokio::select! {
            _ = tick_timer.tick() => {
                let now = unix_now();
                // Arrival order, newest snapshot per stream
                for cmd in drain_and_coalesce(&mut command_rx) {
                    run_guarded("command handler", || engine.handle_command(cmd, now));
                }
                run_guarded("tick", || engine.tick(now));
            }
            _ = cleanup_timer.tick() => {
                let now = unix_now();
                run_guarded("cleanup", || engine.periodic_cleanup(now));
                state.publish_server_info(engine.server_info().clone()).await;
            }
        }

        flush_outbox(&mut engine, &socket, &mut send_buffer).await;
    }
}

/// Run one pass; a panic is logged and the loop carries on
fn run_guarded(subsystem: &str, pass: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(pass)) {
        log::error!("{} panicked: {}", subsystem, panic_message(panic.as_ref()));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Send every queued event, one JSON datagram each (fire-and-forget)
async fn flush_outbox(engine: &mut GameEngine, socket: &UdpSocket, buffer: &mut PacketBuffer) {
    let outgoing = engine.drain_outbox();
    if outgoing.is_empty() {
        return;
    }
    let clients = engine.client_addrs();

    for item in outgoing {
        let bytes = match buffer.encode(&item.event) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Failed to encode event: {}", e);
                continue;
            }
        };
        if bytes.len() > MAX_DATAGRAM_BYTES {
            log::warn!("Dropping {} byte event: larger than a datagram", bytes.len());
            continue;
        }

        match item.target {
            Target::All => {
                for addr in &clients {
                    if let Err(e) = socket.send_to(bytes, addr).await {
                        log::debug!("Send to {} failed: {}", addr, e);
                    }
                }
            }
            Target::Client(addr) => {
                if let Err(e) = socket.send_to(bytes, addr).await {
                    log::debug!("Send to {} failed: {}", addr, e);
                }
            }
        }
    }
}

/// Load the meshes of props that have none yet; each result is queued back to the engine
pub fn spawn_prop_mesh_loads(engine: &GameEngine, cache: Arc<MeshCache>, command_tx: mpsc::Sender<EngineCommand>) {
    for (prop_id, url) in engine.pending_prop_meshes() {
        let cache = cache.clone();
        let tx = command_tx.clone();
        tokio::spawn(async move {
            match cache.load_async(url.clone()).await {
                Ok(mesh) => {
                    if tx.send(EngineCommand::PropMeshLoaded { prop_id, mesh }).await.is_err() {
                        log::debug!("Engine gone before mesh {} arrived", url);
                    }
                }
                Err(e) => log::warn!("Failed to load mesh {} for prop {}: {}", url, prop_id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_pass_survives_panic() {
        let mut ran_after = false;
        run_guarded("test", || panic!("boom"));
        run_guarded("test", || ran_after = true);
        assert!(ran_after);
    }

    #[test]
    fn test_panic_message() {
        let panic = catch_unwind(|| panic!("bad {}", 1)).unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "bad 1");
        let panic = catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "static");
    }
}
