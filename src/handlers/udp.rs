use std::net::SocketAddr;
use crate::handlers::models::ClientEnvelope;
use crate::state::commands::EngineCommand;
use crate::state::events::ServerEvent;
use crate::state::server_state::ServerState;

/// Thin datagram handler: no game state is touched here.
/// Game events are queued for the engine; `latencyTest` and `getServerList`
/// are answered directly through the returned reply.
pub fn handle_udp_packet(bytes: &[u8], addr: SocketAddr, state: &ServerState) -> Option<ServerEvent> {
    let envelope: ClientEnvelope = match serde_json::from_slice(bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            log::debug!("Malformed datagram from {}: {}", addr, e);
            return None;
        }
    };

    match envelope.event.as_str() {
        "latencyTest" => return Some(ServerEvent::LatencyTest),
        "getServerList" => return Some(ServerEvent::ServerList(state.peers.listings())),
        _ => {}
    }

    let cmd = parse_command(envelope, addr)?;

    // Non-blocking send - drop if queue is full
    if !state.try_send(cmd) {
        log::debug!("Command queue full, dropping packet from {}", addr);
    }
    None
}

/// Map an envelope to an engine command; payloads stay raw for the engine to validate
fn parse_command(envelope: ClientEnvelope, addr: SocketAddr) -> Option<EngineCommand> {
    let data = envelope.data;
    let cmd = match envelope.event.as_str() {
        "playerData" => EngineCommand::PlayerData { addr, data },
        "chatMsg" => EngineCommand::ChatMsg { addr, data },
        "applyDamage" => EngineCommand::ApplyDamage { addr, data },
        "applyPropDamage" => EngineCommand::ApplyPropDamage { addr, data },
        other => {
            log::debug!("Unknown event {:?} from {}", other, addr);
            return None;
        }
    };
    Some(cmd)
}
