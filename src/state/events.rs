use std::net::SocketAddr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::peers::directory::PeerListing;
use crate::state::server_info::ServerInfo;
use crate::state::vector::Vector3;
use crate::state::world_item::WorldItem;

/// Chat line, both inbound (`chatMsg` from a client) and outbound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub id: i64,
    pub name: String,
    pub message: String,
}

impl ChatMessage {
    /// Server-authored line (id -1, no name)
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            id: -1,
            name: String::new(),
            message: message.into(),
        }
    }
}

/// One particle burst for clients to render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticleEmitter {
    pub position: Vector3,
    pub count: u32,
    pub velocity: Vector3,
    pub spread: f32,
    pub lifetime: f32,
    pub size: f32,
    /// 0xRRGGBB
    pub color: u32,
}

/// Events the server sends over a client's channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    ServerInfo(ServerInfo),
    ChatMsg(ChatMessage),
    RemotePlayerData(Vec<Value>),
    RemotePlayerDelta(Vec<Value>),
    WorldItemData(Vec<WorldItem>),
    PropData(Vec<Value>),
    PropDelta(Vec<Value>),
    ParticleEmit(ParticleEmitter),
    LatencyTest,
    ServerList(Vec<PeerListing>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Client(SocketAddr),
}

#[derive(Debug, Clone)]
pub struct Outgoing {
    pub target: Target,
    pub event: ServerEvent,
}

/// Events produced during a tick or handler, flushed by the loop driver
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Outgoing>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcast(&mut self, event: ServerEvent) {
        self.queue.push(Outgoing { target: Target::All, event });
    }

    pub fn whisper(&mut self, addr: SocketAddr, event: ServerEvent) {
        self.queue.push(Outgoing { target: Target::Client(addr), event });
    }

    pub fn broadcast_chat(&mut self, message: impl Into<String>) {
        self.broadcast(ServerEvent::ChatMsg(ChatMessage::system(message)));
    }

    pub fn whisper_chat(&mut self, addr: SocketAddr, message: impl Into<String>) {
        self.whisper(addr, ServerEvent::ChatMsg(ChatMessage::system(message)));
    }

    pub fn emit_particles(&mut self, emitter: ParticleEmitter) {
        self.broadcast(ServerEvent::ParticleEmit(emitter));
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Outgoing> {
        self.queue.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outgoing> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_shape() {
        let json = serde_json::to_value(ServerEvent::ChatMsg(ChatMessage::system("hi"))).unwrap();
        assert_eq!(json["event"], "chatMsg");
        assert_eq!(json["data"]["id"], -1);
        assert_eq!(json["data"]["name"], "");

        let json = serde_json::to_value(ServerEvent::LatencyTest).unwrap();
        assert_eq!(json["event"], "latencyTest");
    }

    #[test]
    fn test_outbox_drain() {
        let mut outbox = Outbox::new();
        outbox.broadcast_chat("a");
        outbox.whisper_chat("127.0.0.1:9000".parse().unwrap(), "b");
        assert_eq!(outbox.len(), 2);

        let drained: Vec<Outgoing> = outbox.drain().collect();
        assert_eq!(drained[0].target, Target::All);
        assert!(matches!(drained[1].target, Target::Client(_)));
        assert!(outbox.is_empty());
    }
}
