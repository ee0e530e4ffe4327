use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use serde_json::Value;
use tokio::sync::mpsc;
use crate::physics::mesh::MeshData;

/// Command sent from network handlers (and mesh loaders) to the engine loop.
/// Payloads stay raw JSON; the engine validates them.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    // Player snapshot (only the latest kept per address and claimed id)
    PlayerData {
        addr: SocketAddr,
        data: Value,
    },

    ChatMsg {
        addr: SocketAddr,
        data: Value,
    },

    // Combat
    ApplyDamage {
        addr: SocketAddr,
        data: Value,
    },
    ApplyPropDamage {
        addr: SocketAddr,
        data: Value,
    },

    // A prop mesh finished loading off the tick thread
    PropMeshLoaded {
        prop_id: u64,
        mesh: Arc<MeshData>,
    },
}

/// A snapshot stream: the sending address and the player id its payload claims.
/// Payloads without a readable id still coalesce per address.
type SnapshotKey = (SocketAddr, Option<u64>);

fn snapshot_key(addr: SocketAddr, data: &Value) -> SnapshotKey {
    (addr, data.get("id").and_then(Value::as_u64))
}

/// Drain the queue in arrival order, keeping only the newest `playerData` per
/// snapshot stream. The newest snapshot takes the slot of the first one, so a
/// join still runs before chat or damage sent right after it.
pub fn drain_and_coalesce(rx: &mut mpsc::Receiver<EngineCommand>) -> Vec<EngineCommand> {
    let mut commands: Vec<EngineCommand> = Vec::new();
    let mut snapshot_slots: HashMap<SnapshotKey, usize> = HashMap::new();

    while let Ok(cmd) = rx.try_recv() {
        if let EngineCommand::PlayerData { addr, data } = &cmd {
            let key = snapshot_key(*addr, data);
            if let Some(&slot) = snapshot_slots.get(&key) {
                commands[slot] = cmd;
                continue;
            }
            snapshot_slots.insert(key, commands.len());
        }
        commands.push(cmd);
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[tokio::test]
    async fn test_snapshot_coalescing() {
        let (tx, mut rx) = mpsc::channel(100);
        let addr = test_addr(9000);

        for x in 1..=3 {
            tx.send(EngineCommand::PlayerData {
                addr,
                data: json!({ "position": { "x": x, "y": 0, "z": 0 } }),
            }).await.unwrap();
        }

        let commands = drain_and_coalesce(&mut rx);

        assert_eq!(commands.len(), 1);
        if let EngineCommand::PlayerData { data, .. } = &commands[0] {
            assert_eq!(data["position"]["x"], 3);
        } else {
            panic!("Expected PlayerData");
        }
    }

    #[tokio::test]
    async fn test_mixed_commands_keep_arrival_order() {
        let (tx, mut rx) = mpsc::channel(100);
        let addr = test_addr(9000);

        tx.send(EngineCommand::PlayerData { addr, data: json!({ "id": 1, "seq": 1 }) }).await.unwrap();
        tx.send(EngineCommand::ChatMsg { addr, data: json!({}) }).await.unwrap();
        tx.send(EngineCommand::ApplyDamage { addr, data: json!({}) }).await.unwrap();
        tx.send(EngineCommand::PlayerData { addr, data: json!({ "id": 1, "seq": 2 }) }).await.unwrap();

        let commands = drain_and_coalesce(&mut rx);

        // The newest snapshot sits where the player first spoke
        assert_eq!(commands.len(), 3);
        match &commands[0] {
            EngineCommand::PlayerData { data, .. } => assert_eq!(data["seq"], 2),
            other => panic!("Expected PlayerData, got {:?}", other),
        }
        assert!(matches!(commands[1], EngineCommand::ChatMsg { .. }));
        assert!(matches!(commands[2], EngineCommand::ApplyDamage { .. }));
    }

    #[tokio::test]
    async fn test_claimed_ids_coalesce_separately() {
        let (tx, mut rx) = mpsc::channel(100);
        let addr = test_addr(9000);

        tx.send(EngineCommand::PlayerData { addr, data: json!({ "id": 1, "seq": 1 }) }).await.unwrap();
        tx.send(EngineCommand::PlayerData { addr, data: json!({ "id": 2, "seq": 2 }) }).await.unwrap();
        tx.send(EngineCommand::PlayerData { addr, data: json!({ "id": 1, "seq": 3 }) }).await.unwrap();

        let commands = drain_and_coalesce(&mut rx);

        // A second claimed id cannot overwrite the first id's snapshot
        let seqs: Vec<(u64, u64)> = commands
            .iter()
            .filter_map(|c| match c {
                EngineCommand::PlayerData { data, .. } => Some((data["id"].as_u64()?, data["seq"].as_u64()?)),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![(1, 3), (2, 2)]);
    }

    #[tokio::test]
    async fn test_multiple_connections_keep_own_snapshot() {
        let (tx, mut rx) = mpsc::channel(100);

        tx.send(EngineCommand::PlayerData { addr: test_addr(1), data: json!(1) }).await.unwrap();
        tx.send(EngineCommand::PlayerData { addr: test_addr(2), data: json!(2) }).await.unwrap();
        tx.send(EngineCommand::PlayerData { addr: test_addr(1), data: json!(3) }).await.unwrap();

        let commands = drain_and_coalesce(&mut rx);

        let values: Vec<i64> = commands.iter()
            .filter_map(|c| match c {
                EngineCommand::PlayerData { data, .. } => data.as_i64(),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![3, 2]);
    }
}
