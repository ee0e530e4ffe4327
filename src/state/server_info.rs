use serde::{Deserialize, Serialize};
use crate::utils::config::Config;

/// Status snapshot served on `/api/getInfo` and broadcast as `serverInfo`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub max_players: usize,
    pub current_players: usize,
    pub map_name: String,
    pub tick_rate: u32,
    pub version: String,
    pub game_mode: String,
    #[serde(default = "default_sky_color")]
    pub sky_color: String,
    /// Windowed simulation tick cost in milliseconds
    #[serde(default)]
    pub tick_compute_time: f64,
    /// Windowed cleanup pass cost in milliseconds
    #[serde(default)]
    pub cleanup_compute_time: f64,
    /// Resident memory in bytes, when the platform reports it
    #[serde(default)]
    pub memory_usage: Option<u64>,
}

fn default_sky_color() -> String {
    "#000000".to_string()
}

impl ServerInfo {
    pub fn from_config(config: &Config, version: impl Into<String>) -> Self {
        Self {
            name: config.server_name.clone(),
            max_players: config.max_players,
            current_players: 0,
            map_name: config.default_map.clone(),
            tick_rate: config.tick_rate_hz,
            version: version.into(),
            game_mode: config.game_mode.clone(),
            sky_color: default_sky_color(),
            tick_compute_time: 0.0,
            cleanup_compute_time: 0.0,
            memory_usage: None,
        }
    }
}

/// Resident set size of this process, read from procfs where available
pub fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_from_config() {
        let info = ServerInfo::from_config(&Config::default(), "1.2.3");
        assert_eq!(info.name, "my-server");
        assert_eq!(info.tick_rate, 15);
        assert_eq!(info.version, "1.2.3");

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["gameMode"], "ffa");
        assert_eq!(json["skyColor"], "#000000");
    }

    #[test]
    fn test_server_info_parses_minimal_peer_payload() {
        let info: ServerInfo = serde_json::from_str(
            r#"{"name":"peer","maxPlayers":10,"currentPlayers":2,"mapName":"m","tickRate":15,"version":"1","gameMode":"ffa"}"#,
        )
        .unwrap();
        assert_eq!(info.current_players, 2);
        assert_eq!(info.sky_color, "#000000");
    }
}
