use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Keys honoured from the `.env` file and the process environment.
pub const KNOWN_KEYS: &[&str] = &[
    "PORT",
    "SERVER_HOSTNAME",
    "SERVER_NAME",
    "SERVER_URL",
    "SERVER_DEFAULT_MAP",
    "SERVER_TICK_RATE",
    "SERVER_CLEANUP_INTERVAL",
    "FULL_PLAYER_EMIT_INTERVAL",
    "FULL_PROP_EMIT_INTERVAL",
    "ASSET_ROOT",
    "GAME_VERSION_FILE",
    "LOG_LEVEL",
    "PEER_UPDATE_TICK_INTERVAL",
    "PEER_SHARE_INTERVAL",
    "PEER_MAX_FAILED_ATTEMPTS",
    "PEER_STALE_THRESHOLD",
    "PEER_MAX_SERVERS",
    "PEER_HEALTHCHECK_RETRIES",
    "PEER_HEALTHCHECK_INTERVAL",
    "PEER_URL_FAILURE_FORGET_TIME",
    "PEER_VERIFIED_DOMAINS",
    "PLAYER_DISCONNECT_TIME",
    "PLAYER_AFK_KICK_TIME",
    "PLAYER_MAX_HEALTH",
    "PLAYER_BASE_INVENTORY",
    "GAME_MODE",
    "GAME_MAX_PLAYERS",
    "RESPAWN_DELAY",
    "POINTS_TO_WIN",
    "POINTS_TO_EVENT",
    "MIN_PLAYERS_TO_START",
    "TEAM_SCORE_LEAD_TO_WIN",
    "HEALTH_REGEN_DELAY",
    "HEALTH_REGEN_RATE",
    "MAX_ITEMS_IN_WORLD",
    "ITEM_RESPAWN_TIME",
    "ITEM_DESPAWN_TIME",
    "DURABILITY_DECAY_BY_AGE",
    "DURABILITY_DECAY_BY_SHOTS",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server configuration - immutable after load, shared as `Arc<Config>`
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub hostname: String,
    pub server_name: String,
    pub server_url: String,
    pub default_map: String,
    pub tick_rate_hz: u32,
    pub cleanup_interval_ms: u64,
    pub full_player_emit_interval_ms: u64,
    pub full_prop_emit_interval_ms: u64,
    pub asset_root: String,
    pub game_version_file: String,
    pub log_level: String,

    pub peer_update_interval_secs: u64,
    pub peer_share_interval_secs: u64,
    pub peer_max_failed_attempts: u32,
    pub peer_stale_threshold_secs: u64,
    pub peer_max_servers: usize,
    pub peer_healthcheck_retries: u32,
    pub peer_healthcheck_interval_secs: u64,
    pub peer_url_failure_forget_secs: u64,
    pub peer_verified_domains: Vec<String>,

    pub player_disconnect_secs: f64,
    pub player_afk_kick_secs: f64,
    pub player_max_health: f32,
    pub player_base_inventory: Vec<u32>,

    pub game_mode: String,
    pub max_players: usize,
    pub respawn_delay_secs: f64,
    pub points_to_win: u32,
    pub points_to_event: u32,
    pub min_players_to_start: usize,
    pub team_score_lead_to_win: u32,

    pub health_regen_delay_secs: f64,
    pub health_regen_rate: f32,

    pub max_items_in_world: usize,
    pub item_respawn_secs: f64,
    pub item_despawn_secs: f64,
    pub durability_decay_by_age: bool,
    pub durability_decay_by_shots: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            hostname: "0.0.0.0".to_string(),
            server_name: "my-server".to_string(),
            server_url: "https://example.com".to_string(),
            default_map: "crackhouse_1".to_string(),
            tick_rate_hz: 15,
            cleanup_interval_ms: 1000,
            full_player_emit_interval_ms: 5000,
            full_prop_emit_interval_ms: 5000,
            asset_root: "dist".to_string(),
            game_version_file: "public/gameVersion.json".to_string(),
            log_level: "info".to_string(),

            peer_update_interval_secs: 1,
            peer_share_interval_secs: 300,
            peer_max_failed_attempts: 5,
            peer_stale_threshold_secs: 120,
            peer_max_servers: 200,
            peer_healthcheck_retries: 10,
            peer_healthcheck_interval_secs: 30,
            peer_url_failure_forget_secs: 7200,
            peer_verified_domains: vec!["candiru.xyz".to_string()],

            player_disconnect_secs: 10.0,
            player_afk_kick_secs: 600.0,
            player_max_health: 100.0,
            player_base_inventory: Vec::new(),

            game_mode: "ffa".to_string(),
            max_players: 20,
            respawn_delay_secs: 10.0,
            points_to_win: 100,
            points_to_event: 30,
            min_players_to_start: 2,
            team_score_lead_to_win: 10,

            health_regen_delay_secs: 6.0,
            health_regen_rate: 5.0,

            max_items_in_world: 14,
            item_respawn_secs: 5.0,
            item_despawn_secs: 300.0,
            durability_decay_by_age: true,
            durability_decay_by_shots: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults, overlay the `.env` file, then the process environment,
    /// and persist the effective values back to `env_path`.
    pub fn load(env_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let env_path = env_path.as_ref();
        let mut vars = HashMap::new();

        if env_path.exists() {
            let contents = std::fs::read_to_string(env_path)?;
            vars.extend(parse_env_file(&contents));
        }

        for (key, value) in std::env::vars() {
            if KNOWN_KEYS.contains(&key.as_str()) {
                vars.insert(key, value);
            }
        }

        let config = Self::from_vars(&vars)?;
        std::fs::write(env_path, config.to_env_file())?;
        log::info!("Loaded configuration, effective values written to {}", env_path.display());
        Ok(config)
    }

    /// Build a config from raw key/value pairs; missing keys keep their defaults.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            port: read(vars, "PORT", d.port)?,
            hostname: read_string(vars, "SERVER_HOSTNAME", d.hostname),
            server_name: read_string(vars, "SERVER_NAME", d.server_name),
            server_url: read_string(vars, "SERVER_URL", d.server_url),
            default_map: read_string(vars, "SERVER_DEFAULT_MAP", d.default_map),
            tick_rate_hz: read_positive(vars, "SERVER_TICK_RATE", d.tick_rate_hz)?,
            cleanup_interval_ms: read_positive(vars, "SERVER_CLEANUP_INTERVAL", d.cleanup_interval_ms)?,
            full_player_emit_interval_ms: read(vars, "FULL_PLAYER_EMIT_INTERVAL", d.full_player_emit_interval_ms)?,
            full_prop_emit_interval_ms: read(vars, "FULL_PROP_EMIT_INTERVAL", d.full_prop_emit_interval_ms)?,
            asset_root: read_string(vars, "ASSET_ROOT", d.asset_root),
            game_version_file: read_string(vars, "GAME_VERSION_FILE", d.game_version_file),
            log_level: read_string(vars, "LOG_LEVEL", d.log_level),

            peer_update_interval_secs: read_positive(vars, "PEER_UPDATE_TICK_INTERVAL", d.peer_update_interval_secs)?,
            peer_share_interval_secs: read(vars, "PEER_SHARE_INTERVAL", d.peer_share_interval_secs)?,
            peer_max_failed_attempts: read(vars, "PEER_MAX_FAILED_ATTEMPTS", d.peer_max_failed_attempts)?,
            peer_stale_threshold_secs: read(vars, "PEER_STALE_THRESHOLD", d.peer_stale_threshold_secs)?,
            peer_max_servers: read(vars, "PEER_MAX_SERVERS", d.peer_max_servers)?,
            peer_healthcheck_retries: read(vars, "PEER_HEALTHCHECK_RETRIES", d.peer_healthcheck_retries)?,
            peer_healthcheck_interval_secs: read(vars, "PEER_HEALTHCHECK_INTERVAL", d.peer_healthcheck_interval_secs)?,
            peer_url_failure_forget_secs: read(vars, "PEER_URL_FAILURE_FORGET_TIME", d.peer_url_failure_forget_secs)?,
            peer_verified_domains: read_list(vars, "PEER_VERIFIED_DOMAINS", d.peer_verified_domains)?,

            player_disconnect_secs: read(vars, "PLAYER_DISCONNECT_TIME", d.player_disconnect_secs)?,
            player_afk_kick_secs: read(vars, "PLAYER_AFK_KICK_TIME", d.player_afk_kick_secs)?,
            player_max_health: read_positive(vars, "PLAYER_MAX_HEALTH", d.player_max_health)?,
            player_base_inventory: read_list(vars, "PLAYER_BASE_INVENTORY", d.player_base_inventory)?,

            game_mode: read_string(vars, "GAME_MODE", d.game_mode).to_lowercase(),
            max_players: read(vars, "GAME_MAX_PLAYERS", d.max_players)?,
            respawn_delay_secs: read(vars, "RESPAWN_DELAY", d.respawn_delay_secs)?,
            points_to_win: read(vars, "POINTS_TO_WIN", d.points_to_win)?,
            points_to_event: read(vars, "POINTS_TO_EVENT", d.points_to_event)?,
            min_players_to_start: read(vars, "MIN_PLAYERS_TO_START", d.min_players_to_start)?,
            team_score_lead_to_win: read(vars, "TEAM_SCORE_LEAD_TO_WIN", d.team_score_lead_to_win)?,

            health_regen_delay_secs: read(vars, "HEALTH_REGEN_DELAY", d.health_regen_delay_secs)?,
            health_regen_rate: read(vars, "HEALTH_REGEN_RATE", d.health_regen_rate)?,

            max_items_in_world: read(vars, "MAX_ITEMS_IN_WORLD", d.max_items_in_world)?,
            item_respawn_secs: read(vars, "ITEM_RESPAWN_TIME", d.item_respawn_secs)?,
            item_despawn_secs: read(vars, "ITEM_DESPAWN_TIME", d.item_despawn_secs)?,
            durability_decay_by_age: read(vars, "DURABILITY_DECAY_BY_AGE", d.durability_decay_by_age)?,
            durability_decay_by_shots: read(vars, "DURABILITY_DECAY_BY_SHOTS", d.durability_decay_by_shots)?,
        })
    }

    /// Render the effective configuration as `.env` lines.
    pub fn to_env_file(&self) -> String {
        let join = |items: &[String]| items.join(",");
        let inventory: Vec<String> = self.player_base_inventory.iter().map(|id| id.to_string()).collect();

        let pairs: Vec<(&str, String)> = vec![
            ("PORT", self.port.to_string()),
            ("SERVER_HOSTNAME", self.hostname.clone()),
            ("SERVER_NAME", self.server_name.clone()),
            ("SERVER_URL", self.server_url.clone()),
            ("SERVER_DEFAULT_MAP", self.default_map.clone()),
            ("SERVER_TICK_RATE", self.tick_rate_hz.to_string()),
            ("SERVER_CLEANUP_INTERVAL", self.cleanup_interval_ms.to_string()),
            ("FULL_PLAYER_EMIT_INTERVAL", self.full_player_emit_interval_ms.to_string()),
            ("FULL_PROP_EMIT_INTERVAL", self.full_prop_emit_interval_ms.to_string()),
            ("ASSET_ROOT", self.asset_root.clone()),
            ("GAME_VERSION_FILE", self.game_version_file.clone()),
            ("LOG_LEVEL", self.log_level.clone()),
            ("PEER_UPDATE_TICK_INTERVAL", self.peer_update_interval_secs.to_string()),
            ("PEER_SHARE_INTERVAL", self.peer_share_interval_secs.to_string()),
            ("PEER_MAX_FAILED_ATTEMPTS", self.peer_max_failed_attempts.to_string()),
            ("PEER_STALE_THRESHOLD", self.peer_stale_threshold_secs.to_string()),
            ("PEER_MAX_SERVERS", self.peer_max_servers.to_string()),
            ("PEER_HEALTHCHECK_RETRIES", self.peer_healthcheck_retries.to_string()),
            ("PEER_HEALTHCHECK_INTERVAL", self.peer_healthcheck_interval_secs.to_string()),
            ("PEER_URL_FAILURE_FORGET_TIME", self.peer_url_failure_forget_secs.to_string()),
            ("PEER_VERIFIED_DOMAINS", join(&self.peer_verified_domains)),
            ("PLAYER_DISCONNECT_TIME", self.player_disconnect_secs.to_string()),
            ("PLAYER_AFK_KICK_TIME", self.player_afk_kick_secs.to_string()),
            ("PLAYER_MAX_HEALTH", self.player_max_health.to_string()),
            ("PLAYER_BASE_INVENTORY", join(&inventory)),
            ("GAME_MODE", self.game_mode.clone()),
            ("GAME_MAX_PLAYERS", self.max_players.to_string()),
            ("RESPAWN_DELAY", self.respawn_delay_secs.to_string()),
            ("POINTS_TO_WIN", self.points_to_win.to_string()),
            ("POINTS_TO_EVENT", self.points_to_event.to_string()),
            ("MIN_PLAYERS_TO_START", self.min_players_to_start.to_string()),
            ("TEAM_SCORE_LEAD_TO_WIN", self.team_score_lead_to_win.to_string()),
            ("HEALTH_REGEN_DELAY", self.health_regen_delay_secs.to_string()),
            ("HEALTH_REGEN_RATE", self.health_regen_rate.to_string()),
            ("MAX_ITEMS_IN_WORLD", self.max_items_in_world.to_string()),
            ("ITEM_RESPAWN_TIME", self.item_respawn_secs.to_string()),
            ("ITEM_DESPAWN_TIME", self.item_despawn_secs.to_string()),
            ("DURABILITY_DECAY_BY_AGE", self.durability_decay_by_age.to_string()),
            ("DURABILITY_DECAY_BY_SHOTS", self.durability_decay_by_shots.to_string()),
        ];

        pairs
            .into_iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }

    pub fn tick_interval_ms(&self) -> u64 {
        1000 / self.tick_rate_hz.max(1) as u64
    }

    pub fn tick_interval_secs(&self) -> f64 {
        1.0 / self.tick_rate_hz.max(1) as f64
    }

    pub fn full_player_emit_interval_secs(&self) -> f64 {
        self.full_player_emit_interval_ms as f64 / 1000.0
    }

    pub fn full_prop_emit_interval_secs(&self) -> f64 {
        self.full_prop_emit_interval_ms as f64 / 1000.0
    }
}

/// Parse `KEY=value` lines, skipping comments and keys we do not know.
pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), unquote(value.trim()).to_string()))
        .filter(|(key, _)| KNOWN_KEYS.contains(&key.as_str()))
        .collect()
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn read<T: FromStr>(vars: &HashMap<String, String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

fn read_positive<T: FromStr + PartialOrd + Default>(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = read(vars, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: vars.get(key).cloned().unwrap_or_default(),
        });
    }
    Ok(value)
}

fn read_string(vars: &HashMap<String, String>, key: &'static str, default: String) -> String {
    vars.get(key).cloned().unwrap_or(default)
}

fn read_list<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: Vec<T>,
) -> Result<Vec<T>, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse().map_err(|_| ConfigError::InvalidValue {
                key,
                value: raw.clone(),
            })
        })
        .collect()
}
