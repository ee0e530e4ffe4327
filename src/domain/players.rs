use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use serde_json::Value;
use crate::domain::map::MapData;
use crate::domain::validator::{self, ValidationErrors};
use crate::state::player::{InventoryItem, Player, PlayerExtras, NOT_SPECTATING};
use crate::state::vector::Vector3;
use crate::state::world_item::WorldItem;
use crate::utils::config::Config;
use crate::utils::itemdb::{ItemData, ItemDb};

#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    #[error("invalid player data: {0}")]
    Invalid(#[from] ValidationErrors),

    #[error("server is full")]
    ServerFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub player_id: u64,
    pub is_new: bool,
}

/// Canonical store of connected players and their private extras
pub struct PlayerManager {
    players: BTreeMap<u64, Player>,
    extras: HashMap<u64, PlayerExtras>,
    config: Arc<Config>,
    map: Arc<MapData>,
    items: Arc<ItemDb>,
    server_version: String,
}

impl PlayerManager {
    pub fn new(config: Arc<Config>, map: Arc<MapData>, items: Arc<ItemDb>, server_version: impl Into<String>) -> Self {
        Self {
            players: BTreeMap::new(),
            extras: HashMap::new(),
            config,
            map,
            items,
            server_version: server_version.into(),
        }
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Validate a client snapshot and merge it into the store.
    ///
    /// Existing players only get their client-controlled fields updated.
    /// While a forced correction is pending and unacknowledged the snapshot
    /// is ignored apart from refreshing the liveness timestamp.
    pub fn upsert(&mut self, raw: &Value, now: f64) -> Result<UpsertOutcome, UpsertError> {
        let incoming = validator::validate_player_data(raw, &self.server_version)?;
        let id = incoming.id;

        if let Some(existing) = self.players.get_mut(&id) {
            existing.update_timestamp = Some(now);

            if existing.forced && !incoming.forced_acknowledged {
                return Ok(UpsertOutcome { player_id: id, is_new: false });
            }
            if existing.forced {
                existing.forced = false;
                log::debug!("{}({}) acknowledged forced update", existing.name, id);
            }

            if existing.position != incoming.position {
                if let Some(extras) = self.extras.get_mut(&id) {
                    extras.last_moved_time = now;
                }
            }

            existing.position = incoming.position;
            existing.velocity = incoming.velocity;
            existing.input_velocity = incoming.input_velocity;
            existing.gravity = incoming.gravity;
            existing.quaternion = incoming.quaternion;
            existing.look_quaternion = incoming.look_quaternion;
            existing.chat_active = incoming.chat_active;
            existing.chat_msg = sanitize_chat(&incoming.chat_msg);
            existing.latency = incoming.latency;
            existing.held_item_index = incoming.held_item_index;
            existing.forced_acknowledged = incoming.forced_acknowledged;

            return Ok(UpsertOutcome { player_id: id, is_new: false });
        }

        if self.players.len() >= self.config.max_players {
            return Err(UpsertError::ServerFull);
        }

        let mut player = incoming;
        player.name = sanitize_name(&player.name, id);
        player.chat_msg = sanitize_chat(&player.chat_msg);
        player.inventory = self.base_inventory(now);
        player.held_item_index = 0;
        player.health = self.config.player_max_health;
        player.protection = 1.0;
        player.last_damage_time = None;
        player.id_last_damaged_by = None;
        player.player_spectating = NOT_SPECTATING;
        player.game_msgs.clear();
        player.game_msgs2.clear();
        player.game_msg_deadlines = Default::default();
        player.do_physics = true;
        player.health_indicator_color = [255, 255, 255];
        player.direction_indicator_vector = None;
        player.update_timestamp = Some(now);

        let spawn = self.map.random_respawn_point();
        player.position = spawn.position;
        player.velocity = Vector3::ZERO;
        player.look_quaternion = spawn.quaternion.to_array();
        player.forced = true;

        self.players.insert(id, player);
        self.extras.insert(id, PlayerExtras::new(now));

        Ok(UpsertOutcome { player_id: id, is_new: true })
    }

    pub fn get(&self, id: u64) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn extras(&self, id: u64) -> Option<&PlayerExtras> {
        self.extras.get(&id)
    }

    pub fn extras_mut(&mut self, id: u64) -> Option<&mut PlayerExtras> {
        self.extras.get_mut(&id)
    }

    /// Player and extras together
    pub fn entry_mut(&mut self, id: u64) -> Option<(&mut Player, &mut PlayerExtras)> {
        match (self.players.get_mut(&id), self.extras.get_mut(&id)) {
            (Some(player), Some(extras)) => Some((player, extras)),
            _ => None,
        }
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.players.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.players.contains_key(&id)
    }

    /// Remove a player together with its extras
    pub fn remove(&mut self, id: u64) -> Option<Player> {
        self.extras.remove(&id);
        self.players.remove(&id)
    }

    /// Relocate to a random respawn point with full health and a fresh inventory
    pub fn respawn(&mut self, id: u64, now: f64) {
        let spawn = self.map.random_respawn_point();
        let inventory = self.base_inventory(now);
        let max_health = self.config.player_max_health;
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };

        player.inventory = inventory;
        player.held_item_index = 0;
        player.position = spawn.position;
        player.look_quaternion = spawn.quaternion.to_array();
        player.health = max_health;
        player.gravity = 0.0;
        player.velocity = Vector3::ZERO;
        player.last_damage_time = None;
        player.id_last_damaged_by = None;
        player.forced = true;
    }

    /// Empty the inventory and return the stacks as world items at the player's feet
    pub fn drop_all_items(&mut self, id: u64, now: f64) -> Vec<WorldItem> {
        let Some(player) = self.players.get_mut(&id) else {
            return Vec::new();
        };
        let position = player.position;
        player
            .inventory
            .drain(..)
            .map(|stack| WorldItem::new(position, stack.item_id, now))
            .collect()
    }

    /// Heal players whose last damage is older than the regen delay.
    /// Returns whether any health changed.
    pub fn regenerate_health(&mut self, now: f64) -> bool {
        let max_health = self.config.player_max_health;
        let per_tick = self.config.health_regen_rate / self.config.tick_rate_hz.max(1) as f32;
        let delay = self.config.health_regen_delay_secs;
        let mut changed = false;

        for player in self.players.values_mut() {
            if player.is_dead() || player.health >= max_health {
                continue;
            }
            let last_damage = player.last_damage_time.unwrap_or(0.0);
            if last_damage + delay < now {
                player.health = (player.health + per_tick).clamp(0.0, max_health);
                changed = true;
            }
        }
        changed
    }

    /// Recompute stack durabilities; spent stacks regenerate while overflow
    /// remains, otherwise they are destroyed. Returns whether anything changed.
    pub fn update_item_durabilities(&mut self, now: f64) -> bool {
        let by_age = self.config.durability_decay_by_age;
        let by_shots = self.config.durability_decay_by_shots;
        let mut changed = false;

        for player in self.players.values_mut() {
            let before = player.inventory.len();
            player.inventory.retain_mut(|stack| {
                let durability = item_durability(stack, now, by_age, by_shots);
                if durability > 0.0 {
                    let durability = durability.clamp(0.0, 1.0);
                    if stack.durability != durability {
                        stack.durability = durability;
                        changed = true;
                    }
                    return true;
                }
                changed = true;
                if stack.overflow > 0 {
                    stack.overflow -= 1;
                    stack.creation_timestamp = now;
                    stack.shots_fired = 0;
                    stack.durability = 1.0;
                    true
                } else {
                    false
                }
            });
            if player.inventory.len() != before {
                log::debug!("{}({}) used up {} item(s)", player.name, player.id, before - player.inventory.len());
            }
        }
        changed
    }

    /// Put a picked-up item into a player's inventory.
    /// Duplicates raise the stack's overflow up to the item's limit.
    pub fn give_item(&mut self, id: u64, item_id: u32, now: f64) -> bool {
        let Some(data) = self.items.get(item_id) else {
            return false;
        };
        let Some(player) = self.players.get_mut(&id) else {
            return false;
        };

        if !data.always_new_stack {
            if let Some(stack) = player.inventory.iter_mut().find(|s| s.item_id == item_id) {
                if stack.overflow < data.max_overflow {
                    stack.overflow += 1;
                    return true;
                }
                return false;
            }
        }
        player.inventory.push(new_stack(data, now));
        true
    }

    /// Count a shot against the stack the player is holding
    pub fn record_shot(&mut self, id: u64) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let held = player.held_item_index;
        if let Some(stack) = player.inventory.get_mut(held) {
            stack.shots_fired = stack.shots_fired.saturating_add(1);
        }
    }

    fn base_inventory(&self, now: f64) -> Vec<InventoryItem> {
        self.config
            .player_base_inventory
            .iter()
            .filter_map(|id| self.items.get(*id))
            .map(|data| new_stack(data, now))
            .collect()
    }
}

fn new_stack(data: &ItemData, now: f64) -> InventoryItem {
    InventoryItem {
        lifetime: data.lifetime_secs,
        shots_available: data.shots_available,
        ..InventoryItem::new(data.id, now)
    }
}

/// Durability of a stack from its age and usage. May go below zero when spent.
pub fn item_durability(stack: &InventoryItem, now: f64, by_age: bool, by_shots: bool) -> f32 {
    let mut durability = 1.0_f32;
    if by_age {
        if let Some(lifetime) = stack.lifetime.filter(|l| *l > 0.0) {
            let age = (now - stack.creation_timestamp).max(0.0);
            durability = durability.min((1.0 - age / lifetime) as f32);
        }
    }
    if by_shots {
        if let Some(shots) = stack.shots_available.filter(|s| *s > 0) {
            durability = durability.min(1.0 - stack.shots_fired as f32 / shots as f32);
        }
    }
    durability
}

/// Empty names become `possum` + the first digits of the id
pub fn sanitize_name(name: &str, id: u64) -> String {
    if name.trim().is_empty() {
        let digits: String = id.to_string().chars().take(3).collect();
        format!("possum{}", digits)
    } else {
        name.to_string()
    }
}

/// Mask admin command arguments and force the white colour prefix
pub fn sanitize_chat(message: &str) -> String {
    let mut message = match message.strip_prefix("/admin ") {
        Some(args) => format!("/admin {}", "*".repeat(args.chars().count())),
        None => message.to_string(),
    };
    if message.starts_with('>') {
        message = format!("&2{}", message);
    }
    if !message.starts_with("&f") {
        message = format!("&f{}", message);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VERSION: &str = "1.0.0";

    fn manager_with(config: Config) -> PlayerManager {
        PlayerManager::new(
            Arc::new(config),
            Arc::new(MapData::empty("test")),
            Arc::new(ItemDb::load()),
            VERSION,
        )
    }

    fn manager() -> PlayerManager {
        manager_with(Config::default())
    }

    fn snapshot(id: u64) -> Player {
        Player::new(id, "possum", VERSION)
    }

    fn raw(player: &Player) -> Value {
        serde_json::to_value(player).unwrap()
    }

    #[test]
    fn test_new_player_gets_spawn_and_forced() {
        let mut players = manager();
        let mut snap = snapshot(42);
        snap.health = 5000.0;
        snap.position = Vector3::new(100.0, 100.0, 100.0);

        let outcome = players.upsert(&raw(&snap), 1.0).unwrap();
        assert!(outcome.is_new);

        let player = players.get(42).unwrap();
        assert_eq!(player.health, 100.0);
        assert!(player.forced);
        assert_eq!(player.position, crate::domain::map::FALLBACK_SPAWN);
        assert!(players.extras(42).is_some());
    }

    #[test]
    fn test_server_owned_fields_preserved() {
        let mut players = manager();
        players.upsert(&raw(&snapshot(1)), 1.0).unwrap();
        players.get_mut(1).unwrap().forced = false;
        players.get_mut(1).unwrap().health = 40.0;

        let mut snap = snapshot(1);
        snap.health = 100.0;
        snap.forced = true;
        snap.inventory = vec![InventoryItem::new(5, 0.0)];
        snap.protection = 50.0;
        snap.position = Vector3::new(3.0, 1.0, 3.0);
        snap.latency = 80.0;

        let outcome = players.upsert(&raw(&snap), 2.0).unwrap();
        assert!(!outcome.is_new);

        let player = players.get(1).unwrap();
        assert_eq!(player.health, 40.0);
        assert!(player.inventory.is_empty());
        assert!(!player.forced);
        assert_eq!(player.protection, 1.0);
        assert_eq!(player.position, Vector3::new(3.0, 1.0, 3.0));
        assert_eq!(player.latency, 80.0);
        assert_eq!(player.update_timestamp, Some(2.0));
    }

    #[test]
    fn test_forced_blocks_until_acknowledged() {
        let mut players = manager();
        players.upsert(&raw(&snapshot(1)), 1.0).unwrap();
        let spawn = players.get(1).unwrap().position;

        let mut snap = snapshot(1);
        snap.position = Vector3::new(50.0, 0.0, 50.0);
        snap.velocity = Vector3::new(1.0, 0.0, 0.0);
        snap.quaternion = [0.0, 1.0, 0.0, 0.0];
        snap.forced_acknowledged = false;

        players.upsert(&raw(&snap), 2.0).unwrap();
        let player = players.get(1).unwrap();
        assert_eq!(player.position, spawn);
        assert_eq!(player.velocity, Vector3::ZERO);
        assert_eq!(player.quaternion, [0.0, 0.0, 0.0, 1.0]);
        assert!(player.forced);

        snap.forced_acknowledged = true;
        players.upsert(&raw(&snap), 3.0).unwrap();
        let player = players.get(1).unwrap();
        assert!(!player.forced);
        assert_eq!(player.position, Vector3::new(50.0, 0.0, 50.0));
    }

    #[test]
    fn test_server_full() {
        let mut config = Config::default();
        config.max_players = 1;
        let mut players = manager_with(config);
        players.upsert(&raw(&snapshot(1)), 0.0).unwrap();
        assert!(matches!(players.upsert(&raw(&snapshot(2)), 0.0), Err(UpsertError::ServerFull)));
    }

    #[test]
    fn test_invalid_snapshot_rejected() {
        let mut players = manager();
        let mut value = raw(&snapshot(1));
        value["gameVersion"] = json!("0.0.1");
        assert!(matches!(players.upsert(&value, 0.0), Err(UpsertError::Invalid(_))));
        assert!(players.is_empty());
    }

    #[test]
    fn test_health_stays_in_bounds_under_regen() {
        let mut players = manager();
        players.upsert(&raw(&snapshot(1)), 0.0).unwrap();
        players.get_mut(1).unwrap().health = 99.9;

        for tick in 0..100 {
            players.regenerate_health(100.0 + tick as f64);
            let health = players.get(1).unwrap().health;
            assert!((0.0..=100.0).contains(&health));
        }
        assert_eq!(players.get(1).unwrap().health, 100.0);
    }

    #[test]
    fn test_regen_waits_for_delay() {
        let mut players = manager();
        players.upsert(&raw(&snapshot(1)), 0.0).unwrap();
        {
            let player = players.get_mut(1).unwrap();
            player.health = 50.0;
            player.last_damage_time = Some(10.0);
        }
        assert!(!players.regenerate_health(12.0));
        assert!(players.regenerate_health(16.5));
        let expected = 50.0 + 5.0 / 15.0;
        assert!((players.get(1).unwrap().health - expected).abs() < 1e-4);
    }

    #[test]
    fn test_dead_players_do_not_regen() {
        let mut players = manager();
        players.upsert(&raw(&snapshot(1)), 0.0).unwrap();
        players.get_mut(1).unwrap().health = 0.0;
        players.regenerate_health(100.0);
        assert_eq!(players.get(1).unwrap().health, 0.0);
    }

    #[test]
    fn test_durability_by_shots() {
        let mut stack = InventoryItem::new(1, 0.0);
        stack.shots_available = Some(10);
        stack.shots_fired = 10;
        assert!(item_durability(&stack, 0.0, true, true) <= 0.0);
        assert_eq!(item_durability(&stack, 0.0, true, false), 1.0);
    }

    #[test]
    fn test_durability_by_age() {
        let mut stack = InventoryItem::new(3, 0.0);
        stack.lifetime = Some(100.0);
        assert!((item_durability(&stack, 25.0, true, true) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_overflow_regenerates_then_destroys() {
        let mut players = manager();
        players.upsert(&raw(&snapshot(1)), 0.0).unwrap();
        {
            let player = players.get_mut(1).unwrap();
            let mut stack = InventoryItem::new(1, 0.0);
            stack.shots_available = Some(10);
            stack.shots_fired = 10;
            stack.overflow = 1;
            player.inventory.push(stack);
        }

        assert!(players.update_item_durabilities(1.0));
        let stack = &players.get(1).unwrap().inventory[0];
        assert_eq!(stack.overflow, 0);
        assert_eq!(stack.shots_fired, 0);
        assert_eq!(stack.durability, 1.0);

        players.get_mut(1).unwrap().inventory[0].shots_fired = 10;
        players.update_item_durabilities(2.0);
        assert!(players.get(1).unwrap().inventory.is_empty());
    }

    #[test]
    fn test_give_item_overflow_limit() {
        let mut players = manager();
        players.upsert(&raw(&snapshot(1)), 0.0).unwrap();

        // banana allows two regenerations
        assert!(players.give_item(1, 1, 0.0));
        assert!(players.give_item(1, 1, 0.0));
        assert!(players.give_item(1, 1, 0.0));
        assert!(!players.give_item(1, 1, 0.0));
        let player = players.get(1).unwrap();
        assert_eq!(player.inventory.len(), 1);
        assert_eq!(player.inventory[0].overflow, 2);
        assert_eq!(player.inventory[0].shots_available, Some(10));

        // cubes always stack separately
        assert!(players.give_item(1, 0, 0.0));
        assert!(players.give_item(1, 0, 0.0));
        assert_eq!(players.get(1).unwrap().inventory.len(), 3);
    }

    #[test]
    fn test_respawn_and_drop() {
        let mut players = manager();
        players.upsert(&raw(&snapshot(1)), 0.0).unwrap();
        players.give_item(1, 2, 0.0);
        {
            let player = players.get_mut(1).unwrap();
            player.health = 0.0;
            player.forced = false;
            player.position = Vector3::new(9.0, 9.0, 9.0);
            player.gravity = 3.0;
        }

        let dropped = players.drop_all_items(1, 5.0);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].vector, Vector3::new(9.0, 9.0, 9.0));

        players.respawn(1, 5.0);
        let player = players.get(1).unwrap();
        assert_eq!(player.health, 100.0);
        assert_eq!(player.gravity, 0.0);
        assert!(player.forced);
        assert!(player.inventory.is_empty());
    }

    #[test]
    fn test_record_shot() {
        let mut players = manager();
        players.upsert(&raw(&snapshot(1)), 0.0).unwrap();
        players.give_item(1, 5, 0.0);
        players.record_shot(1);
        assert_eq!(players.get(1).unwrap().inventory[0].shots_fired, 1);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_name("", 12345), "possum123");
        assert_eq!(sanitize_name("bob", 1), "bob");
        assert_eq!(sanitize_chat("/admin hunter2"), "&f/admin *******");
        assert_eq!(sanitize_chat(">implying"), "&f&2>implying");
        assert_eq!(sanitize_chat("&fhello"), "&fhello");
    }
}
