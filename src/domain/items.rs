use std::sync::Arc;
use crate::domain::map::MapData;
use crate::domain::players::PlayerManager;
use crate::state::events::Outbox;
use crate::state::vector::Vector3;
use crate::state::world_item::WorldItem;
use crate::utils::config::Config;
use crate::utils::itemdb::CUBE_ITEM_ID;

pub const PICKUP_RADIUS: f32 = 0.5;
/// Minimum spacing between a new timed spawn and existing items
pub const SPAWN_SPACING: f32 = 1.0;
/// Items below this height are gone for good
pub const ITEM_FLOOR_Y: f32 = -5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pickup {
    pub player_id: u64,
    pub item_type: u32,
}

/// Transient world pickups: timed spawning, despawning and pickup detection
pub struct ItemManager {
    world_items: Vec<WorldItem>,
    last_item_creation: f64,
    update_flag: bool,
    config: Arc<Config>,
    map: Arc<MapData>,
}

impl ItemManager {
    pub fn new(config: Arc<Config>, map: Arc<MapData>, now: f64) -> Self {
        Self {
            world_items: Vec::new(),
            last_item_creation: now,
            update_flag: false,
            config,
            map,
        }
    }

    /// Per-tick step: pickups, timed spawns (unless suspended), despawns.
    /// Returns the pickups so the caller can notify the gamemode.
    pub fn tick(
        &mut self,
        players: &mut PlayerManager,
        now: f64,
        timed_spawns: bool,
        outbox: &mut Outbox,
    ) -> Vec<Pickup> {
        let pickups = self.check_for_pickups(players, now, outbox);

        if timed_spawns && now - self.last_item_creation > self.config.item_respawn_secs {
            self.create_item(now);
            self.last_item_creation = now;
        }

        if self.config.item_despawn_secs > 0.0 {
            let despawn_after = self.config.item_despawn_secs;
            let before = self.world_items.len();
            self.world_items.retain(|item| now - item.creation_timestamp <= despawn_after);
            if self.world_items.len() != before {
                self.update_flag = true;
            }
        }

        pickups
    }

    pub fn check_for_pickups(&mut self, players: &mut PlayerManager, now: f64, outbox: &mut Outbox) -> Vec<Pickup> {
        let mut pickups = Vec::new();

        for id in players.ids() {
            let Some(player) = players.get(id) else {
                continue;
            };
            if player.is_spectating() || player.is_dead() {
                continue;
            }
            let position = player.position;
            let name = player.name.clone();

            let mut i = 0;
            while i < self.world_items.len() {
                let item_type = self.world_items[i].item_type;
                let in_range = self.world_items[i].vector.distance_to(&position) < PICKUP_RADIUS;
                if in_range && players.give_item(id, item_type, now) {
                    self.world_items.remove(i);
                    self.update_flag = true;
                    if item_type == CUBE_ITEM_ID {
                        outbox.broadcast_chat(format!("{} picked up [Object]!", name));
                    }
                    log::info!("{}({}) picked up item type {}", name, id, item_type);
                    pickups.push(Pickup { player_id: id, item_type });
                    continue;
                }
                i += 1;
            }
        }

        pickups
    }

    /// Try to spawn an item at a random item spawn point
    pub fn create_item(&mut self, now: f64) -> bool {
        let Some(point) = self.map.random_item_respawn_point() else {
            return false;
        };
        if self.world_items.len() >= self.config.max_items_in_world {
            return false;
        }
        if self.is_item_close_to_point(&point.position, SPAWN_SPACING) {
            return false;
        }
        self.world_items.push(WorldItem::new(point.position, point.item_id, now));
        self.update_flag = true;
        true
    }

    pub fn push_item(&mut self, item: WorldItem) {
        self.world_items.push(item);
        self.update_flag = true;
    }

    pub fn push_items(&mut self, items: impl IntoIterator<Item = WorldItem>) {
        let before = self.world_items.len();
        self.world_items.extend(items);
        if self.world_items.len() != before {
            self.update_flag = true;
        }
    }

    pub fn remove_item(&mut self, id: u32) -> bool {
        let before = self.world_items.len();
        self.world_items.retain(|item| item.id != id);
        let removed = self.world_items.len() != before;
        if removed {
            self.update_flag = true;
        }
        removed
    }

    /// Remove items that fell out of the world
    pub fn remove_fallen(&mut self) -> usize {
        let before = self.world_items.len();
        self.world_items.retain(|item| item.vector.y >= ITEM_FLOOR_Y);
        let removed = before - self.world_items.len();
        if removed > 0 {
            self.update_flag = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.world_items.clear();
        self.update_flag = true;
    }

    pub fn items(&self) -> &[WorldItem] {
        &self.world_items
    }

    pub fn find_by_type(&self, item_type: u32) -> Option<&WorldItem> {
        self.world_items.iter().find(|item| item.item_type == item_type)
    }

    pub fn is_item_close_to_point(&self, point: &Vector3, distance: f32) -> bool {
        self.world_items.iter().any(|item| item.vector.distance_to(point) < distance)
    }

    /// Returns and resets the pending-update flag
    pub fn take_updates(&mut self) -> bool {
        std::mem::take(&mut self.update_flag)
    }

    pub fn trigger_update(&mut self) {
        self.update_flag = true;
    }
}
