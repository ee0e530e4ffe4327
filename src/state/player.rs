use serde::{Deserialize, Serialize};
use crate::state::vector::Vector3;

/// `playerSpectating` value for a player who is not spectating anyone
pub const NOT_SPECTATING: i64 = -1;

/// Number of independently timed on-screen message lines
pub const GAME_MESSAGE_SLOTS: usize = 2;

/// One inventory stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InventoryItem {
    pub item_id: u32,
    /// Remaining durability in `[0, 1]`
    pub durability: f32,
    pub creation_timestamp: f64,
    pub shots_fired: u32,
    /// Regenerations left before the stack is destroyed
    pub overflow: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shots_available: Option<u32>,
}

impl InventoryItem {
    pub fn new(item_id: u32, now: f64) -> Self {
        Self {
            item_id,
            durability: 1.0,
            creation_timestamp: now,
            shots_fired: 0,
            overflow: 0,
            lifetime: None,
            shots_available: None,
        }
    }
}

/// Player state as exchanged with clients.
///
/// The same shape is accepted from clients (strictly, unknown fields are
/// rejected) and broadcast back; the server decides which fields of an
/// incoming snapshot it actually keeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Player {
    pub id: u64,
    pub name: String,
    pub game_version: String,
    pub speed: f32,
    pub acceleration: f32,

    // Transform
    pub position: Vector3,
    pub velocity: Vector3,
    pub input_velocity: Vector3,
    pub gravity: f32,
    pub look_quaternion: [f32; 4],
    pub quaternion: [f32; 4],

    // Presence
    pub chat_active: bool,
    pub chat_msg: String,
    pub latency: f32,
    #[serde(default)]
    pub update_timestamp: Option<f64>,

    // Vitals
    pub health: f32,
    pub protection: f32,
    #[serde(default)]
    pub last_damage_time: Option<f64>,
    #[serde(default)]
    pub id_last_damaged_by: Option<u64>,

    // Correction handshake
    pub forced: bool,
    pub forced_acknowledged: bool,

    pub inventory: Vec<InventoryItem>,
    pub held_item_index: usize,

    pub player_spectating: i64,
    pub game_msgs: Vec<String>,
    pub game_msgs2: Vec<String>,
    pub do_physics: bool,
    pub health_indicator_color: [u8; 3],
    #[serde(default)]
    pub direction_indicator_vector: Option<Vector3>,

    #[serde(skip)]
    pub game_msg_deadlines: [Option<f64>; GAME_MESSAGE_SLOTS],
}

impl Player {
    pub fn new(id: u64, name: impl Into<String>, game_version: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            game_version: game_version.into(),
            speed: 1.0,
            acceleration: 1.0,
            position: Vector3::ZERO,
            velocity: Vector3::ZERO,
            input_velocity: Vector3::ZERO,
            gravity: 0.0,
            look_quaternion: [0.0, 0.0, 0.0, 1.0],
            quaternion: [0.0, 0.0, 0.0, 1.0],
            chat_active: false,
            chat_msg: String::new(),
            latency: 0.0,
            update_timestamp: None,
            health: 100.0,
            protection: 1.0,
            last_damage_time: None,
            id_last_damaged_by: None,
            forced: false,
            forced_acknowledged: false,
            inventory: Vec::new(),
            held_item_index: 0,
            player_spectating: NOT_SPECTATING,
            game_msgs: Vec::new(),
            game_msgs2: Vec::new(),
            do_physics: true,
            health_indicator_color: [255, 255, 255],
            direction_indicator_vector: None,
            game_msg_deadlines: [None; GAME_MESSAGE_SLOTS],
        }
    }

    pub fn is_spectating(&self) -> bool {
        self.player_spectating != NOT_SPECTATING
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0.0
    }

    pub fn has_item(&self, item_id: u32) -> bool {
        self.inventory.iter().any(|item| item.item_id == item_id)
    }

    pub fn held_item_id(&self) -> Option<u32> {
        self.inventory.get(self.held_item_index).map(|item| item.item_id)
    }

    /// Set one of the timed message lines; `deadline` clears it automatically.
    pub fn set_game_message(&mut self, slot: usize, message: impl Into<String>, deadline: Option<f64>) {
        if slot >= GAME_MESSAGE_SLOTS {
            return;
        }
        if self.game_msgs.len() <= slot {
            self.game_msgs.resize(slot + 1, String::new());
        }
        self.game_msgs[slot] = message.into();
        self.game_msg_deadlines[slot] = deadline;
    }

    /// Set a sidebar line, growing the list as needed
    pub fn set_sidebar_line(&mut self, line: usize, message: impl Into<String>) {
        if self.game_msgs2.len() <= line {
            self.game_msgs2.resize(line + 1, String::new());
        }
        self.game_msgs2[line] = message.into();
    }

    /// Clear expired message lines. Returns whether anything changed.
    pub fn expire_game_messages(&mut self, now: f64) -> bool {
        let mut changed = false;
        for slot in 0..GAME_MESSAGE_SLOTS {
            let Some(deadline) = self.game_msg_deadlines[slot] else {
                continue;
            };
            if now >= deadline {
                if let Some(line) = self.game_msgs.get_mut(slot) {
                    line.clear();
                }
                self.game_msg_deadlines[slot] = None;
                changed = true;
            }
        }
        changed
    }
}

/// Server-private bookkeeping per player, never sent to clients
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerExtras {
    pub points: u32,
    /// `-1` when unassigned
    pub team: i8,
    pub kills: u32,
    pub deaths: u32,
    pub kill_streak: u32,
    pub last_point_increment_time: f64,
    pub last_moved_time: f64,
}

impl PlayerExtras {
    pub fn new(now: f64) -> Self {
        Self {
            points: 0,
            team: -1,
            kills: 0,
            deaths: 0,
            kill_streak: 0,
            last_point_increment_time: 0.0,
            last_moved_time: now,
        }
    }
}
