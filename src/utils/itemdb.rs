use std::collections::HashMap;
use serde::{Deserialize, Serialize};

pub const CUBE_ITEM_ID: u32 = 0;
pub const FLAG_ITEM_ID: u32 = 4;

/// Catalog entry for an item type that can lie in the world or sit in an inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemData {
    pub id: u32,
    pub name: String,
    /// Seconds until a fresh stack is used up by age
    pub lifetime_secs: Option<f64>,
    /// Shots until a fresh stack is used up by usage
    pub shots_available: Option<u32>,
    /// How many times a stack may regenerate before it is destroyed
    pub max_overflow: u32,
    /// Every pickup becomes its own stack
    pub always_new_stack: bool,
    pub kill_text: String,
    pub headshot_kill_text: String,
}

/// Immutable item database - loaded once at startup
/// Zero contention, passed by Arc reference
#[derive(Debug, Clone)]
pub struct ItemDb {
    items: HashMap<u32, ItemData>,
}

impl ItemDb {
    pub fn load() -> Self {
        let mut items = HashMap::new();

        let mut insert = |id: u32, name: &str, lifetime_secs: Option<f64>, shots_available: Option<u32>, max_overflow: u32, kill_text: &str, headshot_kill_text: &str| {
            items.insert(id, ItemData {
                id,
                name: name.to_string(),
                lifetime_secs,
                shots_available,
                max_overflow,
                always_new_stack: id == CUBE_ITEM_ID,
                kill_text: kill_text.to_string(),
                headshot_kill_text: headshot_kill_text.to_string(),
            });
        };

        insert(CUBE_ITEM_ID, "[Object]", None, None, 0, "&fcubed", "&6cubed");
        insert(1, "banana", None, Some(10), 2, "&ebananaed", "&6head-bananaed");
        insert(2, "fish", None, Some(12), 2, "&bslapped", "&6face-slapped");
        insert(3, "pipe", Some(120.0), None, 1, "&7bonked", "&6skull-bonked");
        insert(FLAG_ITEM_ID, "flag", None, None, 0, "&fflagged", "&6flagged");
        insert(5, "sniper", None, Some(5), 1, "&csniped", "&6headshot");

        Self { items }
    }

    pub fn get(&self, id: u32) -> Option<&ItemData> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.items.contains_key(&id)
    }

    /// Kill feed verb for the attacker's held item, falling back to a plain kill
    pub fn kill_text(&self, held_item: Option<u32>, headshot: bool) -> &str {
        match held_item.and_then(|id| self.get(id)) {
            Some(item) if headshot => &item.headshot_kill_text,
            Some(item) => &item.kill_text,
            None if headshot => "&6headshot",
            None => "&fkilled",
        }
    }
}
