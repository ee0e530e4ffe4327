use rand::Rng;
use serde::{Deserialize, Serialize};
use crate::state::vector::Vector3;

/// A pickup lying in the world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldItem {
    pub id: u32,
    pub vector: Vector3,
    pub item_type: u32,
    pub creation_timestamp: f64,
}

impl WorldItem {
    pub fn new(vector: Vector3, item_type: u32, now: f64) -> Self {
        Self {
            id: rand::thread_rng().gen_range(1..=100_000),
            vector,
            item_type,
            creation_timestamp: now,
        }
    }
}
