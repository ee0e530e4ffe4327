//! World/map store: spawn tables parsed once at startup, immutable afterwards.

use std::path::{Path, PathBuf};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use crate::state::vector::{Quaternion, Vector3};

/// Spawn used when a map defines no respawn points
pub const FALLBACK_SPAWN: Vector3 = Vector3::new(2.0, 1.0, 0.0);

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("failed to read map file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse map json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespawnPoint {
    pub position: Vector3,
    #[serde(default)]
    pub quaternion: Quaternion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRespawnPoint {
    pub position: Vector3,
    pub item_id: u32,
    #[serde(default)]
    pub spawn_chance_per_tick: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePoint {
    pub position: Vector3,
    /// Radius of the capture zone
    #[serde(default = "default_capture_scale")]
    pub scale: f32,
}

fn default_capture_scale() -> f32 {
    2.0
}

/// Prop placed by the map at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapProp {
    pub url: String,
    pub position: Vector3,
    #[serde(default)]
    pub quaternion: Quaternion,
    #[serde(default = "unit_scale")]
    pub scale: Vector3,
    #[serde(default = "default_true")]
    pub do_physics: bool,
    #[serde(default = "default_true")]
    pub players_collide: bool,
    #[serde(default)]
    pub health: Option<f32>,
}

fn unit_scale() -> Vector3 {
    Vector3::new(1.0, 1.0, 1.0)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapData {
    pub name: String,
    #[serde(default)]
    pub respawn_points: Vec<RespawnPoint>,
    #[serde(default)]
    pub item_respawn_points: Vec<ItemRespawnPoint>,
    #[serde(default)]
    pub capture_points: Vec<CapturePoint>,
    #[serde(default)]
    pub props: Vec<MapProp>,
}

impl MapData {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            respawn_points: Vec::new(),
            item_respawn_points: Vec::new(),
            capture_points: Vec::new(),
            props: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, MapError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load `<asset_root>/maps/<map>/map.json`
    pub fn load(asset_root: impl AsRef<Path>, map_name: &str) -> Result<Self, MapError> {
        let path = map_dir(asset_root, map_name).join("map.json");
        let json = std::fs::read_to_string(&path).map_err(|source| MapError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let map = Self::from_json(&json)?;
        log::info!(
            "Loaded map {}: {} respawn points, {} item spawns, {} capture points, {} props",
            map.name,
            map.respawn_points.len(),
            map.item_respawn_points.len(),
            map.capture_points.len(),
            map.props.len()
        );
        Ok(map)
    }

    /// Random respawn point, or the fallback spawn for maps without any
    pub fn random_respawn_point(&self) -> RespawnPoint {
        self.respawn_points
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or(RespawnPoint {
                position: FALLBACK_SPAWN,
                quaternion: Quaternion::IDENTITY,
            })
    }

    pub fn random_item_respawn_point(&self) -> Option<&ItemRespawnPoint> {
        self.item_respawn_points.choose(&mut rand::thread_rng())
    }
}

pub fn map_dir(asset_root: impl AsRef<Path>, map_name: &str) -> PathBuf {
    asset_root.as_ref().join("maps").join(map_name)
}

/// Path of the static collision mesh for a map
pub fn map_mesh_path(asset_root: impl AsRef<Path>, map_name: &str) -> PathBuf {
    map_dir(asset_root, map_name).join("map.glb")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP_JSON: &str = r#"{
        "name": "test_map",
        "respawnPoints": [
            { "position": { "x": 1, "y": 2, "z": 3 }, "quaternion": { "x": 0, "y": 0, "z": 0, "w": 1 } }
        ],
        "itemRespawnPoints": [
            { "position": { "x": 5, "y": 0, "z": 5 }, "itemId": 1, "spawnChancePerTick": 0.1 }
        ],
        "capturePoints": [
            { "position": { "x": 0, "y": 0, "z": 0 }, "scale": 3 }
        ]
    }"#;

    #[test]
    fn test_parse_map() {
        let map = MapData::from_json(MAP_JSON).unwrap();
        assert_eq!(map.name, "test_map");
        assert_eq!(map.respawn_points.len(), 1);
        assert_eq!(map.item_respawn_points[0].item_id, 1);
        assert_eq!(map.capture_points[0].scale, 3.0);
        assert!(map.props.is_empty());
    }

    #[test]
    fn test_random_respawn_point() {
        let map = MapData::from_json(MAP_JSON).unwrap();
        assert_eq!(map.random_respawn_point().position, Vector3::new(1.0, 2.0, 3.0));

        let empty = MapData::empty("void");
        assert_eq!(empty.random_respawn_point().position, FALLBACK_SPAWN);
        assert!(empty.random_item_respawn_point().is_none());
    }

    #[test]
    fn test_bad_map_json() {
        assert!(matches!(MapData::from_json("{"), Err(MapError::Json(_))));
    }

    #[test]
    fn test_missing_map_file() {
        let err = MapData::load("/definitely/not/here", "nope").unwrap_err();
        assert!(matches!(err, MapError::Io { .. }));
    }
}
