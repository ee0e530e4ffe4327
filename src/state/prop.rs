use rand::Rng;
use serde::{Deserialize, Serialize};
use crate::state::vector::{Quaternion, Vector3};

/// Dynamic world object. While `do_physics` is set the transform fields are
/// mirrored from the physics world and must not be written elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prop {
    pub id: u64,
    pub url: String,
    pub name: String,
    pub position: Vector3,
    pub velocity: Vector3,
    pub quaternion: Quaternion,
    pub angular_velocity: Vector3,
    pub scale: Vector3,
    pub do_physics: bool,
    pub players_collide: bool,
    #[serde(default)]
    pub health: Option<f32>,
}

impl Prop {
    pub fn new(url: impl Into<String>, position: Vector3, quaternion: Quaternion, scale: Vector3) -> Self {
        let url = url.into();
        let name = url
            .rsplit('/')
            .next()
            .map(|file| file.trim_end_matches(".glb").to_string())
            .unwrap_or_default();
        Self {
            id: rand::thread_rng().gen_range(1..=u32::MAX as u64),
            url,
            name,
            position,
            velocity: Vector3::ZERO,
            quaternion,
            angular_velocity: Vector3::ZERO,
            scale,
            do_physics: true,
            players_collide: true,
            health: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prop_name_from_url() {
        let prop = Prop::new("models/simplified_possum.glb", Vector3::ZERO, Quaternion::IDENTITY, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(prop.name, "simplified_possum");
        assert!(prop.id >= 1);
    }
}
