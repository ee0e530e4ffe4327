use std::collections::BTreeMap;
use glam::Vec3;
use crate::domain::map::MapProp;
use crate::domain::validator::PropDamageRequest;
use crate::physics::mesh::MeshData;
use crate::physics::{PhysicsBridge, PhysicsError};
use crate::state::prop::Prop;
use crate::state::vector::{Quaternion, Vector3};

/// Props closer than this to a player get pushed away
pub const REPEL_RADIUS: f32 = 1.5;
pub const REPEL_STRENGTH: f32 = 0.05;
/// Impulse per point of prop damage along the hit direction
pub const DAMAGE_IMPULSE_SCALE: f32 = 0.05;
const MIN_REPEL_DISTANCE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropDamageOutcome {
    Ignored,
    Damaged,
    Destroyed,
}

/// Gameplay identity of props; transforms of physics-active props come from the bridge
pub struct PropManager {
    props: BTreeMap<u64, Prop>,
    physics: PhysicsBridge,
    update_flag: bool,
}

impl PropManager {
    pub fn new(physics: PhysicsBridge) -> Self {
        Self {
            props: BTreeMap::new(),
            physics,
            update_flag: false,
        }
    }

    pub fn add_prop(&mut self, url: &str, position: Vector3, quaternion: Quaternion, scale: Vector3) -> u64 {
        self.insert(Prop::new(url, position, quaternion, scale))
    }

    pub fn add_map_prop(&mut self, spec: &MapProp) -> u64 {
        let mut prop = Prop::new(spec.url.clone(), spec.position, spec.quaternion, spec.scale);
        prop.do_physics = spec.do_physics;
        prop.players_collide = spec.players_collide;
        prop.health = spec.health;
        self.insert(prop)
    }

    fn insert(&mut self, prop: Prop) -> u64 {
        let id = prop.id;
        log::info!("Prop added: id {}, url {}", id, prop.url);
        self.props.insert(id, prop);
        self.update_flag = true;
        id
    }

    /// Attach a loaded mesh; the prop joins collision from now on
    pub fn register_mesh(&mut self, prop_id: u64, mesh: &MeshData) -> bool {
        let Some(prop) = self.props.get_mut(&prop_id) else {
            return false;
        };
        if !self.physics.register_prop(prop, mesh) {
            return false;
        }
        self.physics.sync_prop(prop);
        self.update_flag = true;
        true
    }

    pub fn remove_prop(&mut self, prop_id: u64) -> bool {
        self.physics.remove_prop(prop_id);
        let removed = self.props.remove(&prop_id).is_some();
        if removed {
            self.update_flag = true;
            log::info!("Prop removed: id {}", prop_id);
        }
        removed
    }

    pub fn get(&self, prop_id: u64) -> Option<&Prop> {
        self.props.get(&prop_id)
    }

    pub fn props(&self) -> impl Iterator<Item = &Prop> {
        self.props.values()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn physics(&self) -> &PhysicsBridge {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut PhysicsBridge {
        &mut self.physics
    }

    pub fn apply_impulse(&mut self, prop_id: u64, impulse: Vec3) -> Result<(), PhysicsError> {
        self.physics.apply_impulse(prop_id, impulse)
    }

    /// Lower optional health (removing the prop at zero) and knock it along the hit direction
    pub fn apply_prop_damage(&mut self, request: &PropDamageRequest) -> PropDamageOutcome {
        let Some(prop) = self.props.get_mut(&request.prop_id) else {
            return PropDamageOutcome::Ignored;
        };

        if let Some(health) = prop.health.as_mut() {
            *health -= request.damage;
            if *health <= 0.0 {
                self.remove_prop(request.prop_id);
                return PropDamageOutcome::Destroyed;
            }
            self.update_flag = true;
        }

        let direction = Vec3::from(request.direction).normalize_or_zero();
        let impulse = direction * request.damage * DAMAGE_IMPULSE_SCALE;
        if impulse != Vec3::ZERO {
            if let Err(e) = self.physics.apply_impulse(request.prop_id, impulse) {
                log::debug!("Prop {} has no body yet: {}", request.prop_id, e);
            }
        }
        PropDamageOutcome::Damaged
    }

    /// Push physics props away from nearby players, stronger the closer they are
    pub fn repel_from_players(&mut self, players: &[Vector3]) {
        for prop in self.props.values() {
            if !prop.do_physics || !prop.players_collide || !self.physics.contains(prop.id) {
                continue;
            }
            let prop_pos = Vec3::from(prop.position);
            let mut total = Vec3::ZERO;
            for player in players {
                let offset = prop_pos - Vec3::from(*player);
                let distance = offset.length();
                if distance >= REPEL_RADIUS {
                    continue;
                }
                let direction = if distance > f32::EPSILON { offset / distance } else { Vec3::Y };
                total += direction * (REPEL_STRENGTH / distance.max(MIN_REPEL_DISTANCE));
            }
            if total != Vec3::ZERO {
                let _ = self.physics.apply_impulse(prop.id, total);
            }
        }
    }

    /// Advance physics and mirror body state back into the props
    pub fn step(&mut self, dt: f32) {
        self.physics.step(dt);
        for prop in self.props.values_mut() {
            if prop.do_physics && self.physics.sync_prop(prop) {
                self.update_flag = true;
            }
        }
    }

    /// Returns and resets the pending-update flag
    pub fn take_updates(&mut self) -> bool {
        std::mem::take(&mut self.update_flag)
    }
}
