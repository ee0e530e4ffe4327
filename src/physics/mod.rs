//! Rigid-body bridge between gameplay props and the rapier world.
//!
//! The bridge owns every body handle, keyed by prop id. Props only carry
//! data; after each step their transforms are copied from the bodies.

pub mod mesh;

use std::collections::HashMap;

use glam::Vec3;
use rapier3d::prelude::*;

use crate::physics::mesh::{MeshData, MeshError};
use crate::state::prop::Prop;
use crate::state::vector::{Quaternion, Vector3};

pub const GRAVITY: Real = -9.81;
/// Physics advances in these increments regardless of the tick interval
pub const FIXED_TIMESTEP: Real = 1.0 / 60.0;

const STATIC_FRICTION: Real = 0.9;
const STATIC_RESTITUTION: Real = 0.0;
const PROP_FRICTION: Real = 0.8;
const PROP_RESTITUTION: Real = 0.1;
const MIN_FALLBACK_RADIUS: Real = 0.1;
const DEFAULT_FALLBACK_RADIUS: Real = 0.5;
/// Below this the hull has no volume worth solving
const DEGENERATE_EPSILON: Real = 1e-5;

#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("unknown prop {0}")]
    UnknownProp(u64),

    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("static mesh has no usable triangles")]
    EmptyStaticMesh,
}

struct PropBody {
    body: RigidBodyHandle,
}

/// Transform and velocities of one body, in wire types
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vector3,
    pub quaternion: Quaternion,
    pub velocity: Vector3,
    pub angular_velocity: Vector3,
}

pub struct PhysicsBridge {
    physics_pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    gravity: Vector<Real>,
    props: HashMap<u64, PropBody>,
    accumulator: Real,
}

impl PhysicsBridge {
    pub fn new() -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = FIXED_TIMESTEP;

        Self {
            physics_pipeline: PhysicsPipeline::new(),
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            gravity: vector![0.0, GRAVITY, 0.0],
            props: HashMap::new(),
            accumulator: 0.0,
        }
    }

    /// Register the map geometry as one static trimesh collider (no rigid body)
    pub fn add_static_mesh(&mut self, mesh: &MeshData) -> Result<ColliderHandle, PhysicsError> {
        let vertex_count = mesh.vertices.len() as u32;
        let triangles: Vec<[u32; 3]> = mesh
            .triangles()
            .into_iter()
            .filter(|t| t.iter().all(|i| *i < vertex_count))
            .collect();
        if triangles.is_empty() {
            return Err(PhysicsError::EmptyStaticMesh);
        }

        let vertices: Vec<Point<Real>> = mesh.vertices.iter().map(|v| point![v.x, v.y, v.z]).collect();
        let collider = ColliderBuilder::trimesh(vertices, triangles)
            .friction(STATIC_FRICTION)
            .restitution(STATIC_RESTITUTION)
            .build();

        log::info!("Static collision mesh registered: {} vertices", vertex_count);
        Ok(self.collider_set.insert(collider))
    }

    /// Create a dynamic body for a prop from its (unscaled) mesh.
    /// Returns false when the prop does not take part in physics.
    pub fn register_prop(&mut self, prop: &Prop, mesh: &MeshData) -> bool {
        if !prop.do_physics {
            return false;
        }
        self.remove_prop(prop.id);

        let scale = Vec3::from(prop.scale);
        let vertices = mesh.scaled_vertices(scale);

        let rotation = Rotation::from_quaternion(rapier3d::na::Quaternion::new(
            prop.quaternion.w,
            prop.quaternion.x,
            prop.quaternion.y,
            prop.quaternion.z,
        ));
        let position = Isometry::from_parts(
            vector![prop.position.x, prop.position.y, prop.position.z].into(),
            rotation,
        );

        let rigid_body = RigidBodyBuilder::dynamic()
            .position(position)
            .linvel(vector![prop.velocity.x, prop.velocity.y, prop.velocity.z])
            .angvel(vector![
                prop.angular_velocity.x,
                prop.angular_velocity.y,
                prop.angular_velocity.z
            ])
            .build();
        let body = self.rigid_body_set.insert(rigid_body);

        let collider = build_dynamic_collider(&vertices)
            .friction(PROP_FRICTION)
            .restitution(PROP_RESTITUTION)
            .build();
        self.collider_set.insert_with_parent(collider, body, &mut self.rigid_body_set);

        self.props.insert(prop.id, PropBody { body });
        true
    }

    /// Drop a prop's body and colliders
    pub fn remove_prop(&mut self, prop_id: u64) -> bool {
        let Some(entry) = self.props.remove(&prop_id) else {
            return false;
        };
        self.rigid_body_set.remove(
            entry.body,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
        true
    }

    pub fn apply_impulse(&mut self, prop_id: u64, impulse: Vec3) -> Result<(), PhysicsError> {
        let entry = self.props.get(&prop_id).ok_or(PhysicsError::UnknownProp(prop_id))?;
        let body = self
            .rigid_body_set
            .get_mut(entry.body)
            .ok_or(PhysicsError::UnknownProp(prop_id))?;
        body.apply_impulse(vector![impulse.x, impulse.y, impulse.z], true);
        Ok(())
    }

    /// Accumulate `dt` and run as many fixed substeps as fit. Returns the substep count.
    pub fn step(&mut self, dt: Real) -> u32 {
        if dt <= 0.0 || !dt.is_finite() {
            return 0;
        }
        self.accumulator += dt;

        let mut steps = 0;
        while self.accumulator >= FIXED_TIMESTEP {
            self.physics_pipeline.step(
                &self.gravity,
                &self.integration_parameters,
                &mut self.island_manager,
                &mut self.broad_phase,
                &mut self.narrow_phase,
                &mut self.rigid_body_set,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                &mut self.ccd_solver,
                Some(&mut self.query_pipeline),
                &(),
                &(),
            );
            self.accumulator -= FIXED_TIMESTEP;
            steps += 1;
        }
        steps
    }

    pub fn body_state(&self, prop_id: u64) -> Option<BodyState> {
        let entry = self.props.get(&prop_id)?;
        let body = self.rigid_body_set.get(entry.body)?;
        let t = body.translation();
        let r = body.rotation();
        let v = body.linvel();
        let w = body.angvel();
        Some(BodyState {
            position: Vector3::new(t.x, t.y, t.z),
            quaternion: Quaternion { x: r.i, y: r.j, z: r.k, w: r.w },
            velocity: Vector3::new(v.x, v.y, v.z),
            angular_velocity: Vector3::new(w.x, w.y, w.z),
        })
    }

    /// Copy body state into the prop. Returns whether anything moved.
    pub fn sync_prop(&self, prop: &mut Prop) -> bool {
        let Some(state) = self.body_state(prop.id) else {
            return false;
        };
        let changed = prop.position != state.position
            || prop.quaternion != state.quaternion
            || prop.velocity != state.velocity
            || prop.angular_velocity != state.angular_velocity;
        prop.position = state.position;
        prop.quaternion = state.quaternion;
        prop.velocity = state.velocity;
        prop.angular_velocity = state.angular_velocity;
        changed
    }

    pub fn contains(&self, prop_id: u64) -> bool {
        self.props.contains_key(&prop_id)
    }

    pub fn body_count(&self) -> usize {
        self.props.len()
    }

    pub fn collider_count(&self) -> usize {
        self.collider_set.len()
    }
}

impl Default for PhysicsBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Convex hull of the vertices, or a bounding sphere when the hull would be degenerate
pub fn build_dynamic_collider(vertices: &[Vec3]) -> ColliderBuilder {
    if vertices.len() >= 4 && spans_volume(vertices) {
        let points: Vec<Point<Real>> = vertices.iter().map(|v| point![v.x, v.y, v.z]).collect();
        if let Some(hull) = ColliderBuilder::convex_hull(&points) {
            return hull;
        }
    }

    let radius = if vertices.is_empty() {
        DEFAULT_FALLBACK_RADIUS
    } else {
        vertices.iter().map(|v| v.length()).fold(0.0, Real::max)
    };
    ColliderBuilder::ball(radius.max(MIN_FALLBACK_RADIUS))
}

/// Whether the points enclose a non-zero volume
fn spans_volume(points: &[Vec3]) -> bool {
    if points.iter().any(|p| !p.is_finite()) {
        return false;
    }
    let a = points[0];
    let Some(b) = farthest(points, |p| p.distance_squared(a)) else {
        return false;
    };
    let ab = b - a;
    if ab.length_squared() < DEGENERATE_EPSILON {
        return false;
    }
    let Some(c) = farthest(points, |p| (p - a).cross(ab).length_squared()) else {
        return false;
    };
    let normal = ab.cross(c - a);
    if normal.length_squared() < DEGENERATE_EPSILON {
        return false;
    }
    let normal = normal.normalize();
    points.iter().any(|p| (*p - a).dot(normal).abs() > DEGENERATE_EPSILON)
}

fn farthest(points: &[Vec3], metric: impl Fn(Vec3) -> Real) -> Option<Vec3> {
    points
        .iter()
        .copied()
        .max_by(|x, y| metric(*x).total_cmp(&metric(*y)))
}
