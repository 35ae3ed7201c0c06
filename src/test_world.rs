//! In-memory [`GrabWorld`] for controller tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use avian3d::prelude::RigidBody;
use bevy::math::Affine3A;
use bevy::prelude::*;
use bevy_mesh_connectivity::MeshConnectivity;

use crate::components::GrabObject;
use crate::hit::SurfaceHit;
use crate::world::{BodyState, ColliderInfo, GrabWorld, JointAnchor, JointSpec, JointUpdate};

#[derive(Clone, Debug, PartialEq)]
pub struct MockJoint {
    pub spec: JointSpec,
    pub locked: bool,
}

pub struct MockWorld {
    ids: World,
    pub bodies: HashMap<Entity, BodyState>,
    pub colliders: HashMap<Entity, ColliderInfo>,
    pub meshes: HashMap<Entity, Arc<MeshConnectivity>>,
    /// Returned by `ray_hits`, filtered by distance and sorted.
    pub ray_results: Vec<SurfaceHit>,
    pub sphere_cast_result: Option<SurfaceHit>,
    pub overlaps: Vec<Entity>,
    pub closest_points: HashMap<Entity, Vec3>,
    pub links: HashMap<Entity, Vec<Entity>>,
    pub tracking: HashSet<Entity>,
    pub colliding: HashSet<Entity>,
    pub excluded: HashSet<Entity>,
    pub joints: HashMap<Entity, MockJoint>,
    pub broken: HashSet<Entity>,
    pub targets: HashMap<Entity, (Vec3, Quat)>,
    pub detached: Vec<Entity>,
}

impl MockWorld {
    pub fn new() -> Self {
        Self {
            ids: World::new(),
            bodies: HashMap::new(),
            colliders: HashMap::new(),
            meshes: HashMap::new(),
            ray_results: Vec::new(),
            sphere_cast_result: None,
            overlaps: Vec::new(),
            closest_points: HashMap::new(),
            links: HashMap::new(),
            tracking: HashSet::new(),
            colliding: HashSet::new(),
            excluded: HashSet::new(),
            joints: HashMap::new(),
            broken: HashSet::new(),
            targets: HashMap::new(),
            detached: Vec::new(),
        }
    }

    pub fn spawn(&mut self) -> Entity {
        self.ids.spawn_empty().id()
    }

    pub fn add_body(&mut self, kind: RigidBody, position: Vec3, mass: f32) -> Entity {
        let body = self.spawn();
        self.bodies.insert(
            body,
            BodyState {
                position,
                rotation: Quat::IDENTITY,
                linear_velocity: Vec3::ZERO,
                angular_velocity: Vec3::ZERO,
                mass,
                kind,
            },
        );
        body
    }

    pub fn add_dynamic_body(&mut self, position: Vec3, mass: f32) -> Entity {
        self.add_body(RigidBody::Dynamic, position, mass)
    }

    pub fn add_kinematic_body(&mut self, position: Vec3) -> Entity {
        self.add_body(RigidBody::Kinematic, position, 1.0)
    }

    /// Collider at `position`. When `body` is given the collider is attached to it.
    pub fn add_collider(
        &mut self,
        position: Vec3,
        body: Option<Entity>,
        grab_object: Option<(Entity, GrabObject)>,
    ) -> Entity {
        let collider = self.spawn();
        self.colliders.insert(
            collider,
            ColliderInfo {
                transform: Affine3A::from_translation(position),
                rotation: Quat::IDENTITY,
                body,
                grab_object,
                is_mesh: false,
            },
        );
        collider
    }

    pub fn add_mesh_collider(&mut self, position: Vec3, mesh: MeshConnectivity) -> Entity {
        let collider = self.add_collider(position, None, None);
        if let Some(info) = self.colliders.get_mut(&collider) {
            info.is_mesh = true;
        }
        self.meshes.insert(collider, Arc::new(mesh));
        collider
    }

    pub fn link(&mut self, from: Entity, to: Entity) {
        self.links.entry(from).or_default().push(to);
    }

    pub fn hit(collider: Entity, point: Vec3, normal: Vec3, distance: f32) -> SurfaceHit {
        SurfaceHit {
            collider,
            point,
            normal,
            distance,
            triangle: None,
        }
    }

    pub fn velocity(&self, body: Entity) -> Vec3 {
        self.bodies[&body].linear_velocity
    }

    pub fn angular_velocity(&self, body: Entity) -> Vec3 {
        self.bodies[&body].angular_velocity
    }

    pub fn set_velocity(&mut self, body: Entity, velocity: Vec3) {
        if let Some(state) = self.bodies.get_mut(&body) {
            state.linear_velocity = velocity;
        }
    }

    pub fn joint(&self, joint: Entity) -> &MockJoint {
        &self.joints[&joint]
    }
}

impl GrabWorld for MockWorld {
    fn ray_hits(&mut self, _origin: Vec3, _direction: Dir3, max_distance: f32) -> Vec<SurfaceHit> {
        let mut hits: Vec<_> = self
            .ray_results
            .iter()
            .copied()
            .filter(|hit| hit.distance <= max_distance)
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn sphere_cast(
        &mut self,
        _origin: Vec3,
        _direction: Dir3,
        _radius: f32,
        _max_distance: f32,
    ) -> Option<SurfaceHit> {
        self.sphere_cast_result
    }

    fn sphere_overlap(&mut self, _center: Vec3, _radius: f32) -> Vec<Entity> {
        self.overlaps.clone()
    }

    fn closest_point(&mut self, collider: Entity, _point: Vec3) -> Option<Vec3> {
        self.closest_points.get(&collider).copied()
    }

    fn collider_info(&self, collider: Entity) -> Option<ColliderInfo> {
        self.colliders.get(&collider).copied()
    }

    fn mesh_connectivity(&mut self, collider: Entity) -> Option<Arc<MeshConnectivity>> {
        self.meshes.get(&collider).cloned()
    }

    fn body(&self, body: Entity) -> Option<BodyState> {
        self.bodies.get(&body).copied()
    }

    fn set_body_velocity(&mut self, body: Entity, linear: Vec3, angular: Vec3) {
        if let Some(state) = self.bodies.get_mut(&body) {
            state.linear_velocity = linear;
            state.angular_velocity = angular;
        }
    }

    fn set_body_rotation(&mut self, body: Entity, rotation: Quat) {
        if let Some(state) = self.bodies.get_mut(&body) {
            state.rotation = rotation;
        }
    }

    fn chain_links(&self, body: Entity) -> Vec<Entity> {
        self.links.get(&body).cloned().unwrap_or_default()
    }

    fn set_collision_tracking(&mut self, body: Entity, enabled: bool) {
        if enabled {
            self.tracking.insert(body);
        } else {
            self.tracking.remove(&body);
        }
    }

    fn is_colliding(&self, body: Entity) -> bool {
        self.colliding.contains(&body)
    }

    fn set_player_collision_excluded(&mut self, body: Entity, excluded: bool) {
        if excluded {
            self.excluded.insert(body);
        } else {
            self.excluded.remove(&body);
        }
    }

    fn attach_joint(&mut self, spec: JointSpec) -> Entity {
        let joint = self.spawn();
        self.joints.insert(joint, MockJoint { spec, locked: true });
        joint
    }

    fn detach_joint(&mut self, joint: Entity) {
        self.joints.remove(&joint);
        self.detached.push(joint);
    }

    fn joint_connected(&self, joint: Entity) -> bool {
        self.joints
            .get(&joint)
            .is_some_and(|j| !self.broken.contains(&joint) && self.bodies.contains_key(&j.spec.connected))
    }

    fn update_joint(&mut self, joint: Entity, update: JointUpdate) {
        let Some(j) = self.joints.get_mut(&joint) else {
            return;
        };
        if let Some(anchor) = update.anchor {
            j.spec.anchor = anchor;
        }
        if let Some(connected_anchor) = update.connected_anchor {
            j.spec.connected_anchor = connected_anchor;
        }
        if let Some(locked) = update.locked {
            j.locked = locked;
        }
        if let Some(scale) = update.mass_scale {
            j.spec.mass_scale = scale;
        }
        if let Some(scale) = update.connected_mass_scale {
            j.spec.connected_mass_scale = scale;
        }
    }

    fn move_target(&mut self, target: Entity, position: Vec3, rotation: Quat) {
        self.targets.insert(target, (position, rotation));
    }

    fn target_pose(&self, target: Entity) -> Option<(Vec3, Quat)> {
        self.targets.get(&target).copied()
    }
}

/// Anchor world position of a mock joint's fixed side.
pub fn anchor_point(world: &MockWorld, anchor: JointAnchor) -> Option<Vec3> {
    match anchor {
        JointAnchor::World(point) => Some(point),
        JointAnchor::Body { body, local } => world.body(body).map(|b| b.to_world(local)),
    }
}
