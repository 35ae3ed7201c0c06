//! The engine boundary of the grab controller.
//!
//! [`HandGrabController`](crate::HandGrabController) never touches ECS queries
//! directly. Everything it needs from physics, scene and joint storage goes
//! through [`GrabWorld`], implemented for Avian3D by
//! [`AvianGrabWorld`](crate::avian::AvianGrabWorld) and by an in-memory world
//! in tests.

use std::sync::Arc;

use avian3d::prelude::RigidBody;
use bevy::math::Affine3A;
use bevy::prelude::*;
use bevy_mesh_connectivity::MeshConnectivity;

use crate::components::GrabObject;
use crate::config::JointDrive;
use crate::hit::SurfaceHit;

/// Snapshot of a rigid body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyState {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub mass: f32,
    pub kind: RigidBody,
}

impl BodyState {
    pub fn is_kinematic(&self) -> bool {
        self.kind == RigidBody::Kinematic
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind == RigidBody::Dynamic
    }

    pub fn to_local(&self, world_point: Vec3) -> Vec3 {
        self.rotation.inverse() * (world_point - self.position)
    }

    pub fn to_world(&self, local_point: Vec3) -> Vec3 {
        self.position + self.rotation * local_point
    }
}

/// What a collider belongs to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColliderInfo {
    /// Collider world transform, including scale.
    pub transform: Affine3A,
    pub rotation: Quat,
    /// Rigid body the collider is attached to.
    pub body: Option<Entity>,
    /// Nearest [`GrabObject`] on the collider or its ancestors.
    pub grab_object: Option<(Entity, GrabObject)>,
    /// Triangle mesh collider with connectivity available.
    pub is_mesh: bool,
}

impl ColliderInfo {
    pub fn to_local(&self, world_point: Vec3) -> Vec3 {
        self.transform.inverse().transform_point3(world_point)
    }

    pub fn to_world(&self, local_point: Vec3) -> Vec3 {
        self.transform.transform_point3(local_point)
    }

    /// Body that should be driven when grabbing this collider: the grab
    /// object's own body if it has one, else the attached body.
    pub fn grab_body(&self) -> Option<Entity> {
        match self.grab_object {
            Some((owner, _)) => self.body.filter(|&body| body == owner),
            None => self.body,
        }
    }

    /// Whether `entity` is the collider's grab object or its body.
    pub fn belongs_to(&self, entity: Entity) -> bool {
        self.grab_object.is_some_and(|(owner, _)| owner == entity) || self.body == Some(entity)
    }
}

/// The fixed side of a grab joint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JointAnchor {
    World(Vec3),
    Body { body: Entity, local: Vec3 },
}

/// Everything needed to create a grab joint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointSpec {
    pub anchor: JointAnchor,
    /// Driven body.
    pub connected: Entity,
    /// Attachment point in the connected body's local space.
    pub connected_anchor: Vec3,
    pub drive: JointDrive,
    /// Hold the connected body's rotation relative to the anchor as it is at attach time.
    pub hold_rotation: bool,
    /// Inverse-mass multiplier of the anchor body.
    pub mass_scale: f32,
    /// Inverse-mass multiplier of the connected body.
    pub connected_mass_scale: f32,
}

/// Partial update of an attached grab joint. `None` fields are left as is.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct JointUpdate {
    pub anchor: Option<JointAnchor>,
    pub connected_anchor: Option<Vec3>,
    /// `false` frees the linear drive.
    pub locked: Option<bool>,
    pub mass_scale: Option<f32>,
    pub connected_mass_scale: Option<f32>,
}

/// Physics, scene and joint access for the grab controller.
///
/// Lookups on despawned entities return `None`/`false` and writes to them are
/// ignored.
pub trait GrabWorld {
    /// Hits along a ray on the grab layers, nearest first.
    fn ray_hits(&mut self, origin: Vec3, direction: Dir3, max_distance: f32) -> Vec<SurfaceHit>;

    /// First hit of a sphere swept along `direction`.
    fn sphere_cast(
        &mut self,
        origin: Vec3,
        direction: Dir3,
        radius: f32,
        max_distance: f32,
    ) -> Option<SurfaceHit>;

    /// Colliders overlapping a sphere.
    fn sphere_overlap(&mut self, center: Vec3, radius: f32) -> Vec<Entity>;

    /// Closest point on a collider's surface.
    fn closest_point(&mut self, collider: Entity, point: Vec3) -> Option<Vec3>;

    fn collider_info(&self, collider: Entity) -> Option<ColliderInfo>;

    /// Connectivity of a mesh collider, built on first request.
    fn mesh_connectivity(&mut self, collider: Entity) -> Option<Arc<MeshConnectivity>>;

    fn body(&self, body: Entity) -> Option<BodyState>;

    fn set_body_velocity(&mut self, body: Entity, linear: Vec3, angular: Vec3);

    fn set_body_rotation(&mut self, body: Entity, rotation: Quat);

    /// Bodies joined to `body`: joint-connected bodies and declared chain parents.
    fn chain_links(&self, body: Entity) -> Vec<Entity>;

    /// Start or stop recording contacts of a body.
    fn set_collision_tracking(&mut self, body: Entity, enabled: bool);

    /// Whether a body has any contacts.
    fn is_colliding(&self, body: Entity) -> bool;

    /// Stop or resume collisions between a body and the player.
    fn set_player_collision_excluded(&mut self, body: Entity, excluded: bool);

    fn attach_joint(&mut self, spec: JointSpec) -> Entity;

    fn detach_joint(&mut self, joint: Entity);

    /// Whether the joint still exists and its connected body is alive.
    fn joint_connected(&self, joint: Entity) -> bool;

    fn update_joint(&mut self, joint: Entity, update: JointUpdate);

    /// Teleport a virtually grabbed object.
    fn move_target(&mut self, target: Entity, position: Vec3, rotation: Quat);

    /// World position and rotation of a virtual target.
    fn target_pose(&self, target: Entity) -> Option<(Vec3, Quat)>;
}
