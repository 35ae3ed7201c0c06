//! Spring-damper grab joints.
//!
//! A [`GrabJoint`] pulls a point on its connected body towards its anchor,
//! and optionally holds the connected body's rotation relative to the anchor.
//! The drive runs before the physics step and works on velocities only, so
//! the solver still resolves contacts of everything involved.

use avian3d::prelude::*;
use bevy::prelude::*;

use crate::config::JointDrive;
use crate::world::JointAnchor;

#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct GrabJoint {
    pub anchor: JointAnchor,
    pub connected: Entity,
    /// Attachment point in the connected body's local space.
    pub connected_anchor: Vec3,
    pub drive: JointDrive,
    /// Connected rotation relative to the anchor rotation to hold.
    pub target_rotation: Option<Quat>,
    /// Inverse-mass multiplier of the anchor body.
    pub mass_scale: f32,
    /// Inverse-mass multiplier of the connected body.
    pub connected_mass_scale: f32,
    /// `false` frees the linear drive.
    pub locked: bool,
}

impl GrabJoint {
    pub fn new(anchor: JointAnchor, connected: Entity, drive: JointDrive) -> Self {
        Self {
            anchor,
            connected,
            connected_anchor: Vec3::ZERO,
            drive,
            target_rotation: None,
            mass_scale: 1.0,
            connected_mass_scale: 1.0,
            locked: true,
        }
    }

    pub fn anchor_body(&self) -> Option<Entity> {
        match self.anchor {
            JointAnchor::World(_) => None,
            JointAnchor::Body { body, .. } => Some(body),
        }
    }
}

/// Impulse per unit weight that moves an error towards zero.
///
/// The velocity change from the spring and damper never exceeds what removes
/// the whole error in one step, and the impulse is clamped by `limit * dt`.
pub fn drive_impulse(
    error: Vec3,
    relative_velocity: Vec3,
    spring: f32,
    damper: f32,
    limit: f32,
    dt: f32,
    total_weight: f32,
) -> Vec3 {
    if dt <= 0.0 || total_weight <= 0.0 {
        return Vec3::ZERO;
    }
    let full_correction = error / dt + relative_velocity;
    let delta = ((error * spring + relative_velocity * damper) * dt)
        .clamp_length_max(full_correction.length());
    (delta / total_weight).clamp_length_max(limit * dt)
}

/// Rotation vector (axis times angle) taking `current` to `target` the short way.
pub fn rotation_error(current: Quat, target: Quat) -> Vec3 {
    let mut delta = target * current.inverse();
    if delta.w < 0.0 {
        delta = -delta;
    }
    let (axis, angle) = delta.to_axis_angle();
    if angle.is_finite() { axis * angle } else { Vec3::ZERO }
}

#[derive(Clone, Copy)]
struct JointSide {
    body: Option<Entity>,
    point: Vec3,
    center: Vec3,
    rotation: Quat,
    linear: Vec3,
    angular: Vec3,
    weight: f32,
}

impl JointSide {
    fn point_velocity(&self) -> Vec3 {
        self.linear + self.angular.cross(self.point - self.center)
    }
}

type DrivenBody = (
    &'static RigidBody,
    &'static Position,
    &'static Rotation,
    &'static mut LinearVelocity,
    &'static mut AngularVelocity,
    Option<&'static ComputedMass>,
);

fn body_side(bodies: &Query<DrivenBody>, body: Entity, local: Vec3, scale: f32) -> Option<JointSide> {
    let (rb, position, rotation, linear, angular, mass) = bodies.get(body).ok()?;
    let weight = if rb.is_dynamic() {
        mass.map(|m| m.inverse()).unwrap_or(1.0) * scale
    } else {
        0.0
    };
    Some(JointSide {
        body: Some(body),
        point: position.0 + rotation.0 * local,
        center: position.0,
        rotation: rotation.0,
        linear: linear.0,
        angular: angular.0,
        weight,
    })
}

fn apply(bodies: &mut Query<DrivenBody>, side: &JointSide, linear: Vec3, angular: Vec3) {
    let Some(body) = side.body else {
        return;
    };
    if side.weight <= 0.0 {
        return;
    }
    if let Ok((_, _, _, mut lv, mut av, _)) = bodies.get_mut(body) {
        lv.0 += linear * side.weight;
        av.0 += angular * side.weight;
    }
}

pub(crate) fn drive_grab_joints(
    time: Res<Time>,
    joints: Query<&GrabJoint>,
    mut bodies: Query<DrivenBody>,
) {
    let dt = time.delta_secs();
    if dt <= 0.0 {
        return;
    }

    for joint in &joints {
        let anchor = match joint.anchor {
            JointAnchor::World(point) => Some(JointSide {
                body: None,
                point,
                center: point,
                rotation: Quat::IDENTITY,
                linear: Vec3::ZERO,
                angular: Vec3::ZERO,
                weight: 0.0,
            }),
            JointAnchor::Body { body, local } => body_side(&bodies, body, local, joint.mass_scale),
        };
        let connected = body_side(
            &bodies,
            joint.connected,
            joint.connected_anchor,
            joint.connected_mass_scale,
        );
        let (Some(a), Some(b)) = (anchor, connected) else {
            continue;
        };

        let total = a.weight + b.weight;
        if total <= 0.0 {
            continue;
        }

        let drive = &joint.drive;
        let linear = if joint.locked {
            drive_impulse(
                a.point - b.point,
                a.point_velocity() - b.point_velocity(),
                drive.position_spring,
                drive.position_damper,
                drive.max_force,
                dt,
                total,
            )
        } else {
            Vec3::ZERO
        };

        let angular = match joint.target_rotation {
            Some(relative) if drive.rotation_spring > 0.0 => drive_impulse(
                rotation_error(b.rotation, a.rotation * relative),
                a.angular - b.angular,
                drive.rotation_spring,
                drive.rotation_damper,
                drive.max_torque,
                dt,
                total,
            ),
            _ => Vec3::ZERO,
        };

        apply(&mut bodies, &b, linear, angular);
        apply(&mut bodies, &a, -linear, -angular);
    }
}
