//! Finger curl around grabbed mesh surfaces.
//!
//! Each finger sweeps a disk around its curl axis. The disk is intersected
//! with the grabbed mesh, and the finger curls to the intersection that needs
//! the most curl while staying inside its range.

use bevy::math::Affine3A;
use bevy::prelude::*;
use bevy_mesh_connectivity::{Disk, MeshConnectivity, disk_intersections};
use serde::{Deserialize, Serialize};

use crate::controller::HandSide;

/// Geometry of one finger, in hand space. Angles are in degrees.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FingerDefinition {
    /// Base joint position in hand space.
    pub base: Vec3,
    /// Finger length, the radius of the curl disk.
    pub length: f32,
    /// Curl axis, normal of the curl disk.
    pub disk_direction: Vec3,
    /// Spread axis.
    pub up_direction: Vec3,
    /// Curl at which intersections are measured.
    pub max_curl_angle: f32,
    pub curl_angle_range: f32,
    /// Sideways rotation while grabbing.
    pub grab_spread: f32,
    /// Extra base curl applied on top of the solved curl.
    pub grab_curl_offset: f32,
    /// Curl when nothing is under the finger.
    pub idle_curl: f32,
    pub thumb: bool,
}

impl Default for FingerDefinition {
    fn default() -> Self {
        Self {
            base: Vec3::ZERO,
            length: 0.08,
            disk_direction: Vec3::X,
            up_direction: Vec3::Y,
            max_curl_angle: 90.0,
            curl_angle_range: 180.0,
            grab_spread: 0.0,
            grab_curl_offset: 0.0,
            idle_curl: 0.0,
            thumb: false,
        }
    }
}

impl FingerDefinition {
    fn spread_rotation(&self) -> Quat {
        axis_rotation(self.up_direction, self.grab_spread)
    }

    fn curl_axis(&self) -> Vec3 {
        self.disk_direction.normalize_or_zero()
    }
}

/// Solve the curl of `finger` against a grabbed mesh.
///
/// `mesh_transform` maps mesh space to world, `hand` maps hand space to world.
/// Returns `None` when the curl disk misses the mesh.
pub fn solve_finger_curl(
    connectivity: &MeshConnectivity,
    start_triangle: usize,
    mesh_transform: &Affine3A,
    hand: &Affine3A,
    finger: &FingerDefinition,
    side: HandSide,
) -> Option<f32> {
    let curl_axis = finger.curl_axis();
    let spread = finger.spread_rotation();
    let normal_rotation = spread * axis_rotation(curl_axis, finger.grab_curl_offset);

    let disk = Disk {
        center: hand.transform_point3(finger.base),
        normal: hand
            .transform_vector3(normal_rotation * curl_axis)
            .normalize_or_zero(),
        radius: finger.length,
    };

    let points = disk_intersections(connectivity, start_triangle, &disk, mesh_transform);
    if points.is_empty() {
        return None;
    }

    let inverse = hand.inverse();
    // Measured against the fully curled finger.
    let curled = spread
        * axis_rotation(curl_axis, finger.max_curl_angle)
        * curl_axis.cross(finger.up_direction.normalize_or_zero());
    let measure_axis = spread * -curl_axis;
    let thumb_direction = match side {
        HandSide::Left => -Vec3::X,
        HandSide::Right => Vec3::X,
    };

    let mut highest = 0.0_f32;
    for point in points {
        let direction = (inverse.transform_point3(point) - finger.base).normalize_or_zero();
        let angle = if finger.thumb {
            signed_angle(direction, thumb_direction, Vec3::Z)
        } else {
            signed_angle(curled, direction, measure_axis)
        };
        if angle > highest && angle <= finger.curl_angle_range {
            highest = angle;
        }
    }

    Some(highest.clamp(0.0, finger.curl_angle_range) - finger.max_curl_angle)
}

/// Local base-joint rotation for a solved curl, or the idle pose for `None`.
pub fn finger_rotation(finger: &FingerDefinition, curl: Option<f32>) -> Quat {
    let curl_axis = finger.curl_axis();
    match curl {
        Some(curl) => {
            finger.spread_rotation()
                * axis_rotation(-curl_axis, curl + finger.grab_curl_offset)
        }
        None => axis_rotation(curl_axis, finger.idle_curl),
    }
}

/// Step `current` towards `target` by at most `max_degrees`.
pub fn rotate_towards(current: Quat, target: Quat, max_degrees: f32) -> Quat {
    current.rotate_towards(target, max_degrees.to_radians())
}

/// Angle in degrees from `from` to `to`, negative when the turn is clockwise
/// around `axis`.
pub fn signed_angle(from: Vec3, to: Vec3, axis: Vec3) -> f32 {
    let angle = from.angle_between(to).to_degrees();
    if axis.dot(from.cross(to)) < 0.0 {
        -angle
    } else {
        angle
    }
}

fn axis_rotation(axis: Vec3, degrees: f32) -> Quat {
    match axis.try_normalize() {
        Some(axis) => Quat::from_axis_angle(axis, degrees.to_radians()),
        None => Quat::IDENTITY,
    }
}
