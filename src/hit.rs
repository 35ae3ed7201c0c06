use bevy::prelude::*;

/// A surface contact reported by a physics query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceHit {
    pub collider: Entity,
    /// World-space contact point.
    pub point: Vec3,
    /// World-space surface normal.
    pub normal: Vec3,
    /// Distance along the query ray or cast.
    pub distance: f32,
    /// Mesh triangle under the contact, when the engine reports one.
    pub triangle: Option<usize>,
}

/// Where a hand grabbed: resolved target point plus the frame used for finger
/// placement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GrabHitData {
    pub collider: Entity,
    /// World-space grab point.
    pub position: Vec3,
    /// Grab point in the collider's local space.
    pub local_position: Vec3,
    /// World-space surface normal at the grab point.
    pub normal: Vec3,
    pub up: Vec3,
    /// Mesh triangle of the grab point, used to seed finger searches.
    pub triangle: Option<usize>,
}
