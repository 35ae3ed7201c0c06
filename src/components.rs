//! Components placed on grabbable scene objects and on the player.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-object grab overrides. Lives on the grabbed body or on an ancestor of
/// its colliders.
#[derive(Component, Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct GrabObject {
    /// Move the object directly instead of driving it with a joint.
    pub virtual_grab: bool,
    /// Replaces the hand-side mass scale while the held chain is in contact.
    pub mass_scale_override: Option<f32>,
    /// Multiplies the position spring and max force of the hand joint.
    pub position_motor_multiplier: f32,
    /// Multiplies the rotation spring and max torque of the hand joint.
    pub rotation_motor_multiplier: f32,
}

impl Default for GrabObject {
    fn default() -> Self {
        Self {
            virtual_grab: false,
            mass_scale_override: None,
            position_motor_multiplier: 1.0,
            rotation_motor_multiplier: 1.0,
        }
    }
}

impl GrabObject {
    pub fn virtual_target() -> Self {
        Self {
            virtual_grab: true,
            ..default()
        }
    }
}

/// Declares the parent body of a jointed chain link, so grabbing the child
/// also collects everything up the chain.
#[derive(Component, Clone, Copy, Debug, PartialEq, Eq)]
pub struct JointChild {
    pub parent: Entity,
}

/// Bodies connected to this one by scene joints.
#[derive(Component, Clone, Debug, Default, PartialEq, Eq)]
pub struct JointedBodies(pub Vec<Entity>);

/// The body hands belong to. Its colliders are moved onto the configured
/// player layer and left out of grab queries.
#[derive(Component, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GrabPlayer;
