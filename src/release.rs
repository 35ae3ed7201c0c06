//! What happens to velocities when a hand lets go.

use bevy::prelude::*;

use crate::config::GrabConfig;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReleaseVelocity {
    pub linear: Vec3,
    pub angular: Vec3,
}

/// Player velocity after letting go of a static grab.
///
/// A slow hand leaves the player floating in place; a fast one pushes off,
/// moving the player opposite to the hand.
pub fn static_release_velocity(config: &GrabConfig, hand_velocity: Vec3) -> Vec3 {
    if hand_velocity.length() <= config.release_velocity_threshold {
        Vec3::ZERO
    } else {
        -hand_velocity
    }
}

/// Inputs to [`dynamic_release_velocity`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DynamicRelease {
    pub hand_velocity: Vec3,
    pub hand_angular_velocity: Vec3,
    pub player_velocity: Vec3,
    pub player_angular_velocity: Vec3,
    pub body_mass: f32,
    pub virtual_grab: bool,
}

/// Velocity of a thrown (or gently placed) dynamic object.
///
/// Below the dynamic threshold a regular object stops dead so it can be left
/// hanging in the air, unless `physically_accurate` is set. Virtual objects
/// keep moving with the player. Above the threshold the object moves with the
/// player plus the hand velocity scaled by the mass curve.
pub fn dynamic_release_velocity(config: &GrabConfig, release: &DynamicRelease) -> ReleaseVelocity {
    let slow = release.hand_velocity.length() <= config.dynamic_release_velocity_threshold;

    if slow && !config.physically_accurate {
        if release.virtual_grab {
            return ReleaseVelocity {
                linear: release.player_velocity,
                angular: release.player_angular_velocity,
            };
        }
        return ReleaseVelocity::default();
    }

    let factor = config.mass_curve.sample(release.body_mass);
    ReleaseVelocity {
        linear: release.player_velocity + release.hand_velocity * factor,
        angular: release.player_angular_velocity + release.hand_angular_velocity * factor,
    }
}
