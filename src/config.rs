//! Grab tuning: thresholds, mass scales, joint drives and the release mass curve.

use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Collision layer bit of the player body.
pub const DEFAULT_PLAYER_LAYER: u32 = 1 << 1;

// ---------------------------------------------------------------------------
// GrabConfig
// ---------------------------------------------------------------------------

/// Every tunable of the grab system. Missing RON fields take their defaults.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GrabConfig {
    /// Leeway sphere around the hand, so grabs don't need perfect alignment.
    pub grab_radius: f32,
    /// How far inside an object its surface may still be grabbed.
    pub grab_max_depth: f32,
    /// Connected mass scale while a held object or the player touches something.
    pub grabbed_mass_scale: f32,
    /// Connected mass scale for chains anchored by a kinematic body (levers, doors).
    pub anchored_mass_scale: f32,
    /// Connected mass scale with no contacts. High enough to act as infinite.
    pub idle_mass_scale: f32,
    /// Palm direction in hand space.
    pub grab_direction: Vec3,
    /// Finger direction in hand space.
    pub forward_direction: Vec3,
    /// Hand speed below which a static release stops the player.
    pub release_velocity_threshold: f32,
    /// Hand speed below which a dynamic release stops the object.
    pub dynamic_release_velocity_threshold: f32,
    /// How long after pressing grab a target is still searched for.
    pub grab_grace_duration: f32,
    /// Never stop released objects dead, always transfer velocity.
    pub physically_accurate: bool,
    /// Layers that can be grabbed or block the hand.
    pub grab_mask: u32,
    /// Layer of the player body, removed from held chains' filters.
    pub player_layer: u32,
    /// Release velocity factor by body mass.
    pub mass_curve: MassCurve,
    /// Hand to held object.
    pub dynamic_drive: JointDrive,
    /// World anchor to player body.
    pub static_drive: JointDrive,
    /// Player body to hand body.
    pub hand_drive: JointDrive,
    /// Connected mass scale of the newest static grab.
    pub static_main_connected_mass_scale: f32,
    /// Connected mass scale of older static grabs still held.
    pub static_secondary_connected_mass_scale: f32,
    /// Finger smoothing speed in degrees per second.
    pub finger_speed: f32,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            grab_radius: 0.1,
            grab_max_depth: 0.2,
            grabbed_mass_scale: 2.0,
            anchored_mass_scale: 10.0,
            idle_mass_scale: 10000.0,
            grab_direction: Vec3::X,
            forward_direction: Vec3::Z,
            release_velocity_threshold: 0.1,
            dynamic_release_velocity_threshold: 0.05,
            grab_grace_duration: 0.2,
            physically_accurate: false,
            grab_mask: !DEFAULT_PLAYER_LAYER,
            player_layer: DEFAULT_PLAYER_LAYER,
            mass_curve: MassCurve::default(),
            dynamic_drive: JointDrive::dynamic_grab(),
            static_drive: JointDrive::static_grab(),
            hand_drive: JointDrive::hand(),
            static_main_connected_mass_scale: 1.0,
            static_secondary_connected_mass_scale: 0.25,
            finger_speed: 720.0,
        }
    }
}

impl GrabConfig {
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Read a config file, falling back to defaults when it is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let Ok(contents) = std::fs::read_to_string(path) else {
            warn!("Failed to read grab config {:?}, using defaults", path);
            return Self::default();
        };

        match Self::from_ron(&contents) {
            Ok(config) => {
                info!("Loaded grab config from {:?}", path);
                config
            }
            Err(e) => {
                warn!("Failed to parse grab config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Palm direction rotated into world space.
    pub fn palm_direction(&self, hand_rotation: Quat) -> Vec3 {
        (hand_rotation * self.grab_direction).normalize_or_zero()
    }
}

// ---------------------------------------------------------------------------
// JointDrive
// ---------------------------------------------------------------------------

/// Spring-damper gains of a grab joint.
///
/// Springs and dampers are in velocity-change per second units, max forces
/// clamp the impulse applied per second.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct JointDrive {
    pub position_spring: f32,
    pub position_damper: f32,
    pub max_force: f32,
    pub rotation_spring: f32,
    pub rotation_damper: f32,
    pub max_torque: f32,
}

impl Default for JointDrive {
    fn default() -> Self {
        Self::dynamic_grab()
    }
}

impl JointDrive {
    pub fn dynamic_grab() -> Self {
        Self {
            position_spring: 2000.0,
            position_damper: 60.0,
            max_force: 5000.0,
            rotation_spring: 800.0,
            rotation_damper: 40.0,
            max_torque: 500.0,
        }
    }

    /// Position only; the player never rotates with a static grab.
    pub fn static_grab() -> Self {
        Self {
            position_spring: 4000.0,
            position_damper: 100.0,
            max_force: 20000.0,
            rotation_spring: 0.0,
            rotation_damper: 0.0,
            max_torque: 0.0,
        }
    }

    pub fn hand() -> Self {
        Self {
            position_spring: 3000.0,
            position_damper: 80.0,
            max_force: 10000.0,
            rotation_spring: 0.0,
            rotation_damper: 0.0,
            max_torque: 0.0,
        }
    }

    /// Scale position gains by `position` and rotation gains by `rotation`.
    pub fn scaled(self, position: f32, rotation: f32) -> Self {
        Self {
            position_spring: self.position_spring * position,
            max_force: self.max_force * position,
            rotation_spring: self.rotation_spring * rotation,
            max_torque: self.max_torque * rotation,
            ..self
        }
    }
}

// ---------------------------------------------------------------------------
// MassCurve
// ---------------------------------------------------------------------------

/// Interpolation mode between mass keys.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interp {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    Constant,
}

impl Interp {
    pub fn ease(&self, t: f32) -> f32 {
        match self {
            Self::Linear => t,
            Self::EaseIn => t * t,
            Self::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Self::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Self::Constant => 0.0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct MassKey {
    /// Body mass in kilograms.
    pub mass: f32,
    /// Fraction of hand velocity transferred on release.
    pub factor: f32,
    /// Interpolation towards the next key.
    pub interp: Interp,
}

/// Keyed curve from body mass to release velocity factor.
///
/// Keys are expected in ascending mass order. Masses outside the keyed range
/// take the nearest end value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MassCurve {
    pub keys: Vec<MassKey>,
}

impl Default for MassCurve {
    /// Full transfer up to 5 kg, tapering to a quarter at 50 kg.
    fn default() -> Self {
        Self {
            keys: vec![
                MassKey {
                    mass: 5.0,
                    factor: 1.0,
                    interp: Interp::EaseOut,
                },
                MassKey {
                    mass: 50.0,
                    factor: 0.25,
                    interp: Interp::Linear,
                },
            ],
        }
    }
}

impl MassCurve {
    pub fn constant(factor: f32) -> Self {
        Self {
            keys: vec![MassKey {
                mass: 0.0,
                factor,
                interp: Interp::Linear,
            }],
        }
    }

    pub fn sample(&self, mass: f32) -> f32 {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return 1.0;
        };
        if mass <= first.mass {
            return first.factor;
        }
        if mass >= last.mass {
            return last.factor;
        }

        for window in self.keys.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            if mass >= a.mass && mass <= b.mass {
                let span = b.mass - a.mass;
                if span.abs() < 1e-6 {
                    return a.factor;
                }
                let frac = (mass - a.mass) / span;
                return a.factor + (b.factor - a.factor) * a.interp.ease(frac);
            }
        }

        last.factor
    }
}
