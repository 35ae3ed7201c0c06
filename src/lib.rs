//! # Bevy Hand Grab
//!
//! Physics-driven VR hand grabbing for Bevy games using Avian3D physics.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bevy::prelude::*;
//! use avian3d::prelude::*;
//! use bevy_hand_grab::{HandGrabPlugin, HandSide, spawn_hand};
//!
//! fn main() {
//!     App::new()
//!         .add_plugins((DefaultPlugins, PhysicsPlugins::default()))
//!         .add_plugins(HandGrabPlugin::default())
//!         .add_systems(Startup, setup)
//!         .run();
//! }
//!
//! fn setup(mut commands: Commands) {
//!     let player = commands
//!         .spawn((RigidBody::Dynamic, Collider::capsule(0.3, 1.2)))
//!         .id();
//!     let config = bevy_hand_grab::GrabConfig::default();
//!     spawn_hand(&mut commands, &config, HandSide::Left, player);
//!     spawn_hand(&mut commands, &config, HandSide::Right, player);
//! }
//! ```
//!
//! Feed tracked poses into [`HandTracking`] and send [`GrabInput`] messages on
//! grip press and release. [`GrabEvent`]s report every grab and release.
//!
//! [`spawn_hand`] marks the player with [`GrabPlayer`]. Its colliders are moved
//! onto [`GrabConfig::player_layer`] and never show up in grab queries, so a
//! hand inside the player capsule does not grab the player.
//!
//! ## Grab Kinds
//!
//! - **Static**: the surface has no dynamic body. The player is held to the
//!   grab point, so pulling the hand moves the player (climbing).
//! - **Dynamic**: the surface belongs to a dynamic body. A spring joint drives
//!   it, and every body jointed to it, towards the hand.
//! - **Virtual**: the object carries a [`GrabObject`] with `virtual_grab` set
//!   and is moved directly with the hand.
//!
//! Mesh colliders get triangle-accurate grab points and finger curl through
//! [`bevy_mesh_connectivity`].

pub mod avian;
pub mod chain;
pub mod components;
pub mod config;
pub mod controller;
pub mod fingers;
pub mod grab_points;
pub mod hit;
pub mod joint;
pub mod plugin;
pub mod release;
pub mod static_order;
pub mod target;
pub mod world;

#[cfg(test)]
mod test_world;

// Re-export the plugin and its ECS surface
pub use plugin::{
    FingerCurls, GrabInput, GrabMeshCache, GrabSettings, Hand, HandFingers, HandGrabPlugin,
    HandTracking, spawn_hand,
};

// Re-export the grab state machine
pub use controller::{
    GrabEvent, GrabKind, GrabState, HandGrabController, HandPose, HandRig, HandSide,
};

pub use avian::AvianGrabWorld;
pub use chain::collect_chain;
pub use components::{GrabObject, GrabPlayer, JointChild, JointedBodies};
pub use config::{GrabConfig, JointDrive, MassCurve};
pub use fingers::{FingerDefinition, solve_finger_curl};
pub use grab_points::GrabPoints;
pub use hit::{GrabHitData, SurfaceHit};
pub use joint::GrabJoint;
pub use static_order::StaticGrabOrder;
pub use target::resolve_target;
pub use world::GrabWorld;
