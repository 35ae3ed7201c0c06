//! Per-hand grab state machine.
//!
//! ```text
//! Idle --press--> Armed --target found--> Static | Dynamic | Virtual --release--> Idle
//!                   |
//!                   +--grace expired / release--> Idle
//! ```
//!
//! `update` runs every frame and does target search, hand clamping and virtual
//! grab motion. `fixed_update` runs every physics tick and does the
//! penetration ray, hand body drive, joint upkeep, mass scaling and
//! broken-joint recovery.

use std::mem;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::chain::{ChainClaims, collect_chain};
use crate::components::GrabObject;
use crate::config::GrabConfig;
use crate::hit::{GrabHitData, SurfaceHit};
use crate::release::{DynamicRelease, dynamic_release_velocity, static_release_velocity};
use crate::target::{TriangleSeed, refine_mesh_hit, resolve_target};
use crate::world::{GrabWorld, JointAnchor, JointSpec, JointUpdate};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandSide {
    Left,
    Right,
}

/// Tracked hand input for one frame.
///
/// Hand values are relative to the tracking origin, which rides on the player
/// body. `origin` places them in the world.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandPose {
    pub origin: Transform,
    pub local_position: Vec3,
    pub local_rotation: Quat,
    pub local_velocity: Vec3,
    pub local_angular_velocity: Vec3,
    /// World position of the head, the start of the penetration ray.
    pub head: Vec3,
    pub tracked: bool,
}

impl Default for HandPose {
    fn default() -> Self {
        Self {
            origin: Transform::IDENTITY,
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            local_velocity: Vec3::ZERO,
            local_angular_velocity: Vec3::ZERO,
            head: Vec3::ZERO,
            tracked: false,
        }
    }
}

impl HandPose {
    pub fn position(&self) -> Vec3 {
        self.origin.transform_point(self.local_position)
    }

    pub fn rotation(&self) -> Quat {
        self.origin.rotation * self.local_rotation
    }

    pub fn velocity(&self) -> Vec3 {
        self.origin.rotation * self.local_velocity
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.origin.rotation * self.local_angular_velocity
    }
}

/// Bodies a hand works with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandRig {
    pub player: Entity,
    /// Collider-less body following the tracked hand; dynamic grabs attach to it.
    pub hand_body: Entity,
    /// Joint from the player body to the hand body.
    pub hand_link: Entity,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GrabKind {
    /// Player body held to a fixed point in the world.
    Static,
    /// Object driven towards the hand by a joint.
    Dynamic,
    /// Object teleported with the hand.
    Virtual,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StaticGrab {
    pub joint: Entity,
    /// Kinematic or static body the anchor rides on.
    pub anchor_body: Option<Entity>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DynamicGrab {
    pub joint: Entity,
    pub root: Entity,
    /// Every body joined to `root`, `root` first.
    pub chain: Vec<Entity>,
    pub grab_object: Option<GrabObject>,
    /// The chain has a kinematic body and is treated as anchored.
    pub anchored: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VirtualGrab {
    pub target: Entity,
    /// Grab point relative to the target at grab time, in target space.
    pub local_point: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GrabState {
    Idle,
    /// Pressed, searching for a target until `remaining` runs out.
    Armed { remaining: f32 },
    Static(StaticGrab),
    Dynamic(DynamicGrab),
    Virtual(VirtualGrab),
}

impl GrabState {
    pub fn kind(&self) -> Option<GrabKind> {
        match self {
            Self::Static(_) => Some(GrabKind::Static),
            Self::Dynamic(_) => Some(GrabKind::Dynamic),
            Self::Virtual(_) => Some(GrabKind::Virtual),
            Self::Idle | Self::Armed { .. } => None,
        }
    }
}

#[derive(Message, Clone, Debug, PartialEq)]
pub enum GrabEvent {
    Grabbed {
        side: HandSide,
        kind: GrabKind,
        /// Driven body for dynamic grabs, moved object for virtual grabs,
        /// hit collider for static grabs.
        target: Entity,
        hit: GrabHitData,
    },
    Released {
        side: HandSide,
        kind: GrabKind,
        target: Entity,
        /// World hand velocity at release.
        velocity: Vec3,
        angular_velocity: Vec3,
        /// The joint broke instead of the hand letting go.
        broken: bool,
    },
}

impl GrabEvent {
    pub fn side(&self) -> HandSide {
        match self {
            Self::Grabbed { side, .. } | Self::Released { side, .. } => *side,
        }
    }

    pub fn target(&self) -> Entity {
        match self {
            Self::Grabbed { target, .. } | Self::Released { target, .. } => *target,
        }
    }
}

/// Grab-time frame, kept for hand posing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GrabFrame {
    /// Surface normal in collider space.
    pub local_normal: Vec3,
    /// Hand forward projected onto the surface, in collider space.
    pub local_forward: Vec3,
    /// Inverse of the hand rotation at grab time.
    pub start_hand_rotation: Quat,
    pub start_object_rotation: Quat,
}

impl Default for GrabFrame {
    fn default() -> Self {
        Self {
            local_normal: Vec3::Y,
            local_forward: Vec3::Z,
            start_hand_rotation: Quat::IDENTITY,
            start_object_rotation: Quat::IDENTITY,
        }
    }
}

pub struct HandGrabController {
    side: HandSide,
    rig: HandRig,
    state: GrabState,
    pose: HandPose,
    penetration: Option<SurfaceHit>,
    clamped_position: Vec3,
    grab_hit: Option<GrabHitData>,
    frame: GrabFrame,
    static_grab_cooldown: f32,
    last_triangle: TriangleSeed,
}

impl HandGrabController {
    pub fn new(side: HandSide, rig: HandRig) -> Self {
        Self {
            side,
            rig,
            state: GrabState::Idle,
            pose: HandPose::default(),
            penetration: None,
            clamped_position: Vec3::ZERO,
            grab_hit: None,
            frame: GrabFrame::default(),
            static_grab_cooldown: 0.0,
            last_triangle: None,
        }
    }

    pub fn side(&self) -> HandSide {
        self.side
    }

    pub fn rig(&self) -> HandRig {
        self.rig
    }

    pub fn state(&self) -> &GrabState {
        &self.state
    }

    pub fn pose(&self) -> &HandPose {
        &self.pose
    }

    pub fn is_grabbing(&self) -> bool {
        self.state.kind().is_some()
    }

    pub fn grab_hit(&self) -> Option<&GrabHitData> {
        self.grab_hit.as_ref()
    }

    pub fn grab_frame(&self) -> &GrabFrame {
        &self.frame
    }

    /// Latest penetration hit between head and hand.
    pub fn penetration(&self) -> Option<&SurfaceHit> {
        self.penetration.as_ref()
    }

    /// Mesh triangle last under the hand, with its collider.
    ///
    /// Seeds the next triangle walk. Cleared on release and when tracking drops.
    pub fn last_triangle(&self) -> TriangleSeed {
        self.last_triangle
    }

    /// Hand position pulled back to the penetration hit while not grabbing.
    pub fn clamped_position(&self) -> Vec3 {
        self.clamped_position
    }

    /// Bodies of the current dynamic grab chain.
    pub fn chain(&self) -> &[Entity] {
        match &self.state {
            GrabState::Dynamic(grab) => &grab.chain,
            _ => &[],
        }
    }

    pub fn static_joint(&self) -> Option<Entity> {
        match &self.state {
            GrabState::Static(grab) => Some(grab.joint),
            _ => None,
        }
    }

    pub fn static_grab_cooldown(&self) -> f32 {
        self.static_grab_cooldown
    }

    /// Free the static joint's linear drive for a while, e.g. while snap turning.
    pub fn add_static_grab_cooldown(&mut self, seconds: f32) {
        self.static_grab_cooldown += seconds.max(0.0);
    }

    /// Grab input went down. Starts the grace window unless already holding.
    pub fn press(&mut self, config: &GrabConfig) {
        match self.state {
            GrabState::Idle | GrabState::Armed { .. } => {
                self.state = GrabState::Armed {
                    remaining: config.grab_grace_duration,
                };
            }
            _ => {}
        }
    }

    /// Grab input went up.
    pub fn release<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
        claims: &ChainClaims,
    ) -> Option<GrabEvent> {
        if let GrabState::Armed { .. } = self.state {
            self.state = GrabState::Idle;
            return None;
        }
        self.release_grab(world, config, claims, false)
    }

    /// Per-frame update.
    pub fn update<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
        dt: f32,
        pose: &HandPose,
    ) -> Option<GrabEvent> {
        if pose.tracked {
            self.pose = *pose;
            self.update_clamped_position();
        } else {
            self.last_triangle = None;
        }

        let mut event = None;
        if let GrabState::Armed { remaining } = self.state {
            let remaining = (remaining - dt).max(0.0);
            if remaining > 0.0 {
                self.state = GrabState::Armed { remaining };
                event = self.try_grab(world, config);
            } else {
                debug!("{:?} hand grab window expired", self.side);
                self.state = GrabState::Idle;
            }
        }

        if event.is_none() && self.is_grabbing() && pose.tracked {
            self.track_grab_triangle(world, config);
        }
        self.update_virtual_grab(world);
        event
    }

    /// Per-physics-tick update.
    pub fn fixed_update<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
        dt: f32,
        claims: &ChainClaims,
    ) -> Option<GrabEvent> {
        self.update_penetration(world, config);

        if self.pose.tracked {
            self.drive_hand_body(world);
        }

        let player_colliding = world.is_colliding(self.rig.player);
        let mut event = None;

        match &self.state {
            GrabState::Static(grab) => {
                let grab = grab.clone();
                self.maintain_static_grab(world, config, &grab, player_colliding);
            }
            GrabState::Dynamic(grab) => {
                if world.joint_connected(grab.joint) {
                    let grab = grab.clone();
                    self.scale_dynamic_masses(world, config, &grab, player_colliding);
                } else {
                    warn!(
                        "{:?} hand dynamic grab on {:?} was broken, releasing",
                        self.side, grab.root
                    );
                    event = self.release_grab(world, config, claims, true);
                }
            }
            _ => {}
        }

        self.static_grab_cooldown = (self.static_grab_cooldown - dt).max(0.0);
        event
    }

    // -----------------------------------------------------------------------
    // Tracking
    // -----------------------------------------------------------------------

    fn update_clamped_position(&mut self) {
        let hand = self.pose.position();
        self.clamped_position = match (&self.penetration, self.is_grabbing()) {
            (Some(hit), false) => {
                let delta = hand - self.pose.head;
                let length = delta.length();
                match delta.try_normalize() {
                    Some(dir) => self.pose.head + dir * length.min(hit.distance),
                    None => hand,
                }
            }
            _ => hand,
        };
    }

    fn update_penetration<W: GrabWorld + ?Sized>(&mut self, world: &mut W, config: &GrabConfig) {
        self.penetration = None;

        let hand = self.pose.position();
        let delta = hand - self.pose.head;
        let Ok(direction) = Dir3::new(delta) else {
            return;
        };

        let hits = world.ray_hits(self.pose.head, direction, delta.length() + config.grab_radius);
        for hit in hits {
            let info = world.collider_info(hit.collider);
            let ignored = match &self.state {
                GrabState::Virtual(grab) => {
                    hit.collider == grab.target || info.is_some_and(|i| i.belongs_to(grab.target))
                }
                GrabState::Dynamic(grab) => info
                    .and_then(|i| i.body)
                    .is_some_and(|body| grab.chain.contains(&body)),
                _ => false,
            };
            if !ignored {
                self.penetration = Some(hit);
                break;
            }
        }
    }

    /// Pin the hand body to the (clamped) hand and copy tracked motion onto it.
    fn drive_hand_body<W: GrabWorld + ?Sized>(&mut self, world: &mut W) {
        let anchor_world = if !self.is_grabbing() && self.penetration.is_some() {
            self.clamped_position
        } else {
            let hand = self.pose.position();
            self.clamped_position = hand;
            hand
        };

        if let Some(player) = world.body(self.rig.player) {
            world.update_joint(
                self.rig.hand_link,
                JointUpdate {
                    anchor: Some(JointAnchor::Body {
                        body: self.rig.player,
                        local: player.to_local(anchor_world),
                    }),
                    ..default()
                },
            );
        }

        world.set_body_rotation(self.rig.hand_body, self.pose.rotation());
        world.set_body_velocity(
            self.rig.hand_body,
            self.pose.velocity(),
            self.pose.angular_velocity(),
        );
    }

    // -----------------------------------------------------------------------
    // Grabbing
    // -----------------------------------------------------------------------

    fn try_grab<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
    ) -> Option<GrabEvent> {
        let hit = resolve_target(
            world,
            config,
            self.pose.position(),
            self.pose.rotation(),
            self.penetration.as_ref(),
            self.last_triangle,
        )?;
        self.last_triangle = hit.triangle.map(|triangle| (hit.collider, triangle));
        let info = world.collider_info(hit.collider)?;

        let inverse_rotation = info.rotation.inverse();
        let normal = hit.normal.normalize_or_zero();
        let forward = self.pose.rotation() * config.forward_direction;
        let projected = (forward - normal * forward.dot(normal)).normalize_or_zero();
        self.frame = GrabFrame {
            local_normal: inverse_rotation * normal,
            local_forward: inverse_rotation * projected,
            start_hand_rotation: self.pose.rotation().inverse(),
            start_object_rotation: info.rotation,
        };
        self.grab_hit = Some(hit);

        let grab_object = info.grab_object;
        let body = info
            .grab_body()
            .and_then(|entity| world.body(entity).map(|state| (entity, state)));

        let event = match (body, grab_object) {
            (Some((root, state)), _) if state.is_dynamic() => {
                self.begin_dynamic(world, config, &hit, root, grab_object.map(|(_, g)| g))
            }
            (_, Some((target, settings))) if settings.virtual_grab => {
                self.begin_virtual(world, &hit, target)?
            }
            _ => self.begin_static(world, config, &hit, body.map(|(entity, _)| entity)),
        };
        Some(event)
    }

    fn begin_dynamic<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
        hit: &GrabHitData,
        root: Entity,
        grab_object: Option<GrabObject>,
    ) -> GrabEvent {
        let (connected_anchor, start_rotation) = world
            .body(root)
            .map(|state| (state.to_local(hit.position), state.rotation))
            .unwrap_or((Vec3::ZERO, Quat::IDENTITY));
        self.frame.start_object_rotation = start_rotation;

        let drive = match grab_object {
            Some(settings) => config.dynamic_drive.scaled(
                settings.position_motor_multiplier,
                settings.rotation_motor_multiplier,
            ),
            None => config.dynamic_drive,
        };

        let joint = world.attach_joint(JointSpec {
            anchor: JointAnchor::Body {
                body: self.rig.hand_body,
                local: Vec3::ZERO,
            },
            connected: root,
            connected_anchor,
            drive,
            hold_rotation: true,
            mass_scale: 1.0,
            connected_mass_scale: config.idle_mass_scale,
        });

        let chain = collect_chain(world, root);
        // Doors and levers keep colliding with the player.
        let anchored = chain
            .iter()
            .any(|&body| world.body(body).is_some_and(|state| state.is_kinematic()));
        for &body in &chain {
            if !anchored {
                world.set_player_collision_excluded(body, true);
            }
            world.set_collision_tracking(body, true);
        }

        info!(
            "{:?} hand dynamic grab on {:?} ({} bodies in chain)",
            self.side,
            root,
            chain.len()
        );
        self.state = GrabState::Dynamic(DynamicGrab {
            joint,
            root,
            chain,
            grab_object,
            anchored,
        });

        GrabEvent::Grabbed {
            side: self.side,
            kind: GrabKind::Dynamic,
            target: root,
            hit: *hit,
        }
    }

    fn begin_virtual<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        hit: &GrabHitData,
        target: Entity,
    ) -> Option<GrabEvent> {
        let (position, rotation) = world.target_pose(target)?;
        self.frame.start_object_rotation = rotation;

        info!("{:?} hand virtual grab on {:?}", self.side, target);
        self.state = GrabState::Virtual(VirtualGrab {
            target,
            local_point: rotation.inverse() * (hit.position - position),
        });

        Some(GrabEvent::Grabbed {
            side: self.side,
            kind: GrabKind::Virtual,
            target,
            hit: *hit,
        })
    }

    fn begin_static<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
        hit: &GrabHitData,
        anchor_body: Option<Entity>,
    ) -> GrabEvent {
        let joint = self.attach_static_joint(world, config, anchor_body);

        info!("{:?} hand static grab on {:?}", self.side, hit.collider);
        self.state = GrabState::Static(StaticGrab { joint, anchor_body });

        GrabEvent::Grabbed {
            side: self.side,
            kind: GrabKind::Static,
            target: hit.collider,
            hit: *hit,
        }
    }

    /// Joint holding the player's hand point at the current hand position.
    ///
    /// Stops the player, or matches the velocity of a moving anchor body.
    fn attach_static_joint<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
        anchor_body: Option<Entity>,
    ) -> Entity {
        let hand = self.pose.position();
        let anchor_state = anchor_body.and_then(|body| world.body(body).map(|state| (body, state)));

        let anchor = match anchor_state {
            Some((body, state)) => JointAnchor::Body {
                body,
                local: state.to_local(hand),
            },
            None => JointAnchor::World(hand),
        };

        let player = world.body(self.rig.player);
        let joint = world.attach_joint(JointSpec {
            anchor,
            connected: self.rig.player,
            connected_anchor: player.map(|p| p.to_local(hand)).unwrap_or(Vec3::ZERO),
            drive: config.static_drive,
            hold_rotation: false,
            mass_scale: 1.0,
            connected_mass_scale: config.static_main_connected_mass_scale,
        });

        let carried = anchor_state
            .map(|(_, state)| state.linear_velocity)
            .unwrap_or(Vec3::ZERO);
        let angular = player.map(|p| p.angular_velocity).unwrap_or(Vec3::ZERO);
        world.set_body_velocity(self.rig.player, carried, angular);

        joint
    }

    // -----------------------------------------------------------------------
    // Holding
    // -----------------------------------------------------------------------

    /// Walk from the last triangle to the one now under the grab point.
    fn track_grab_triangle<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
    ) {
        let Some(hit) = self.grab_hit else {
            return;
        };
        let Some((collider, triangle)) = self.last_triangle.filter(|(c, _)| *c == hit.collider)
        else {
            return;
        };
        let Some(info) = world.collider_info(collider).filter(|info| info.is_mesh) else {
            return;
        };
        let Some(connectivity) = world.mesh_connectivity(collider) else {
            return;
        };

        let palm = config.palm_direction(self.pose.rotation());
        let origin = info.to_world(hit.local_position);
        if let Ok(refined) =
            refine_mesh_hit(&connectivity, &info, config, collider, origin, Some(triangle), palm)
            && let Some(triangle) = refined.triangle
        {
            self.last_triangle = Some((collider, triangle));
            if let Some(grab_hit) = self.grab_hit.as_mut() {
                grab_hit.triangle = Some(triangle);
            }
        }
    }

    fn update_virtual_grab<W: GrabWorld + ?Sized>(&mut self, world: &mut W) {
        let GrabState::Virtual(grab) = &self.state else {
            return;
        };

        let hand = match &self.penetration {
            Some(hit) => hit.point,
            None => self.pose.position(),
        };
        let rotation = self.pose.rotation()
            * self.frame.start_hand_rotation
            * self.frame.start_object_rotation;
        let position = hand - rotation * grab.local_point;
        world.move_target(grab.target, position, rotation);
    }

    fn maintain_static_grab<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
        grab: &StaticGrab,
        player_colliding: bool,
    ) {
        if !world.joint_connected(grab.joint) {
            if self.static_grab_cooldown <= 0.0 {
                debug!("{:?} hand re-anchoring static grab", self.side);
                world.detach_joint(grab.joint);
                let joint = self.attach_static_joint(world, config, grab.anchor_body);
                self.state = GrabState::Static(StaticGrab {
                    joint,
                    anchor_body: grab.anchor_body,
                });
            }
            return;
        }

        // Locked is the most responsive; free avoids fighting the solver on contact.
        let free = self.static_grab_cooldown > 0.0 || player_colliding;
        let connected_anchor = world
            .body(self.rig.player)
            .map(|player| player.to_local(self.pose.position()));
        world.update_joint(
            grab.joint,
            JointUpdate {
                connected_anchor,
                locked: Some(!free),
                ..default()
            },
        );
    }

    fn scale_dynamic_masses<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
        grab: &DynamicGrab,
        player_colliding: bool,
    ) {
        let chain_colliding = grab.chain.iter().any(|&body| world.is_colliding(body));
        let anchored = grab
            .chain
            .iter()
            .any(|&body| world.body(body).is_some_and(|state| state.is_kinematic()));

        let (hand_link_scale, joint_update) = if chain_colliding || anchored || player_colliding {
            let connected = if anchored {
                config.anchored_mass_scale
            } else {
                config.grabbed_mass_scale
            };
            let mass_scale = grab.grab_object.and_then(|g| g.mass_scale_override);
            (
                config.grabbed_mass_scale,
                JointUpdate {
                    mass_scale,
                    connected_mass_scale: Some(connected),
                    ..default()
                },
            )
        } else {
            (
                config.idle_mass_scale,
                JointUpdate {
                    connected_mass_scale: Some(config.idle_mass_scale),
                    ..default()
                },
            )
        };

        world.update_joint(grab.joint, joint_update);
        world.update_joint(
            self.rig.hand_link,
            JointUpdate {
                connected_mass_scale: Some(hand_link_scale),
                ..default()
            },
        );
    }

    // -----------------------------------------------------------------------
    // Releasing
    // -----------------------------------------------------------------------

    fn release_grab<W: GrabWorld + ?Sized>(
        &mut self,
        world: &mut W,
        config: &GrabConfig,
        claims: &ChainClaims,
        broken: bool,
    ) -> Option<GrabEvent> {
        let hand_velocity = self.pose.velocity();
        let hand_angular = self.pose.angular_velocity();
        let target_collider = self.grab_hit.map(|hit| hit.collider);

        let (kind, target) = match mem::replace(&mut self.state, GrabState::Idle) {
            GrabState::Idle => return None,
            GrabState::Armed { .. } => return None,
            GrabState::Static(grab) => {
                world.detach_joint(grab.joint);
                let angular = world
                    .body(self.rig.player)
                    .map(|p| p.angular_velocity)
                    .unwrap_or(Vec3::ZERO);
                world.set_body_velocity(
                    self.rig.player,
                    static_release_velocity(config, hand_velocity),
                    angular,
                );
                self.relax_hand_link(world, config);
                (GrabKind::Static, target_collider.unwrap_or(grab.joint))
            }
            GrabState::Dynamic(grab) => {
                world.detach_joint(grab.joint);
                for &body in &grab.chain {
                    if claims.contains(body) {
                        continue;
                    }
                    world.set_collision_tracking(body, false);
                    if !grab.anchored {
                        world.set_player_collision_excluded(body, false);
                    }
                }

                if let Some(root) = world.body(grab.root).filter(|state| state.is_dynamic()) {
                    let player = world.body(self.rig.player);
                    let velocity = dynamic_release_velocity(
                        config,
                        &DynamicRelease {
                            hand_velocity,
                            hand_angular_velocity: hand_angular,
                            player_velocity: player.map(|p| p.linear_velocity).unwrap_or(Vec3::ZERO),
                            player_angular_velocity: player
                                .map(|p| p.angular_velocity)
                                .unwrap_or(Vec3::ZERO),
                            body_mass: root.mass,
                            virtual_grab: grab.grab_object.is_some_and(|g| g.virtual_grab),
                        },
                    );
                    world.set_body_velocity(grab.root, velocity.linear, velocity.angular);
                }

                self.relax_hand_link(world, config);
                (GrabKind::Dynamic, grab.root)
            }
            GrabState::Virtual(grab) => (GrabKind::Virtual, grab.target),
        };

        self.last_triangle = None;
        info!("{:?} hand released {:?} grab on {:?}", self.side, kind, target);
        Some(GrabEvent::Released {
            side: self.side,
            kind,
            target,
            velocity: hand_velocity,
            angular_velocity: hand_angular,
            broken,
        })
    }

    fn relax_hand_link<W: GrabWorld + ?Sized>(&self, world: &mut W, config: &GrabConfig) {
        world.update_joint(
            self.rig.hand_link,
            JointUpdate {
                connected_mass_scale: Some(config.idle_mass_scale),
                ..default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MassCurve;
    use crate::test_world::{MockWorld, anchor_point};

    const DT: f32 = 1.0 / 90.0;

    struct Scene {
        world: MockWorld,
        controller: HandGrabController,
        config: GrabConfig,
        player: Entity,
    }

    fn scene() -> Scene {
        let mut world = MockWorld::new();
        let player = world.add_dynamic_body(Vec3::ZERO, 70.0);
        let hand_body = world.add_kinematic_body(Vec3::ZERO);
        let hand_link = world.spawn();
        let controller = HandGrabController::new(
            HandSide::Right,
            HandRig {
                player,
                hand_body,
                hand_link,
            },
        );
        Scene {
            world,
            controller,
            config: GrabConfig {
                mass_curve: MassCurve::constant(0.5),
                ..default()
            },
            player,
        }
    }

    fn pose(position: Vec3, velocity: Vec3) -> HandPose {
        HandPose {
            local_position: position,
            local_velocity: velocity,
            head: Vec3::new(0.0, 1.6, 0.0),
            tracked: true,
            ..default()
        }
    }

    impl Scene {
        /// A dynamic box of `mass` whose surface the palm sphere cast hits.
        fn dynamic_box(&mut self, mass: f32) -> Entity {
            let body = self.world.add_dynamic_body(Vec3::new(0.6, 1.0, 0.0), mass);
            let collider = self.world.add_collider(Vec3::new(0.6, 1.0, 0.0), Some(body), None);
            self.world.sphere_cast_result = Some(MockWorld::hit(
                collider,
                Vec3::new(0.5, 1.0, 0.0),
                -Vec3::X,
                0.05,
            ));
            body
        }

        fn press_and_update(&mut self, pose: &HandPose) -> Option<GrabEvent> {
            self.controller.press(&self.config);
            self.controller.update(&mut self.world, &self.config, DT, pose)
        }

        fn release(&mut self) -> Option<GrabEvent> {
            self.controller
                .release(&mut self.world, &self.config, &ChainClaims::default())
        }

        fn fixed(&mut self) -> Option<GrabEvent> {
            self.controller
                .fixed_update(&mut self.world, &self.config, DT, &ChainClaims::default())
        }
    }

    #[test]
    fn slow_dynamic_release_stops_object() {
        let mut s = scene();
        let body = s.dynamic_box(2.0);
        let hand = pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO);

        let event = s.press_and_update(&hand).unwrap();
        assert!(matches!(
            event,
            GrabEvent::Grabbed { kind: GrabKind::Dynamic, target, .. } if target == body
        ));
        assert!(s.world.excluded.contains(&body));
        assert!(s.world.tracking.contains(&body));

        s.world.set_velocity(body, Vec3::new(3.0, 0.0, 0.0));
        let slow = pose(Vec3::new(0.45, 1.0, 0.0), Vec3::new(0.01, 0.0, 0.0));
        s.controller.update(&mut s.world, &s.config, DT, &slow);

        let event = s.release().unwrap();
        assert!(matches!(event, GrabEvent::Released { kind: GrabKind::Dynamic, broken: false, .. }));
        assert_eq!(s.world.velocity(body), Vec3::ZERO);
        assert_eq!(*s.controller.state(), GrabState::Idle);
        assert!(!s.world.excluded.contains(&body));
        assert!(s.world.joints.is_empty());
    }

    #[test]
    fn fast_dynamic_release_throws_object() {
        let mut s = scene();
        let body = s.dynamic_box(2.0);
        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO))
            .unwrap();

        let hand_velocity = Vec3::new(0.0, 1.0, 3.0);
        s.controller.update(
            &mut s.world,
            &s.config,
            DT,
            &pose(Vec3::new(0.45, 1.0, 0.0), hand_velocity),
        );
        s.release().unwrap();

        assert_eq!(s.world.velocity(body), hand_velocity * 0.5);
    }

    #[test]
    fn joint_targets_hit_point_on_body() {
        let mut s = scene();
        let body = s.dynamic_box(1.0);
        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO));

        let (&joint_entity, joint) = s.world.joints.iter().next().unwrap();
        assert_eq!(joint.spec.connected, body);
        assert!(joint.spec.connected_anchor.distance(Vec3::new(-0.1, 0.0, 0.0)) < 1e-6);
        assert_eq!(joint.spec.connected_mass_scale, s.config.idle_mass_scale);
        assert!(joint.spec.hold_rotation);
        assert_eq!(
            anchor_point(&s.world, joint.spec.anchor),
            Some(Vec3::ZERO),
            "anchored on the hand body"
        );
        assert_eq!(s.controller.chain(), &[body]);
        assert!(s.world.joint_connected(joint_entity));
    }

    #[test]
    fn broken_dynamic_joint_releases() {
        let mut s = scene();
        let body = s.dynamic_box(1.0);
        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO));
        let joint = *s.world.joints.keys().next().unwrap();

        s.world.broken.insert(joint);
        let event = s.fixed().unwrap();
        assert_eq!(
            event,
            GrabEvent::Released {
                side: HandSide::Right,
                kind: GrabKind::Dynamic,
                target: body,
                velocity: Vec3::ZERO,
                angular_velocity: Vec3::ZERO,
                broken: true,
            }
        );
        assert_eq!(*s.controller.state(), GrabState::Idle);
        assert!(!s.world.excluded.contains(&body));
        assert!(s.release().is_none());
    }

    #[test]
    fn despawned_body_breaks_grab() {
        let mut s = scene();
        let body = s.dynamic_box(1.0);
        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO));
        s.world.bodies.remove(&body);

        let event = s.fixed();
        assert!(matches!(event, Some(GrabEvent::Released { broken: true, .. })));
        assert!(!s.controller.is_grabbing());
    }

    #[test]
    fn grace_window_expires_without_target() {
        let mut s = scene();
        let hand = pose(Vec3::new(0.3, 1.0, 0.0), Vec3::ZERO);
        s.controller.press(&s.config);
        assert!(matches!(s.controller.state(), GrabState::Armed { .. }));

        for _ in 0..30 {
            assert!(s.controller.update(&mut s.world, &s.config, DT, &hand).is_none());
        }
        assert_eq!(*s.controller.state(), GrabState::Idle);

        // A target showing up afterwards is ignored.
        s.dynamic_box(1.0);
        assert!(s.controller.update(&mut s.world, &s.config, DT, &hand).is_none());
        assert!(!s.controller.is_grabbing());
    }

    #[test]
    fn target_found_late_in_window() {
        let mut s = scene();
        let hand = pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO);
        s.controller.press(&s.config);
        for _ in 0..5 {
            s.controller.update(&mut s.world, &s.config, DT, &hand);
        }
        let body = s.dynamic_box(1.0);
        let event = s.controller.update(&mut s.world, &s.config, DT, &hand);
        assert_eq!(event.map(|e| e.target()), Some(body));
    }

    #[test]
    fn release_while_armed_cancels() {
        let mut s = scene();
        s.controller.press(&s.config);
        assert!(s.release().is_none());
        assert_eq!(*s.controller.state(), GrabState::Idle);

        s.dynamic_box(1.0);
        let hand = pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO);
        assert!(s.controller.update(&mut s.world, &s.config, DT, &hand).is_none());
    }

    #[test]
    fn press_while_holding_is_ignored() {
        let mut s = scene();
        s.dynamic_box(1.0);
        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO));
        let before = s.controller.state().clone();
        s.controller.press(&s.config);
        assert_eq!(*s.controller.state(), before);
    }

    #[test]
    fn static_grab_holds_and_pushes_off() {
        let mut s = scene();
        let wall = s.world.add_collider(Vec3::new(0.6, 1.0, 0.0), None, None);
        s.world.sphere_cast_result = Some(MockWorld::hit(wall, Vec3::new(0.5, 1.0, 0.0), -Vec3::X, 0.05));
        s.world.set_velocity(s.player, Vec3::new(0.0, 0.0, 2.0));

        let event = s
            .press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO))
            .unwrap();
        assert!(matches!(event, GrabEvent::Grabbed { kind: GrabKind::Static, target, .. } if target == wall));
        assert_eq!(s.world.velocity(s.player), Vec3::ZERO);

        let joint = s.controller.static_joint().unwrap();
        assert_eq!(s.world.joint(joint).spec.connected, s.player);
        assert_eq!(
            s.world.joint(joint).spec.anchor,
            JointAnchor::World(Vec3::new(0.45, 1.0, 0.0))
        );

        let pull = Vec3::new(-1.0, 0.0, 0.0);
        s.controller.update(
            &mut s.world,
            &s.config,
            DT,
            &pose(Vec3::new(0.45, 1.0, 0.0), pull),
        );
        let event = s.release().unwrap();
        assert!(matches!(event, GrabEvent::Released { kind: GrabKind::Static, .. }));
        assert_eq!(s.world.velocity(s.player), -pull);
    }

    #[test]
    fn slow_static_release_stops_player() {
        let mut s = scene();
        let wall = s.world.add_collider(Vec3::ZERO, None, None);
        s.world.sphere_cast_result = Some(MockWorld::hit(wall, Vec3::ZERO, -Vec3::X, 0.05));
        s.press_and_update(&pose(Vec3::ZERO, Vec3::ZERO)).unwrap();
        s.world.set_velocity(s.player, Vec3::new(0.3, 0.0, 0.0));
        s.controller.update(
            &mut s.world,
            &s.config,
            DT,
            &pose(Vec3::ZERO, Vec3::new(0.05, 0.0, 0.0)),
        );
        s.release();
        assert_eq!(s.world.velocity(s.player), Vec3::ZERO);
    }

    #[test]
    fn static_joint_is_freed_and_reanchored_after_cooldown() {
        let mut s = scene();
        let wall = s.world.add_collider(Vec3::ZERO, None, None);
        s.world.sphere_cast_result = Some(MockWorld::hit(wall, Vec3::ZERO, -Vec3::X, 0.05));
        s.press_and_update(&pose(Vec3::ZERO, Vec3::ZERO)).unwrap();
        let first = s.controller.static_joint().unwrap();

        s.fixed();
        assert!(s.world.joint(first).locked);

        s.controller.add_static_grab_cooldown(2.0 * DT);
        s.world.broken.insert(first);
        s.fixed();
        // Still cooling down: the broken joint is kept.
        assert_eq!(s.controller.static_joint(), Some(first));

        s.fixed();
        s.fixed();
        let second = s.controller.static_joint().unwrap();
        assert_ne!(second, first);
        assert!(s.world.detached.contains(&first));
        assert!(s.controller.is_grabbing());
    }

    #[test]
    fn static_joint_frees_while_player_collides() {
        let mut s = scene();
        let wall = s.world.add_collider(Vec3::ZERO, None, None);
        s.world.sphere_cast_result = Some(MockWorld::hit(wall, Vec3::ZERO, -Vec3::X, 0.05));
        s.press_and_update(&pose(Vec3::ZERO, Vec3::ZERO)).unwrap();
        let joint = s.controller.static_joint().unwrap();

        s.world.colliding.insert(s.player);
        s.fixed();
        assert!(!s.world.joint(joint).locked);
    }

    #[test]
    fn static_grab_on_kinematic_rides_along() {
        let mut s = scene();
        let platform = s.world.add_kinematic_body(Vec3::new(0.0, 0.5, 0.0));
        s.world.set_velocity(platform, Vec3::new(1.0, 0.0, 0.0));
        let collider = s.world.add_collider(Vec3::ZERO, Some(platform), None);
        s.world.sphere_cast_result = Some(MockWorld::hit(collider, Vec3::ZERO, Vec3::Y, 0.05));

        s.press_and_update(&pose(Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO))
            .unwrap();
        let joint = s.controller.static_joint().unwrap();
        assert_eq!(
            s.world.joint(joint).spec.anchor,
            JointAnchor::Body {
                body: platform,
                local: Vec3::new(0.0, 0.5, 0.0)
            }
        );
        assert_eq!(s.world.velocity(s.player), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn mass_scales_follow_contacts() {
        let mut s = scene();
        let body = s.dynamic_box(1.0);
        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO));
        let joint = *s.world.joints.keys().next().unwrap();

        s.fixed();
        assert_eq!(s.world.joint(joint).spec.connected_mass_scale, s.config.idle_mass_scale);

        s.world.colliding.insert(body);
        s.fixed();
        assert_eq!(s.world.joint(joint).spec.connected_mass_scale, s.config.grabbed_mass_scale);

        s.world.colliding.clear();
        s.world.colliding.insert(s.player);
        s.fixed();
        assert_eq!(s.world.joint(joint).spec.connected_mass_scale, s.config.grabbed_mass_scale);
    }

    #[test]
    fn anchored_chain_stays_solid() {
        let mut s = scene();
        let handle = s.dynamic_box(1.0);
        let hinge = s.world.add_kinematic_body(Vec3::ZERO);
        s.world.link(handle, hinge);

        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO));
        assert_eq!(s.controller.chain(), &[handle, hinge]);
        assert!(s.world.excluded.is_empty());
        assert!(s.world.tracking.contains(&hinge));

        let joint = *s.world.joints.keys().next().unwrap();
        s.fixed();
        assert_eq!(s.world.joint(joint).spec.connected_mass_scale, s.config.anchored_mass_scale);
    }

    #[test]
    fn mass_scale_override_applies_on_contact() {
        let mut s = scene();
        let body = s.world.add_dynamic_body(Vec3::new(0.6, 1.0, 0.0), 1.0);
        let settings = GrabObject {
            mass_scale_override: Some(7.0),
            position_motor_multiplier: 2.0,
            ..default()
        };
        let collider = s
            .world
            .add_collider(Vec3::new(0.6, 1.0, 0.0), Some(body), Some((body, settings)));
        s.world.sphere_cast_result = Some(MockWorld::hit(collider, Vec3::new(0.5, 1.0, 0.0), -Vec3::X, 0.05));

        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO));
        let joint = *s.world.joints.keys().next().unwrap();
        assert_eq!(
            s.world.joint(joint).spec.drive.position_spring,
            s.config.dynamic_drive.position_spring * 2.0
        );

        s.world.colliding.insert(body);
        s.fixed();
        assert_eq!(s.world.joint(joint).spec.mass_scale, 7.0);
    }

    #[test]
    fn shared_chain_keeps_exclusion_for_other_hand() {
        let mut s = scene();
        let body = s.dynamic_box(1.0);
        let other = s.world.add_dynamic_body(Vec3::ZERO, 1.0);
        s.world.link(body, other);
        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO));
        assert!(s.world.excluded.contains(&other));

        let claims: ChainClaims = [other].into_iter().collect();
        s.controller.release(&mut s.world, &s.config, &claims).unwrap();
        assert!(!s.world.excluded.contains(&body));
        assert!(s.world.excluded.contains(&other));
        assert!(s.world.tracking.contains(&other));
    }

    #[test]
    fn virtual_grab_moves_target_with_hand() {
        let mut s = scene();
        let target = s.world.spawn();
        s.world.targets.insert(target, (Vec3::new(0.6, 1.0, 0.0), Quat::IDENTITY));
        let collider = s.world.add_collider(
            Vec3::new(0.6, 1.0, 0.0),
            None,
            Some((target, GrabObject::virtual_target())),
        );
        s.world.sphere_cast_result = Some(MockWorld::hit(collider, Vec3::new(0.5, 1.0, 0.0), -Vec3::X, 0.05));

        let event = s
            .press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO))
            .unwrap();
        assert!(matches!(event, GrabEvent::Grabbed { kind: GrabKind::Virtual, .. }));
        assert!(s.world.joints.is_empty());

        // Hand moves up 20 cm: the grabbed point follows.
        s.controller.update(
            &mut s.world,
            &s.config,
            DT,
            &pose(Vec3::new(0.45, 1.2, 0.0), Vec3::ZERO),
        );
        let (position, rotation) = s.world.target_pose(target).unwrap();
        assert!(position.distance(Vec3::new(0.55, 1.2, 0.0)) < 1e-5);
        assert!(rotation.angle_between(Quat::IDENTITY) < 1e-5);

        // Quarter turn of the hand turns the object about the hand.
        let mut turned = pose(Vec3::new(0.45, 1.2, 0.0), Vec3::ZERO);
        turned.local_rotation = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        s.controller.update(&mut s.world, &s.config, DT, &turned);
        let (position, rotation) = s.world.target_pose(target).unwrap();
        assert!(rotation.angle_between(turned.local_rotation) < 1e-5);
        // The grabbed surface point stays on the hand.
        let grab_point = position + rotation * Vec3::new(-0.1, 0.0, 0.0);
        assert!(grab_point.distance(Vec3::new(0.45, 1.2, 0.0)) < 1e-5);

        let event = s.release().unwrap();
        assert!(matches!(event, GrabEvent::Released { kind: GrabKind::Virtual, target: t, .. } if t == target));
    }

    #[test]
    fn penetration_clamps_hand() {
        let mut s = scene();
        let wall = s.world.add_collider(Vec3::ZERO, None, None);
        // Head at (0, 1.6, 0), hand 1 m ahead along +X; wall 0.4 m from the head.
        s.world.ray_results = vec![MockWorld::hit(wall, Vec3::new(0.4, 1.6, 0.0), -Vec3::X, 0.4)];
        let hand = pose(Vec3::new(1.0, 1.6, 0.0), Vec3::ZERO);

        s.controller.update(&mut s.world, &s.config, DT, &hand);
        s.fixed();
        assert!(s.controller.penetration().is_some());
        s.controller.update(&mut s.world, &s.config, DT, &hand);
        assert!(s.controller.clamped_position().distance(Vec3::new(0.4, 1.6, 0.0)) < 1e-5);

        // Grabbing uses the penetration hit.
        let event = s.press_and_update(&hand).unwrap();
        assert!(matches!(event, GrabEvent::Grabbed { target, .. } if target == wall));
    }

    #[test]
    fn penetration_skips_held_chain() {
        let mut s = scene();
        let body = s.dynamic_box(1.0);
        let held_collider = s.world.sphere_cast_result.unwrap().collider;
        s.press_and_update(&pose(Vec3::new(0.45, 1.0, 0.0), Vec3::ZERO));

        s.world.ray_results = vec![MockWorld::hit(held_collider, Vec3::new(0.3, 1.1, 0.0), -Vec3::X, 0.3)];
        s.fixed();
        assert!(s.controller.penetration().is_none());
        assert!(s.controller.chain().contains(&body));
    }

    #[test]
    fn untracked_frames_keep_last_pose() {
        let mut s = scene();
        let hand = pose(Vec3::new(0.2, 1.0, 0.0), Vec3::ZERO);
        s.controller.update(&mut s.world, &s.config, DT, &hand);

        let lost = HandPose::default();
        s.controller.update(&mut s.world, &s.config, DT, &lost);
        assert_eq!(s.controller.pose().position(), Vec3::new(0.2, 1.0, 0.0));
    }

    /// 2 x 2 unit grid in the YZ plane at x = 0, facing -X.
    fn mesh_wall() -> bevy_mesh_connectivity::MeshConnectivity {
        let mut vertices = Vec::new();
        for y in 0..3 {
            for z in 0..3 {
                vertices.push(Vec3::new(0.0, y as f32, z as f32));
            }
        }
        let mut triangles = Vec::new();
        for y in 0..2u32 {
            for z in 0..2u32 {
                let v00 = y * 3 + z;
                triangles.push([v00, v00 + 1, v00 + 4]);
                triangles.push([v00, v00 + 4, v00 + 3]);
            }
        }
        bevy_mesh_connectivity::MeshConnectivity::new(triangles, &vertices)
    }

    #[test]
    fn mesh_grab_remembers_triangle() {
        let mut s = scene();
        let collider = s.world.add_mesh_collider(Vec3::new(1.0, 0.0, 0.0), mesh_wall());
        s.world.sphere_cast_result =
            Some(MockWorld::hit(collider, Vec3::new(1.0, 1.3, 0.6), -Vec3::X, 0.05));
        let hand = pose(Vec3::new(0.95, 1.3, 0.6), Vec3::ZERO);

        let event = s.press_and_update(&hand).unwrap();
        assert!(matches!(event, GrabEvent::Grabbed { kind: GrabKind::Static, .. }));
        let triangle = s.controller.grab_hit().and_then(|hit| hit.triangle).unwrap();
        assert_eq!(s.controller.last_triangle(), Some((collider, triangle)));

        // Held frames walk from the remembered triangle and stay on it.
        s.controller.update(&mut s.world, &s.config, DT, &hand);
        assert_eq!(s.controller.last_triangle(), Some((collider, triangle)));

        s.release().unwrap();
        assert_eq!(s.controller.last_triangle(), None);
    }

    #[test]
    fn lost_tracking_forgets_triangle() {
        let mut s = scene();
        let collider = s.world.add_mesh_collider(Vec3::new(1.0, 0.0, 0.0), mesh_wall());
        s.world.sphere_cast_result =
            Some(MockWorld::hit(collider, Vec3::new(1.0, 1.3, 0.6), -Vec3::X, 0.05));
        s.press_and_update(&pose(Vec3::new(0.95, 1.3, 0.6), Vec3::ZERO))
            .unwrap();
        assert!(s.controller.last_triangle().is_some());

        s.controller
            .update(&mut s.world, &s.config, DT, &HandPose::default());
        assert_eq!(s.controller.last_triangle(), None);
    }
}
