//! Bevy plugin wiring hands into the ECS.
//!
//! Input and grab resolution run in `Update`; hand body drive, static grab
//! ordering and the grab joint drive run in `FixedUpdate`, ahead of the
//! physics step.

use std::path::Path;

use avian3d::prelude::*;
use bevy::math::Affine3A;
use bevy::prelude::*;
use bevy_mesh_connectivity::MeshConnectivityCache;

use crate::avian::{AvianGrabWorld, assign_player_layers};
use crate::chain::ChainClaims;
use crate::components::GrabPlayer;
use crate::config::GrabConfig;
use crate::controller::{GrabEvent, HandGrabController, HandPose, HandRig, HandSide};
use crate::fingers::{FingerDefinition, finger_rotation, rotate_towards, solve_finger_curl};
use crate::grab_points::GrabPoints;
use crate::joint::{GrabJoint, drive_grab_joints};
use crate::static_order::StaticGrabOrder;
use crate::world::{GrabWorld, JointAnchor};

// ---------------------------------------------------------------------------
// Resources, messages and components
// ---------------------------------------------------------------------------

#[derive(Resource, Clone, Debug, Default, PartialEq)]
pub struct GrabSettings(pub GrabConfig);

/// Connectivity of grabbed meshes, keyed by mesh asset.
#[derive(Resource, Debug, Default)]
pub struct GrabMeshCache(pub MeshConnectivityCache<AssetId<Mesh>>);

/// Grab input for the hand entity `hand`.
#[derive(Message, Clone, Copy, Debug, PartialEq)]
pub enum GrabInput {
    Press { hand: Entity },
    Release { hand: Entity },
    /// Free the static grab's linear drive for `seconds`, e.g. during a snap turn.
    StaticGrabCooldown { hand: Entity, seconds: f32 },
}

impl GrabInput {
    pub fn hand(&self) -> Entity {
        match *self {
            Self::Press { hand } | Self::Release { hand } => hand,
            Self::StaticGrabCooldown { hand, .. } => hand,
        }
    }
}

#[derive(Component)]
pub struct Hand {
    pub controller: HandGrabController,
}

impl Hand {
    pub fn new(side: HandSide, rig: HandRig) -> Self {
        Self {
            controller: HandGrabController::new(side, rig),
        }
    }
}

/// Latest tracked pose of a hand. Written by the input layer every frame.
#[derive(Component, Clone, Copy, Debug, Default, PartialEq)]
pub struct HandTracking(pub HandPose);

#[derive(Component, Clone, Debug, Default, PartialEq)]
pub struct HandFingers {
    pub fingers: Vec<FingerDefinition>,
}

/// Solved curl and smoothed base rotation of each finger in [`HandFingers`].
#[derive(Component, Clone, Debug, Default, PartialEq)]
pub struct FingerCurls {
    /// `None` when the finger is not touching the grabbed mesh.
    pub curls: Vec<Option<f32>>,
    pub rotations: Vec<Quat>,
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// Hand grabbing on top of Avian3D.
///
/// Hands are entities with a [`Hand`] and [`HandTracking`]; see [`spawn_hand`].
/// Drive them with [`GrabInput`] messages and listen for [`GrabEvent`]s.
#[derive(Default)]
pub struct HandGrabPlugin {
    pub config: GrabConfig,
}

impl HandGrabPlugin {
    /// Plugin with tuning read from a RON file.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self {
            config: GrabConfig::load(path),
        }
    }
}

impl Plugin for HandGrabPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(GrabSettings(self.config.clone()))
            .init_resource::<GrabMeshCache>()
            .init_resource::<StaticGrabOrder>()
            .add_message::<GrabInput>()
            .add_message::<GrabEvent>()
            .add_systems(
                Update,
                (
                    evict_changed_meshes,
                    assign_player_layers,
                    init_hands,
                    init_finger_curls,
                    handle_grab_input,
                    update_hands,
                    track_grab_points,
                    update_finger_curls,
                )
                    .chain(),
            )
            .add_systems(
                FixedUpdate,
                (fixed_update_hands, order_static_grabs, drive_grab_joints).chain(),
            );
    }
}

/// Spawn the hand body, its link to the player and the hand entity.
///
/// The hand body has no collider; it only carries dynamic grab joints.
/// `player` is marked [`GrabPlayer`], which moves its colliders onto
/// `config.player_layer` and keeps them out of grab queries.
pub fn spawn_hand(
    commands: &mut Commands,
    config: &GrabConfig,
    side: HandSide,
    player: Entity,
) -> Entity {
    commands.entity(player).insert(GrabPlayer);

    let hand_body = commands
        .spawn((
            Name::new(format!("{side:?} Hand Body")),
            RigidBody::Dynamic,
            GravityScale(0.0),
            Mass(0.5),
            AngularInertia::new(Vec3::splat(0.002)),
            Transform::default(),
        ))
        .id();

    let mut link = GrabJoint::new(
        JointAnchor::Body {
            body: player,
            local: Vec3::ZERO,
        },
        hand_body,
        config.hand_drive,
    );
    link.connected_mass_scale = config.idle_mass_scale;
    let hand_link = commands
        .spawn((Name::new(format!("{side:?} Hand Link")), link))
        .id();

    commands
        .spawn((
            Name::new(format!("{side:?} Hand")),
            Hand::new(
                side,
                HandRig {
                    player,
                    hand_body,
                    hand_link,
                },
            ),
            HandTracking::default(),
        ))
        .id()
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Bodies held by every hand except `except`.
fn chain_claims(hands: &Query<(Entity, &mut Hand)>, except: Entity) -> ChainClaims {
    hands
        .iter()
        .filter(|(entity, _)| *entity != except)
        .flat_map(|(_, hand)| hand.controller.chain().to_vec())
        .collect()
}

fn evict_changed_meshes(mut events: MessageReader<AssetEvent<Mesh>>, mut cache: ResMut<GrabMeshCache>) {
    for event in events.read() {
        if let AssetEvent::Modified { id } | AssetEvent::Removed { id } = event
            && cache.0.evict(id)
        {
            debug!("Evicted mesh connectivity for {:?}", id);
        }
    }
}

/// Static grabs need to know when the player touches something.
fn init_hands(new_hands: Query<&Hand, Added<Hand>>, mut world: AvianGrabWorld) {
    for hand in &new_hands {
        world.set_collision_tracking(hand.controller.rig().player, true);
    }
}

fn init_finger_curls(
    mut commands: Commands,
    fingers: Query<Entity, (With<HandFingers>, Without<FingerCurls>)>,
) {
    for entity in &fingers {
        commands.entity(entity).insert(FingerCurls::default());
    }
}

fn handle_grab_input(
    settings: Res<GrabSettings>,
    mut inputs: MessageReader<GrabInput>,
    mut hands: Query<(Entity, &mut Hand)>,
    mut world: AvianGrabWorld,
    mut events: MessageWriter<GrabEvent>,
) {
    for input in inputs.read() {
        let claims = chain_claims(&hands, input.hand());
        let Ok((_, mut hand)) = hands.get_mut(input.hand()) else {
            warn!("Grab input for {:?}, which is not a hand", input.hand());
            continue;
        };

        match *input {
            GrabInput::Press { .. } => hand.controller.press(&settings.0),
            GrabInput::Release { .. } => {
                if let Some(event) = hand.controller.release(&mut world, &settings.0, &claims) {
                    events.write(event);
                }
            }
            GrabInput::StaticGrabCooldown { seconds, .. } => {
                hand.controller.add_static_grab_cooldown(seconds);
            }
        }
    }
}

fn update_hands(
    time: Res<Time>,
    settings: Res<GrabSettings>,
    mut hands: Query<(&mut Hand, &HandTracking)>,
    mut world: AvianGrabWorld,
    mut events: MessageWriter<GrabEvent>,
) {
    let dt = time.delta_secs();
    for (mut hand, tracking) in &mut hands {
        if let Some(event) = hand.controller.update(&mut world, &settings.0, dt, &tracking.0) {
            events.write(event);
        }
    }
}

fn fixed_update_hands(
    time: Res<Time>,
    settings: Res<GrabSettings>,
    mut hands: Query<(Entity, &mut Hand)>,
    mut world: AvianGrabWorld,
    mut events: MessageWriter<GrabEvent>,
) {
    let dt = time.delta_secs();
    let entities: Vec<Entity> = hands.iter().map(|(entity, _)| entity).collect();
    for entity in entities {
        let claims = chain_claims(&hands, entity);
        let Ok((_, mut hand)) = hands.get_mut(entity) else {
            continue;
        };
        if let Some(event) = hand
            .controller
            .fixed_update(&mut world, &settings.0, dt, &claims)
        {
            events.write(event);
        }
    }
}

/// Newest static grab at full strength, older ones weakened.
fn order_static_grabs(
    settings: Res<GrabSettings>,
    mut order: ResMut<StaticGrabOrder>,
    hands: Query<(Entity, &Hand)>,
    mut joints: Query<&mut GrabJoint>,
) {
    let stale: Vec<Entity> = order
        .hands()
        .iter()
        .copied()
        .filter(|&hand| {
            hands
                .get(hand)
                .ok()
                .is_none_or(|(_, h)| h.controller.static_joint().is_none())
        })
        .collect();
    for hand in stale {
        order.remove(hand);
    }

    for (entity, hand) in &hands {
        if hand.controller.static_joint().is_some() && !order.contains(entity) {
            order.push(entity);
        }
    }

    for (entity, scale) in order.mass_scales(&settings.0) {
        let Some(joint) = hands
            .get(entity)
            .ok()
            .and_then(|(_, hand)| hand.controller.static_joint())
        else {
            continue;
        };
        if let Ok(mut joint) = joints.get_mut(joint) {
            joint.connected_mass_scale = scale;
        }
    }
}

fn track_grab_points(
    mut events: MessageReader<GrabEvent>,
    mut objects: Query<(&mut GrabPoints, &GlobalTransform)>,
) {
    for event in events.read() {
        let Ok((mut points, transform)) = objects.get_mut(event.target()) else {
            continue;
        };
        match event {
            GrabEvent::Grabbed { side, hit, .. } => {
                let local = transform.affine().inverse().transform_point3(hit.position);
                points.grab(*side, local);
            }
            GrabEvent::Released { side, .. } => points.release(*side),
        }
    }
}

fn update_finger_curls(
    time: Res<Time>,
    settings: Res<GrabSettings>,
    cache: Res<GrabMeshCache>,
    meshes: Query<(&Mesh3d, &GlobalTransform)>,
    mut hands: Query<(&Hand, &HandFingers, &mut FingerCurls)>,
) {
    let max_degrees = settings.0.finger_speed * time.delta_secs();

    for (hand, fingers, mut curls) in &mut hands {
        let controller = &hand.controller;
        let grabbed = controller
            .grab_hit()
            .filter(|_| controller.is_grabbing())
            .and_then(|hit| {
                let (mesh, transform) = meshes.get(hit.collider).ok()?;
                let connectivity = cache.0.get(&mesh.0.id())?;
                Some((connectivity, transform.affine(), hit.triangle?))
            });

        let pose = controller.pose();
        let hand_transform = Affine3A::from_rotation_translation(pose.rotation(), pose.position());

        let count = fingers.fingers.len();
        curls.curls.resize(count, None);
        curls.rotations.resize(count, Quat::IDENTITY);

        for (i, finger) in fingers.fingers.iter().enumerate() {
            let curl = grabbed.as_ref().and_then(|(connectivity, mesh_transform, triangle)| {
                solve_finger_curl(
                    connectivity,
                    *triangle,
                    mesh_transform,
                    &hand_transform,
                    finger,
                    controller.side(),
                )
            });
            let target = finger_rotation(finger, curl);
            curls.rotations[i] = rotate_towards(curls.rotations[i], target, max_degrees);
            curls.curls[i] = curl;
        }
    }
}
