//! [`GrabWorld`] over Avian3D physics and the Bevy ECS.

use std::sync::Arc;

use avian3d::prelude::*;
use bevy::ecs::system::SystemParam;
use bevy::prelude::*;
use bevy_mesh_connectivity::MeshConnectivity;

use crate::components::{GrabObject, GrabPlayer, JointChild, JointedBodies};
use crate::config::GrabConfig;
use crate::hit::SurfaceHit;
use crate::joint::GrabJoint;
use crate::plugin::{GrabMeshCache, GrabSettings};
use crate::world::{BodyState, ColliderInfo, GrabWorld, JointAnchor, JointSpec, JointUpdate};

/// Upper bound on hits returned by the penetration ray.
const MAX_RAY_HITS: u32 = 16;

/// Player collision filters of a body held by a hand, restored on release.
#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct PlayerCollisionExcluded {
    pub original_filters: LayerMask,
}

/// Query filter for grab casts: the grab mask, minus the player bodies and
/// their colliders.
pub fn grab_filter(
    config: &GrabConfig,
    excluded: impl IntoIterator<Item = Entity>,
) -> SpatialQueryFilter {
    SpatialQueryFilter::from_mask(LayerMask(config.grab_mask)).with_excluded_entities(excluded)
}

/// Move colliders of [`GrabPlayer`] bodies onto the player layer.
///
/// Held chains drop the player layer from their filters, so the player only
/// stops colliding with them once it is a member of that layer alone.
pub(crate) fn assign_player_layers(
    mut commands: Commands,
    settings: Res<GrabSettings>,
    new_players: Query<Option<&RigidBodyColliders>, Added<GrabPlayer>>,
    new_colliders: Query<(Entity, &ColliderOf), Added<ColliderOf>>,
    players: Query<(), With<GrabPlayer>>,
    layers: Query<Option<&CollisionLayers>>,
) {
    let player_layer = LayerMask(settings.0.player_layer);

    let mut colliders: Vec<Entity> = Vec::new();
    for body_colliders in &new_players {
        colliders.extend(body_colliders.into_iter().flat_map(|c| c.iter()));
    }
    colliders.extend(
        new_colliders
            .iter()
            .filter(|(_, collider_of)| players.contains(collider_of.body))
            .map(|(entity, _)| entity),
    );
    colliders.sort_unstable();
    colliders.dedup();

    for collider in colliders {
        let Ok(current) = layers.get(collider) else {
            continue;
        };
        let current = current.copied().unwrap_or_default();
        if current.memberships == player_layer {
            continue;
        }
        debug!("Moving player collider {:?} onto the player layer", collider);
        commands
            .entity(collider)
            .try_insert(CollisionLayers::new(player_layer, current.filters));
    }
}

#[derive(SystemParam)]
pub struct AvianGrabWorld<'w, 's> {
    commands: Commands<'w, 's>,
    spatial: SpatialQuery<'w, 's>,
    settings: Res<'w, GrabSettings>,
    meshes: Res<'w, Assets<Mesh>>,
    cache: ResMut<'w, GrabMeshCache>,
    colliders: Query<
        'w,
        's,
        (
            &'static Collider,
            &'static GlobalTransform,
            Option<&'static ColliderOf>,
            Option<&'static Mesh3d>,
        ),
    >,
    grab_objects: Query<'w, 's, &'static GrabObject>,
    parents: Query<'w, 's, &'static ChildOf>,
    bodies: Query<
        'w,
        's,
        (
            &'static RigidBody,
            &'static Position,
            &'static Rotation,
            &'static mut LinearVelocity,
            &'static mut AngularVelocity,
            Option<&'static ComputedMass>,
        ),
    >,
    body_colliders: Query<'w, 's, &'static RigidBodyColliders>,
    players: Query<'w, 's, Entity, With<GrabPlayer>>,
    links: Query<'w, 's, (Option<&'static JointedBodies>, Option<&'static JointChild>)>,
    contacts: Query<'w, 's, &'static CollidingEntities>,
    layers: Query<'w, 's, (Option<&'static CollisionLayers>, Option<&'static PlayerCollisionExcluded>)>,
    joints: Query<'w, 's, &'static mut GrabJoint>,
    transforms: Query<'w, 's, &'static mut Transform>,
}

impl AvianGrabWorld<'_, '_> {
    fn filter(&self) -> SpatialQueryFilter {
        let excluded: Vec<Entity> = self
            .players
            .iter()
            .flat_map(|player| {
                let mut entities = self.colliders_of(player);
                entities.push(player);
                entities
            })
            .collect();
        grab_filter(&self.settings.0, excluded)
    }

    /// Colliders of `body`, or the body itself when it has none registered.
    fn colliders_of(&self, body: Entity) -> Vec<Entity> {
        match self.body_colliders.get(body) {
            Ok(colliders) => colliders.iter().collect(),
            Err(_) => vec![body],
        }
    }

    /// Nearest grab object on the collider or one of its ancestors.
    fn find_grab_object(&self, collider: Entity) -> Option<(Entity, GrabObject)> {
        let mut current = collider;
        loop {
            if let Ok(grab_object) = self.grab_objects.get(current) {
                return Some((current, *grab_object));
            }
            current = self.parents.get(current).ok()?.parent();
        }
    }

    fn exclude_player(&mut self, collider: Entity) {
        let player = self.settings.0.player_layer;
        let Ok((layers, excluded)) = self.layers.get(collider) else {
            return;
        };
        if excluded.is_some() {
            return;
        }
        let layers = layers.copied().unwrap_or_default();
        let mut filtered = layers;
        filtered.filters.0 &= !player;
        if let Ok(mut entity) = self.commands.get_entity(collider) {
            entity.insert((
                filtered,
                PlayerCollisionExcluded {
                    original_filters: layers.filters,
                },
            ));
        }
    }

    fn restore_player(&mut self, collider: Entity) {
        let Ok((layers, Some(excluded))) = self.layers.get(collider) else {
            return;
        };
        let mut restored = layers.copied().unwrap_or_default();
        restored.filters = excluded.original_filters;
        if let Ok(mut entity) = self.commands.get_entity(collider) {
            entity.insert(restored).remove::<PlayerCollisionExcluded>();
        }
    }
}

impl GrabWorld for AvianGrabWorld<'_, '_> {
    fn ray_hits(&mut self, origin: Vec3, direction: Dir3, max_distance: f32) -> Vec<SurfaceHit> {
        let filter = self.filter();
        let mut hits: Vec<SurfaceHit> = self
            .spatial
            .ray_hits(origin, direction, max_distance, MAX_RAY_HITS, true, &filter)
            .into_iter()
            .map(|hit| SurfaceHit {
                collider: hit.entity,
                point: origin + direction * hit.distance,
                normal: hit.normal,
                distance: hit.distance,
                triangle: None,
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn sphere_cast(
        &mut self,
        origin: Vec3,
        direction: Dir3,
        radius: f32,
        max_distance: f32,
    ) -> Option<SurfaceHit> {
        let filter = self.filter();
        let hit = self.spatial.cast_shape(
            &Collider::sphere(radius),
            origin,
            Quat::IDENTITY,
            direction,
            &ShapeCastConfig::from_max_distance(max_distance),
            &filter,
        )?;
        Some(SurfaceHit {
            collider: hit.entity,
            point: hit.point1,
            normal: hit.normal1,
            distance: hit.distance,
            triangle: None,
        })
    }

    fn sphere_overlap(&mut self, center: Vec3, radius: f32) -> Vec<Entity> {
        let filter = self.filter();
        self.spatial
            .shape_intersections(&Collider::sphere(radius), center, Quat::IDENTITY, &filter)
    }

    fn closest_point(&mut self, collider: Entity, point: Vec3) -> Option<Vec3> {
        let (shape, transform, _, _) = self.colliders.get(collider).ok()?;
        let (_, rotation, translation) = transform.to_scale_rotation_translation();
        let (projected, _) =
            shape.project_point(Position(translation), Rotation(rotation), point, false);
        Some(projected)
    }

    fn collider_info(&self, collider: Entity) -> Option<ColliderInfo> {
        let (shape, transform, collider_of, mesh) = self.colliders.get(collider).ok()?;
        Some(ColliderInfo {
            transform: transform.affine(),
            rotation: transform.rotation(),
            body: collider_of.map(|c| c.body),
            grab_object: self.find_grab_object(collider),
            is_mesh: mesh.is_some() && shape.shape().as_trimesh().is_some(),
        })
    }

    fn mesh_connectivity(&mut self, collider: Entity) -> Option<Arc<MeshConnectivity>> {
        let (_, _, _, mesh) = self.colliders.get(collider).ok()?;
        let id = mesh?.0.id();
        let meshes = &self.meshes;
        self.cache
            .0
            .get_or_build(id, || meshes.get(id).and_then(MeshConnectivity::from_mesh))
    }

    fn body(&self, body: Entity) -> Option<BodyState> {
        let (rb, position, rotation, linear, angular, mass) = self.bodies.get(body).ok()?;
        Some(BodyState {
            position: position.0,
            rotation: rotation.0,
            linear_velocity: linear.0,
            angular_velocity: angular.0,
            mass: mass.map(|m| m.value()).unwrap_or(1.0),
            kind: *rb,
        })
    }

    fn set_body_velocity(&mut self, body: Entity, linear: Vec3, angular: Vec3) {
        if let Ok((_, _, _, mut lv, mut av, _)) = self.bodies.get_mut(body) {
            lv.0 = linear;
            av.0 = angular;
        }
    }

    fn set_body_rotation(&mut self, body: Entity, rotation: Quat) {
        if let Ok(mut entity) = self.commands.get_entity(body) {
            entity.try_insert(Rotation(rotation));
        }
    }

    fn chain_links(&self, body: Entity) -> Vec<Entity> {
        let Ok((jointed, child)) = self.links.get(body) else {
            return Vec::new();
        };
        jointed
            .map(|j| j.0.clone())
            .unwrap_or_default()
            .into_iter()
            .chain(child.map(|c| c.parent))
            .collect()
    }

    fn set_collision_tracking(&mut self, body: Entity, enabled: bool) {
        for collider in self.colliders_of(body) {
            let Ok(mut entity) = self.commands.get_entity(collider) else {
                continue;
            };
            if enabled {
                if self.contacts.get(collider).is_err() {
                    entity.try_insert(CollidingEntities::default());
                }
            } else {
                entity.remove::<CollidingEntities>();
            }
        }
    }

    fn is_colliding(&self, body: Entity) -> bool {
        self.colliders_of(body)
            .into_iter()
            .filter_map(|collider| self.contacts.get(collider).ok())
            .any(|contacts| !contacts.is_empty())
    }

    fn set_player_collision_excluded(&mut self, body: Entity, excluded: bool) {
        for collider in self.colliders_of(body) {
            if excluded {
                self.exclude_player(collider);
            } else {
                self.restore_player(collider);
            }
        }
    }

    fn attach_joint(&mut self, spec: JointSpec) -> Entity {
        let anchor_rotation = match spec.anchor {
            JointAnchor::World(_) => Quat::IDENTITY,
            JointAnchor::Body { body, .. } => {
                self.body(body).map(|b| b.rotation).unwrap_or(Quat::IDENTITY)
            }
        };
        let target_rotation = spec
            .hold_rotation
            .then(|| self.body(spec.connected))
            .flatten()
            .map(|connected| anchor_rotation.inverse() * connected.rotation);

        self.commands
            .spawn((
                Name::new("Grab Joint"),
                GrabJoint {
                    anchor: spec.anchor,
                    connected: spec.connected,
                    connected_anchor: spec.connected_anchor,
                    drive: spec.drive,
                    target_rotation,
                    mass_scale: spec.mass_scale,
                    connected_mass_scale: spec.connected_mass_scale,
                    locked: true,
                },
            ))
            .id()
    }

    fn detach_joint(&mut self, joint: Entity) {
        if let Ok(mut entity) = self.commands.get_entity(joint) {
            entity.try_despawn();
        }
    }

    fn joint_connected(&self, joint: Entity) -> bool {
        let Ok(joint) = self.joints.get(joint) else {
            return false;
        };
        let anchor_alive = joint
            .anchor_body()
            .is_none_or(|body| self.bodies.contains(body));
        anchor_alive && self.bodies.contains(joint.connected)
    }

    fn update_joint(&mut self, joint: Entity, update: JointUpdate) {
        let Ok(mut joint) = self.joints.get_mut(joint) else {
            return;
        };
        if let Some(anchor) = update.anchor {
            joint.anchor = anchor;
        }
        if let Some(connected_anchor) = update.connected_anchor {
            joint.connected_anchor = connected_anchor;
        }
        if let Some(locked) = update.locked {
            joint.locked = locked;
        }
        if let Some(scale) = update.mass_scale {
            joint.mass_scale = scale;
        }
        if let Some(scale) = update.connected_mass_scale {
            joint.connected_mass_scale = scale;
        }
    }

    fn move_target(&mut self, target: Entity, position: Vec3, rotation: Quat) {
        if let Ok(mut transform) = self.transforms.get_mut(target) {
            transform.translation = position;
            transform.rotation = rotation;
        }
        if self.bodies.contains(target)
            && let Ok(mut entity) = self.commands.get_entity(target)
        {
            entity.try_insert((Position(position), Rotation(rotation)));
        }
    }

    fn target_pose(&self, target: Entity) -> Option<(Vec3, Quat)> {
        self.transforms
            .get(target)
            .ok()
            .map(|t| (t.translation, t.rotation))
    }
}
