//! Finding what a hand grabs.
//!
//! Resolution order: a penetration hit from this fixed tick, then a sphere cast
//! along the palm, then a sphere overlap around the hand that picks the
//! closest surface among all overlapping colliders. Mesh colliders refine the
//! raw contact with a triangle search so fingers land on the right face.
//!
//! A hand remembers the last mesh triangle it touched. When the contact is on
//! the same collider the bounded walk starts there, and the full-mesh scan
//! only runs for a first contact.

use bevy::prelude::*;
use bevy_mesh_connectivity::MeshConnectivity;

use crate::config::GrabConfig;
use crate::hit::{GrabHitData, SurfaceHit};
use crate::world::{ColliderInfo, GrabWorld};

/// Last mesh triangle a hand touched, and the collider it belongs to.
pub type TriangleSeed = Option<(Entity, usize)>;

fn seed_for(seed: TriangleSeed, collider: Entity) -> Option<usize> {
    seed.filter(|&(entity, _)| entity == collider)
        .map(|(_, triangle)| triangle)
}

/// Resolve the grab target for a hand at `hand_position`.
///
/// `seed` starts the mesh walk when the contact is on its collider.
pub fn resolve_target<W: GrabWorld + ?Sized>(
    world: &mut W,
    config: &GrabConfig,
    hand_position: Vec3,
    hand_rotation: Quat,
    penetration: Option<&SurfaceHit>,
    seed: TriangleSeed,
) -> Option<GrabHitData> {
    let palm = config.palm_direction(hand_rotation);
    let up = hand_rotation * config.forward_direction;

    let candidate = match penetration {
        Some(hit) => Some(*hit),
        None => {
            let cast = Dir3::new(palm).ok().and_then(|direction| {
                world.sphere_cast(
                    hand_position - palm * config.grab_radius,
                    direction,
                    config.grab_radius,
                    config.grab_radius,
                )
            });
            cast.or_else(|| closest_overlap(world, config, hand_position, palm, seed))
        }
    }?;

    let info = world.collider_info(candidate.collider)?;

    let raw = |triangle: Option<usize>| GrabHitData {
        collider: candidate.collider,
        position: candidate.point,
        local_position: info.to_local(candidate.point),
        normal: candidate.normal,
        up,
        triangle,
    };

    if !info.is_mesh {
        return Some(raw(candidate.triangle));
    }

    let Some(connectivity) = world.mesh_connectivity(candidate.collider) else {
        return Some(raw(candidate.triangle));
    };

    match refine_mesh_hit(
        &connectivity,
        &info,
        config,
        candidate.collider,
        candidate.point,
        candidate.triangle.or_else(|| seed_for(seed, candidate.collider)),
        palm,
    ) {
        Ok(hit) => Some(hit),
        // Nothing on the mesh near the contact, keep the engine's hit.
        Err(seed) => Some(raw(seed)),
    }
}

/// Snap a contact on a mesh collider to the best facing triangle nearby.
///
/// Seeds from `triangle` when given, else from a full-mesh scan. On failure
/// returns the seed so finger placement can still start from it.
pub fn refine_mesh_hit(
    connectivity: &MeshConnectivity,
    info: &ColliderInfo,
    config: &GrabConfig,
    collider: Entity,
    world_origin: Vec3,
    triangle: Option<usize>,
    palm: Vec3,
) -> Result<GrabHitData, Option<usize>> {
    let inverse = info.transform.inverse();
    let origin = inverse.transform_point3(world_origin);
    let palm_local = inverse.transform_vector3(palm).normalize_or_zero();

    let seed = triangle
        .filter(|&t| connectivity.is_valid(t))
        .or_else(|| {
            connectivity
                .find_closest_starting_triangle(origin)
                .map(|start| start.triangle)
        });

    let search = connectivity.find_closest_triangle(origin, palm_local, seed, config.grab_radius);
    let Some(best) = search.best else {
        return Err(seed);
    };

    let normal = info
        .transform
        .transform_vector3(connectivity.triangle_normal(best.triangle))
        .normalize_or_zero();

    Ok(GrabHitData {
        collider,
        position: info.to_world(best.point),
        local_position: best.point,
        normal,
        up: palm,
        triangle: Some(best.triangle),
    })
}

/// Closest surface among colliders overlapping the grab sphere.
///
/// Used when the hand is already inside geometry and casts find nothing.
/// Candidates deeper than `grab_max_depth` are ignored.
fn closest_overlap<W: GrabWorld + ?Sized>(
    world: &mut W,
    config: &GrabConfig,
    hand: Vec3,
    palm: Vec3,
    seed: TriangleSeed,
) -> Option<SurfaceHit> {
    let max_depth_sq = config.grab_max_depth * config.grab_max_depth;
    let mut best: Option<(f32, SurfaceHit)> = None;

    for collider in world.sphere_overlap(hand, config.grab_radius) {
        let Some(info) = world.collider_info(collider) else {
            continue;
        };

        let connectivity = if info.is_mesh {
            world.mesh_connectivity(collider)
        } else {
            None
        };

        let candidate = match connectivity {
            Some(connectivity) => {
                let Some((triangle, local_point)) = closest_mesh_point(
                    &connectivity,
                    &info,
                    config,
                    hand,
                    palm,
                    seed_for(seed, collider),
                ) else {
                    continue;
                };
                let point = info.to_world(local_point);
                let normal = connectivity.triangle_normal(triangle);
                SurfaceHit {
                    collider,
                    point,
                    normal: info.transform.transform_vector3(normal).normalize_or_zero(),
                    distance: point.distance(hand),
                    triangle: Some(triangle),
                }
            }
            None => {
                let Some(point) = world.closest_point(collider, hand) else {
                    continue;
                };
                SurfaceHit {
                    collider,
                    point,
                    normal: (hand - point).try_normalize().unwrap_or(-palm),
                    distance: point.distance(hand),
                    triangle: None,
                }
            }
        };

        let distance_sq = candidate.distance * candidate.distance;
        if distance_sq > max_depth_sq {
            continue;
        }
        if best.is_none_or(|(min, _)| distance_sq < min) {
            best = Some((distance_sq, candidate));
        }
    }

    best.map(|(_, hit)| hit)
}

/// Closest triangle and mesh-local point to `hand`.
///
/// Walks from `seed` first; the full-mesh scan runs when there is no seed or
/// the walk finds nothing within reach.
fn closest_mesh_point(
    connectivity: &MeshConnectivity,
    info: &ColliderInfo,
    config: &GrabConfig,
    hand: Vec3,
    palm: Vec3,
    seed: Option<usize>,
) -> Option<(usize, Vec3)> {
    let local = info.to_local(hand);
    let palm_local = info.transform.inverse().transform_vector3(palm).normalize_or_zero();
    let reach = config.grab_radius.max(config.grab_max_depth);

    let seeded = seed
        .filter(|&t| connectivity.is_valid(t))
        .and_then(|t| {
            connectivity
                .find_closest_triangle(local, palm_local, Some(t), reach)
                .best
        })
        .map(|best| (best.triangle, best.point));

    seeded.or_else(|| {
        connectivity
            .find_closest_starting_triangle(local)
            .map(|start| (start.triangle, start.point))
    })
}
