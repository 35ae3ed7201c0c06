//! Disk / mesh intersection walk used to curl fingers around grabbed surfaces.

use std::collections::{HashSet, VecDeque};

use bevy::math::Affine3A;
use bevy::prelude::*;

use crate::{HalfEdge, MeshConnectivity};

/// A disk in world space: the sweep of one finger around its curl axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Disk {
    pub center: Vec3,
    /// Unit normal of the disk plane (the curl axis).
    pub normal: Vec3,
    pub radius: f32,
}

/// Collect points where mesh edges cross `disk`, walking outward from `start`.
///
/// Mesh vertices are mapped to world space with `transform`. Crossings beyond
/// the disk radius are pulled onto the rim and recorded, but only crossings
/// inside the disk extend the walk. Until the first point is recorded every
/// neighbour is explored, so a poorly seeded start triangle still reaches the
/// surface under the finger.
///
/// Returned points are unique by exact position, in discovery order.
pub fn disk_intersections(
    connectivity: &MeshConnectivity,
    start: usize,
    disk: &Disk,
    transform: &Affine3A,
) -> Vec<Vec3> {
    let mut points = Vec::new();
    if start >= connectivity.triangle_count() {
        return points;
    }

    let mut unique = HashSet::new();
    let mut open = VecDeque::new();
    let mut closed = HashSet::new();
    open.push_back(start);
    closed.insert(start);

    let mut record = |p: Vec3, points: &mut Vec<Vec3>| {
        if unique.insert([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]) {
            points.push(p);
        }
    };

    while let Some(head) = open.pop_front() {
        if !connectivity.is_valid(head) {
            continue;
        }

        let mut search_further = [false; 3];
        for (i, further) in search_further.iter_mut().enumerate() {
            let (a, b) = connectivity.edge_vertices(HalfEdge::new(head, i));
            let a = transform.transform_point3(connectivity.vertices()[a as usize]);
            let b = transform.transform_point3(connectivity.vertices()[b as usize]);

            match edge_crossing(a, b, disk) {
                Some(Crossing::Inside(p)) => {
                    record(p, &mut points);
                    *further = true;
                }
                Some(Crossing::Rim(p)) => record(p, &mut points),
                None => {}
            }
        }

        let links = connectivity.triangle_links(head).links;
        for (link, further) in links.iter().zip(search_further) {
            let Some(link) = link else {
                continue;
            };
            if (further || points.is_empty()) && closed.insert(link.triangle as usize) {
                open.push_back(link.triangle as usize);
            }
        }
    }

    points
}

enum Crossing {
    Inside(Vec3),
    Rim(Vec3),
}

fn edge_crossing(start: Vec3, end: Vec3, disk: &Disk) -> Option<Crossing> {
    let delta = end - start;
    let length = delta.length();
    if length <= f32::EPSILON {
        return None;
    }
    let dir = delta / length;

    let denom = dir.dot(disk.normal);
    if denom.abs() < 1e-6 {
        return None;
    }
    let enter = (disk.center - start).dot(disk.normal) / denom;
    if enter <= 0.0 || enter > length {
        return None;
    }

    let intersection = start + dir * enter;
    let offset = intersection - disk.center;
    let distance = offset.length();
    if distance > disk.radius {
        return Some(Crossing::Rim(disk.center + offset / distance * disk.radius));
    }
    Some(Crossing::Inside(intersection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_meshes::{grid, grid_triangle};

    fn slicing_disk(x: f32) -> Disk {
        Disk {
            center: Vec3::new(x, 5.0, 0.5),
            normal: Vec3::X,
            radius: 1.0,
        }
    }

    #[test]
    fn crossings_lie_on_disk() {
        let n = 10;
        let mesh = grid(n);
        let disk = slicing_disk(5.3);

        let points = disk_intersections(&mesh, grid_triangle(n, 5, 5), &disk, &Affine3A::IDENTITY);
        assert!(!points.is_empty());
        for p in &points {
            assert!((p.x - 5.3).abs() < 1e-4, "off plane: {p:?}");
            assert!(p.distance(disk.center) <= disk.radius + 1e-4);
        }
        // Something on the grid surface itself, not only rim points.
        assert!(points.iter().any(|p| p.z.abs() < 1e-5));
    }

    #[test]
    fn walk_respects_mesh_transform() {
        let n = 10;
        let mesh = grid(n);
        let transform = Affine3A::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let disk = slicing_disk(15.3);

        let points = disk_intersections(&mesh, grid_triangle(n, 5, 5), &disk, &transform);
        assert!(!points.is_empty());
        assert!(points.iter().all(|p| (p.x - 15.3).abs() < 1e-4));
    }

    #[test]
    fn widens_from_a_missed_seed() {
        let n = 10;
        let mesh = grid(n);
        let disk = slicing_disk(5.3);

        // Seed far from the disk plane.
        let points = disk_intersections(&mesh, grid_triangle(n, 0, 0), &disk, &Affine3A::IDENTITY);
        assert!(!points.is_empty());
        assert!(points.iter().all(|p| (p.x - 5.3).abs() < 1e-4));
    }

    #[test]
    fn disk_away_from_mesh_finds_nothing() {
        let mesh = grid(6);
        let disk = Disk {
            center: Vec3::new(3.0, 3.0, 10.0),
            normal: Vec3::Z,
            radius: 1.0,
        };
        let points = disk_intersections(&mesh, 0, &disk, &Affine3A::IDENTITY);
        assert!(points.is_empty());
    }

    #[test]
    fn points_are_unique() {
        let n = 4;
        let mesh = grid(n);
        // Plane through a row of vertices hits shared edges from both sides.
        let disk = Disk {
            center: Vec3::new(2.0, 2.0, 0.0),
            normal: Vec3::Y,
            radius: 5.0,
        };
        let points = disk_intersections(&mesh, grid_triangle(n, 1, 1), &disk, &Affine3A::IDENTITY);
        let mut keys: Vec<_> = points
            .iter()
            .map(|p| [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()])
            .collect();
        let len = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), len);
    }
}
