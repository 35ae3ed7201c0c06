//! Closest-triangle queries over a [`MeshConnectivity`].
//!
//! All points and directions are in mesh-local space.

use std::collections::{HashSet, VecDeque};

use bevy::prelude::*;

use crate::MeshConnectivity;
use crate::geometry::is_triangle_degenerate;

/// Hard cap on triangles examined by [`MeshConnectivity::find_closest_triangle`].
pub const MAX_SEARCH_TRIANGLES: usize = 64;

/// Result of the full-mesh scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartingTriangle {
    pub triangle: usize,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Accepted candidate of the local search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub triangle: usize,
    pub point: Vec3,
    /// Distance plus facing penalty; lower is better.
    pub score: f32,
}

/// Outcome of a bounded local search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleSearch {
    pub best: Option<TriangleHit>,
    /// Number of triangles examined, never above [`MAX_SEARCH_TRIANGLES`].
    pub visited: usize,
}

impl TriangleSearch {
    fn not_found() -> Self {
        Self {
            best: None,
            visited: 0,
        }
    }
}

impl MeshConnectivity {
    fn is_searchable(&self, triangle: usize) -> bool {
        if !self.is_valid(triangle) {
            return false;
        }
        let [a, b, c] = self.triangle_vertices(triangle);
        !is_triangle_degenerate(a, b, c)
    }

    /// Linear scan of every triangle for the closest point to `point`.
    ///
    /// O(triangle count). Use only when no seed triangle is known, e.g. on
    /// first contact or after tracking was lost.
    pub fn find_closest_starting_triangle(&self, point: Vec3) -> Option<StartingTriangle> {
        let mut best: Option<(f32, StartingTriangle)> = None;

        for triangle in 0..self.triangle_count() {
            if !self.is_searchable(triangle) {
                continue;
            }
            let closest = self.closest_point_on_triangle(point, triangle);
            let distance_sq = closest.distance_squared(point);
            if best.is_none_or(|(min, _)| distance_sq < min) {
                best = Some((
                    distance_sq,
                    StartingTriangle {
                        triangle,
                        point: closest,
                        normal: self.triangle_normal(triangle),
                    },
                ));
            }
        }

        best.map(|(_, hit)| hit)
    }

    /// Breadth-first walk from `start` for the triangle closest to `point`
    /// whose facing best opposes `normal`.
    ///
    /// A candidate scores `distance + (1 - dot(-normal, triangle_normal))^2`
    /// and is only accepted while `distance < radius`. At most
    /// [`MAX_SEARCH_TRIANGLES`] triangles are examined.
    pub fn find_closest_triangle(
        &self,
        point: Vec3,
        normal: Vec3,
        start: Option<usize>,
        radius: f32,
    ) -> TriangleSearch {
        let Some(start) = start.filter(|&t| t < self.triangle_count()) else {
            return TriangleSearch::not_found();
        };

        let mut open = VecDeque::with_capacity(MAX_SEARCH_TRIANGLES);
        let mut seen = HashSet::with_capacity(MAX_SEARCH_TRIANGLES * 2);
        open.push_back(start);
        seen.insert(start);

        let mut best: Option<TriangleHit> = None;
        let mut visited = 0;

        while let Some(head) = open.pop_front() {
            visited += 1;

            if self.is_searchable(head) {
                let closest = self.closest_point_on_triangle(point, head);
                let distance = point.distance(closest);
                let facing = 1.0 - (-normal).dot(self.triangle_normal(head));
                let score = distance + facing * facing;

                if distance < radius && best.is_none_or(|b| score < b.score) {
                    best = Some(TriangleHit {
                        triangle: head,
                        point: closest,
                        score,
                    });
                }
            }

            if visited >= MAX_SEARCH_TRIANGLES {
                break;
            }

            for neighbor in self.neighbors(head) {
                if seen.insert(neighbor) {
                    open.push_back(neighbor);
                }
            }
        }

        TriangleSearch { best, visited }
    }
}
