//! # bevy_mesh_connectivity
//!
//! Triangle adjacency for grab and finger-placement queries on arbitrary meshes.
//!
//! A [`MeshConnectivity`] welds duplicate vertices, links neighbouring
//! triangles through half-edges and classifies every vertex ring. On top of it
//! sit a full-mesh closest-triangle scan, a bounded breadth-first local search
//! for tracking a moving contact point, and a disk/mesh intersection walk for
//! curling fingers around a surface.
//!
//! ## Quick Start
//!
//! ```ignore
//! use bevy::prelude::*;
//! use bevy_mesh_connectivity::MeshConnectivity;
//!
//! let connectivity = MeshConnectivity::from_mesh(&Mesh::from(Cuboid::default())).unwrap();
//! let start = connectivity.find_closest_starting_triangle(Vec3::new(0.0, 0.6, 0.0)).unwrap();
//! let search = connectivity.find_closest_triangle(
//!     Vec3::new(0.05, 0.6, 0.0),
//!     Vec3::NEG_Y,
//!     Some(start.triangle),
//!     0.2,
//! );
//! ```
//!
//! Everything here is plain data over immutable arrays, so builds and searches
//! can run on any thread.

pub mod cache;
pub mod connectivity;
pub mod disk;
pub mod geometry;
pub mod search;
pub mod weld;

#[cfg(test)]
mod test_meshes;

pub use cache::MeshConnectivityCache;
pub use connectivity::{HalfEdge, MeshConnectivity, TriangleLinks, VertexFlags, VertexRing};
pub use disk::{Disk, disk_intersections};
pub use geometry::{closest_point_on_triangle, is_triangle_degenerate, triangle_normal};
pub use search::{MAX_SEARCH_TRIANGLES, StartingTriangle, TriangleHit, TriangleSearch};
pub use weld::{WeldMode, weld_vertices, weld_vertices_with};
