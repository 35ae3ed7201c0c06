//! Triangle adjacency graph over an indexed mesh.
//!
//! Every valid triangle owns three directed half-edges. A half-edge is linked
//! to the opposite-direction half-edge of the neighbouring triangle when the
//! two share both endpoints; unlinked ("naked") half-edges lie on the mesh
//! boundary. Each vertex keeps a contiguous slice of the half-edges that start
//! at it, ordered as a fan whenever its one-ring is manifold.
//!
//! The graph is immutable once built, so it can be shared across threads and
//! hands through an `Arc` without locking.

use bevy::mesh::{Indices, PrimitiveTopology, VertexAttributeValues};
use bevy::prelude::*;
use bitflags::bitflags;

use crate::geometry::{closest_point_on_triangle, triangle_normal};
use crate::weld::weld_vertices;

bitflags! {
    /// Topological classification of a vertex one-ring.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct VertexFlags: u8 {
        /// The incident triangles form a single fan with at most one gap.
        const MANIFOLD = 1 << 0;
        /// At least one outgoing half-edge is naked.
        const BOUNDARY = 1 << 1;
        /// Exactly one outgoing half-edge is naked and the ring is manifold.
        /// The naked half-edge is first in the ring.
        const BORDER = 1 << 2;
    }
}

/// A directed edge of one triangle, starting at corner `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HalfEdge {
    pub triangle: u32,
    pub start: u8,
}

impl HalfEdge {
    pub fn new(triangle: usize, start: usize) -> Self {
        Self {
            triangle: triangle as u32,
            start: start as u8,
        }
    }

    /// Next half-edge around the same triangle.
    pub fn next(self) -> Self {
        Self {
            triangle: self.triangle,
            start: (self.start + 1) % 3,
        }
    }

    /// Previous half-edge around the same triangle (ends where `self` starts).
    pub fn prev(self) -> Self {
        Self {
            triangle: self.triangle,
            start: (self.start + 2) % 3,
        }
    }
}

/// Per-triangle adjacency: the opposite half-edge for each of the three edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriangleLinks {
    /// False for triangles with repeated or out-of-range vertex indices.
    pub valid: bool,
    pub links: [Option<HalfEdge>; 3],
}

/// Per-vertex ring data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VertexRing {
    /// Number of valid triangles touching this vertex.
    pub cardinality: u32,
    /// Index of the first outgoing half-edge in the shared edge array.
    pub first_edge: u32,
    pub flags: VertexFlags,
}

/// Welded triangle mesh with half-edge adjacency.
#[derive(Debug, Clone)]
pub struct MeshConnectivity {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    links: Vec<TriangleLinks>,
    rings: Vec<VertexRing>,
    edges: Vec<HalfEdge>,
}

impl MeshConnectivity {
    /// Weld duplicate positions, then build adjacency.
    pub fn new(mut triangles: Vec<[u32; 3]>, vertices: &[Vec3]) -> Self {
        let welded = weld_vertices(&mut triangles, vertices);
        Self::build(triangles, welded)
    }

    /// Build a connectivity graph from a Bevy triangle-list mesh.
    ///
    /// Returns `None` if the mesh lacks positions or uses another topology.
    pub fn from_mesh(mesh: &Mesh) -> Option<Self> {
        if mesh.primitive_topology() != PrimitiveTopology::TriangleList {
            return None;
        }

        let positions: Vec<Vec3> = match mesh.attribute(Mesh::ATTRIBUTE_POSITION)? {
            VertexAttributeValues::Float32x3(v) => v.iter().map(|p| Vec3::from(*p)).collect(),
            _ => return None,
        };

        let triangles: Vec<[u32; 3]> = match mesh.indices() {
            Some(Indices::U32(indices)) => indices
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
            Some(Indices::U16(indices)) => indices
                .chunks_exact(3)
                .map(|c| [c[0] as u32, c[1] as u32, c[2] as u32])
                .collect(),
            None => (0..positions.len() as u32)
                .collect::<Vec<_>>()
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
        };

        Some(Self::new(triangles, &positions))
    }

    /// Build adjacency over already-welded vertices.
    ///
    /// Degenerate triangles are flagged invalid and left out of the graph.
    /// Vertices whose ring cannot be ordered as a fan are classified
    /// non-manifold instead of failing the build.
    pub fn build(triangles: Vec<[u32; 3]>, vertices: Vec<Vec3>) -> Self {
        let num_vertices = vertices.len();
        let mut links = vec![TriangleLinks::default(); triangles.len()];
        let mut rings = vec![VertexRing::default(); num_vertices];

        // Validity and cardinality.
        for (t, tri) in triangles.iter().enumerate() {
            let valid = tri[0] != tri[1]
                && tri[1] != tri[2]
                && tri[0] != tri[2]
                && tri.iter().all(|&v| (v as usize) < num_vertices);
            links[t].valid = valid;
            if valid {
                for &v in tri {
                    rings[v as usize].cardinality += 1;
                }
            }
        }

        // First edge slot per vertex.
        let mut num_edges = 0u32;
        for ring in &mut rings {
            ring.first_edge = if ring.cardinality > 0 { num_edges } else { 0 };
            num_edges += ring.cardinality;
        }

        // Record half-edges and link opposite pairs.
        let mut counters = vec![0u32; num_vertices];
        let mut edges = vec![HalfEdge::default(); num_edges as usize];

        for (t, tri) in triangles.iter().enumerate() {
            if !links[t].valid {
                continue;
            }

            for (i, j) in [(2usize, 0usize), (0, 1), (1, 2)] {
                let vertex_i = tri[i] as usize;
                let vertex_j = tri[j] as usize;

                let this_edge = HalfEdge::new(t, i);
                let slot = rings[vertex_i].first_edge + counters[vertex_i];
                counters[vertex_i] += 1;
                edges[slot as usize] = this_edge;

                let first = rings[vertex_j].first_edge as usize;
                let recorded = counters[vertex_j] as usize;
                for k in 0..recorded {
                    let candidate = edges[first + k];
                    let candidate_tri = candidate.triangle as usize;
                    let end = triangles[candidate_tri][(candidate.start as usize + 1) % 3];
                    // Only pair with a free half-edge so links stay symmetric on
                    // edges shared by more than two triangles.
                    if end as usize == vertex_i
                        && links[candidate_tri].links[candidate.start as usize].is_none()
                    {
                        links[t].links[i] = Some(candidate);
                        links[candidate_tri].links[candidate.start as usize] = Some(this_edge);
                        break;
                    }
                }
            }
        }

        let mut graph = Self {
            vertices,
            triangles,
            links,
            rings,
            edges,
        };
        graph.classify_vertices();
        graph
    }

    /// Compute vertex flags and order manifold rings as fans.
    fn classify_vertices(&mut self) {
        for v in 0..self.rings.len() {
            let first = self.rings[v].first_edge as usize;
            let count = self.rings[v].cardinality as usize;

            let mut naked_index = None;
            let mut naked_count = 0;
            for i in 0..count {
                if self.is_naked(self.edges[first + i]) {
                    naked_index = Some(i);
                    naked_count += 1;
                }
            }

            let mut manifold = naked_count < 2 && count > 0;
            let boundary = naked_count > 0;
            let mut border = naked_count == 1 && manifold;

            // Naked edge goes first.
            if let Some(index) = naked_index {
                if index > 0 {
                    self.edges.swap(first, first + index);
                }
            }

            if manifold {
                for i in 0..count - 1 {
                    let prev = self.edges[first + i].prev();
                    let Some(link) = self.link(prev) else {
                        continue;
                    };
                    if self.edges[first + i + 1].triangle == link.triangle {
                        continue;
                    }
                    let found = (i + 2..count)
                        .find(|&j| self.edges[first + j].triangle == link.triangle);
                    match found {
                        Some(j) => self.edges.swap(first + i + 1, first + j),
                        None => {
                            manifold = false;
                            border = false;
                            break;
                        }
                    }
                }
            }

            if manifold {
                let last = self.link(self.edges[first + count - 1].prev());
                if border {
                    if last.is_some() {
                        manifold = false;
                        border = false;
                    }
                } else if last.map(|l| l.triangle) != Some(self.edges[first].triangle) {
                    manifold = false;
                }
            }

            let flags = &mut self.rings[v].flags;
            flags.set(VertexFlags::MANIFOLD, manifold);
            flags.set(VertexFlags::BOUNDARY, boundary);
            flags.set(VertexFlags::BORDER, border);
        }
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether the triangle took part in adjacency (non-degenerate indices).
    pub fn is_valid(&self, triangle: usize) -> bool {
        self.links.get(triangle).is_some_and(|l| l.valid)
    }

    pub fn triangle_links(&self, triangle: usize) -> &TriangleLinks {
        &self.links[triangle]
    }

    /// The opposite half-edge across `edge`, if any.
    pub fn link(&self, edge: HalfEdge) -> Option<HalfEdge> {
        self.links[edge.triangle as usize].links[edge.start as usize]
    }

    pub fn is_naked(&self, edge: HalfEdge) -> bool {
        self.link(edge).is_none()
    }

    /// Triangles sharing an edge with `triangle`.
    pub fn neighbors(&self, triangle: usize) -> impl Iterator<Item = usize> + '_ {
        self.links[triangle]
            .links
            .iter()
            .flatten()
            .map(|edge| edge.triangle as usize)
    }

    /// Outgoing half-edges of `vertex`; fan-ordered when the vertex is manifold.
    pub fn vertex_ring(&self, vertex: usize) -> &[HalfEdge] {
        let ring = self.rings[vertex];
        let first = ring.first_edge as usize;
        &self.edges[first..first + ring.cardinality as usize]
    }

    pub fn vertex_flags(&self, vertex: usize) -> VertexFlags {
        self.rings[vertex].flags
    }

    pub fn vertex_cardinality(&self, vertex: usize) -> u32 {
        self.rings[vertex].cardinality
    }

    /// Start and end vertex indices of a half-edge.
    pub fn edge_vertices(&self, edge: HalfEdge) -> (u32, u32) {
        let tri = self.triangles[edge.triangle as usize];
        (
            tri[edge.start as usize],
            tri[(edge.start as usize + 1) % 3],
        )
    }

    /// Corner positions of a triangle in mesh space.
    ///
    /// Corners of an invalid triangle that point past the vertex list read as
    /// the origin.
    pub fn triangle_vertices(&self, triangle: usize) -> [Vec3; 3] {
        let corner = |v: u32| self.vertices.get(v as usize).copied().unwrap_or(Vec3::ZERO);
        let [a, b, c] = self.triangles[triangle];
        [corner(a), corner(b), corner(c)]
    }

    pub fn triangle_normal(&self, triangle: usize) -> Vec3 {
        let [a, b, c] = self.triangle_vertices(triangle);
        triangle_normal(a, b, c)
    }

    /// Exact closest point on `triangle` to `point`, in mesh space.
    pub fn closest_point_on_triangle(&self, point: Vec3, triangle: usize) -> Vec3 {
        let [a, b, c] = self.triangle_vertices(triangle);
        closest_point_on_triangle(point, a, b, c)
    }
}
