//! Exact-position vertex welding.
//!
//! Two vertices merge only when all three coordinates have identical bit
//! patterns. Near-duplicates produced by export jitter stay separate; see
//! [`WeldMode`].

use bevy::prelude::*;

/// How vertex positions are compared when welding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WeldMode {
    /// Merge only bit-identical positions. Deterministic across platforms.
    #[default]
    Exact,
}

/// Bit-pattern spatial hash of a position.
fn spatial_hash(v: Vec3) -> u64 {
    const P1: u64 = 73_856_093;
    const P2: u64 = 19_349_663;
    const P3: u64 = 83_492_791;

    (v.x.to_bits() as u64).wrapping_mul(P1)
        ^ (v.y.to_bits() as u64).wrapping_mul(P2)
        ^ (v.z.to_bits() as u64).wrapping_mul(P3)
}

fn bits(v: Vec3) -> [u32; 3] {
    [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()]
}

/// Merge duplicate vertex positions and remap `triangles` to the survivors.
///
/// Returns the unique vertex list. Indices past the end of `vertices` become
/// `u32::MAX`, which leaves their triangles invalid when the graph is built.
pub fn weld_vertices(triangles: &mut [[u32; 3]], vertices: &[Vec3]) -> Vec<Vec3> {
    weld_vertices_with(triangles, vertices, WeldMode::Exact)
}

/// [`weld_vertices`] with an explicit comparison mode.
pub fn weld_vertices_with(
    triangles: &mut [[u32; 3]],
    vertices: &[Vec3],
    mode: WeldMode,
) -> Vec<Vec3> {
    let WeldMode::Exact = mode;

    let mut order: Vec<(u64, usize)> = vertices
        .iter()
        .enumerate()
        .map(|(i, &v)| (spatial_hash(v), i))
        .collect();
    // Index as tiebreak keeps the representative choice deterministic.
    order.sort_unstable();

    let mut unique = Vec::with_capacity(vertices.len());
    let mut remap = vec![0u32; vertices.len()];
    let mut merged = vec![false; vertices.len()];

    for i in 0..order.len() {
        let (hash, index) = order[i];
        if merged[index] {
            continue;
        }

        let representative = unique.len() as u32;
        unique.push(vertices[index]);
        remap[index] = representative;

        let key = bits(vertices[index]);
        for &(other_hash, other) in &order[i + 1..] {
            if other_hash != hash {
                break;
            }
            if !merged[other] && bits(vertices[other]) == key {
                remap[other] = representative;
                merged[other] = true;
            }
        }
    }

    for tri in triangles.iter_mut() {
        for index in tri.iter_mut() {
            *index = remap.get(*index as usize).copied().unwrap_or(u32::MAX);
        }
    }

    unique
}
