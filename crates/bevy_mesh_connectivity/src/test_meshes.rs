use bevy::prelude::*;

use crate::MeshConnectivity;

/// Unit quad split along its diagonal, facing +Z.
pub fn two_triangles() -> MeshConnectivity {
    let vertices = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ];
    MeshConnectivity::new(vec![[0, 1, 2], [0, 2, 3]], &vertices)
}

/// `n` x `n` cells of unit size in the XY plane, two triangles per cell, facing +Z.
///
/// Vertex `(x, y)` has index `y * (n + 1) + x`; cell `(x, y)` owns triangles
/// `2 * (y * n + x)` (lower right) and `2 * (y * n + x) + 1` (upper left).
pub fn grid(n: usize) -> MeshConnectivity {
    let stride = n + 1;
    let mut vertices = Vec::with_capacity(stride * stride);
    for y in 0..stride {
        for x in 0..stride {
            vertices.push(Vec3::new(x as f32, y as f32, 0.0));
        }
    }

    let mut triangles = Vec::with_capacity(n * n * 2);
    for y in 0..n {
        for x in 0..n {
            let v00 = (y * stride + x) as u32;
            let v10 = v00 + 1;
            let v01 = v00 + stride as u32;
            let v11 = v01 + 1;
            triangles.push([v00, v10, v11]);
            triangles.push([v00, v11, v01]);
        }
    }

    MeshConnectivity::new(triangles, &vertices)
}

/// Triangle index of the lower-right half of cell `(x, y)` in [`grid`].
pub fn grid_triangle(n: usize, x: usize, y: usize) -> usize {
    2 * (y * n + x)
}
