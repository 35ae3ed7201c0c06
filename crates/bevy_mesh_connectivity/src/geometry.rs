//! Triangle primitives shared by the connectivity graph and its searches.

use bevy::prelude::*;

/// Squared-area / determinant tolerance below which a triangle is treated as degenerate.
const DEGENERACY_TOLERANCE: f32 = 1e-7;

/// Exact closest point on triangle `abc` to `p`.
///
/// Classifies `p` into one of the seven Voronoi regions of the triangle
/// (three vertices, three edges, interior) and projects accordingly.
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && d4 - d3 >= 0.0 && d5 - d6 >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Whether triangle `abc` has (near) zero area.
pub fn is_triangle_degenerate(a: Vec3, b: Vec3, c: Vec3) -> bool {
    let cross_a = (a - b).cross(a - c);
    let cross_b = (b - a).cross(b - c);
    if cross_a.length_squared() < DEGENERACY_TOLERANCE
        || cross_b.length_squared() < DEGENERACY_TOLERANCE
    {
        return true;
    }

    let q = a - b;
    let r = c - b;
    let qq = q.dot(q);
    let rr = r.dot(r);
    let qr = q.dot(r);
    qq * rr - qr * qr == 0.0
}

/// Unit normal of triangle `abc` (counter-clockwise winding), or zero when degenerate.
pub fn triangle_normal(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    (b - a).cross(c - a).normalize_or_zero()
}
