//! Planar geometry helpers shared by the mesher and the fault engine.

use std::f64::consts::PI;

use crate::datatypes::{BoundingBox, Vertex};

pub const GEOMETRY_EPSILON: f64 = 1e-12;

/// z-component of (b - a) x (c - a)
pub fn cross(a: &Vertex, b: &Vertex, c: &Vertex) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Shoelace area, positive for counter-clockwise polygons
pub fn signed_area(polygon: &[Vertex]) -> f64 {
    let n = polygon.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let a = &polygon[i];
        let b = &polygon[(i + 1) % n];
        sum += a.x * b.y - b.x * a.y;
    }
    0.5 * sum
}

pub fn polygon_area(polygon: &[Vertex]) -> f64 {
    signed_area(polygon).abs()
}

/// Area-weighted centroid, falling back to the vertex average for
/// degenerate polygons.
pub fn polygon_centroid(polygon: &[Vertex]) -> Vertex {
    let area = signed_area(polygon);
    let n = polygon.len();
    if area.abs() < GEOMETRY_EPSILON {
        let (sx, sy) = polygon
            .iter()
            .fold((0.0, 0.0), |(sx, sy), v| (sx + v.x, sy + v.y));
        return Vertex::new(sx / n.max(1) as f64, sy / n.max(1) as f64);
    }
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..n {
        let a = &polygon[i];
        let b = &polygon[(i + 1) % n];
        let w = a.x * b.y - b.x * a.y;
        cx += (a.x + b.x) * w;
        cy += (a.y + b.y) * w;
    }
    Vertex::new(cx / (6.0 * area), cy / (6.0 * area))
}

/// Even-odd ray casting test. Points on the boundary may land either way.
pub fn point_in_polygon(point: &Vertex, polygon: &[Vertex]) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let a = &polygon[i];
        let b = &polygon[j];
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Inclusive barycentric test used by ear clipping.
pub fn point_in_triangle(p: &Vertex, a: &Vertex, b: &Vertex, c: &Vertex) -> bool {
    let d1 = cross(a, b, p);
    let d2 = cross(b, c, p);
    let d3 = cross(c, a, p);
    let has_neg = d1 < -GEOMETRY_EPSILON || d2 < -GEOMETRY_EPSILON || d3 < -GEOMETRY_EPSILON;
    let has_pos = d1 > GEOMETRY_EPSILON || d2 > GEOMETRY_EPSILON || d3 > GEOMETRY_EPSILON;
    !(has_neg && has_pos)
}

/// Intersection of segments p0-p1 and q0-q1.
///
/// # Returns
/// The parameters `(t, u)` along each segment (both in `[0, 1]`) or `None`
/// for parallel or disjoint segments.
pub fn segment_intersection(
    p0: &Vertex,
    p1: &Vertex,
    q0: &Vertex,
    q1: &Vertex,
) -> Option<(f64, f64)> {
    let rx = p1.x - p0.x;
    let ry = p1.y - p0.y;
    let sx = q1.x - q0.x;
    let sy = q1.y - q0.y;

    let denom = rx * sy - ry * sx;
    let scale = (rx.abs() + ry.abs()) * (sx.abs() + sy.abs());
    if denom.abs() <= GEOMETRY_EPSILON * scale.max(1.0) {
        return None;
    }

    let qpx = q0.x - p0.x;
    let qpy = q0.y - p0.y;
    let t = (qpx * sy - qpy * sx) / denom;
    let u = (qpx * ry - qpy * rx) / denom;

    let tol = 1e-9;
    if t < -tol || t > 1.0 + tol || u < -tol || u > 1.0 + tol {
        return None;
    }
    Some((t.clamp(0.0, 1.0), u.clamp(0.0, 1.0)))
}

pub fn point_segment_distance(p: &Vertex, a: &Vertex, b: &Vertex) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq < GEOMETRY_EPSILON {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance(&a.lerp(b, t))
}

pub fn polyline_length(points: &[Vertex]) -> f64 {
    points.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

pub fn distance_to_polyline(p: &Vertex, points: &[Vertex]) -> f64 {
    match points.len() {
        0 => f64::INFINITY,
        1 => p.distance(&points[0]),
        _ => points
            .windows(2)
            .map(|w| point_segment_distance(p, &w[0], &w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Liang-Barsky clip of segment a-b against `bbox`.
pub fn clip_segment(a: &Vertex, b: &Vertex, bbox: &BoundingBox) -> Option<(Vertex, Vertex)> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;

    let checks = [
        (-dx, a.x - bbox.x_min),
        (dx, bbox.x_max - a.x),
        (-dy, a.y - bbox.y_min),
        (dy, bbox.y_max - a.y),
    ];
    for (p, q) in checks {
        if p.abs() < GEOMETRY_EPSILON {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((a.lerp(b, t0), a.lerp(b, t1)))
}

/// Wraps an angle into (-pi, pi]
pub fn wrap_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Picks the orientation of the undirected axis `axis` (radians) closest to
/// the directed angle `reference`.
pub fn align_axis(axis: f64, reference: f64) -> f64 {
    let diff = wrap_angle(axis - reference);
    if diff.abs() > PI / 2.0 {
        wrap_angle(axis + PI)
    } else {
        wrap_angle(axis)
    }
}

/// Rotates `from` toward `to` by `weight` (0 keeps `from`, 1 lands on `to`).
pub fn blend_angle(from: f64, to: f64, weight: f64) -> f64 {
    wrap_angle(from + weight * wrap_angle(to - from))
}
