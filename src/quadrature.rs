//! Gauss quadrature rules for the element library.
//!
//! - Triangles use area coordinates on the reference triangle
//!   (0,0), (1,0), (0,1); weights sum to 1/2.
//! - Quadrilaterals and lines use Gauss-Legendre points on [-1, 1].

/// A quadrature point with natural coordinates (ξ, η) and weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussPoint {
    pub xi: f64,
    pub eta: f64,
    pub weight: f64,
}

impl GaussPoint {
    pub const fn new(xi: f64, eta: f64, weight: f64) -> Self {
        Self { xi, eta, weight }
    }
}

/// Triangle rule with `n` points (1 or 3).
///
/// # Panics
///
/// Panics if `n` is not 1 or 3.
pub fn gauss_triangle(n: usize) -> Vec<GaussPoint> {
    match n {
        1 => vec![GaussPoint::new(1.0 / 3.0, 1.0 / 3.0, 0.5)],
        3 => vec![
            GaussPoint::new(1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0),
            GaussPoint::new(2.0 / 3.0, 1.0 / 6.0, 1.0 / 6.0),
            GaussPoint::new(1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0),
        ],
        _ => panic!("gauss_triangle: n must be 1 or 3, got {}", n),
    }
}

/// 1D Gauss-Legendre points on [-1, 1] stored in `xi`.
///
/// # Panics
///
/// Panics if `n` is not in 1..=3.
pub fn gauss_line(n: usize) -> Vec<GaussPoint> {
    match n {
        1 => vec![GaussPoint::new(0.0, 0.0, 2.0)],
        2 => {
            let p = 1.0 / 3.0_f64.sqrt();
            vec![GaussPoint::new(-p, 0.0, 1.0), GaussPoint::new(p, 0.0, 1.0)]
        }
        3 => {
            let p = (3.0 / 5.0_f64).sqrt();
            vec![
                GaussPoint::new(-p, 0.0, 5.0 / 9.0),
                GaussPoint::new(0.0, 0.0, 8.0 / 9.0),
                GaussPoint::new(p, 0.0, 5.0 / 9.0),
            ]
        }
        _ => panic!("gauss_line: n must be 1, 2, or 3, got {}", n),
    }
}

/// Tensor-product rule with `n` x `n` points on the reference square.
pub fn gauss_quad(n: usize) -> Vec<GaussPoint> {
    let line = gauss_line(n);
    let mut points = Vec::with_capacity(n * n);
    // counter-clockwise ordering for n = 2, row-major otherwise
    if n == 2 {
        let p = line[1].xi;
        for (xi, eta) in [(-p, -p), (p, -p), (p, p), (-p, p)] {
            points.push(GaussPoint::new(xi, eta, 1.0));
        }
        return points;
    }
    for gy in &line {
        for gx in &line {
            points.push(GaussPoint::new(gx.xi, gy.xi, gx.weight * gy.weight));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn triangle_weights_sum_to_reference_area() {
        for n in [1, 3] {
            let sum: f64 = gauss_triangle(n).iter().map(|g| g.weight).sum();
            assert_relative_eq!(sum, 0.5, epsilon = 1e-14);
        }
    }

    #[test]
    fn three_point_rule_integrates_quadratics() {
        // ∫ ξ² over the reference triangle = 1/12
        let integral: f64 = gauss_triangle(3).iter().map(|g| g.weight * g.xi * g.xi).sum();
        assert_relative_eq!(integral, 1.0 / 12.0, epsilon = 1e-14);
    }

    #[test]
    fn quad_rule_integrates_bilinear_product() {
        // ∫∫ ξ²η² over [-1,1]² = 4/9
        let integral: f64 = gauss_quad(2)
            .iter()
            .map(|g| g.weight * g.xi * g.xi * g.eta * g.eta)
            .sum();
        assert_relative_eq!(integral, 4.0 / 9.0, epsilon = 1e-14);
        assert_eq!(gauss_quad(3).len(), 9);
    }

    #[test]
    #[should_panic]
    fn unsupported_triangle_rule_panics() {
        gauss_triangle(4);
    }
}
