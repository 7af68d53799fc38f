use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Vertex {
        Vertex { x, y }
    }

    pub fn distance(&self, other: &Vertex) -> f64 {
        f64::sqrt(f64::powi(self.x - other.x, 2) + f64::powi(self.y - other.y, 2))
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Vertex {
        Vertex {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn lerp(&self, other: &Vertex, t: f64) -> Vertex {
        Vertex {
            x: self.x + t * (other.x - self.x),
            y: self.y + t * (other.y - self.y),
        }
    }

    pub fn midpoint(&self, other: &Vertex) -> Vertex {
        self.lerp(other, 0.5)
    }
}

/// A mesh node. Positions are the initial (reference) configuration; the
/// solver writes displacements on top of them.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: usize,
    pub vertex: Vertex,
    pub displacement: Vector2<f64>,
    pub velocity: Vector2<f64>,
    pub acceleration: Vector2<f64>,
    /// External nodal load accumulator (fx, fy)
    pub force: Vector2<f64>,
    /// Reaction or residual force written back by the solver
    pub reaction: Vector2<f64>,
    pub fixed: [bool; 2],
    /// Prescribed displacement per axis. Only meaningful when the axis is fixed.
    pub prescribed: [f64; 2],
    /// Global equation number per axis, `None` for fixed axes or before numbering
    pub dof: [Option<usize>; 2],
    /// Node this one was split off when a fault cut the mesh
    pub split_from: Option<usize>,
}

impl Node {
    pub fn new(id: usize, vertex: Vertex) -> Node {
        Node {
            id,
            vertex,
            displacement: Vector2::zeros(),
            velocity: Vector2::zeros(),
            acceleration: Vector2::zeros(),
            force: Vector2::zeros(),
            reaction: Vector2::zeros(),
            fixed: [false; 2],
            prescribed: [0.0; 2],
            dof: [None; 2],
            split_from: None,
        }
    }

    /// Deformed position
    pub fn current_position(&self) -> Vertex {
        self.vertex.offset(self.displacement.x, self.displacement.y)
    }

    pub fn is_fully_fixed(&self) -> bool {
        self.fixed[0] && self.fixed[1]
    }
}

/// One of the four sides of an axis-aligned domain bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
    Bottom,
    Top,
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn contains(&self, v: &Vertex) -> bool {
        v.x >= self.x_min && v.x <= self.x_max && v.y >= self.y_min && v.y <= self.y_max
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn diagonal(&self) -> f64 {
        f64::sqrt(f64::powi(self.width(), 2) + f64::powi(self.height(), 2))
    }
}

/// Rectangular node selection used by boundary rules. Bounds are exclusive.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryRegion {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl BoundaryRegion {
    pub fn everywhere() -> BoundaryRegion {
        BoundaryRegion {
            x_min: f64::MIN,
            x_max: f64::MAX,
            y_min: f64::MIN,
            y_max: f64::MAX,
        }
    }

    pub fn contains(&self, v: &Vertex) -> bool {
        v.x > self.x_min && v.x < self.x_max && v.y > self.y_min && v.y < self.y_max
    }
}

/// Per-axis targets of a boundary rule: a displacement fixes the axis, a force
/// is added to the nodal load.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryTarget {
    pub ux: Option<f64>,
    pub uy: Option<f64>,
    pub fx: Option<f64>,
    pub fy: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BoundaryRule {
    pub name: String,
    pub region: BoundaryRegion,
    pub target: BoundaryTarget,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn node_current_position_adds_displacement() {
        let mut node = Node::new(0, Vertex::new(1.0, 2.0));
        node.displacement = Vector2::new(0.5, -0.25);
        let p = node.current_position();
        assert_relative_eq!(p.x, 1.5);
        assert_relative_eq!(p.y, 1.75);
        assert!(node.dof.iter().all(|d| d.is_none()));
    }

    #[test]
    fn region_bounds_are_exclusive() {
        let region = BoundaryRegion {
            x_min: 0.0,
            x_max: 1.0,
            ..BoundaryRegion::everywhere()
        };
        assert!(region.contains(&Vertex::new(0.5, 100.0)));
        assert!(!region.contains(&Vertex::new(1.0, 0.0)));
    }
}
