//! Per-element and per-node results handed from the solver to the fault engine.

use serde::{Deserialize, Serialize};

use crate::material::{principal_stresses, MaterialLibrary};
use crate::mesh::Mesh;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementResult {
    pub yield_index: f64,
    pub sigma1: f64,
    pub sigma3: f64,
    /// Direction of σ1, radians counter-clockwise from +x
    pub principal_angle: f64,
    /// Mean accumulated equivalent plastic strain
    pub plastic_strain: f64,
    pub has_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeResult {
    pub ux: f64,
    pub uy: f64,
    pub magnitude: f64,
}

/// Result set indexed by element id and node id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationResults {
    pub step: usize,
    pub elements: Vec<ElementResult>,
    pub nodes: Vec<NodeResult>,
}

impl SimulationResults {
    /// Reads the converged state off the mesh. Interface elements report
    /// their joint traction as principal values with a zero yield index.
    pub fn collect(mesh: &Mesh, materials: &MaterialLibrary, step: usize) -> SimulationResults {
        let elements = mesh
            .elements
            .iter()
            .map(|element| {
                let stress = element.mean_stress();
                let p = principal_stresses(&stress);
                let yield_index = if element.is_interface() || materials.get(element.material_id).is_err() {
                    0.0
                } else {
                    element.max_yield_index()
                };
                ElementResult {
                    yield_index,
                    sigma1: p.sigma1,
                    sigma3: p.sigma3,
                    principal_angle: p.angle,
                    plastic_strain: element.mean_kappa(),
                    has_failed: element.has_failed,
                }
            })
            .collect();

        let nodes = mesh
            .nodes
            .iter()
            .map(|n| NodeResult {
                ux: n.displacement.x,
                uy: n.displacement.y,
                magnitude: n.displacement.norm(),
            })
            .collect();

        SimulationResults {
            step,
            elements,
            nodes,
        }
    }

    pub fn element(&self, id: usize) -> Option<&ElementResult> {
        self.elements.get(id)
    }

    pub fn max_yield_index(&self) -> f64 {
        self.elements.iter().map(|e| e.yield_index).fold(0.0, f64::max)
    }

    pub fn max_displacement(&self) -> f64 {
        self.nodes.iter().map(|n| n.magnitude).fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Vertex;
    use crate::element::ElementKind;
    use crate::material::Material;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    #[test]
    fn collect_reads_stress_and_displacement() {
        let mut mesh = Mesh::new(1.0);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
            mesh.add_node(Vertex::new(x, y));
        }
        mesh.add_element(ElementKind::Triangle3, vec![0, 1, 2], 0).unwrap();
        mesh.elements[0].points[0].stress = Vector3::new(3.0, -1.0, 0.0);
        mesh.elements[0].points[0].yield_index = 1.5;
        mesh.nodes[1].displacement = Vector2::new(3.0, 4.0);

        let mut materials = MaterialLibrary::new();
        materials.insert(Material::elastic(0, 1.0, 0.2).unwrap());

        let results = SimulationResults::collect(&mesh, &materials, 4);
        assert_eq!(results.step, 4);
        let e = results.element(0).unwrap();
        assert_relative_eq!(e.sigma1, 3.0);
        assert_relative_eq!(e.sigma3, -1.0);
        assert_relative_eq!(e.yield_index, 1.5);
        assert_relative_eq!(results.max_displacement(), 5.0);
    }
}
