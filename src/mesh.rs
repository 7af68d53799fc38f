//! Node and element arenas with DOF numbering and boundary-condition helpers.
//!
//! Node and element ids are their indices in the arenas. Nothing is ever
//! removed except by [`Mesh::clear`], so ids stay valid for the mesh's
//! lifetime. DOF numbering is only valid between [`Mesh::renumber_dofs`] and
//! the next topology change.

use log::{debug, info, warn};
use nalgebra::Vector2;

use crate::datatypes::{BoundaryRule, BoundingBox, Node, Side, Vertex};
use crate::element::{Element, ElementKind, DOF};
use crate::error::{FaultlineError, Result};
use crate::geometry::point_in_polygon;
use crate::material::MaterialLibrary;

#[derive(Debug, Clone)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub elements: Vec<Element>,
    /// Out-of-plane thickness t
    pub thickness: f64,
    dof_count: usize,
    dofs_valid: bool,
}

impl Default for Mesh {
    fn default() -> Self {
        Mesh::new(1.0)
    }
}

impl Mesh {
    pub fn new(thickness: f64) -> Mesh {
        Mesh {
            nodes: Vec::new(),
            elements: Vec::new(),
            thickness,
            dof_count: 0,
            dofs_valid: false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn interface_count(&self) -> usize {
        self.elements.iter().filter(|e| e.is_interface()).count()
    }

    pub fn add_node(&mut self, vertex: Vertex) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, vertex));
        self.dofs_valid = false;
        id
    }

    /// Closest node within `tolerance` of `vertex`
    pub fn find_node(&self, vertex: &Vertex, tolerance: f64) -> Option<usize> {
        self.nodes
            .iter()
            .map(|n| (n.id, n.vertex.distance(vertex)))
            .filter(|(_, d)| *d <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    pub fn find_or_add_node(&mut self, vertex: Vertex, tolerance: f64) -> usize {
        match self.find_node(&vertex, tolerance) {
            Some(id) => id,
            None => self.add_node(vertex),
        }
    }

    /// Adds a copy of node `id` at `vertex` carrying its constraints and
    /// current displacement. Nodal loads stay on the original.
    ///
    /// # Returns
    /// The id of the copy
    pub fn split_node(&mut self, id: usize, vertex: Vertex) -> Result<usize> {
        let original = self
            .nodes
            .get(id)
            .ok_or_else(|| FaultlineError::Mesh(format!("Cannot split missing node {id}")))?
            .clone();
        let twin = self.add_node(vertex);
        let canonical = self.canonical_node(id);
        let node = &mut self.nodes[twin];
        node.fixed = original.fixed;
        node.prescribed = original.prescribed;
        node.displacement = original.displacement;
        node.split_from = Some(canonical);
        Ok(twin)
    }

    /// The node a split copy was made from, or `id` itself
    pub fn canonical_node(&self, id: usize) -> usize {
        self.nodes.get(id).and_then(|n| n.split_from).unwrap_or(id)
    }

    /// Points `element_id` at node `to` wherever it referenced `from`
    pub fn reassign_node(&mut self, element_id: usize, from: usize, to: usize) {
        if let Some(element) = self.elements.get_mut(element_id) {
            for node in element.nodes.iter_mut().filter(|n| **n == from) {
                *node = to;
            }
            element.invalidate_geometry();
            self.dofs_valid = false;
        }
    }

    /// Adds an element
    ///
    /// # Returns
    /// The new element id, or an error if a node id is out of range
    pub fn add_element(
        &mut self,
        kind: ElementKind,
        nodes: Vec<usize>,
        material_id: usize,
    ) -> Result<usize> {
        if let Some(bad) = nodes.iter().find(|n| **n >= self.nodes.len()) {
            return Err(FaultlineError::Mesh(format!(
                "Element references node {bad} but the mesh has {} nodes",
                self.nodes.len()
            )));
        }
        let id = self.elements.len();
        self.elements.push(Element::new(id, kind, nodes, material_id));
        self.dofs_valid = false;
        Ok(id)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.elements.clear();
        self.dof_count = 0;
        self.dofs_valid = false;
    }

    /// Drops DOF numbering and cached element geometry. Required after any
    /// topology change.
    pub fn invalidate_caches(&mut self) {
        self.dofs_valid = false;
        for element in self.elements.iter_mut() {
            element.invalidate_geometry();
        }
    }

    /// Numbers free DOFs node by node, skipping fixed axes
    ///
    /// # Returns
    /// The number of free DOFs
    pub fn renumber_dofs(&mut self) -> usize {
        let mut counter = 0;
        for node in self.nodes.iter_mut() {
            for axis in 0..DOF {
                if node.fixed[axis] {
                    node.dof[axis] = None;
                } else {
                    node.dof[axis] = Some(counter);
                    counter += 1;
                }
            }
        }
        self.dof_count = counter;
        self.dofs_valid = true;
        debug!("numbered {} free dofs over {} nodes", counter, self.nodes.len());
        counter
    }

    pub fn dofs_valid(&self) -> bool {
        self.dofs_valid
    }

    /// Free DOF count, `None` when numbering is stale
    pub fn dof_count(&self) -> Option<usize> {
        if self.dofs_valid {
            Some(self.dof_count)
        } else {
            None
        }
    }

    pub fn element_coords(&self, element: &Element) -> Vec<Vertex> {
        element.nodes.iter().map(|n| self.nodes[*n].vertex).collect()
    }

    pub fn element_displacements(&self, element: &Element) -> Vec<f64> {
        element
            .nodes
            .iter()
            .flat_map(|n| {
                let u = &self.nodes[*n].displacement;
                [u.x, u.y]
            })
            .collect()
    }

    /// Global equation number of every local DOF of `element`
    pub fn element_dofs(&self, element: &Element) -> Vec<Option<usize>> {
        element
            .nodes
            .iter()
            .flat_map(|n| self.nodes[*n].dof)
            .collect()
    }

    pub fn refresh_geometry_cache(&mut self) {
        for i in 0..self.elements.len() {
            let coords = self.element_coords(&self.elements[i]);
            self.elements[i].refresh_geometry(&coords);
        }
    }

    pub fn element_area(&self, id: usize) -> f64 {
        let element = &self.elements[id];
        match element.cached_area() {
            Some(area) => area,
            None => element.area(&self.element_coords(element)),
        }
    }

    pub fn element_centroid(&self, id: usize) -> Vertex {
        let element = &self.elements[id];
        match element.cached_centroid() {
            Some(c) => c,
            None => element.centroid(&self.element_coords(element)),
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.nodes.first()?;
        let mut bbox = BoundingBox {
            x_min: first.vertex.x,
            x_max: first.vertex.x,
            y_min: first.vertex.y,
            y_max: first.vertex.y,
        };
        for node in &self.nodes {
            bbox.x_min = bbox.x_min.min(node.vertex.x);
            bbox.x_max = bbox.x_max.max(node.vertex.x);
            bbox.y_min = bbox.y_min.min(node.vertex.y);
            bbox.y_max = bbox.y_max.max(node.vertex.y);
        }
        Some(bbox)
    }

    /// For each node, the elements that reference it
    pub fn node_element_map(&self) -> Vec<Vec<usize>> {
        let mut map = vec![Vec::new(); self.nodes.len()];
        for element in &self.elements {
            for node in &element.nodes {
                map[*node].push(element.id);
            }
        }
        map
    }

    /// Elements sharing at least one node with each element, interfaces excluded
    pub fn element_adjacency(&self) -> Vec<Vec<usize>> {
        let node_map = self.node_element_map();
        self.elements
            .iter()
            .map(|element| {
                if element.is_interface() {
                    return Vec::new();
                }
                let mut neighbours: Vec<usize> = element
                    .nodes
                    .iter()
                    .flat_map(|n| node_map[*n].iter().copied())
                    .filter(|other| *other != element.id && !self.elements[*other].is_interface())
                    .collect();
                neighbours.sort_unstable();
                neighbours.dedup();
                neighbours
            })
            .collect()
    }

    /// Nodes referenced by at least one continuum (non-interface) element
    pub fn continuum_node_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.nodes.len()];
        for element in self.elements.iter().filter(|e| !e.is_interface()) {
            for node in &element.nodes {
                mask[*node] = true;
            }
        }
        mask
    }

    /// Continuum element whose outline contains `point`
    pub fn find_element_containing(&self, point: &Vertex) -> Option<usize> {
        self.elements
            .iter()
            .filter(|e| !e.is_interface())
            .find(|e| {
                let outline: Vec<Vertex> = e
                    .corner_nodes()
                    .iter()
                    .map(|n| self.nodes[*n].vertex)
                    .collect();
                point_in_polygon(point, &outline)
            })
            .map(|e| e.id)
    }

    fn node_mut(&mut self, id: usize) -> Result<&mut Node> {
        let count = self.nodes.len();
        self.nodes
            .get_mut(id)
            .ok_or_else(|| FaultlineError::Mesh(format!("Node {id} out of range ({count} nodes)")))
    }

    pub fn fix_node(&mut self, id: usize, fix_x: bool, fix_y: bool) -> Result<()> {
        let node = self.node_mut(id)?;
        if fix_x {
            node.fixed[0] = true;
            node.prescribed[0] = 0.0;
        }
        if fix_y {
            node.fixed[1] = true;
            node.prescribed[1] = 0.0;
        }
        self.dofs_valid = false;
        Ok(())
    }

    /// Fixes `axis` (0 = x, 1 = y) of a node at displacement `value`
    pub fn prescribe_displacement(&mut self, id: usize, axis: usize, value: f64) -> Result<()> {
        if axis >= DOF {
            return Err(FaultlineError::Mesh(format!("Axis {axis} out of range")));
        }
        let node = self.node_mut(id)?;
        node.fixed[axis] = true;
        node.prescribed[axis] = value;
        self.dofs_valid = false;
        Ok(())
    }

    pub fn add_nodal_load(&mut self, id: usize, fx: f64, fy: f64) -> Result<()> {
        let node = self.node_mut(id)?;
        node.force += Vector2::new(fx, fy);
        Ok(())
    }

    pub fn clear_loads(&mut self) {
        for node in self.nodes.iter_mut() {
            node.force = Vector2::zeros();
        }
    }

    pub fn reset_displacements(&mut self) {
        for node in self.nodes.iter_mut() {
            node.displacement = Vector2::zeros();
            node.velocity = Vector2::zeros();
            node.acceleration = Vector2::zeros();
        }
    }

    fn on_side(&self, bbox: &BoundingBox, vertex: &Vertex, side: Side, tolerance: f64) -> bool {
        match side {
            Side::Left => (vertex.x - bbox.x_min).abs() <= tolerance,
            Side::Right => (vertex.x - bbox.x_max).abs() <= tolerance,
            Side::Bottom => (vertex.y - bbox.y_min).abs() <= tolerance,
            Side::Top => (vertex.y - bbox.y_max).abs() <= tolerance,
        }
    }

    /// Nodes within `tolerance` of a side of the mesh bounding box
    pub fn nodes_on_side(&self, side: Side, tolerance: f64) -> Vec<usize> {
        let bbox = match self.bounding_box() {
            Some(b) => b,
            None => return Vec::new(),
        };
        self.nodes
            .iter()
            .filter(|n| self.on_side(&bbox, &n.vertex, side, tolerance))
            .map(|n| n.id)
            .collect()
    }

    /// # Returns
    /// The number of nodes fixed
    pub fn fix_side(&mut self, side: Side, fix_x: bool, fix_y: bool, tolerance: f64) -> usize {
        let ids = self.nodes_on_side(side, tolerance);
        for id in &ids {
            let node = &mut self.nodes[*id];
            if fix_x {
                node.fixed[0] = true;
                node.prescribed[0] = 0.0;
            }
            if fix_y {
                node.fixed[1] = true;
                node.prescribed[1] = 0.0;
            }
        }
        self.dofs_valid = false;
        ids.len()
    }

    pub fn prescribe_side(&mut self, side: Side, axis: usize, value: f64, tolerance: f64) -> usize {
        let ids = self.nodes_on_side(side, tolerance);
        for id in &ids {
            let node = &mut self.nodes[*id];
            node.fixed[axis] = true;
            node.prescribed[axis] = value;
        }
        self.dofs_valid = false;
        ids.len()
    }

    /// Applies a uniform traction (force per unit length per unit thickness)
    /// to the element edges lying on `side`. Linear edges split the edge
    /// force 1/2, 1/2; quadratic edges split it 1/6, 1/6, 2/3.
    ///
    /// # Returns
    /// The number of loaded edges
    pub fn add_distributed_load(&mut self, side: Side, tx: f64, ty: f64, tolerance: f64) -> usize {
        let bbox = match self.bounding_box() {
            Some(b) => b,
            None => return 0,
        };

        let mut contributions: Vec<(usize, f64)> = Vec::new();
        let mut loaded_edges = 0;
        for element in self.elements.iter().filter(|e| !e.is_interface()) {
            for edge in element.boundary_edges() {
                let a = &self.nodes[edge[0]].vertex;
                let b = &self.nodes[edge[1]].vertex;
                if !self.on_side(&bbox, a, side, tolerance) || !self.on_side(&bbox, b, side, tolerance) {
                    continue;
                }
                let edge_force = a.distance(b) * self.thickness;
                loaded_edges += 1;
                if edge.len() == 3 {
                    contributions.push((edge[0], edge_force / 6.0));
                    contributions.push((edge[1], edge_force / 6.0));
                    contributions.push((edge[2], edge_force * 2.0 / 3.0));
                } else {
                    contributions.push((edge[0], edge_force / 2.0));
                    contributions.push((edge[1], edge_force / 2.0));
                }
            }
        }

        for (node, weight) in contributions {
            self.nodes[node].force += Vector2::new(tx * weight, ty * weight);
        }
        if loaded_edges == 0 {
            warn!("distributed load on {:?} found no boundary edges", side);
        }
        loaded_edges
    }

    /// Applies region rules: displacement targets fix the axis, force targets
    /// add to the nodal load.
    ///
    /// # Returns
    /// The number of nodes touched by at least one rule
    pub fn apply_boundary_rules(&mut self, rules: &[BoundaryRule]) -> usize {
        let mut touched = 0;
        for node in self.nodes.iter_mut() {
            let mut hit = false;
            for rule in rules {
                if !rule.region.contains(&node.vertex) {
                    continue;
                }
                hit = true;
                if let Some(ux) = rule.target.ux {
                    node.fixed[0] = true;
                    node.prescribed[0] = ux;
                }
                if let Some(uy) = rule.target.uy {
                    node.fixed[1] = true;
                    node.prescribed[1] = uy;
                }
                if let Some(fx) = rule.target.fx {
                    node.force.x += fx;
                }
                if let Some(fy) = rule.target.fy {
                    node.force.y += fy;
                }
            }
            if hit {
                touched += 1;
            }
        }
        self.dofs_valid = false;
        info!("applied {} boundary rules to {} nodes", rules.len(), touched);
        touched
    }

    /// Checks that every element's material exists in `materials`
    pub fn validate_materials(&self, materials: &MaterialLibrary) -> Result<()> {
        for element in self.elements.iter().filter(|e| !e.is_interface()) {
            if !materials.contains(element.material_id) {
                return Err(FaultlineError::Material(format!(
                    "Element {} references unknown material {}",
                    element.id, element.material_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{BoundaryRegion, BoundaryTarget};
    use approx::assert_relative_eq;

    fn two_triangles() -> Mesh {
        let mut mesh = Mesh::new(1.0);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            mesh.add_node(Vertex::new(x, y));
        }
        mesh.add_element(ElementKind::Triangle3, vec![0, 1, 2], 0).unwrap();
        mesh.add_element(ElementKind::Triangle3, vec![0, 2, 3], 0).unwrap();
        mesh
    }

    #[test]
    fn add_element_rejects_missing_nodes() {
        let mut mesh = two_triangles();
        let err = mesh.add_element(ElementKind::Triangle3, vec![0, 1, 9], 0);
        assert!(matches!(err, Err(FaultlineError::Mesh(_))));
    }

    #[test]
    fn renumbering_skips_fixed_axes() {
        let mut mesh = two_triangles();
        assert_eq!(mesh.dof_count(), None);
        mesh.fix_node(0, true, true).unwrap();
        mesh.fix_node(3, true, false).unwrap();
        assert_eq!(mesh.renumber_dofs(), 5);
        assert_eq!(mesh.nodes[0].dof, [None, None]);
        assert_eq!(mesh.nodes[1].dof, [Some(0), Some(1)]);
        assert_eq!(mesh.nodes[3].dof, [None, Some(4)]);

        mesh.add_node(Vertex::new(2.0, 2.0));
        assert!(!mesh.dofs_valid());
    }

    #[test]
    fn adjacency_through_shared_nodes() {
        let mesh = two_triangles();
        let adjacency = mesh.element_adjacency();
        assert_eq!(adjacency[0], vec![1]);
        assert_eq!(adjacency[1], vec![0]);
    }

    #[test]
    fn point_location() {
        let mesh = two_triangles();
        assert_eq!(mesh.find_element_containing(&Vertex::new(0.8, 0.2)), Some(0));
        assert_eq!(mesh.find_element_containing(&Vertex::new(0.2, 0.8)), Some(1));
        assert_eq!(mesh.find_element_containing(&Vertex::new(2.0, 0.8)), None);
    }

    #[test]
    fn node_deduplication() {
        let mut mesh = two_triangles();
        let id = mesh.find_or_add_node(Vertex::new(1.0 + 1e-9, 1.0), 1e-6);
        assert_eq!(id, 2);
        let fresh = mesh.find_or_add_node(Vertex::new(0.5, 0.5), 1e-6);
        assert_eq!(fresh, 4);
    }

    #[test]
    fn distributed_load_sums_to_traction_times_length() {
        let mut mesh = two_triangles();
        let edges = mesh.add_distributed_load(Side::Right, 3.0, 0.0, 1e-9);
        assert_eq!(edges, 1);
        let total: f64 = mesh.nodes.iter().map(|n| n.force.x).sum();
        assert_relative_eq!(total, 3.0);
        assert_relative_eq!(mesh.nodes[1].force.x, 1.5);
    }

    #[test]
    fn boundary_rules_fix_and_load() {
        let mut mesh = two_triangles();
        let rules = vec![
            BoundaryRule {
                name: "left".to_owned(),
                region: BoundaryRegion {
                    x_max: 0.1,
                    ..BoundaryRegion::everywhere()
                },
                target: BoundaryTarget {
                    ux: Some(0.0),
                    uy: Some(0.0),
                    ..Default::default()
                },
            },
            BoundaryRule {
                name: "pull".to_owned(),
                region: BoundaryRegion {
                    x_min: 0.9,
                    ..BoundaryRegion::everywhere()
                },
                target: BoundaryTarget {
                    fx: Some(10.0),
                    ..Default::default()
                },
            },
        ];
        assert_eq!(mesh.apply_boundary_rules(&rules), 4);
        assert!(mesh.nodes[0].is_fully_fixed());
        assert_relative_eq!(mesh.nodes[2].force.x, 10.0);
    }

    #[test]
    fn nodal_loads_and_prescribed_displacements() {
        let mut mesh = two_triangles();
        mesh.prescribe_displacement(2, 1, -0.1).unwrap();
        assert!(mesh.prescribe_displacement(2, 2, 0.0).is_err());
        assert!(mesh.nodes[2].fixed[1]);
        assert_relative_eq!(mesh.nodes[2].prescribed[1], -0.1);

        mesh.add_nodal_load(1, 2.0, 0.0).unwrap();
        mesh.add_nodal_load(1, 1.0, -1.0).unwrap();
        assert_relative_eq!(mesh.nodes[1].force.x, 3.0);
        assert!(mesh.add_nodal_load(7, 1.0, 0.0).is_err());
        mesh.clear_loads();
        assert_relative_eq!(mesh.nodes[1].force.norm(), 0.0);

        mesh.nodes[3].displacement = Vector2::new(0.5, 0.25);
        assert_eq!(
            mesh.element_displacements(&mesh.elements[1]),
            vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.25]
        );
        mesh.reset_displacements();
        assert_relative_eq!(mesh.nodes[3].displacement.norm(), 0.0);
    }

    #[test]
    fn interface_nodes_are_outside_the_continuum() {
        let mut mesh = two_triangles();
        let a0 = mesh.add_node(Vertex::new(0.2, 0.5));
        let a1 = mesh.add_node(Vertex::new(0.6, 0.5));
        let b1 = mesh.add_node(Vertex::new(0.6, 0.5001));
        let b0 = mesh.add_node(Vertex::new(0.2, 0.5001));
        mesh.add_element(
            ElementKind::interface(Default::default()),
            vec![a0, a1, b1, b0],
            0,
        )
        .unwrap();
        let mask = mesh.continuum_node_mask();
        assert_eq!(mask, vec![true, true, true, true, false, false, false, false]);
        assert_eq!(mesh.interface_count(), 1);
        assert!(mesh.element_adjacency()[2].is_empty());
    }

    #[test]
    fn split_node_copies_constraints_and_detaches_element() {
        let mut mesh = two_triangles();
        mesh.prescribe_displacement(1, 0, 0.2).unwrap();
        mesh.nodes[1].displacement.x = 0.1;
        mesh.add_nodal_load(1, 3.0, 0.0).unwrap();
        mesh.renumber_dofs();

        let twin = mesh.split_node(1, Vertex::new(1.0, 1e-4)).unwrap();
        assert_eq!(mesh.canonical_node(twin), 1);
        assert_eq!(mesh.canonical_node(1), 1);
        assert_eq!(mesh.nodes[twin].fixed, [true, false]);
        assert_relative_eq!(mesh.nodes[twin].prescribed[0], 0.2);
        assert_relative_eq!(mesh.nodes[twin].displacement.x, 0.1);
        assert_relative_eq!(mesh.nodes[twin].force.norm(), 0.0);

        mesh.renumber_dofs();
        mesh.reassign_node(0, 1, twin);
        assert!(!mesh.dofs_valid());
        assert!(mesh.elements[0].nodes.contains(&twin));
        assert!(!mesh.elements[0].nodes.contains(&1));
        assert!(mesh.split_node(99, Vertex::new(0.0, 0.0)).is_err());
    }

    #[test]
    fn geometry_cache_is_invalidated() {
        let mut mesh = two_triangles();
        mesh.refresh_geometry_cache();
        assert_relative_eq!(mesh.element_area(0), 0.5);
        mesh.invalidate_caches();
        assert!(mesh.elements[0].cached_area().is_none());
        assert_relative_eq!(mesh.element_area(0), 0.5);
    }
}
