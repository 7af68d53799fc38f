//! Element library: 3- and 6-node triangles, 4-node quadrilaterals and
//! zero-thickness 4-node interface (joint) elements.
//!
//! Every kernel takes the element's nodal coordinates in node order, so
//! elements never hold references into the mesh. Stiffness, mass and force
//! kernels only read; stress updates write the element's own integration
//! point state.
//!
//! # Node ordering
//!
//! - `Triangle3`: counter-clockwise corners.
//! - `Triangle6`: corners 0, 1, 2 then mid-side nodes on edges 0-1, 1-2, 2-0.
//! - `Quad4`: counter-clockwise corners.
//! - `Interface4`: `[a0, a1, b1, b0]`. Face A runs a0 -> a1, face B is offset
//!   along the left normal; node pairs (0, 3) and (1, 2) are coincident in
//!   the undeformed discontinuity.

use nalgebra::{DMatrix, DVector, Matrix2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::datatypes::Vertex;
use crate::error::{FaultlineError, Result};
use crate::geometry::{polygon_area, polygon_centroid};
use crate::material::{equivalent_plastic_strain, Material};
use crate::quadrature::{gauss_line, gauss_quad, gauss_triangle, GaussPoint};

pub const DOF: usize = 2;

/// Jacobian determinants at or below this magnitude mark a degenerate element
pub const DET_TOLERANCE: f64 = 1e-14;

/// Fraction of the joint stiffness kept in the iteration matrix once a joint
/// opens or slides
pub const RESIDUAL_JOINT_STIFFNESS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointParameters {
    pub normal_stiffness: f64,
    pub shear_stiffness: f64,
    pub cohesion: f64,
    /// Degrees
    pub friction_angle: f64,
    pub tensile_strength: f64,
}

impl Default for JointParameters {
    fn default() -> Self {
        JointParameters {
            normal_stiffness: 1e10,
            shear_stiffness: 1e9,
            cohesion: 0.0,
            friction_angle: 30.0,
            tensile_strength: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointState {
    pub is_open: bool,
    pub is_sliding: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    Triangle3,
    Triangle6,
    Quad4,
    Interface4 {
        params: JointParameters,
        state: JointState,
    },
}

impl ElementKind {
    pub fn interface(params: JointParameters) -> ElementKind {
        ElementKind::Interface4 {
            params,
            state: JointState::default(),
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            ElementKind::Triangle3 => 3,
            ElementKind::Triangle6 => 6,
            ElementKind::Quad4 | ElementKind::Interface4 { .. } => 4,
        }
    }

    /// Number of vertices of the element outline
    pub fn corner_count(&self) -> usize {
        match self {
            ElementKind::Triangle3 | ElementKind::Triangle6 => 3,
            ElementKind::Quad4 | ElementKind::Interface4 { .. } => 4,
        }
    }

    /// Stiffness and stress integration rule
    pub fn integration_points(&self) -> Vec<GaussPoint> {
        match self {
            ElementKind::Triangle3 => gauss_triangle(1),
            ElementKind::Triangle6 => gauss_triangle(3),
            ElementKind::Quad4 => gauss_quad(2),
            ElementKind::Interface4 { .. } => gauss_line(2),
        }
    }

    /// Mass integration rule. The constant-strain triangle needs more than
    /// its single stiffness point to integrate N^T N.
    fn mass_points(&self) -> Vec<GaussPoint> {
        match self {
            ElementKind::Triangle3 | ElementKind::Triangle6 => gauss_triangle(3),
            _ => self.integration_points(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Triangle3 => "tri3",
            ElementKind::Triangle6 => "tri6",
            ElementKind::Quad4 => "quad4",
            ElementKind::Interface4 { .. } => "interface4",
        }
    }
}

/// Shape function values and natural derivatives at (ξ, η).
///
/// # Panics
///
/// Panics for interface elements, which interpolate along a line.
pub fn shape_functions(kind: &ElementKind, xi: f64, eta: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    match kind {
        ElementKind::Triangle3 => (
            vec![1.0 - xi - eta, xi, eta],
            vec![-1.0, 1.0, 0.0],
            vec![-1.0, 0.0, 1.0],
        ),
        ElementKind::Triangle6 => {
            let l1 = 1.0 - xi - eta;
            let l2 = xi;
            let l3 = eta;
            (
                vec![
                    l1 * (2.0 * l1 - 1.0),
                    l2 * (2.0 * l2 - 1.0),
                    l3 * (2.0 * l3 - 1.0),
                    4.0 * l1 * l2,
                    4.0 * l2 * l3,
                    4.0 * l3 * l1,
                ],
                vec![
                    -(4.0 * l1 - 1.0),
                    4.0 * l2 - 1.0,
                    0.0,
                    4.0 * (l1 - l2),
                    4.0 * l3,
                    -4.0 * l3,
                ],
                vec![
                    -(4.0 * l1 - 1.0),
                    0.0,
                    4.0 * l3 - 1.0,
                    -4.0 * l2,
                    4.0 * l2,
                    4.0 * (l1 - l3),
                ],
            )
        }
        ElementKind::Quad4 => {
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            let mut n = Vec::with_capacity(4);
            let mut dxi = Vec::with_capacity(4);
            let mut deta = Vec::with_capacity(4);
            for (xi_i, eta_i) in corners {
                n.push(0.25 * (1.0 + xi * xi_i) * (1.0 + eta * eta_i));
                dxi.push(0.25 * xi_i * (1.0 + eta * eta_i));
                deta.push(0.25 * eta_i * (1.0 + xi * xi_i));
            }
            (n, dxi, deta)
        }
        ElementKind::Interface4 { .. } => {
            panic!("shape_functions: interface elements use line interpolation")
        }
    }
}

/// State stored at each integration point. Interface elements store the
/// joint traction `[τ, σn, 0]` in `stress` and the relative displacement
/// `[δs, δn, 0]` in `strain`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationPointState {
    pub stress: Vector3<f64>,
    pub strain: Vector3<f64>,
    pub plastic_strain: Vector3<f64>,
    /// Accumulated equivalent plastic strain
    pub kappa: f64,
    pub damage: f64,
    /// Yield index of the trial (elastic predictor) stress
    pub yield_index: f64,
    pub yielded: bool,
    /// Plastic strain increment awaiting commit
    pub pending_plastic_strain: Vector3<f64>,
}

impl Default for IntegrationPointState {
    fn default() -> Self {
        IntegrationPointState {
            stress: Vector3::zeros(),
            strain: Vector3::zeros(),
            plastic_strain: Vector3::zeros(),
            kappa: 0.0,
            damage: 0.0,
            yield_index: 0.0,
            yielded: false,
            pending_plastic_strain: Vector3::zeros(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub id: usize,
    pub material_id: usize,
    pub kind: ElementKind,
    pub nodes: Vec<usize>,
    pub points: Vec<IntegrationPointState>,
    pub has_failed: bool,
    cached_area: Option<f64>,
    cached_centroid: Option<Vertex>,
}

impl Element {
    /// # Panics
    ///
    /// Panics if `nodes` does not match the node count of `kind`.
    pub fn new(id: usize, kind: ElementKind, nodes: Vec<usize>, material_id: usize) -> Element {
        assert_eq!(
            nodes.len(),
            kind.node_count(),
            "{} element requires {} nodes",
            kind.name(),
            kind.node_count()
        );
        let points = vec![IntegrationPointState::default(); kind.integration_points().len()];
        Element {
            id,
            material_id,
            kind,
            nodes,
            points,
            has_failed: false,
            cached_area: None,
            cached_centroid: None,
        }
    }

    pub fn is_interface(&self) -> bool {
        matches!(self.kind, ElementKind::Interface4 { .. })
    }

    pub fn n_dofs(&self) -> usize {
        self.nodes.len() * DOF
    }

    pub fn joint(&self) -> Option<(JointParameters, JointState)> {
        match self.kind {
            ElementKind::Interface4 { params, state } => Some((params, state)),
            _ => None,
        }
    }

    /// Vertices of the element outline in order
    pub fn corner_nodes(&self) -> &[usize] {
        &self.nodes[..self.kind.corner_count()]
    }

    /// Outline edges. Quadratic edges carry their mid-side node third.
    pub fn boundary_edges(&self) -> Vec<Vec<usize>> {
        let n = &self.nodes;
        match self.kind {
            ElementKind::Triangle3 => vec![vec![n[0], n[1]], vec![n[1], n[2]], vec![n[2], n[0]]],
            ElementKind::Triangle6 => vec![
                vec![n[0], n[1], n[3]],
                vec![n[1], n[2], n[4]],
                vec![n[2], n[0], n[5]],
            ],
            ElementKind::Quad4 | ElementKind::Interface4 { .. } => vec![
                vec![n[0], n[1]],
                vec![n[1], n[2]],
                vec![n[2], n[3]],
                vec![n[3], n[0]],
            ],
        }
    }

    /// Outline as node-to-node segments, quadratic edges split at their
    /// mid-side node
    pub fn outline_segments(&self) -> Vec<(usize, usize)> {
        self.boundary_edges()
            .into_iter()
            .flat_map(|edge| match edge.as_slice() {
                [p, q, mid] => vec![(*p, *mid), (*mid, *q)],
                [p, q] => vec![(*p, *q)],
                _ => Vec::new(),
            })
            .collect()
    }

    fn corner_coords<'a>(&self, coords: &'a [Vertex]) -> &'a [Vertex] {
        &coords[..self.kind.corner_count()]
    }

    pub fn area(&self, coords: &[Vertex]) -> f64 {
        polygon_area(self.corner_coords(coords))
    }

    pub fn centroid(&self, coords: &[Vertex]) -> Vertex {
        polygon_centroid(self.corner_coords(coords))
    }

    pub fn refresh_geometry(&mut self, coords: &[Vertex]) {
        self.cached_area = Some(self.area(coords));
        self.cached_centroid = Some(self.centroid(coords));
    }

    pub fn invalidate_geometry(&mut self) {
        self.cached_area = None;
        self.cached_centroid = None;
    }

    pub fn cached_area(&self) -> Option<f64> {
        self.cached_area
    }

    pub fn cached_centroid(&self) -> Option<Vertex> {
        self.cached_centroid
    }

    /// Jacobian of the isoparametric map at (ξ, η)
    ///
    /// # Returns
    /// The 2x2 Jacobian and its determinant
    pub fn jacobian(&self, coords: &[Vertex], xi: f64, eta: f64) -> Result<(Matrix2<f64>, f64)> {
        let (_, dxi, deta) = shape_functions(&self.kind, xi, eta);
        let mut j = Matrix2::<f64>::zeros();
        for (i, v) in coords.iter().enumerate().take(self.nodes.len()) {
            j[(0, 0)] += dxi[i] * v.x;
            j[(0, 1)] += dxi[i] * v.y;
            j[(1, 0)] += deta[i] * v.x;
            j[(1, 1)] += deta[i] * v.y;
        }
        let det = j.determinant();
        if det.abs() <= DET_TOLERANCE {
            return Err(FaultlineError::Degenerate(format!(
                "element {} has Jacobian determinant {det:e}",
                self.id
            )));
        }
        Ok((j, det))
    }

    /// Strain-displacement matrix at an integration point
    ///
    /// # Returns
    /// The 3 x (2 n_nodes) B-matrix and the Jacobian determinant
    pub fn strain_displacement_matrix(
        &self,
        coords: &[Vertex],
        gp: &GaussPoint,
    ) -> Result<(DMatrix<f64>, f64)> {
        let (j, det) = self.jacobian(coords, gp.xi, gp.eta)?;
        let (_, dxi, deta) = shape_functions(&self.kind, gp.xi, gp.eta);
        let inv = Matrix2::new(j[(1, 1)], -j[(0, 1)], -j[(1, 0)], j[(0, 0)]) / det;

        let mut b = DMatrix::zeros(3, self.n_dofs());
        for i in 0..self.nodes.len() {
            let dndx = inv[(0, 0)] * dxi[i] + inv[(0, 1)] * deta[i];
            let dndy = inv[(1, 0)] * dxi[i] + inv[(1, 1)] * deta[i];
            b[(0, 2 * i)] = dndx;
            b[(1, 2 * i + 1)] = dndy;
            b[(2, 2 * i)] = dndy;
            b[(2, 2 * i + 1)] = dndx;
        }
        Ok((b, det))
    }

    /// Interface frame and 2 x 8 relative-displacement matrix at ξ.
    ///
    /// # Returns
    /// The B-matrix mapping nodal displacements to `[δs, δn]` and the line
    /// Jacobian (half length of face A)
    fn interface_matrix(&self, coords: &[Vertex], xi: f64) -> Result<(DMatrix<f64>, f64)> {
        let a0 = &coords[0];
        let a1 = &coords[1];
        let length = a0.distance(a1);
        if length <= DET_TOLERANCE.sqrt() {
            return Err(FaultlineError::Degenerate(format!(
                "interface element {} has zero length",
                self.id
            )));
        }
        let t = Vector2::new((a1.x - a0.x) / length, (a1.y - a0.y) / length);
        let n = Vector2::new(-t.y, t.x);
        let n1 = 0.5 * (1.0 - xi);
        let n2 = 0.5 * (1.0 + xi);

        let mut b = DMatrix::zeros(2, 8);
        for (node, weight) in [(0, -n1), (1, -n2), (2, n2), (3, n1)] {
            b[(0, 2 * node)] = weight * t.x;
            b[(0, 2 * node + 1)] = weight * t.y;
            b[(1, 2 * node)] = weight * n.x;
            b[(1, 2 * node + 1)] = weight * n.y;
        }
        Ok((b, 0.5 * length))
    }

    /// Element stiffness matrix K = ∫ B^T D B t dA
    pub fn stiffness(
        &self,
        coords: &[Vertex],
        material: &Material,
        thickness: f64,
    ) -> Result<DMatrix<f64>> {
        let mut k = DMatrix::zeros(self.n_dofs(), self.n_dofs());

        if let ElementKind::Interface4 { params, state } = self.kind {
            let ks = params.shear_stiffness
                * if state.is_sliding { RESIDUAL_JOINT_STIFFNESS } else { 1.0 };
            let kn = params.normal_stiffness
                * if state.is_open { RESIDUAL_JOINT_STIFFNESS } else { 1.0 };
            let d = DMatrix::from_diagonal(&DVector::from_vec(vec![ks, kn]));
            for gp in self.kind.integration_points() {
                let (b, det) = self.interface_matrix(coords, gp.xi)?;
                k += b.transpose() * &d * &b * (det * gp.weight * thickness);
            }
            return Ok(k);
        }

        let d = DMatrix::from_column_slice(3, 3, material.elasticity_matrix().as_slice());
        for gp in self.kind.integration_points() {
            let (b, det) = self.strain_displacement_matrix(coords, &gp)?;
            let db = &d * &b;
            k += b.transpose() * db * (det.abs() * gp.weight * thickness);
        }
        Ok(k)
    }

    /// Consistent mass matrix M = ∫ ρ N^T N t dA. Zero for interfaces.
    pub fn mass(
        &self,
        coords: &[Vertex],
        material: &Material,
        thickness: f64,
    ) -> Result<DMatrix<f64>> {
        let mut m = DMatrix::zeros(self.n_dofs(), self.n_dofs());
        if self.is_interface() {
            return Ok(m);
        }
        for gp in self.kind.mass_points() {
            let (_, det) = self.jacobian(coords, gp.xi, gp.eta)?;
            let (n, _, _) = shape_functions(&self.kind, gp.xi, gp.eta);
            let scale = material.density * det.abs() * gp.weight * thickness;
            for i in 0..self.nodes.len() {
                for j in 0..self.nodes.len() {
                    let value = n[i] * n[j] * scale;
                    m[(2 * i, 2 * j)] += value;
                    m[(2 * i + 1, 2 * j + 1)] += value;
                }
            }
        }
        Ok(m)
    }

    /// Equivalent nodal body force for acceleration `gravity`
    pub fn body_force(
        &self,
        coords: &[Vertex],
        material: &Material,
        gravity: &Vector2<f64>,
        thickness: f64,
    ) -> Result<DVector<f64>> {
        let mut f = DVector::zeros(self.n_dofs());
        if self.is_interface() || material.density == 0.0 {
            return Ok(f);
        }
        for gp in self.kind.integration_points() {
            let (_, det) = self.jacobian(coords, gp.xi, gp.eta)?;
            let (n, _, _) = shape_functions(&self.kind, gp.xi, gp.eta);
            let scale = material.density * det.abs() * gp.weight * thickness;
            for i in 0..self.nodes.len() {
                f[2 * i] += n[i] * gravity.x * scale;
                f[2 * i + 1] += n[i] * gravity.y * scale;
            }
        }
        Ok(f)
    }

    /// Internal force f = ∫ B^T σ t dA from the stored integration point stress
    pub fn internal_force(&self, coords: &[Vertex], thickness: f64) -> Result<DVector<f64>> {
        let mut f = DVector::zeros(self.n_dofs());
        for (gp, state) in self.kind.integration_points().iter().zip(&self.points) {
            if self.is_interface() {
                let (b, det) = self.interface_matrix(coords, gp.xi)?;
                let traction = DVector::from_vec(vec![state.stress[0], state.stress[1]]);
                f += b.transpose() * traction * (det * gp.weight * thickness);
            } else {
                let (b, det) = self.strain_displacement_matrix(coords, gp)?;
                let sigma = DVector::from_column_slice(state.stress.as_slice());
                f += b.transpose() * sigma * (det.abs() * gp.weight * thickness);
            }
        }
        Ok(f)
    }

    /// Recomputes strain and stress at every integration point from nodal
    /// displacements. Plastic increments are held as pending until
    /// [`Element::commit_state`].
    ///
    /// # Arguments
    /// * `coords` - Nodal coordinates in element node order
    /// * `displacements` - Element displacement vector `[u0, v0, u1, v1, ...]`
    /// * `material` - The element's material
    /// * `plasticity` - Apply the material's return mapping
    pub fn update_stress(
        &mut self,
        coords: &[Vertex],
        displacements: &[f64],
        material: &Material,
        plasticity: bool,
    ) -> Result<()> {
        assert_eq!(displacements.len(), self.n_dofs());
        let u = DVector::from_column_slice(displacements);

        if let ElementKind::Interface4 { params, .. } = self.kind {
            let mut any_open = false;
            let mut any_sliding = false;
            for (i, gp) in self.kind.integration_points().iter().enumerate() {
                let (b, _) = self.interface_matrix(coords, gp.xi)?;
                let delta = &b * &u;
                let (traction, open, sliding) = joint_traction(&params, delta[0], delta[1]);
                let state = &mut self.points[i];
                state.strain = Vector3::new(delta[0], delta[1], 0.0);
                state.stress = Vector3::new(traction.x, traction.y, 0.0);
                state.yielded = open || sliding;
                any_open |= open;
                any_sliding |= sliding;
            }
            if let ElementKind::Interface4 { state, .. } = &mut self.kind {
                state.is_open = any_open;
                state.is_sliding = any_sliding;
            }
            return Ok(());
        }

        let d = material.elasticity_matrix();
        for (i, gp) in self.kind.integration_points().iter().enumerate() {
            let (b, _) = self.strain_displacement_matrix(coords, gp)?;
            let strain_dyn = &b * &u;
            let strain = Vector3::new(strain_dyn[0], strain_dyn[1], strain_dyn[2]);

            let state = &mut self.points[i];
            let trial = d * (strain - state.plastic_strain);
            state.strain = strain;
            state.yield_index = material.yield_index(&trial, state.kappa);

            let correction = if plasticity {
                material.return_map(&trial, state.kappa)
            } else {
                None
            };
            match correction {
                Some(c) => {
                    state.stress = c.stress;
                    state.pending_plastic_strain = c.plastic_strain_increment;
                    state.yielded = c.yielded;
                }
                None => {
                    state.stress = trial;
                    state.pending_plastic_strain = Vector3::zeros();
                    state.yielded = false;
                }
            }
        }
        Ok(())
    }

    /// Folds pending plastic increments into the plastic state
    pub fn commit_state(&mut self, material: &Material) {
        for state in self.points.iter_mut() {
            if state.pending_plastic_strain == Vector3::zeros() {
                continue;
            }
            state.plastic_strain += state.pending_plastic_strain;
            state.kappa += equivalent_plastic_strain(&state.pending_plastic_strain);
            state.damage = material.damage(state.kappa);
            state.pending_plastic_strain = Vector3::zeros();
        }
        if self.points.iter().any(|p| p.damage >= 1.0) {
            self.has_failed = true;
        }
    }

    pub fn max_yield_index(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.yield_index)
            .fold(0.0, f64::max)
    }

    pub fn mean_stress(&self) -> Vector3<f64> {
        let sum: Vector3<f64> = self.points.iter().map(|p| p.stress).sum();
        sum / self.points.len().max(1) as f64
    }

    pub fn mean_kappa(&self) -> f64 {
        self.points.iter().map(|p| p.kappa).sum::<f64>() / self.points.len().max(1) as f64
    }

    pub fn any_yielded(&self) -> bool {
        self.points.iter().any(|p| p.yielded)
    }
}

/// Mohr-Coulomb joint law with tension cut-off, tension positive.
///
/// # Returns
/// Traction `(τ, σn)`, open flag and sliding flag. An open joint carries no
/// traction.
pub fn joint_traction(params: &JointParameters, shear: f64, normal: f64) -> (Vector2<f64>, bool, bool) {
    let tn = params.normal_stiffness * normal;
    let ts = params.shear_stiffness * shear;

    if tn > params.tensile_strength {
        return (Vector2::zeros(), true, true);
    }

    let capacity = (params.cohesion - tn * params.friction_angle.to_radians().tan()).max(0.0);
    if ts.abs() > capacity {
        (Vector2::new(capacity.copysign(ts), tn), false, true)
    } else {
        (Vector2::new(ts, tn), false, false)
    }
}
