use crate::{
    datatypes::{Node, Vertex},
    element::{Element, DOF},
    error::{FaultlineError, Result},
    material::MaterialLibrary,
    mesh::Mesh,
};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Vector2};
use nalgebra_sparse::{convert::serial::convert_coo_dense, CooMatrix, CsrMatrix};
use rayon::prelude::*;

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        ArgminFloat, Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

pub const MAX_CG_ITER: u64 = 1e7 as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolver {
    ConjugateGradient,
    Cholesky,
}

impl LinearSolver {
    pub fn parse(name: &str) -> Result<LinearSolver> {
        match name.trim().to_lowercase().as_str() {
            "cg" | "conjugate_gradient" => Ok(LinearSolver::ConjugateGradient),
            "direct" | "cholesky" => Ok(LinearSolver::Cholesky),
            other => Err(FaultlineError::Input(format!("Unrecognized solver {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub linear_solver: LinearSolver,
    /// Body acceleration applied to every continuum element
    pub gravity: Vector2<f64>,
    pub plasticity: bool,
    /// Equilibrium iteration cap per solve
    pub max_iterations: usize,
    /// Residual norm relative to the force scale at convergence
    pub tolerance: f64,
    /// Conjugate gradient residual relative to the right-hand side norm
    pub cg_tolerance: f64,
    /// Multiplies nodal loads and prescribed displacements
    pub load_factor: f64,
    /// Grounding spring, relative to the mean stiffness diagonal, on DOFs
    /// not attached to any continuum element
    pub stabilization: f64,
    pub show_progress: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            linear_solver: LinearSolver::Cholesky,
            gravity: Vector2::zeros(),
            plasticity: true,
            max_iterations: 25,
            tolerance: 1e-6,
            cg_tolerance: 1e-10,
            load_factor: 1.0,
            stabilization: 1e-6,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SolveReport {
    pub iterations: usize,
    pub converged: bool,
    pub residual_norm: f64,
    pub free_dofs: usize,
    /// Elements dropped from assembly because of degenerate geometry
    pub skipped_elements: Vec<usize>,
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self
            .a
            .row_iter()
            .map(|row| {
                row.col_indices()
                    .iter()
                    .zip(row.values())
                    .map(|(col, value)| value * x[*col])
                    .sum()
            })
            .collect())
    }
}

/// Observer bar for argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(target_cost: f64, visible: bool) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: if visible {
                ProgressBar::new(1000)
            } else {
                ProgressBar::hidden()
            },
            final_mag: target_cost.log10().floor(),
        }
    }

    fn argmin_float_to_f64<F: ArgminFloat>(&self, value: F) -> Option<f64> {
        // ToPrimitive is not reachable without num-traits
        format!("{:?}", value).parse().ok()
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        let cost = match self.argmin_float_to_f64(state.get_cost()) {
            Some(c) => c,
            None => return Ok(()), // skip if we can't parse
        };
        let cost_mag = cost.log10().floor();
        let remaining = (cost_mag - self.final_mag).max(1.0);
        self.bar.set_position((1000. / f64::sqrt(remaining)) as u64);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> std::result::Result<(), Error> {
        self.bar.finish_and_clear();
        Ok(())
    }
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`
///
/// # Arguments
/// * `a` - A square positive definite matrix
/// * `b` - A vector of the solutions to the system
/// * `relative_tolerance` - Target residual norm relative to `|b|`
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    relative_tolerance: f64,
    show_progress: bool,
) -> Result<DVector<f64>> {
    let b_norm = b.norm();
    if b_norm == 0.0 {
        return Ok(DVector::zeros(b.nrows()));
    }

    let b_flat: Vec<f64> = b.iter().copied().collect();
    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b_flat);
    let initial_guess: Vec<f64> = vec![0.0; b.nrows()];
    let target_cost = relative_tolerance * b_norm;

    let operator = ConjugateGradientOperator { a };
    let observer = ConjugateGradientObserverBar::new(target_cost, show_progress);

    let res = Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(MAX_CG_ITER)
                .target_cost(target_cost)
        })
        .add_observer(observer, ObserverMode::NewBest)
        .run()
        .map_err(|err| FaultlineError::Solver(format!("Conjugate Gradient error: {err}")))?;

    match &res.state().best_param {
        Some(vec) => Ok(DVector::from_vec(vec.clone())),
        None => Err(FaultlineError::Solver(
            "Conjugate Gradient could not produce best parameter".to_owned(),
        )),
    }
}

/// Dense Cholesky solve, falling back to LU for indefinite systems
fn run_direct(coo: &CooMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let dense: DMatrix<f64> = convert_coo_dense(coo);
    if let Some(cholesky) = dense.clone().cholesky() {
        return Ok(cholesky.solve(b));
    }
    warn!("stiffness matrix is not positive definite, falling back to LU");
    dense
        .lu()
        .solve(b)
        .ok_or_else(|| FaultlineError::Solver("Singular stiffness matrix".to_owned()))
}

fn gather_coords(nodes: &[Node], element: &Element) -> Vec<Vertex> {
    element.nodes.iter().map(|n| nodes[*n].vertex).collect()
}

fn gather_displacements(nodes: &[Node], element: &Element) -> Vec<f64> {
    element
        .nodes
        .iter()
        .flat_map(|n| [nodes[*n].displacement.x, nodes[*n].displacement.y])
        .collect()
}

/// Computes every element stiffness matrix in parallel. Degenerate elements
/// yield `None` and are logged.
///
/// # Returns
/// One entry per element, in element order
pub fn compute_element_stiffness_matrices(
    mesh: &Mesh,
    materials: &MaterialLibrary,
    show_progress: bool,
) -> Result<Vec<Option<DMatrix<f64>>>> {
    let bar = if show_progress {
        ProgressBar::new(mesh.elements.len() as u64)
    } else {
        ProgressBar::hidden()
    };

    let matrices = mesh
        .elements
        .par_iter()
        .map(|element| {
            bar.inc(1);
            let material = materials.get(element.material_id)?;
            let coords = gather_coords(&mesh.nodes, element);
            match element.stiffness(&coords, material, mesh.thickness) {
                Ok(k) => Ok(Some(k)),
                Err(err) if err.is_degenerate() => {
                    warn!("skipping element {} in assembly: {err}", element.id);
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    bar.finish_and_clear();
    Ok(matrices)
}

/// Compiles element stiffness matrices into the free-DOF stiffness matrix
///
/// # Arguments
/// * `mesh` - A mesh with valid DOF numbering
/// * `element_stiffness_matrices` - Output of [`compute_element_stiffness_matrices`]
/// * `stabilization` - Relative grounding stiffness for DOFs outside the continuum
///
/// # Returns
/// The sparse matrix in coordinate form and the grounding springs added, as
/// `(node, axis, stiffness)`
fn build_total_stiffness_matrix(
    mesh: &Mesh,
    element_stiffness_matrices: &[Option<DMatrix<f64>>],
    stabilization: f64,
) -> Result<(CooMatrix<f64>, Vec<(usize, usize, f64)>)> {
    let n = mesh
        .dof_count()
        .ok_or_else(|| FaultlineError::Solver("DOF numbering is stale".to_owned()))?;
    let mut total_stiffness_matrix = CooMatrix::new(n, n);
    let mut diagonal = vec![0.0; n];
    let mut attached = vec![false; mesh.node_count()];

    for (element, stiffness_mat) in mesh.elements.iter().zip(element_stiffness_matrices) {
        let k = match stiffness_mat {
            Some(k) => k,
            None => continue,
        };
        if !element.is_interface() {
            for node in &element.nodes {
                attached[*node] = true;
            }
        }
        let dofs = mesh.element_dofs(element);
        for (local_row, global_row) in dofs.iter().enumerate() {
            let global_row = match global_row {
                Some(r) => *r,
                None => continue,
            };
            for (local_col, global_col) in dofs.iter().enumerate() {
                if let Some(global_col) = global_col {
                    let value = k[(local_row, local_col)];
                    if value != 0.0 {
                        total_stiffness_matrix.push(global_row, *global_col, value);
                    }
                    if global_row == *global_col {
                        diagonal[global_row] += value;
                    }
                }
            }
        }
    }

    let nonzero: Vec<f64> = diagonal.iter().copied().filter(|d| *d > 0.0).collect();
    let mean_diagonal = if nonzero.is_empty() {
        1.0
    } else {
        nonzero.iter().sum::<f64>() / nonzero.len() as f64
    };
    let spring = stabilization * mean_diagonal;

    let mut grounded = Vec::new();
    for node in mesh.nodes.iter().filter(|n| !attached[n.id]) {
        for (axis, dof) in node.dof.iter().enumerate() {
            if let Some(dof) = dof {
                total_stiffness_matrix.push(*dof, *dof, spring);
                grounded.push((node.id, axis, spring));
            }
        }
    }
    if !grounded.is_empty() {
        debug!("grounded {} dofs outside the continuum", grounded.len());
    }

    Ok((total_stiffness_matrix, grounded))
}

/// Scatters an element vector into a full (all-node) vector
fn scatter(full: &mut DVector<f64>, element: &Element, local: &DVector<f64>) {
    for (i, node) in element.nodes.iter().enumerate() {
        full[DOF * node] += local[DOF * i];
        full[DOF * node + 1] += local[DOF * i + 1];
    }
}

/// External load over all nodes: scaled nodal loads plus body force
fn build_external_forces(
    mesh: &Mesh,
    materials: &MaterialLibrary,
    gravity: &Vector2<f64>,
    load_factor: f64,
) -> Result<DVector<f64>> {
    let mut forces = DVector::zeros(DOF * mesh.node_count());
    for node in &mesh.nodes {
        forces[DOF * node.id] += load_factor * node.force.x;
        forces[DOF * node.id + 1] += load_factor * node.force.y;
    }
    if gravity.norm() == 0.0 {
        return Ok(forces);
    }
    for element in mesh.elements.iter().filter(|e| !e.is_interface()) {
        let material = materials.get(element.material_id)?;
        let coords = gather_coords(&mesh.nodes, element);
        match element.body_force(&coords, material, gravity, mesh.thickness) {
            Ok(f) => scatter(&mut forces, element, &f),
            Err(err) if err.is_degenerate() => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(forces)
}

/// Updates integration point stress of every element from the current nodal
/// displacements, in parallel
fn update_element_stresses(
    mesh: &mut Mesh,
    materials: &MaterialLibrary,
    plasticity: bool,
) -> Result<()> {
    let nodes = &mesh.nodes;
    mesh.elements
        .par_iter_mut()
        .map(|element| {
            let material = materials.get(element.material_id)?;
            let coords = gather_coords(nodes, element);
            let displacements = gather_displacements(nodes, element);
            match element.update_stress(&coords, &displacements, material, plasticity) {
                Err(err) if err.is_degenerate() => Ok(()),
                other => other,
            }
        })
        .collect::<Result<Vec<()>>>()?;
    Ok(())
}

/// Internal force over all nodes from stored stresses
fn build_internal_forces(mesh: &Mesh) -> Result<DVector<f64>> {
    let locals = mesh
        .elements
        .par_iter()
        .map(|element| {
            let coords = gather_coords(&mesh.nodes, element);
            match element.internal_force(&coords, mesh.thickness) {
                Ok(f) => Ok(Some(f)),
                Err(err) if err.is_degenerate() => Ok(None),
                Err(err) => Err(err),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let mut forces = DVector::zeros(DOF * mesh.node_count());
    for (element, local) in mesh.elements.iter().zip(locals) {
        if let Some(f) = local {
            scatter(&mut forces, element, &f);
        }
    }
    Ok(forces)
}

/// Solves the quasi-static equilibrium of the mesh. Loads and prescribed
/// displacements are scaled by `options.load_factor`; plastic and joint
/// nonlinearity is resolved by equilibrium iterations, then plastic state is
/// committed. Displacements, stresses and reactions are written back into
/// the mesh.
///
/// # Arguments
/// * `mesh` - The mesh to solve. DOFs are renumbered if stale.
/// * `materials` - Library resolving every element's material id
/// * `options` - Solver settings
pub fn solve(
    mesh: &mut Mesh,
    materials: &MaterialLibrary,
    options: &SolverOptions,
) -> Result<SolveReport> {
    if !mesh.dofs_valid() {
        mesh.renumber_dofs();
    }
    let n = mesh.dof_count().unwrap_or(0);
    let start = std::time::Instant::now();
    info!(
        "solving {} elements, {} free dofs, load factor {:.3}",
        mesh.element_count(),
        n,
        options.load_factor
    );

    for node in mesh.nodes.iter_mut() {
        for axis in 0..DOF {
            if node.fixed[axis] {
                node.displacement[axis] = options.load_factor * node.prescribed[axis];
            }
        }
    }

    let external = build_external_forces(mesh, materials, &options.gravity, options.load_factor)?;
    let has_interfaces = mesh.interface_count() > 0;

    let mut report = SolveReport {
        free_dofs: n,
        ..Default::default()
    };

    let mut system: Option<(CooMatrix<f64>, Vec<(usize, usize, f64)>)> = None;
    let mut internal;

    loop {
        update_element_stresses(mesh, materials, options.plasticity)?;
        internal = build_internal_forces(mesh)?;

        if system.is_none() || has_interfaces {
            let element_matrices =
                compute_element_stiffness_matrices(mesh, materials, options.show_progress)?;
            report.skipped_elements = element_matrices
                .iter()
                .enumerate()
                .filter(|(_, k)| k.is_none())
                .map(|(i, _)| i)
                .collect();
            system = Some(build_total_stiffness_matrix(
                mesh,
                &element_matrices,
                options.stabilization,
            )?);
        }
        let (stiffness, grounded) = match &system {
            Some(s) => s,
            None => break,
        };

        // residual over free dofs
        let mut residual = DVector::zeros(n);
        for node in &mesh.nodes {
            for axis in 0..DOF {
                if let Some(dof) = node.dof[axis] {
                    residual[dof] = external[DOF * node.id + axis] - internal[DOF * node.id + axis];
                }
            }
        }
        for (node, axis, spring) in grounded {
            let node = &mesh.nodes[*node];
            if let Some(dof) = node.dof[*axis] {
                residual[dof] -= spring * node.displacement[*axis];
            }
        }

        let scale = external.norm().max(internal.norm()).max(f64::MIN_POSITIVE);
        report.residual_norm = residual.norm();
        debug!(
            "iteration {}: residual {:.3e} (scale {:.3e})",
            report.iterations, report.residual_norm, scale
        );

        if n == 0 || (report.iterations > 0 && report.residual_norm <= options.tolerance * scale) {
            report.converged = true;
            break;
        }
        if report.iterations >= options.max_iterations {
            break;
        }

        let correction = match options.linear_solver {
            LinearSolver::Cholesky => run_direct(stiffness, &residual)?,
            LinearSolver::ConjugateGradient => {
                let csr = CsrMatrix::from(stiffness);
                run_conjugate_gradient(&csr, &residual, options.cg_tolerance, options.show_progress)?
            }
        };

        for node in mesh.nodes.iter_mut() {
            for axis in 0..DOF {
                if let Some(dof) = node.dof[axis] {
                    node.displacement[axis] += correction[dof];
                }
            }
        }
        report.iterations += 1;
    }

    if !report.converged {
        warn!(
            "equilibrium not reached after {} iterations (residual {:.3e})",
            report.iterations, report.residual_norm
        );
    }

    for element in mesh.elements.iter_mut() {
        if let Ok(material) = materials.get(element.material_id) {
            element.commit_state(material);
        }
    }

    for node in mesh.nodes.iter_mut() {
        node.reaction = Vector2::new(
            internal[DOF * node.id] - external[DOF * node.id],
            internal[DOF * node.id + 1] - external[DOF * node.id + 1],
        );
    }

    let elapsed = start.elapsed().as_secs_f32();
    info!(
        "solve complete in {:.3} seconds after {} iterations",
        elapsed, report.iterations
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Side;
    use crate::element::{ElementKind, JointParameters};
    use crate::fault::{FaultPropagationEngine, FaultPropagationSettings, RuptureMode};
    use crate::material::Material;
    use crate::mesher::{rectangle, GridElement};
    use approx::assert_relative_eq;

    const E: f64 = 1000.0;
    const NU: f64 = 0.0;

    fn library() -> MaterialLibrary {
        let mut lib = MaterialLibrary::new();
        lib.insert(Material::elastic(0, E, NU).unwrap());
        lib
    }

    /// Bar fixed on the left (x everywhere on the left edge, y at the corner)
    /// and pulled by a uniform traction on the right edge
    fn bar(element: GridElement) -> Mesh {
        let mut mesh = Mesh::new(1.0);
        rectangle(&mut mesh, Vertex::new(0.0, 0.0), 10.0, 1.0, 10, 2, element, 0).unwrap();
        mesh.fix_side(Side::Left, true, false, 1e-9);
        mesh.fix_node(0, true, true).unwrap();
        mesh.add_distributed_load(Side::Right, 5.0, 0.0, 1e-9);
        mesh
    }

    fn right_edge_ux(mesh: &Mesh) -> Vec<f64> {
        mesh.nodes_on_side(Side::Right, 1e-9)
            .iter()
            .map(|id| mesh.nodes[*id].displacement.x)
            .collect()
    }

    #[test]
    fn uniaxial_bar_matches_analytical_elongation() {
        // with ν = 0 plane strain reduces to 1D: δ = σL/E
        let expected = 5.0 * 10.0 / E;
        for element in [GridElement::Quad4, GridElement::Triangle3, GridElement::Triangle6] {
            let mut mesh = bar(element);
            let report = solve(&mut mesh, &library(), &SolverOptions::default()).unwrap();
            assert!(report.converged);
            for ux in right_edge_ux(&mesh) {
                assert_relative_eq!(ux, expected, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn conjugate_gradient_agrees_with_direct() {
        let mut mesh = bar(GridElement::Quad4);
        let options = SolverOptions {
            linear_solver: LinearSolver::ConjugateGradient,
            ..Default::default()
        };
        solve(&mut mesh, &library(), &options).unwrap();
        for ux in right_edge_ux(&mesh) {
            assert_relative_eq!(ux, 0.05, epsilon = 1e-6);
        }
    }

    #[test]
    fn reactions_balance_applied_load() {
        let mut mesh = bar(GridElement::Quad4);
        solve(&mut mesh, &library(), &SolverOptions::default()).unwrap();
        let reaction: f64 = mesh
            .nodes_on_side(Side::Left, 1e-9)
            .iter()
            .map(|id| mesh.nodes[*id].reaction.x)
            .sum();
        assert_relative_eq!(reaction, -5.0, epsilon = 1e-8);
    }

    #[test]
    fn prescribed_displacement_scales_with_load_factor() {
        let mut mesh = Mesh::new(1.0);
        rectangle(&mut mesh, Vertex::new(0.0, 0.0), 2.0, 1.0, 2, 1, GridElement::Quad4, 0).unwrap();
        mesh.fix_side(Side::Left, true, false, 1e-9);
        mesh.fix_node(0, true, true).unwrap();
        mesh.prescribe_side(Side::Right, 0, 0.02, 1e-9);
        let options = SolverOptions {
            load_factor: 0.5,
            ..Default::default()
        };
        solve(&mut mesh, &library(), &options).unwrap();
        // uniform strain 0.005 => middle column moves 0.005
        let middle = mesh.nodes.iter().find(|n| (n.vertex.x - 1.0).abs() < 1e-9).unwrap();
        assert_relative_eq!(middle.displacement.x, 0.005, epsilon = 1e-10);
        assert_relative_eq!(mesh.elements[0].points[0].strain[0], 0.005, epsilon = 1e-10);
    }

    #[test]
    fn gravity_loads_column() {
        let mut lib = MaterialLibrary::new();
        lib.insert(Material::elastic(0, E, NU).unwrap().with_density(2.0));
        let mut mesh = Mesh::new(1.0);
        rectangle(&mut mesh, Vertex::new(0.0, 0.0), 1.0, 4.0, 1, 8, GridElement::Quad4, 0).unwrap();
        mesh.fix_side(Side::Bottom, true, true, 1e-9);
        mesh.fix_side(Side::Left, true, false, 1e-9);
        mesh.fix_side(Side::Right, true, false, 1e-9);
        let options = SolverOptions {
            gravity: Vector2::new(0.0, -10.0),
            ..Default::default()
        };
        solve(&mut mesh, &lib, &options).unwrap();
        let reaction: f64 = mesh
            .nodes_on_side(Side::Bottom, 1e-9)
            .iter()
            .map(|id| mesh.nodes[*id].reaction.y)
            .sum();
        // reaction carries the full weight ρ g A
        assert_relative_eq!(reaction, 2.0 * 10.0 * 4.0, epsilon = 1e-8);
        assert!(mesh.nodes.iter().all(|n| n.displacement.y <= 1e-15));
    }

    #[test]
    fn plastic_elements_yield_and_commit() {
        let mut lib = MaterialLibrary::new();
        lib.insert(
            Material::elastic(0, E, 0.25)
                .unwrap()
                .with_strength(0.5, 20.0, 0.5)
                .unwrap(),
        );
        let mut mesh = bar(GridElement::Quad4);
        let report = solve(&mut mesh, &lib, &SolverOptions::default()).unwrap();
        assert!(report.iterations >= 1);
        assert!(mesh.elements.iter().any(|e| e.max_yield_index() > 1.0));
        assert!(mesh.elements.iter().any(|e| e.mean_kappa() > 0.0));
        assert!(mesh.elements.iter().any(|e| e.any_yielded()));
    }

    #[test]
    fn closed_joint_carries_load_across_a_cut() {
        let mut mesh = bar(GridElement::Quad4);
        let mut engine = FaultPropagationEngine::new(FaultPropagationSettings {
            joint: JointParameters {
                normal_stiffness: 1e6,
                shear_stiffness: 1e6,
                cohesion: 1e6,
                friction_angle: 30.0,
                tensile_strength: 1e6,
            },
            ..Default::default()
        });
        let fault = engine
            .seed_fault(
                vec![Vertex::new(5.1, -0.5), Vertex::new(5.1, 1.5)],
                RuptureMode::TensileOpening,
                0,
                0.0,
            )
            .unwrap();
        let ids = engine.insert_fault(&mut mesh, fault).unwrap();
        assert_eq!(ids.len(), 2);
        // the bar is now two pieces joined only by the interfaces
        assert!(!mesh.element_adjacency()[4].contains(&5));

        let options = SolverOptions {
            linear_solver: LinearSolver::Cholesky,
            ..Default::default()
        };
        let report = solve(&mut mesh, &library(), &options).unwrap();
        assert!(report.converged);
        assert!(report.skipped_elements.is_empty());
        for ux in right_edge_ux(&mesh) {
            assert_relative_eq!(ux, 0.05, epsilon = 1e-5);
        }
        engine.update_fault_kinematics(&mesh);
        // σ = 5 over kn = 1e6
        assert_relative_eq!(engine.faults()[fault].opening, 5e-6, epsilon = 1e-8);
    }

    #[test]
    fn degenerate_element_is_skipped() {
        let mut mesh = bar(GridElement::Quad4);
        let p = mesh.add_node(Vertex::new(5.0, 0.5));
        let q = mesh.add_node(Vertex::new(5.5, 0.5));
        let r = mesh.add_node(Vertex::new(6.0, 0.5));
        let bad = mesh.add_element(ElementKind::Triangle3, vec![p, q, r], 0).unwrap();
        let report = solve(&mut mesh, &library(), &SolverOptions::default()).unwrap();
        assert_eq!(report.skipped_elements, vec![bad]);
        for ux in right_edge_ux(&mesh) {
            assert_relative_eq!(ux, 0.05, epsilon = 1e-6);
        }
    }
}
