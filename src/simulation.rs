//! Load-stepping driver: solve, collect results, run the fault engine and
//! renumber after any topology change.

use log::{info, warn};

use crate::config::SimulationInput;
use crate::error::Result;
use crate::fault::{
    FaultEvent, FaultPropagationEngine, FaultPropagationSettings, RuptureMode, StepSummary,
};
use crate::material::MaterialLibrary;
use crate::mesh::Mesh;
use crate::results::SimulationResults;
use crate::solver::{self, SolveReport, SolverOptions};

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: usize,
    pub load_factor: f64,
    pub solve: SolveReport,
    pub faults: StepSummary,
    pub results: SimulationResults,
    pub events: Vec<FaultEvent>,
}

pub struct Simulation {
    pub mesh: Mesh,
    pub materials: MaterialLibrary,
    pub engine: FaultPropagationEngine,
    pub options: SolverOptions,
    steps: usize,
    step: usize,
    time: f64,
}

impl Simulation {
    /// # Arguments
    /// * `steps` - Load increments; loads ramp linearly to full at the last one
    pub fn new(
        mesh: Mesh,
        materials: MaterialLibrary,
        settings: FaultPropagationSettings,
        options: SolverOptions,
        steps: usize,
    ) -> Result<Simulation> {
        mesh.validate_materials(&materials)?;
        Ok(Simulation {
            mesh,
            materials,
            engine: FaultPropagationEngine::new(settings),
            options,
            steps: steps.max(1),
            step: 0,
            time: 0.0,
        })
    }

    /// Meshes the input geometry, applies its boundary rules and cuts the
    /// initial faults
    pub fn from_input(input: &SimulationInput) -> Result<Simulation> {
        let mut mesh = Mesh::new(input.metadata.part_thickness);
        input.geometry.build(&mut mesh)?;
        let touched = mesh.apply_boundary_rules(&input.boundary_rules);
        if touched == 0 {
            warn!("no node lies inside any boundary region");
        }
        mesh.refresh_geometry_cache();
        let mut simulation = Simulation::new(
            mesh,
            input.materials.clone(),
            input.fault_settings.clone(),
            input.metadata.solver_options(),
            input.metadata.steps,
        )?;
        for trace in &input.initial_faults {
            let id = simulation
                .engine
                .seed_fault(trace.clone(), RuptureMode::InPlaneShear, 0, 0.0)?;
            let inserted = simulation.engine.insert_fault(&mut simulation.mesh, id)?;
            info!("initial fault {id}: {} interface elements", inserted.len());
        }
        Ok(simulation)
    }

    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn total_steps(&self) -> usize {
        self.steps
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_finished(&self) -> bool {
        self.step >= self.steps
    }

    /// Advances one load increment
    pub fn step(&mut self) -> Result<StepOutcome> {
        self.step += 1;
        let load_factor = (self.step as f64 / self.steps as f64).min(1.0);
        self.time = load_factor;
        self.options.load_factor = load_factor;

        if !self.mesh.dofs_valid() {
            self.mesh.renumber_dofs();
        }
        let report = solver::solve(&mut self.mesh, &self.materials, &self.options)?;
        let results = SimulationResults::collect(&self.mesh, &self.materials, self.step);

        let summary = self
            .engine
            .step(&mut self.mesh, &results, &self.materials, self.step, self.time)?;
        if !self.mesh.dofs_valid() {
            self.mesh.renumber_dofs();
            self.mesh.refresh_geometry_cache();
        }

        info!(
            "step {}/{}: load factor {:.3}, max yield index {:.3}, max displacement {:.3e}, {} faults",
            self.step,
            self.steps,
            load_factor,
            results.max_yield_index(),
            results.max_displacement(),
            self.engine.faults().len()
        );

        Ok(StepOutcome {
            step: self.step,
            load_factor,
            solve: report,
            faults: summary,
            results,
            events: self.engine.drain_events(),
        })
    }

    /// Runs the remaining steps
    pub fn run(&mut self) -> Result<Vec<StepOutcome>> {
        let mut outcomes = Vec::new();
        while !self.is_finished() {
            outcomes.push(self.step()?);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Side, Vertex};
    use crate::element::JointParameters;
    use crate::material::Material;
    use crate::mesher::{rectangle, GridElement};
    use approx::assert_relative_eq;

    fn column() -> (Mesh, MaterialLibrary) {
        let mut mesh = Mesh::new(1.0);
        rectangle(&mut mesh, Vertex::new(0.0, 0.0), 2.0, 4.0, 2, 4, GridElement::Quad4, 0).unwrap();
        mesh.fix_side(Side::Bottom, true, true, 1e-9);
        mesh.add_distributed_load(Side::Top, 0.0, -10.0, 1e-9);
        let mut materials = MaterialLibrary::new();
        materials.insert(Material::elastic(0, 1000.0, 0.0).unwrap());
        (mesh, materials)
    }

    #[test]
    fn loads_ramp_over_steps() {
        let (mesh, materials) = column();
        let mut simulation = Simulation::new(
            mesh,
            materials,
            FaultPropagationSettings::default(),
            SolverOptions::default(),
            2,
        )
        .unwrap();

        let first = simulation.step().unwrap();
        assert_relative_eq!(first.load_factor, 0.5);
        let top_half = first.results.nodes.last().unwrap().uy;

        let rest = simulation.run().unwrap();
        assert_eq!(rest.len(), 1);
        assert!(simulation.is_finished());
        assert_eq!(simulation.current_step(), 2);
        let top_full = rest[0].results.nodes.last().unwrap().uy;
        // σ = -10 over height 4 with E = 1000
        assert_relative_eq!(top_full, -0.04, epsilon = 1e-9);
        assert_relative_eq!(top_half, 0.5 * top_full, epsilon = 1e-9);
        assert!(rest[0].events.is_empty());
    }

    #[test]
    fn rejects_unknown_material() {
        let (mesh, _) = column();
        let result = Simulation::new(
            mesh,
            MaterialLibrary::new(),
            FaultPropagationSettings::default(),
            SolverOptions::default(),
            1,
        );
        assert!(result.is_err());
    }

    #[test]
    fn opened_joint_separates_the_block() {
        let mut mesh = Mesh::new(1.0);
        rectangle(&mut mesh, Vertex::new(0.0, 0.0), 4.0, 2.0, 8, 4, GridElement::Quad4, 0).unwrap();
        mesh.fix_side(Side::Left, true, false, 1e-9);
        mesh.fix_side(Side::Bottom, false, true, 1e-9);
        mesh.prescribe_side(Side::Right, 0, 0.01, 1e-9);
        let mut materials = MaterialLibrary::new();
        materials.insert(Material::elastic(0, 1000.0, 0.0).unwrap());
        let joint = JointParameters {
            normal_stiffness: 1e5,
            shear_stiffness: 1e5,
            cohesion: 0.0,
            friction_angle: 30.0,
            tensile_strength: 0.0,
        };
        let settings = FaultPropagationSettings {
            enabled: false,
            joint,
            ..Default::default()
        };
        let mut simulation = Simulation::new(mesh, materials, settings, SolverOptions::default(), 1).unwrap();

        let fault = simulation
            .engine
            .seed_fault(
                vec![Vertex::new(2.1, -0.5), Vertex::new(2.1, 2.5)],
                RuptureMode::TensileOpening,
                0,
                0.0,
            )
            .unwrap();
        let ids = simulation.engine.insert_fault(&mut simulation.mesh, fault).unwrap();
        assert_eq!(ids.len(), 4);

        let outcome = simulation.step().unwrap();
        assert!(outcome.solve.skipped_elements.is_empty());

        let left = simulation.mesh.find_node(&Vertex::new(1.0, 1.0), 1e-9).unwrap();
        let right = simulation.mesh.find_node(&Vertex::new(3.0, 1.0), 1e-9).unwrap();
        // an intact block would stretch uniformly to 0.0025 at x = 1
        assert!(simulation.mesh.nodes[left].displacement.x.abs() < 1e-6);
        assert_relative_eq!(simulation.mesh.nodes[right].displacement.x, 0.01, epsilon = 1e-6);

        let generated = &simulation.engine.faults()[fault];
        assert_relative_eq!(generated.opening, 0.01, epsilon = 1e-6);
        assert!(generated.slip.abs() < 1e-6);
        assert_relative_eq!(generated.to_discontinuity(&joint).aperture, 0.01, epsilon = 1e-6);
    }
}
