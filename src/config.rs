//! JSON input file.
//!
//! ```json
//! {
//!   "metadata": { "part_thickness": 1.0, "steps": 5, "gravity": [0, -9.81],
//!                 "plasticity": true, "solver": "direct" },
//!   "geometry": { "type": "rectangle", "width": 10, "height": 5, "nx": 20, "ny": 10 },
//!   "materials": [ { "id": 0, "youngs_modulus": 2e10, "poisson_ratio": 0.25,
//!                    "cohesion": 1e6, "friction_angle": 30, "tensile_strength": 5e5 } ],
//!   "boundary_conditions": {
//!     "base": { "region": { "y_target_max": 0.01 }, "targets": { "ux": 0, "uy": 0 } }
//!   },
//!   "fault_propagation": { "min_cluster_size": 3, "strategy": "conjugate_angle",
//!                          "initial_faults": [ [[2, 0], [4, 3]] ] }
//! }
//! ```

use std::path::{Path, PathBuf};

use json::JsonValue;
use log::info;
use nalgebra::Vector2;

use crate::datatypes::{BoundaryRegion, BoundaryRule, BoundaryTarget, Vertex};
use crate::error::{FaultlineError, Result};
use crate::fault::{FaultPropagationSettings, PropagationStrategy};
use crate::material::{Material, MaterialLibrary};
use crate::mesh::Mesh;
use crate::mesher::{self, GridElement};
use crate::solver::{LinearSolver, SolverOptions};

#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub part_thickness: f64,
    pub steps: usize,
    pub gravity: Vector2<f64>,
    pub plasticity: bool,
    pub solver: LinearSolver,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl ModelMetadata {
    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            linear_solver: self.solver,
            gravity: self.gravity,
            plasticity: self.plasticity,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryInput {
    Rectangle {
        origin: Vertex,
        width: f64,
        height: f64,
        nx: usize,
        ny: usize,
        element: GridElement,
        material_id: usize,
    },
    Circle {
        center: Vertex,
        radius: f64,
        rings: usize,
        segments: usize,
        material_id: usize,
    },
    Polygon {
        path: PathBuf,
        min_spacing: f64,
        material_id: usize,
    },
}

impl GeometryInput {
    /// Meshes the geometry into `mesh`
    ///
    /// # Returns
    /// The ids of the created elements
    pub fn build(&self, mesh: &mut Mesh) -> Result<Vec<usize>> {
        match self {
            GeometryInput::Rectangle {
                origin,
                width,
                height,
                nx,
                ny,
                element,
                material_id,
            } => mesher::rectangle(mesh, *origin, *width, *height, *nx, *ny, *element, *material_id),
            GeometryInput::Circle {
                center,
                radius,
                rings,
                segments,
                material_id,
            } => mesher::circle(mesh, *center, *radius, *rings, *segments, *material_id),
            GeometryInput::Polygon {
                path,
                min_spacing,
                material_id,
            } => {
                let path = path.to_str().ok_or_else(|| {
                    FaultlineError::Input(format!("Geometry path {path:?} is not valid UTF-8"))
                })?;
                let outline = mesher::load_outline(path, *min_spacing)?;
                mesher::polygon(mesh, &outline, *material_id)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationInput {
    pub metadata: ModelMetadata,
    pub geometry: GeometryInput,
    pub materials: MaterialLibrary,
    pub boundary_rules: Vec<BoundaryRule>,
    pub fault_settings: FaultPropagationSettings,
    /// Traces cut into the mesh before the first step
    pub initial_faults: Vec<Vec<Vertex>>,
}

/// Loads and validates an input file. Relative geometry paths resolve
/// against the input file's directory.
pub fn load_input_file(input_file: &str) -> Result<SimulationInput> {
    let file_string = std::fs::read_to_string(input_file)
        .map_err(|err| FaultlineError::Input(format!("Unable to open input file {input_file}: {err}")))?;
    let base_dir = Path::new(input_file).parent().unwrap_or(Path::new("."));
    let input = parse_input(&file_string, base_dir)?;
    info!("loaded input file {input_file}");
    Ok(input)
}

pub fn parse_input(text: &str, base_dir: &Path) -> Result<SimulationInput> {
    let input_json = json::parse(text)
        .map_err(|err| FaultlineError::Input(format!("Error in input file json: {err}")))?;

    for section in ["metadata", "geometry", "materials", "boundary_conditions"] {
        if !input_json.has_key(section) {
            return Err(FaultlineError::Input(format!(
                "Input json missing {section} field"
            )));
        }
    }

    Ok(SimulationInput {
        metadata: parse_input_metadata(&input_json["metadata"])?,
        geometry: parse_geometry(&input_json["geometry"], base_dir)?,
        materials: parse_materials(&input_json["materials"])?,
        boundary_rules: parse_boundary_rules(&input_json["boundary_conditions"])?,
        fault_settings: parse_fault_settings(&input_json["fault_propagation"])?,
        initial_faults: parse_initial_faults(&input_json["fault_propagation"]["initial_faults"])?,
    })
}

fn required_f64(value: &JsonValue, key: &str, section: &str) -> Result<f64> {
    value[key].as_f64().ok_or_else(|| {
        FaultlineError::Input(format!("Input json missing {key} field in {section} section"))
    })
}

fn optional_f64(value: &JsonValue, key: &str, section: &str, default: f64) -> Result<f64> {
    if value[key].is_null() {
        return Ok(default);
    }
    value[key]
        .as_f64()
        .ok_or_else(|| FaultlineError::Input(format!("Bad value for {key} in {section}")))
}

fn optional_usize(value: &JsonValue, key: &str, section: &str, default: usize) -> Result<usize> {
    if value[key].is_null() {
        return Ok(default);
    }
    value[key]
        .as_usize()
        .ok_or_else(|| FaultlineError::Input(format!("Bad value for {key} in {section}")))
}

fn optional_bool(value: &JsonValue, key: &str, section: &str, default: bool) -> Result<bool> {
    if value[key].is_null() {
        return Ok(default);
    }
    value[key]
        .as_bool()
        .ok_or_else(|| FaultlineError::Input(format!("Bad value for {key} in {section}")))
}

fn optional_pair(value: &JsonValue, key: &str, section: &str, default: [f64; 2]) -> Result<[f64; 2]> {
    if value[key].is_null() {
        return Ok(default);
    }
    let pair: Vec<f64> = value[key].members().filter_map(|m| m.as_f64()).collect();
    if !value[key].is_array() || pair.len() != 2 {
        return Err(FaultlineError::Input(format!(
            "{key} in {section} must be an array of two numbers"
        )));
    }
    Ok([pair[0], pair[1]])
}

fn parse_input_metadata(metadata: &JsonValue) -> Result<ModelMetadata> {
    let part_thickness = required_f64(metadata, "part_thickness", "metadata")?;
    if part_thickness <= 0.0 {
        return Err(FaultlineError::Input(format!(
            "Part thickness must be positive, got {part_thickness}"
        )));
    }
    let gravity = optional_pair(metadata, "gravity", "metadata", [0.0, 0.0])?;
    let solver = match metadata["solver"].as_str() {
        Some(name) => LinearSolver::parse(name)?,
        None => LinearSolver::Cholesky,
    };

    Ok(ModelMetadata {
        part_thickness,
        steps: optional_usize(metadata, "steps", "metadata", 1)?.max(1),
        gravity: Vector2::new(gravity[0], gravity[1]),
        plasticity: optional_bool(metadata, "plasticity", "metadata", true)?,
        solver,
        max_iterations: optional_usize(metadata, "max_iterations", "metadata", 25)?,
        tolerance: optional_f64(metadata, "tolerance", "metadata", 1e-6)?,
    })
}

fn parse_geometry(geometry: &JsonValue, base_dir: &Path) -> Result<GeometryInput> {
    let material_id = optional_usize(geometry, "material", "geometry", 0)?;
    let kind = geometry["type"]
        .as_str()
        .ok_or_else(|| FaultlineError::Input("Input json missing type field in geometry section".to_owned()))?;

    match kind {
        "rectangle" => {
            let origin = optional_pair(geometry, "origin", "geometry", [0.0, 0.0])?;
            let element = match geometry["element"].as_str() {
                Some(name) => GridElement::parse(name)?,
                None => GridElement::Quad4,
            };
            Ok(GeometryInput::Rectangle {
                origin: Vertex::new(origin[0], origin[1]),
                width: required_f64(geometry, "width", "geometry")?,
                height: required_f64(geometry, "height", "geometry")?,
                nx: optional_usize(geometry, "nx", "geometry", 10)?,
                ny: optional_usize(geometry, "ny", "geometry", 10)?,
                element,
                material_id,
            })
        }
        "circle" => {
            let center = optional_pair(geometry, "center", "geometry", [0.0, 0.0])?;
            Ok(GeometryInput::Circle {
                center: Vertex::new(center[0], center[1]),
                radius: required_f64(geometry, "radius", "geometry")?,
                rings: optional_usize(geometry, "rings", "geometry", 4)?,
                segments: optional_usize(geometry, "segments", "geometry", 16)?,
                material_id,
            })
        }
        "polygon" => {
            let file = geometry["file"].as_str().ok_or_else(|| {
                FaultlineError::Input("Polygon geometry missing file field".to_owned())
            })?;
            Ok(GeometryInput::Polygon {
                path: base_dir.join(file),
                min_spacing: optional_f64(geometry, "min_spacing", "geometry", 0.0)?,
                material_id,
            })
        }
        other => Err(FaultlineError::Input(format!(
            "Unrecognized geometry type {other}"
        ))),
    }
}

fn parse_materials(materials_json: &JsonValue) -> Result<MaterialLibrary> {
    if !materials_json.is_array() || materials_json.is_empty() {
        return Err(FaultlineError::Input(
            "materials must be a non-empty array".to_owned(),
        ));
    }

    let mut library = MaterialLibrary::new();
    for (index, entry) in materials_json.members().enumerate() {
        let section = format!("material {index}");
        let id = optional_usize(entry, "id", &section, index)?;
        let mut material = Material::elastic(
            id,
            required_f64(entry, "youngs_modulus", &section)?,
            required_f64(entry, "poisson_ratio", &section)?,
        )?
        .with_density(optional_f64(entry, "density", &section, 0.0)?);
        if let Some(name) = entry["name"].as_str() {
            material = material.with_name(name);
        }
        if entry.has_key("cohesion") {
            let cohesion = required_f64(entry, "cohesion", &section)?;
            material = material
                .with_softening(
                    optional_f64(entry, "hardening_modulus", &section, 0.0)?,
                    optional_f64(entry, "residual_cohesion", &section, 0.0)?,
                )
                .with_strength(
                    cohesion,
                    optional_f64(entry, "friction_angle", &section, 30.0)?,
                    optional_f64(entry, "tensile_strength", &section, cohesion)?,
                )?;
        }
        if library.insert(material).is_some() {
            return Err(FaultlineError::Input(format!("Duplicate material id {id}")));
        }
    }
    info!("loaded {} materials from input file", library.len());
    Ok(library)
}

fn parse_boundary_rules(boundary_json: &JsonValue) -> Result<Vec<BoundaryRule>> {
    let mut rules: Vec<BoundaryRule> = Vec::new();

    for (name, rule_json) in boundary_json.entries() {
        if !rule_json.has_key("region") {
            return Err(FaultlineError::Input(format!(
                "Boundary rule {name} is missing region field"
            )));
        }
        if !rule_json.has_key("targets") {
            return Err(FaultlineError::Input(format!(
                "Boundary rule {name} is missing target field"
            )));
        }

        let region_json = &rule_json["region"];
        let everywhere = BoundaryRegion::everywhere();
        let boundary_region = BoundaryRegion {
            x_min: optional_f64(region_json, "x_target_min", name, everywhere.x_min)?,
            x_max: optional_f64(region_json, "x_target_max", name, everywhere.x_max)?,
            y_min: optional_f64(region_json, "y_target_min", name, everywhere.y_min)?,
            y_max: optional_f64(region_json, "y_target_max", name, everywhere.y_max)?,
        };

        let targets = &rule_json["targets"];
        let boundary_target = BoundaryTarget {
            ux: targets["ux"].as_f64(),
            uy: targets["uy"].as_f64(),
            fx: targets["fx"].as_f64(),
            fy: targets["fy"].as_f64(),
        };

        if boundary_region.x_min > boundary_region.x_max {
            return Err(FaultlineError::Input(format!(
                "Boundary '{name}' has x_target_min greater than x_target_max"
            )));
        }
        if boundary_region.y_min > boundary_region.y_max {
            return Err(FaultlineError::Input(format!(
                "Boundary '{name}' has y_target_min greater than y_target_max"
            )));
        }
        if boundary_target.fx.is_some() && boundary_target.ux.is_some() {
            return Err(FaultlineError::Input(format!(
                "Boundary '{name}' is over-constrained in x-axis"
            )));
        }
        if boundary_target.fy.is_some() && boundary_target.uy.is_some() {
            return Err(FaultlineError::Input(format!(
                "Boundary '{name}' is over-constrained in y-axis"
            )));
        }
        let t = &boundary_target;
        if t.ux.is_none() && t.uy.is_none() && t.fx.is_none() && t.fy.is_none() {
            return Err(FaultlineError::Input(format!(
                "Boundary '{name}' has no targets"
            )));
        }

        rules.push(BoundaryRule {
            name: name.to_string(),
            region: boundary_region,
            target: boundary_target,
        })
    }
    info!("loaded {} boundary rules from input file", rules.len());

    Ok(rules)
}

fn parse_fault_settings(fault_json: &JsonValue) -> Result<FaultPropagationSettings> {
    let defaults = FaultPropagationSettings::default();
    if fault_json.is_null() {
        return Ok(defaults);
    }
    let section = "fault_propagation";
    let strategy = match fault_json["strategy"].as_str() {
        Some(name) => PropagationStrategy::parse(name)?,
        None => defaults.strategy,
    };

    let joint_json = &fault_json["joint"];
    let joint_defaults = defaults.joint;
    let joint = crate::element::JointParameters {
        normal_stiffness: optional_f64(joint_json, "normal_stiffness", "joint", joint_defaults.normal_stiffness)?,
        shear_stiffness: optional_f64(joint_json, "shear_stiffness", "joint", joint_defaults.shear_stiffness)?,
        cohesion: optional_f64(joint_json, "cohesion", "joint", joint_defaults.cohesion)?,
        friction_angle: optional_f64(joint_json, "friction_angle", "joint", joint_defaults.friction_angle)?,
        tensile_strength: optional_f64(joint_json, "tensile_strength", "joint", joint_defaults.tensile_strength)?,
    };

    let settings = FaultPropagationSettings {
        enabled: optional_bool(fault_json, "enabled", section, defaults.enabled)?,
        rupture_threshold: optional_f64(fault_json, "rupture_threshold", section, defaults.rupture_threshold)?,
        min_cluster_size: optional_usize(fault_json, "min_cluster_size", section, defaults.min_cluster_size)?,
        strategy,
        start_step: optional_usize(fault_json, "start_step", section, defaults.start_step)?,
        check_interval: optional_usize(fault_json, "check_interval", section, defaults.check_interval)?,
        max_faults: optional_usize(fault_json, "max_faults", section, defaults.max_faults)?,
        propagate_tips: optional_bool(fault_json, "propagate_tips", section, defaults.propagate_tips)?,
        max_propagation_length: optional_f64(
            fault_json,
            "max_propagation_length",
            section,
            defaults.max_propagation_length,
        )?,
        min_segment_length: optional_f64(fault_json, "min_segment_length", section, defaults.min_segment_length)?,
        fault_spacing: optional_f64(fault_json, "fault_spacing", section, defaults.fault_spacing)?,
        node_separation: optional_f64(fault_json, "node_separation", section, defaults.node_separation)?,
        joint,
    };

    if settings.node_separation <= 0.0 {
        return Err(FaultlineError::Input(
            "node_separation must be positive".to_owned(),
        ));
    }
    if settings.check_interval == 0 {
        return Err(FaultlineError::Input(
            "check_interval must be at least 1".to_owned(),
        ));
    }
    Ok(settings)
}

fn parse_initial_faults(faults_json: &JsonValue) -> Result<Vec<Vec<Vertex>>> {
    if faults_json.is_null() {
        return Ok(Vec::new());
    }
    if !faults_json.is_array() {
        return Err(FaultlineError::Input(
            "initial_faults must be an array of point lists".to_owned(),
        ));
    }
    let mut faults = Vec::new();
    for (index, trace) in faults_json.members().enumerate() {
        let mut points = Vec::new();
        for point in trace.members() {
            match (point[0].as_f64(), point[1].as_f64()) {
                (Some(x), Some(y)) if point.len() == 2 => points.push(Vertex::new(x, y)),
                _ => {
                    return Err(FaultlineError::Input(format!(
                        "Bad point in initial fault {index}"
                    )))
                }
            }
        }
        if points.len() < 2 {
            return Err(FaultlineError::Input(format!(
                "Initial fault {index} needs at least two points"
            )));
        }
        faults.push(points);
    }
    Ok(faults)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const INPUT: &str = r#"{
        "metadata": { "part_thickness": 0.5, "steps": 4, "gravity": [0, -9.81], "solver": "cg" },
        "geometry": { "type": "rectangle", "width": 10, "height": 5, "nx": 4, "ny": 2, "element": "tri3" },
        "materials": [
            { "id": 0, "youngs_modulus": 2e10, "poisson_ratio": 0.25, "density": 2500 },
            { "id": 3, "name": "sandstone", "youngs_modulus": 1e10, "poisson_ratio": 0.2,
              "cohesion": 1e6, "friction_angle": 35, "tensile_strength": 2e5,
              "hardening_modulus": -1e7, "residual_cohesion": 1e5 }
        ],
        "boundary_conditions": {
            "base": { "region": { "y_target_max": 0.01 }, "targets": { "ux": 0, "uy": 0 } },
            "push": { "region": { "x_target_min": 9.99 }, "targets": { "fx": -1e5 } }
        },
        "fault_propagation": {
            "min_cluster_size": 4, "strategy": "stress_guided",
            "joint": { "cohesion": 5e4, "friction_angle": 25 }
        }
    }"#;

    fn parse(text: &str) -> Result<SimulationInput> {
        parse_input(text, Path::new("/models"))
    }

    #[test]
    fn parses_complete_input() {
        let input = parse(INPUT).unwrap();

        assert_relative_eq!(input.metadata.part_thickness, 0.5);
        assert_eq!(input.metadata.steps, 4);
        assert_relative_eq!(input.metadata.gravity.y, -9.81);
        assert_eq!(input.metadata.solver, LinearSolver::ConjugateGradient);
        assert!(input.metadata.plasticity);

        assert!(matches!(
            input.geometry,
            GeometryInput::Rectangle { nx: 4, ny: 2, element: GridElement::Triangle3, .. }
        ));

        assert_eq!(input.materials.len(), 2);
        let sandstone = input.materials.get(3).unwrap();
        assert!(sandstone.plastic);
        assert_eq!(sandstone.name, "sandstone");
        assert_relative_eq!(sandstone.residual_cohesion, 1e5);
        assert!(!input.materials.get(0).unwrap().plastic);

        assert_eq!(input.boundary_rules.len(), 2);
        assert_eq!(input.boundary_rules[0].target.uy, Some(0.0));
        assert_eq!(input.boundary_rules[1].target.fx, Some(-1e5));

        assert_eq!(input.fault_settings.min_cluster_size, 4);
        assert_eq!(input.fault_settings.strategy, PropagationStrategy::StressGuided);
        assert_relative_eq!(input.fault_settings.joint.cohesion, 5e4);
        assert_relative_eq!(
            input.fault_settings.joint.normal_stiffness,
            FaultPropagationSettings::default().joint.normal_stiffness
        );
    }

    #[test]
    fn missing_fault_section_uses_defaults() {
        let text = INPUT.replace("\"fault_propagation\"", "\"unused\"");
        let input = parse(&text).unwrap();
        assert_eq!(input.fault_settings, FaultPropagationSettings::default());
        assert!(input.initial_faults.is_empty());
    }

    #[test]
    fn parses_initial_fault_traces() {
        let text = INPUT.replace(
            "\"min_cluster_size\": 4,",
            "\"min_cluster_size\": 4, \"initial_faults\": [[[1, 0], [2, 2.5], [3, 5]]],",
        );
        let input = parse(&text).unwrap();
        assert_eq!(input.initial_faults.len(), 1);
        assert_eq!(input.initial_faults[0][1], Vertex::new(2.0, 2.5));

        let short = INPUT.replace("\"min_cluster_size\": 4,", "\"initial_faults\": [[[1, 0]]],");
        assert!(parse(&short).is_err());
        let malformed = INPUT.replace("\"min_cluster_size\": 4,", "\"initial_faults\": [[[1], [2, 2]]],");
        assert!(parse(&malformed).is_err());
    }

    #[test]
    fn rejects_missing_thickness() {
        let text = INPUT.replace("\"part_thickness\": 0.5,", "");
        assert!(matches!(parse(&text), Err(FaultlineError::Input(_))));
    }

    #[test]
    fn rejects_over_constrained_boundary() {
        let text = INPUT.replace("{ \"fx\": -1e5 }", "{ \"fx\": -1e5, \"ux\": 0 }");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("over-constrained"));
    }

    #[test]
    fn rejects_inverted_region() {
        let text = INPUT.replace(
            "{ \"x_target_min\": 9.99 }",
            "{ \"x_target_min\": 9.99, \"x_target_max\": 1.0 }",
        );
        assert!(parse(&text).is_err());
    }

    #[test]
    fn polygon_path_resolves_against_input_directory() {
        let text = INPUT.replace(
            "{ \"type\": \"rectangle\", \"width\": 10, \"height\": 5, \"nx\": 4, \"ny\": 2, \"element\": \"tri3\" }",
            "{ \"type\": \"polygon\", \"file\": \"outline.csv\" }",
        );
        let input = parse(&text).unwrap();
        match input.geometry {
            GeometryInput::Polygon { path, .. } => assert_eq!(path, Path::new("/models/outline.csv")),
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn rectangle_geometry_builds_mesh() {
        let input = parse(INPUT).unwrap();
        let mut mesh = Mesh::new(input.metadata.part_thickness);
        let created = input.geometry.build(&mut mesh).unwrap();
        assert_eq!(created.len(), 16);
        assert_eq!(mesh.node_count(), 15);
    }
}
