//! Fault propagation engine.
//!
//! Driven once per load step after the solve: clusters over-stressed
//! elements into rupture sites, nucleates fault polylines at the sites,
//! grows the tips of active faults and cuts every new fault segment into the
//! mesh: nodes along the cut are split so the two sides separate, and the
//! cut edges are joined by [`ElementKind::Interface4`] elements. Degenerate
//! geometry is skipped and logged, never fatal.

use std::collections::{HashMap, HashSet};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use log::{debug, info, trace, warn};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::datatypes::{BoundingBox, Vertex};
use crate::element::{ElementKind, JointParameters};
use crate::error::{FaultlineError, Result};
use crate::geometry::{
    align_axis, blend_angle, clip_segment, cross, distance_to_polyline, point_in_polygon,
    polyline_length, segment_intersection, wrap_angle,
};
use crate::material::MaterialLibrary;
use crate::mesh::Mesh;
use crate::results::SimulationResults;

/// Friction angle used when an element's material cannot be resolved
const FALLBACK_FRICTION_ANGLE: f64 = 30.0;

/// Extra cost per unit distance between a candidate cut edge and the segment
const PATH_DEVIATION_WEIGHT: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuptureMode {
    TensileOpening,
    MixedMode,
    InPlaneShear,
    /// Both principal stresses non-negative but below strength; never nucleates
    Compressive,
}

impl RuptureMode {
    pub fn is_valid(&self) -> bool {
        *self != RuptureMode::Compressive
    }
}

/// Classifies failure from principal stresses (tension positive) and the
/// material's tensile strength.
pub fn classify_rupture(sigma1: f64, sigma3: f64, tensile_strength: f64) -> RuptureMode {
    if tensile_strength > 0.0 && sigma1 > tensile_strength {
        RuptureMode::TensileOpening
    } else if sigma3 < 0.0 && sigma1 > 0.0 && sigma1 >= 0.5 * tensile_strength {
        RuptureMode::MixedMode
    } else if sigma3 < 0.0 {
        RuptureMode::InPlaneShear
    } else {
        RuptureMode::Compressive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropagationStrategy {
    PrincipalStressAligned,
    #[default]
    ConjugateAngle,
    StressGuided,
    StrainLocalization,
    EnergyMinimizing,
}

impl PropagationStrategy {
    pub fn parse(name: &str) -> Result<PropagationStrategy> {
        match name.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "principal_stress_aligned" | "principal" => Ok(PropagationStrategy::PrincipalStressAligned),
            "conjugate_angle" | "conjugate" => Ok(PropagationStrategy::ConjugateAngle),
            "stress_guided" => Ok(PropagationStrategy::StressGuided),
            "strain_localization" => Ok(PropagationStrategy::StrainLocalization),
            "energy_minimizing" => Ok(PropagationStrategy::EnergyMinimizing),
            other => Err(FaultlineError::Input(format!(
                "Unrecognized propagation strategy {other}"
            ))),
        }
    }

    /// Fault line angle (radians from +x) for a site whose σ1 direction is
    /// `principal_angle`
    pub fn fault_angle(&self, principal_angle: f64, friction_angle: f64) -> f64 {
        let axis = compression_axis(principal_angle);
        match self {
            PropagationStrategy::PrincipalStressAligned => axis,
            PropagationStrategy::StressGuided => wrap_angle(axis + FRAC_PI_4),
            // localization and energy criteria have no closed form here
            PropagationStrategy::ConjugateAngle
            | PropagationStrategy::StrainLocalization
            | PropagationStrategy::EnergyMinimizing => {
                wrap_angle(axis + coulomb_offset(friction_angle))
            }
        }
    }
}

/// Most compressive principal axis. With tension positive this is
/// perpendicular to the σ1 direction.
fn compression_axis(principal_angle: f64) -> f64 {
    wrap_angle(principal_angle + FRAC_PI_2)
}

/// Coulomb angle 45° - φ/2 between the compression axis and a shear fault
fn coulomb_offset(friction_angle: f64) -> f64 {
    FRAC_PI_4 - 0.5 * friction_angle.to_radians()
}

/// Dip of an undirected line, degrees from horizontal in [0, 90]
fn dip_degrees(angle: f64) -> f64 {
    let a = wrap_angle(angle).abs();
    let a = if a > FRAC_PI_2 { PI - a } else { a };
    a.to_degrees()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPropagationSettings {
    pub enabled: bool,
    /// Yield index above which an element counts as ruptured
    pub rupture_threshold: f64,
    pub min_cluster_size: usize,
    pub strategy: PropagationStrategy,
    /// First step at which the engine runs
    pub start_step: usize,
    /// Steps between detection passes
    pub check_interval: usize,
    pub max_faults: usize,
    pub propagate_tips: bool,
    /// Cap on nucleation length and on each tip extension
    pub max_propagation_length: f64,
    pub min_segment_length: f64,
    /// Sites closer than this to an existing fault are ignored
    pub fault_spacing: f64,
    /// Offset between the two faces of an inserted interface
    pub node_separation: f64,
    pub joint: JointParameters,
}

impl Default for FaultPropagationSettings {
    fn default() -> Self {
        FaultPropagationSettings {
            enabled: true,
            rupture_threshold: 1.0,
            min_cluster_size: 3,
            strategy: PropagationStrategy::ConjugateAngle,
            start_step: 1,
            check_interval: 1,
            max_faults: 10,
            propagate_tips: true,
            max_propagation_length: 5.0,
            min_segment_length: 1e-3,
            fault_spacing: 1.0,
            node_separation: 1e-4,
            joint: JointParameters::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NucleationSite {
    /// Representative element: largest yield excess in the cluster
    pub element_id: usize,
    pub location: Vertex,
    pub mode: RuptureMode,
    pub yield_excess: f64,
    pub sigma1: f64,
    pub sigma3: f64,
    pub principal_angle: f64,
    pub plastic_strain: f64,
    pub cluster: Vec<usize>,
}

/// Generic polyline discontinuity for collaborators that do not know about
/// the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discontinuity {
    pub points: Vec<Vertex>,
    pub joint: JointParameters,
    pub aperture: f64,
    pub slip: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedFault {
    pub id: usize,
    /// Ordered trace; grows at both ends as the tips propagate
    pub points: Vec<Vertex>,
    pub mode: RuptureMode,
    /// Degrees from horizontal
    pub dip_angle: f64,
    pub slip: f64,
    pub opening: f64,
    pub interface_elements: Vec<usize>,
    pub nucleation_step: usize,
    pub nucleation_time: f64,
    pub active: bool,
}

impl GeneratedFault {
    pub fn length(&self) -> f64 {
        polyline_length(&self.points)
    }

    pub fn to_discontinuity(&self, joint: &JointParameters) -> Discontinuity {
        Discontinuity {
            points: self.points.clone(),
            joint: *joint,
            aperture: self.opening,
            slip: self.slip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FaultEvent {
    RuptureDetected {
        element_id: usize,
        mode: RuptureMode,
        yield_index: f64,
        cluster_size: usize,
    },
    FaultNucleated {
        fault_id: usize,
        element_id: usize,
        mode: RuptureMode,
        length: f64,
    },
    FaultPropagated {
        fault_id: usize,
        tip: Vertex,
        length: f64,
    },
    FaultInserted {
        fault_id: usize,
        element_ids: Vec<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepSummary {
    pub step: usize,
    pub ruptures: usize,
    pub nucleated: usize,
    pub propagated: usize,
    pub inserted_elements: usize,
    pub active_faults: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tip {
    Head,
    Tail,
}

pub struct FaultPropagationEngine {
    settings: FaultPropagationSettings,
    faults: Vec<GeneratedFault>,
    events: Vec<FaultEvent>,
}

impl FaultPropagationEngine {
    pub fn new(settings: FaultPropagationSettings) -> FaultPropagationEngine {
        FaultPropagationEngine {
            settings,
            faults: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn settings(&self) -> &FaultPropagationSettings {
        &self.settings
    }

    pub fn faults(&self) -> &[GeneratedFault] {
        &self.faults
    }

    pub fn fault(&self, id: usize) -> Option<&GeneratedFault> {
        self.faults.get(id)
    }

    pub fn active_fault_count(&self) -> usize {
        self.faults.iter().filter(|f| f.active).count()
    }

    /// Takes every event queued since the last drain
    pub fn drain_events(&mut self) -> Vec<FaultEvent> {
        std::mem::take(&mut self.events)
    }

    /// Forgets all faults and pending events. The mesh is left untouched.
    pub fn reset(&mut self) {
        self.faults.clear();
        self.events.clear();
    }

    /// Registers a known fault trace, such as a mapped pre-existing fault.
    /// The trace is cut into the mesh by [`FaultPropagationEngine::insert_fault`].
    ///
    /// # Returns
    /// The new fault id
    pub fn seed_fault(
        &mut self,
        points: Vec<Vertex>,
        mode: RuptureMode,
        step: usize,
        time: f64,
    ) -> Result<usize> {
        if points.len() < 2 || polyline_length(&points) < self.settings.min_segment_length {
            return Err(FaultlineError::Input(format!(
                "Fault trace needs at least two distinct points, got {}",
                points.len()
            )));
        }
        let first = points[0];
        let last = points[points.len() - 1];
        let id = self.faults.len();
        self.faults.push(GeneratedFault {
            id,
            dip_angle: dip_degrees((last.y - first.y).atan2(last.x - first.x)),
            points,
            mode,
            slip: 0.0,
            opening: 0.0,
            interface_elements: Vec::new(),
            nucleation_step: step,
            nucleation_time: time,
            active: true,
        });
        Ok(id)
    }

    /// Whether detection runs at `step`
    pub fn should_check(&self, step: usize) -> bool {
        self.settings.enabled
            && step >= self.settings.start_step
            && (step - self.settings.start_step) % self.settings.check_interval.max(1) == 0
    }

    /// Clusters continuum elements whose yield index exceeds the rupture
    /// threshold and classifies one site per cluster.
    ///
    /// # Returns
    /// Valid (non-compressive) sites, largest yield excess first. Clusters
    /// within `fault_spacing` of an existing fault are not reported again.
    pub fn detect_rupture_sites(
        &mut self,
        mesh: &Mesh,
        results: &SimulationResults,
        materials: &MaterialLibrary,
    ) -> Vec<NucleationSite> {
        let threshold = self.settings.rupture_threshold;
        let over: Vec<bool> = mesh
            .elements
            .iter()
            .map(|e| {
                !e.is_interface()
                    && results
                        .element(e.id)
                        .map(|r| r.yield_index > threshold)
                        .unwrap_or(false)
            })
            .collect();
        if !over.iter().any(|o| *o) {
            return Vec::new();
        }

        let adjacency = mesh.element_adjacency();
        let mut visited = vec![false; over.len()];
        let mut sites = Vec::new();

        for seed in 0..over.len() {
            if !over[seed] || visited[seed] {
                continue;
            }
            let mut cluster = Vec::new();
            let mut stack = vec![seed];
            visited[seed] = true;
            while let Some(current) = stack.pop() {
                cluster.push(current);
                for neighbour in adjacency.get(current).into_iter().flatten() {
                    if over[*neighbour] && !visited[*neighbour] {
                        visited[*neighbour] = true;
                        stack.push(*neighbour);
                    }
                }
            }

            if cluster.len() < self.settings.min_cluster_size {
                trace!("cluster at element {seed} too small ({})", cluster.len());
                continue;
            }
            cluster.sort_unstable();
            if let Some(site) = self.classify_cluster(mesh, results, materials, cluster) {
                sites.push(site);
            }
        }

        sites.sort_by(|a, b| b.yield_excess.total_cmp(&a.yield_excess));
        debug!("detected {} rupture sites", sites.len());
        sites
    }

    fn classify_cluster(
        &mut self,
        mesh: &Mesh,
        results: &SimulationResults,
        materials: &MaterialLibrary,
        cluster: Vec<usize>,
    ) -> Option<NucleationSite> {
        let (element_id, result) = cluster
            .iter()
            .filter_map(|id| results.element(*id).map(|r| (*id, r)))
            .max_by(|a, b| a.1.yield_index.total_cmp(&b.1.yield_index))?;

        let material = materials.get(mesh.elements[element_id].material_id).ok()?;
        let mode = classify_rupture(result.sigma1, result.sigma3, material.tensile_strength);
        if !mode.is_valid() {
            debug!("discarding compressive cluster at element {element_id}");
            return None;
        }
        let location = mesh.element_centroid(element_id);
        if self.near_existing_fault(&location) {
            trace!("cluster at element {element_id} already carries a fault");
            return None;
        }

        self.events.push(FaultEvent::RuptureDetected {
            element_id,
            mode,
            yield_index: result.yield_index,
            cluster_size: cluster.len(),
        });

        Some(NucleationSite {
            element_id,
            location,
            mode,
            yield_excess: result.yield_index - self.settings.rupture_threshold,
            sigma1: result.sigma1,
            sigma3: result.sigma3,
            principal_angle: result.principal_angle,
            plastic_strain: result.plastic_strain,
            cluster,
        })
    }

    fn near_existing_fault(&self, location: &Vertex) -> bool {
        self.faults
            .iter()
            .any(|f| distance_to_polyline(location, &f.points) < self.settings.fault_spacing)
    }

    /// Diagonal of the bounding box around every corner of the cluster
    fn cluster_footprint(mesh: &Mesh, cluster: &[usize]) -> f64 {
        let mut bbox = BoundingBox {
            x_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_min: f64::INFINITY,
            y_max: f64::NEG_INFINITY,
        };
        for id in cluster {
            for node in mesh.elements[*id].corner_nodes() {
                let v = &mesh.nodes[*node].vertex;
                bbox.x_min = bbox.x_min.min(v.x);
                bbox.x_max = bbox.x_max.max(v.x);
                bbox.y_min = bbox.y_min.min(v.y);
                bbox.y_max = bbox.y_max.max(v.y);
            }
        }
        if bbox.x_min > bbox.x_max {
            return 0.0;
        }
        bbox.diagonal()
    }

    /// Nucleates new faults at the current rupture sites. Does not touch the
    /// mesh; see [`FaultPropagationEngine::insert_fault`].
    ///
    /// # Returns
    /// Ids of the new faults
    pub fn generate_faults(
        &mut self,
        mesh: &Mesh,
        results: &SimulationResults,
        materials: &MaterialLibrary,
        step: usize,
        time: f64,
    ) -> Vec<usize> {
        if !self.should_check(step) || self.faults.len() >= self.settings.max_faults {
            return Vec::new();
        }
        let bbox = match mesh.bounding_box() {
            Some(b) => b,
            None => return Vec::new(),
        };

        let sites = self.detect_rupture_sites(mesh, results, materials);
        let mut created = Vec::new();

        for site in sites {
            if self.faults.len() >= self.settings.max_faults {
                debug!("fault cap of {} reached", self.settings.max_faults);
                break;
            }
            if self.near_existing_fault(&site.location) {
                trace!("site at element {} lies on an existing fault", site.element_id);
                continue;
            }

            let friction = materials
                .get(mesh.elements[site.element_id].material_id)
                .map(|m| m.friction_angle)
                .unwrap_or(FALLBACK_FRICTION_ANGLE);
            let angle = self.settings.strategy.fault_angle(site.principal_angle, friction);

            let length = Self::cluster_footprint(mesh, &site.cluster)
                .min(self.settings.max_propagation_length);
            let half = 0.5 * length;
            let start = site.location.offset(-half * angle.cos(), -half * angle.sin());
            let end = site.location.offset(half * angle.cos(), half * angle.sin());
            let (start, end) = match clip_segment(&start, &end, &bbox) {
                Some(clipped) => clipped,
                None => continue,
            };
            if start.distance(&end) < self.settings.min_segment_length {
                debug!("discarding short fault at element {}", site.element_id);
                continue;
            }

            let id = self.faults.len();
            let fault = GeneratedFault {
                id,
                points: vec![start, start.midpoint(&end), end],
                mode: site.mode,
                dip_angle: dip_degrees(angle),
                slip: 0.0,
                opening: 0.0,
                interface_elements: Vec::new(),
                nucleation_step: step,
                nucleation_time: time,
                active: true,
            };
            info!(
                "nucleated {:?} fault {} at ({:.3}, {:.3}), length {:.3}, dip {:.1}°",
                fault.mode,
                id,
                site.location.x,
                site.location.y,
                fault.length(),
                fault.dip_angle
            );
            self.events.push(FaultEvent::FaultNucleated {
                fault_id: id,
                element_id: site.element_id,
                mode: site.mode,
                length: fault.length(),
            });
            self.faults.push(fault);
            created.push(id);
        }
        created
    }

    /// Extends both tips of every active fault nucleated before `step`.
    ///
    /// # Returns
    /// The grown ends as `(fault id, [previous point, old tip, new tip])`
    pub fn propagate_faults(
        &mut self,
        mesh: &Mesh,
        results: &SimulationResults,
        materials: &MaterialLibrary,
        step: usize,
    ) -> Vec<(usize, Vec<Vertex>)> {
        let bbox = match mesh.bounding_box() {
            Some(b) => b,
            None => return Vec::new(),
        };
        let nudge = 1e-6 * bbox.diagonal().max(f64::MIN_POSITIVE);
        let mut segments = Vec::new();

        for index in 0..self.faults.len() {
            if !self.faults[index].active || self.faults[index].nucleation_step >= step {
                continue;
            }
            for tip in [Tip::Head, Tip::Tail] {
                if !self.faults[index].active {
                    break;
                }
                if let Some(segment) =
                    self.propagate_tip(mesh, results, materials, &bbox, nudge, index, tip)
                {
                    segments.push(segment);
                }
            }
        }
        segments
    }

    #[allow(clippy::too_many_arguments)]
    fn propagate_tip(
        &mut self,
        mesh: &Mesh,
        results: &SimulationResults,
        materials: &MaterialLibrary,
        bbox: &BoundingBox,
        nudge: f64,
        index: usize,
        tip: Tip,
    ) -> Option<(usize, Vec<Vertex>)> {
        let fault_mode = self.faults[index].mode;
        let points = &self.faults[index].points;
        let n = points.len();
        if n < 2 {
            return None;
        }
        let (end, previous) = match tip {
            Tip::Head => (points[0], points[1]),
            Tip::Tail => (points[n - 1], points[n - 2]),
        };
        let length = end.distance(&previous);
        if length <= f64::EPSILON {
            return None;
        }
        let current = (end.y - previous.y).atan2(end.x - previous.x);

        // sample just ahead of the tip so points on element edges resolve
        let ahead = end.offset(nudge * current.cos(), nudge * current.sin());
        let element_id = mesh.find_element_containing(&ahead)?;
        let result = results.element(element_id)?;

        if result.yield_index < self.settings.rupture_threshold {
            debug!(
                "fault {index} arrested at element {element_id} (yield index {:.3})",
                result.yield_index
            );
            self.faults[index].active = false;
            return None;
        }

        let material = materials.get(mesh.elements[element_id].material_id).ok();
        let friction = material.map(|m| m.friction_angle).unwrap_or(FALLBACK_FRICTION_ANGLE);
        let mode = match material {
            Some(m) => classify_rupture(result.sigma1, result.sigma3, m.tensile_strength),
            None => fault_mode,
        };
        let mode = if mode.is_valid() { mode } else { fault_mode };

        let (target, weight) = tip_target(mode, result.principal_angle, friction, current);
        let angle = blend_angle(current, target, weight);

        let step_length = mesh
            .element_area(element_id)
            .sqrt()
            .min(self.settings.max_propagation_length);
        if step_length < self.settings.min_segment_length {
            return None;
        }
        let mut new_tip = end.offset(step_length * angle.cos(), step_length * angle.sin());

        if !bbox.contains(&new_tip) || mesh.find_element_containing(&new_tip).is_none() {
            self.faults[index].active = false;
            debug!("fault {index} reached the domain boundary");
            match clip_segment(&end, &new_tip, bbox) {
                Some((_, clipped)) if end.distance(&clipped) >= self.settings.min_segment_length => {
                    new_tip = clipped;
                }
                _ => return None,
            }
        }

        let fault = &mut self.faults[index];
        match tip {
            Tip::Head => fault.points.insert(0, new_tip),
            Tip::Tail => fault.points.push(new_tip),
        }
        let total = fault.length();
        trace!("fault {index} tip moved to ({:.3}, {:.3})", new_tip.x, new_tip.y);
        self.events.push(FaultEvent::FaultPropagated {
            fault_id: index,
            tip: new_tip,
            length: total,
        });
        Some((index, vec![previous, end, new_tip]))
    }

    /// Cuts a fault's whole trace into the mesh
    pub fn insert_fault(&mut self, mesh: &mut Mesh, fault_id: usize) -> Result<Vec<usize>> {
        let points = match self.faults.get(fault_id) {
            Some(f) => f.points.clone(),
            None => return Err(FaultlineError::Mesh(format!("Unknown fault {fault_id}"))),
        };
        self.cut_polyline(mesh, fault_id, &points)
    }

    /// Cuts the single segment a-b into the mesh for fault `fault_id`
    pub fn insert_segment(
        &mut self,
        mesh: &mut Mesh,
        fault_id: usize,
        a: &Vertex,
        b: &Vertex,
    ) -> Result<Vec<usize>> {
        self.cut_polyline(mesh, fault_id, &[*a, *b])
    }

    /// Cuts a polyline into the mesh. The continuum elements it crosses are
    /// marked failed and the cut follows their interior edges through the
    /// nodes nearest each polyline point. A node on the cut
    /// is split once it has cut edges on both sides or lies on the outer
    /// boundary: the elements left of the cut move onto a copy offset by
    /// `node_separation` along the left normal. Every newly cut edge gets an
    /// interface element whose face A belongs to the element on its right
    /// and face B to the element on its left. Edges already cut are skipped.
    ///
    /// # Returns
    /// Ids of the new interface elements
    fn cut_polyline(
        &mut self,
        mesh: &mut Mesh,
        fault_id: usize,
        points: &[Vertex],
    ) -> Result<Vec<usize>> {
        if fault_id >= self.faults.len() {
            return Err(FaultlineError::Mesh(format!("Unknown fault {fault_id}")));
        }
        let separation = self.settings.node_separation;
        let length = polyline_length(points);
        if length <= separation {
            warn!("skipping degenerate fault trace of length {length:.3e}");
            return Ok(Vec::new());
        }

        let hosts: Vec<usize> = mesh
            .elements
            .iter()
            .filter(|e| !e.is_interface())
            .filter(|e| {
                let outline: Vec<Vertex> =
                    e.corner_nodes().iter().map(|n| mesh.nodes[*n].vertex).collect();
                points
                    .windows(2)
                    .any(|pair| crossing_interval(&pair[0], &pair[1], &outline).is_some())
            })
            .map(|e| e.id)
            .collect();
        if hosts.is_empty() {
            trace!("fault {fault_id} trace misses the mesh");
            return Ok(Vec::new());
        }

        let edges = edge_elements(mesh);
        let cut: HashSet<EdgeKey> = mesh
            .elements
            .iter()
            .filter(|e| e.is_interface())
            .map(|e| edge_key(mesh.canonical_node(e.nodes[0]), mesh.canonical_node(e.nodes[1])))
            .collect();

        let path = match cut_path(mesh, &hosts, &edges, points) {
            Some(path) => path,
            None => {
                trace!("fault {fault_id} trace ends inside the elements it crosses");
                return Ok(Vec::new());
            }
        };
        let new_edges: Vec<(usize, usize)> = path
            .windows(2)
            .map(|w| (w[0], w[1]))
            .filter(|(p, q)| !cut.contains(&edge_key(*p, *q)))
            .collect();
        if new_edges.is_empty() {
            trace!("fault {fault_id} trace is already cut");
            return Ok(Vec::new());
        }

        let split = split_cut_nodes(mesh, &path, &new_edges, &cut, &edges, separation)?;

        // earlier interfaces ending at a newly split node take the copy on their side
        let earlier: Vec<usize> = mesh
            .elements
            .iter()
            .filter(|e| e.is_interface())
            .map(|e| e.id)
            .collect();
        for id in earlier {
            let p = mesh.canonical_node(mesh.elements[id].nodes[0]);
            let q = mesh.canonical_node(mesh.elements[id].nodes[1]);
            if !split.contains(&p) && !split.contains(&q) {
                continue;
            }
            if let Some((nodes, _)) = face_nodes(mesh, &edges, p, q) {
                mesh.elements[id].nodes = nodes.to_vec();
            }
        }

        let mut inserted = Vec::new();
        for (p, q) in new_edges {
            let (nodes, material_id) = match face_nodes(mesh, &edges, p, q) {
                Some(faces) => faces,
                None => continue,
            };
            if nodes[0] == nodes[3] && nodes[1] == nodes[2] {
                trace!("edge {p}-{q} has no split node yet");
                continue;
            }
            let id = mesh.add_element(
                ElementKind::interface(self.settings.joint),
                nodes.to_vec(),
                material_id,
            )?;
            inserted.push(id);
        }

        if !split.is_empty() || !inserted.is_empty() {
            for host in &hosts {
                mesh.elements[*host].has_failed = true;
            }
            mesh.invalidate_caches();
        }
        if !inserted.is_empty() {
            self.faults[fault_id].interface_elements.extend(&inserted);
            debug!(
                "fault {fault_id}: split {} nodes, inserted {} interface elements",
                split.len(),
                inserted.len()
            );
            self.events.push(FaultEvent::FaultInserted {
                fault_id,
                element_ids: inserted.clone(),
            });
        }
        Ok(inserted)
    }

    /// Updates each fault's slip and opening from the relative displacement
    /// of its interface node pairs
    pub fn update_fault_kinematics(&mut self, mesh: &Mesh) {
        for fault in self.faults.iter_mut() {
            let mut slip: f64 = 0.0;
            let mut opening: f64 = 0.0;
            for element in fault.interface_elements.iter().filter_map(|id| mesh.elements.get(*id)) {
                let coords = mesh.element_coords(element);
                let length = coords[0].distance(&coords[1]);
                if length <= f64::EPSILON {
                    continue;
                }
                let t = Vector2::new(
                    (coords[1].x - coords[0].x) / length,
                    (coords[1].y - coords[0].y) / length,
                );
                let n = Vector2::new(-t.y, t.x);
                for (face_a, face_b) in [(0, 3), (1, 2)] {
                    let delta = mesh.nodes[element.nodes[face_b]].displacement
                        - mesh.nodes[element.nodes[face_a]].displacement;
                    slip = slip.max(delta.dot(&t).abs());
                    opening = opening.max(delta.dot(&n));
                }
            }
            fault.slip = slip;
            fault.opening = opening;
        }
    }

    /// Runs one engine pass: kinematics, detection and nucleation, tip
    /// propagation, then insertion of everything new. Invalidates mesh caches
    /// when topology changes; the caller renumbers DOFs.
    pub fn step(
        &mut self,
        mesh: &mut Mesh,
        results: &SimulationResults,
        materials: &MaterialLibrary,
        step: usize,
        time: f64,
    ) -> Result<StepSummary> {
        let mut summary = StepSummary {
            step,
            ..Default::default()
        };
        self.update_fault_kinematics(mesh);
        if !self.settings.enabled {
            summary.active_faults = self.active_fault_count();
            return Ok(summary);
        }
        if !self.should_check(step) {
            trace!("fault engine idle at step {step}");
            summary.active_faults = self.active_fault_count();
            return Ok(summary);
        }

        let queued = self.events.len();
        let created = self.generate_faults(mesh, results, materials, step, time);
        summary.ruptures = self.events[queued..]
            .iter()
            .filter(|e| matches!(e, FaultEvent::RuptureDetected { .. }))
            .count();
        summary.nucleated = created.len();
        for id in created {
            summary.inserted_elements += self.insert_fault(mesh, id)?.len();
        }

        if self.settings.propagate_tips {
            let segments = self.propagate_faults(mesh, results, materials, step);
            summary.propagated = segments.len();
            for (id, trace) in segments {
                summary.inserted_elements += self.cut_polyline(mesh, id, &trace)?.len();
            }
        }

        summary.active_faults = self.active_fault_count();
        if summary.inserted_elements > 0 {
            info!(
                "step {step}: {} new faults, {} tips grown, {} interface elements inserted",
                summary.nucleated, summary.propagated, summary.inserted_elements
            );
        }
        Ok(summary)
    }
}

type EdgeKey = (usize, usize);

fn edge_key(p: usize, q: usize) -> EdgeKey {
    if p < q {
        (p, q)
    } else {
        (q, p)
    }
}

/// Continuum elements on each outline segment, keyed by canonical node pair
fn edge_elements(mesh: &Mesh) -> HashMap<EdgeKey, Vec<usize>> {
    let mut edges: HashMap<EdgeKey, Vec<usize>> = HashMap::new();
    for element in mesh.elements.iter().filter(|e| !e.is_interface()) {
        for (p, q) in element.outline_segments() {
            edges
                .entry(edge_key(mesh.canonical_node(p), mesh.canonical_node(q)))
                .or_default()
                .push(element.id);
        }
    }
    edges
}

type EdgeGraph = HashMap<usize, Vec<(usize, f64)>>;

/// Route over the interior edges of `hosts` through the node nearest each of
/// `points`. Edges far from the polyline cost more; loops are erased.
fn cut_path(
    mesh: &Mesh,
    hosts: &[usize],
    edges: &HashMap<EdgeKey, Vec<usize>>,
    points: &[Vertex],
) -> Option<Vec<usize>> {
    let mut graph: EdgeGraph = HashMap::new();
    for host in hosts {
        for (p, q) in mesh.elements[*host].outline_segments() {
            let (p, q) = (mesh.canonical_node(p), mesh.canonical_node(q));
            if edges.get(&edge_key(p, q)).map_or(true, |e| e.len() != 2) {
                continue;
            }
            let (vp, vq) = (mesh.nodes[p].vertex, mesh.nodes[q].vertex);
            let cost = vp.distance(&vq)
                + PATH_DEVIATION_WEIGHT * distance_to_polyline(&vp.midpoint(&vq), points);
            graph.entry(p).or_default().push((q, cost));
            graph.entry(q).or_default().push((p, cost));
        }
    }

    let nearest = |target: &Vertex| {
        graph.keys().copied().min_by(|x, y| {
            let dx = mesh.nodes[*x].vertex.distance(target);
            let dy = mesh.nodes[*y].vertex.distance(target);
            dx.total_cmp(&dy).then(x.cmp(y))
        })
    };
    let mut stops: Vec<usize> = points.iter().filter_map(nearest).collect();
    stops.dedup();
    if stops.len() < 2 {
        return None;
    }

    let mut path = vec![stops[0]];
    for leg in stops.windows(2) {
        for node in shortest_route(&graph, leg[0], leg[1])?.into_iter().skip(1) {
            match path.iter().position(|n| *n == node) {
                Some(index) => path.truncate(index + 1),
                None => path.push(node),
            }
        }
    }
    if path.len() < 2 {
        return None;
    }
    Some(path)
}

/// Dijkstra from `start` to `goal`
fn shortest_route(graph: &EdgeGraph, start: usize, goal: usize) -> Option<Vec<usize>> {
    let mut distance: HashMap<usize, f64> = HashMap::from([(start, 0.0)]);
    let mut previous: HashMap<usize, usize> = HashMap::new();
    let mut done: HashSet<usize> = HashSet::new();
    loop {
        let (current, base) = distance
            .iter()
            .filter(|(n, _)| !done.contains(*n))
            .min_by(|x, y| x.1.total_cmp(y.1).then(x.0.cmp(y.0)))
            .map(|(n, d)| (*n, *d))?;
        if current == goal {
            break;
        }
        done.insert(current);
        for (next, cost) in graph.get(&current).into_iter().flatten() {
            let candidate = base + cost;
            if distance.get(next).map_or(true, |d| candidate < *d) {
                distance.insert(*next, candidate);
                previous.insert(*next, current);
            }
        }
    }

    let mut route = vec![goal];
    let mut node = goal;
    while let Some(&before) = previous.get(&node) {
        route.push(before);
        node = before;
    }
    route.reverse();
    Some(route)
}

/// Splits the nodes of `path` that the new edges open up and moves the
/// elements left of the cut onto the copies. Nodes already split keep their
/// copy.
///
/// # Returns
/// Canonical ids of the nodes split
fn split_cut_nodes(
    mesh: &mut Mesh,
    path: &[usize],
    new_edges: &[(usize, usize)],
    cut: &HashSet<EdgeKey>,
    edges: &HashMap<EdgeKey, Vec<usize>>,
    separation: f64,
) -> Result<HashSet<usize>> {
    let already_split: HashSet<usize> = mesh.nodes.iter().filter_map(|n| n.split_from).collect();
    let boundary: HashSet<usize> = edges
        .iter()
        .filter(|(_, elements)| elements.len() == 1)
        .flat_map(|((p, q), _)| [*p, *q])
        .collect();
    let is_new = |p: usize, q: usize| new_edges.iter().any(|e| edge_key(e.0, e.1) == edge_key(p, q));
    let node_elements = mesh.node_element_map();
    let mut split = HashSet::new();

    for (i, node) in path.iter().copied().enumerate() {
        if already_split.contains(&node) {
            continue;
        }
        let mut before = i.checked_sub(1).map(|j| path[j]);
        let mut after = path.get(i + 1).copied();
        let opens = before.map_or(false, |p| is_new(p, node)) || after.map_or(false, |q| is_new(node, q));
        if !opens {
            continue;
        }

        // a path end continuing an earlier cut
        let mut earlier: Vec<usize> = cut
            .iter()
            .filter_map(|&(x, y)| match (x == node, y == node) {
                (true, _) => Some(y),
                (_, true) => Some(x),
                _ => None,
            })
            .filter(|other| Some(*other) != before && Some(*other) != after)
            .collect();
        earlier.sort_unstable();
        if before.is_none() {
            before = earlier.first().copied();
        } else if after.is_none() {
            after = earlier.first().copied();
        }
        if (before.is_none() || after.is_none()) && !boundary.contains(&node) {
            continue;
        }

        let origin = mesh.nodes[node].vertex;
        let before = before.map(|p| mesh.nodes[p].vertex);
        let after = after.map(|q| mesh.nodes[q].vertex);
        let normal = chain_normal(&origin, before.as_ref(), after.as_ref());
        let twin = mesh.split_node(
            node,
            origin.offset(normal.x * separation, normal.y * separation),
        )?;
        let left: Vec<usize> = node_elements[node]
            .iter()
            .copied()
            .filter(|id| {
                let element = &mesh.elements[*id];
                !element.is_interface()
                    && left_of_chain(
                        &element.centroid(&mesh.element_coords(element)),
                        &origin,
                        before.as_ref(),
                        after.as_ref(),
                    )
            })
            .collect();
        for id in left {
            mesh.reassign_node(id, node, twin);
        }
        split.insert(node);
    }
    Ok(split)
}

/// Interface nodes `[a0, a1, b1, b0]` for the cut edge p -> q, taken from
/// the copies used by the elements right (face A) and left (face B) of the
/// edge, with the right-hand element's material
fn face_nodes(
    mesh: &Mesh,
    edges: &HashMap<EdgeKey, Vec<usize>>,
    p: usize,
    q: usize,
) -> Option<([usize; 4], usize)> {
    let pair = edges.get(&edge_key(p, q))?;
    if pair.len() != 2 {
        return None;
    }
    let from = mesh.nodes[p].vertex;
    let to = mesh.nodes[q].vertex;
    let is_left = |id: usize| {
        let element = &mesh.elements[id];
        cross(&from, &to, &element.centroid(&mesh.element_coords(element))) > 0.0
    };
    let (left, right) = if is_left(pair[0]) {
        (pair[0], pair[1])
    } else {
        (pair[1], pair[0])
    };
    let copy = |element: usize, canonical: usize| {
        mesh.elements[element]
            .nodes
            .iter()
            .copied()
            .find(|n| mesh.canonical_node(*n) == canonical)
    };
    Some((
        [copy(right, p)?, copy(right, q)?, copy(left, q)?, copy(left, p)?],
        mesh.elements[right].material_id,
    ))
}

/// Unit left normal of the cut at a node, averaged over its cut edges
fn chain_normal(node: &Vertex, before: Option<&Vertex>, after: Option<&Vertex>) -> Vector2<f64> {
    let mut normal = Vector2::<f64>::zeros();
    for (from, to) in [(before, Some(node)), (Some(node), after)] {
        if let (Some(from), Some(to)) = (from, to) {
            let d = Vector2::new(to.x - from.x, to.y - from.y);
            let length = d.norm();
            if length > f64::EPSILON {
                normal += Vector2::new(-d.y, d.x) / length;
            }
        }
    }
    let length = normal.norm();
    if length > f64::EPSILON {
        normal / length
    } else {
        normal
    }
}

/// Whether `point` lies left of the cut before -> node -> after, near `node`
fn left_of_chain(point: &Vertex, node: &Vertex, before: Option<&Vertex>, after: Option<&Vertex>) -> bool {
    match (before, after) {
        (Some(p), Some(q)) => {
            let incoming = cross(p, node, point) > 0.0;
            let outgoing = cross(node, q, point) > 0.0;
            if cross(p, node, q) >= 0.0 {
                incoming && outgoing
            } else {
                incoming || outgoing
            }
        }
        (Some(p), None) => cross(p, node, point) > 0.0,
        (None, Some(q)) => cross(node, q, point) > 0.0,
        (None, None) => false,
    }
}

/// Target direction and blend weight for a tip in `mode`
fn tip_target(mode: RuptureMode, principal_angle: f64, friction_angle: f64, current: f64) -> (f64, f64) {
    let tensile = align_axis(compression_axis(principal_angle), current);
    let offset = coulomb_offset(friction_angle);
    let shear = [tensile + offset, tensile - offset]
        .into_iter()
        .map(|a| align_axis(a, current))
        .min_by(|x, y| {
            wrap_angle(x - current)
                .abs()
                .total_cmp(&wrap_angle(y - current).abs())
        })
        .unwrap_or(tensile);

    match mode {
        RuptureMode::TensileOpening => (tensile, 1.0),
        RuptureMode::InPlaneShear => (shear, 0.7),
        RuptureMode::MixedMode => (blend_angle(tensile, shear, 0.5), 0.7),
        RuptureMode::Compressive => (current, 0.0),
    }
}

/// Parameter interval of segment a-b lying inside the polygon `outline`
fn crossing_interval(a: &Vertex, b: &Vertex, outline: &[Vertex]) -> Option<(f64, f64)> {
    let mut params = Vec::new();
    if point_in_polygon(a, outline) {
        params.push(0.0);
    }
    if point_in_polygon(b, outline) {
        params.push(1.0);
    }
    for i in 0..outline.len() {
        let e0 = &outline[i];
        let e1 = &outline[(i + 1) % outline.len()];
        if let Some((t, _)) = segment_intersection(a, b, e0, e1) {
            params.push(t);
        }
    }
    let t0 = params.iter().copied().fold(f64::INFINITY, f64::min);
    let t1 = params.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if params.is_empty() || t1 <= t0 {
        return None;
    }
    // a chord through one corner only touches the element
    let middle = a.lerp(b, 0.5 * (t0 + t1));
    if !point_in_polygon(&middle, outline) {
        return None;
    }
    Some((t0, t1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::mesher::{rectangle, GridElement};
    use crate::results::ElementResult;
    use approx::assert_relative_eq;

    fn materials() -> MaterialLibrary {
        let mut lib = MaterialLibrary::new();
        lib.insert(
            Material::elastic(0, 1e4, 0.25)
                .unwrap()
                .with_strength(1.0, 30.0, 10.0)
                .unwrap(),
        );
        lib
    }

    /// 10 x 10 unit quads; element id = 10 * row + column
    fn grid() -> Mesh {
        let mut mesh = Mesh::new(1.0);
        rectangle(&mut mesh, Vertex::new(0.0, 0.0), 10.0, 10.0, 10, 10, GridElement::Quad4, 0)
            .unwrap();
        mesh
    }

    fn results_with(mesh: &Mesh, hot: &[usize], sigma1: f64, sigma3: f64) -> SimulationResults {
        let mut elements = vec![
            ElementResult {
                yield_index: 0.2,
                ..Default::default()
            };
            mesh.element_count()
        ];
        for id in hot {
            elements[*id] = ElementResult {
                yield_index: 1.5,
                sigma1,
                sigma3,
                ..Default::default()
            };
        }
        SimulationResults {
            step: 1,
            elements,
            nodes: Vec::new(),
        }
    }

    fn settings() -> FaultPropagationSettings {
        FaultPropagationSettings {
            min_cluster_size: 3,
            max_propagation_length: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn classification_examples() {
        assert_eq!(classify_rupture(5.0, -2.0, 3.0), RuptureMode::TensileOpening);
        assert_eq!(classify_rupture(1.0, -5.0, 10.0), RuptureMode::InPlaneShear);
        assert_eq!(classify_rupture(6.0, -2.0, 10.0), RuptureMode::MixedMode);
        assert_eq!(classify_rupture(-1.0, -5.0, 3.0), RuptureMode::InPlaneShear);
        assert_eq!(classify_rupture(1.0, 0.5, 3.0), RuptureMode::Compressive);
    }

    #[test]
    fn strategies_orient_relative_to_compression_axis() {
        // σ1 along x, so compression is vertical
        let aligned = PropagationStrategy::PrincipalStressAligned.fault_angle(0.0, 30.0);
        assert_relative_eq!(dip_degrees(aligned), 90.0, epsilon = 1e-9);
        let conjugate = PropagationStrategy::ConjugateAngle.fault_angle(0.0, 30.0);
        assert_relative_eq!(dip_degrees(conjugate), 60.0, epsilon = 1e-9);
        let guided = PropagationStrategy::StressGuided.fault_angle(0.0, 30.0);
        assert_relative_eq!(dip_degrees(guided), 45.0, epsilon = 1e-9);
        assert_eq!(
            PropagationStrategy::EnergyMinimizing.fault_angle(0.3, 20.0),
            PropagationStrategy::ConjugateAngle.fault_angle(0.3, 20.0)
        );
    }

    #[test]
    fn minimum_cluster_yields_single_capped_fault() {
        let mesh = grid();
        let results = results_with(&mesh, &[44, 45, 46], 1.0, -5.0);
        let mut engine = FaultPropagationEngine::new(settings());

        let created = engine.generate_faults(&mesh, &results, &materials(), 1, 0.0);
        assert_eq!(created.len(), 1);
        let fault = &engine.faults()[0];
        assert_eq!(fault.mode, RuptureMode::InPlaneShear);
        assert_eq!(fault.points.len(), 3);
        assert!(fault.length() <= 2.0 + 1e-9);
        assert!(fault.length() > 1.0);

        let events = engine.drain_events();
        assert!(matches!(events[0], FaultEvent::RuptureDetected { cluster_size: 3, .. }));
        assert!(matches!(events[1], FaultEvent::FaultNucleated { fault_id: 0, .. }));
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn small_and_compressive_clusters_are_ignored() {
        let mesh = grid();
        let mut engine = FaultPropagationEngine::new(settings());

        let small = results_with(&mesh, &[44, 45], 1.0, -5.0);
        assert!(engine.detect_rupture_sites(&mesh, &small, &materials()).is_empty());

        let compressive = results_with(&mesh, &[44, 45, 46], 1.0, 0.5);
        assert!(engine.generate_faults(&mesh, &compressive, &materials(), 1, 0.0).is_empty());
    }

    #[test]
    fn gating_and_cap_short_circuit() {
        let mesh = grid();
        let results = results_with(&mesh, &[44, 45, 46], 1.0, -5.0);

        let mut disabled = FaultPropagationEngine::new(FaultPropagationSettings {
            enabled: false,
            ..settings()
        });
        assert!(disabled.generate_faults(&mesh, &results, &materials(), 1, 0.0).is_empty());

        let mut late = FaultPropagationEngine::new(FaultPropagationSettings {
            start_step: 3,
            check_interval: 2,
            ..settings()
        });
        assert!(!late.should_check(2));
        assert!(!late.should_check(4));
        assert!(late.should_check(5));
        assert!(late.generate_faults(&mesh, &results, &materials(), 2, 0.0).is_empty());

        let mut capped = FaultPropagationEngine::new(FaultPropagationSettings {
            max_faults: 0,
            ..settings()
        });
        assert!(capped.generate_faults(&mesh, &results, &materials(), 1, 0.0).is_empty());
    }

    #[test]
    fn sites_near_existing_faults_are_skipped() {
        let mesh = grid();
        let results = results_with(&mesh, &[44, 45, 46], 1.0, -5.0);
        let mut engine = FaultPropagationEngine::new(settings());
        assert_eq!(engine.generate_faults(&mesh, &results, &materials(), 1, 0.0).len(), 1);
        engine.drain_events();

        assert!(engine.generate_faults(&mesh, &results, &materials(), 2, 1.0).is_empty());
        assert_eq!(engine.faults().len(), 1);
        // the covered cluster is not reported as a new rupture
        assert!(engine.drain_events().is_empty());
        assert!(engine.detect_rupture_sites(&mesh, &results, &materials()).is_empty());
    }

    #[test]
    fn inserting_twice_creates_no_duplicates() {
        let mut mesh = grid();
        let results = results_with(&mesh, &[44, 45, 46], 1.0, -5.0);
        let mut engine = FaultPropagationEngine::new(settings());
        engine.generate_faults(&mesh, &results, &materials(), 1, 0.0);

        let first = engine.insert_fault(&mut mesh, 0).unwrap();
        assert!(!first.is_empty());
        let interfaces = mesh.interface_count();
        let nodes = mesh.node_count();

        let second = engine.insert_fault(&mut mesh, 0).unwrap();
        assert!(second.is_empty());
        assert_eq!(mesh.interface_count(), interfaces);
        assert_eq!(mesh.node_count(), nodes);
        assert_eq!(engine.faults()[0].interface_elements, first);
    }

    /// Cut along y = 2 from the left boundary to the node at (3, 2)
    fn cut_row_two(mesh: &mut Mesh, engine: &mut FaultPropagationEngine) -> (usize, Vec<usize>) {
        let id = engine
            .seed_fault(
                vec![Vertex::new(-0.5, 2.1), Vertex::new(3.4, 2.1)],
                RuptureMode::InPlaneShear,
                0,
                0.0,
            )
            .unwrap();
        let ids = engine.insert_fault(mesh, id).unwrap();
        (id, ids)
    }

    #[test]
    fn cut_splits_nodes_so_the_sides_separate() {
        let mut mesh = grid();
        let mut engine = FaultPropagationEngine::new(settings());
        mesh.renumber_dofs();
        let nodes_before = mesh.node_count();

        let (_, ids) = cut_row_two(&mut mesh, &mut engine);
        assert_eq!(ids.len(), 3);
        // boundary node and the two interior nodes; the tip stays whole
        assert_eq!(mesh.node_count(), nodes_before + 3);
        assert!(!mesh.dofs_valid());

        for id in &ids[..2] {
            let e = &mesh.elements[*id];
            assert!(e.is_interface());
            let a0 = mesh.nodes[e.nodes[0]].vertex;
            let b0 = mesh.nodes[e.nodes[3]].vertex;
            assert_relative_eq!(b0.y - a0.y, 1e-4, epsilon = 1e-12);
            assert_relative_eq!(b0.x, a0.x);
            assert_eq!(mesh.canonical_node(e.nodes[3]), e.nodes[0]);
        }
        let tip = &mesh.elements[ids[2]];
        assert_eq!(tip.nodes[1], tip.nodes[2]);

        let adjacency = mesh.element_adjacency();
        assert!(!adjacency[20].contains(&10));
        assert!(!adjacency[21].contains(&11));
        assert!(adjacency[22].contains(&13));

        assert!(mesh.elements[20].has_failed);
        assert!(mesh.elements[23].has_failed);
        assert!(!mesh.elements[24].has_failed);
    }

    #[test]
    fn extending_a_cut_splits_its_old_tip() {
        let mut mesh = grid();
        let mut engine = FaultPropagationEngine::new(settings());
        let (id, ids) = cut_row_two(&mut mesh, &mut engine);
        let nodes_before = mesh.node_count();

        let more = engine
            .insert_segment(&mut mesh, id, &Vertex::new(3.4, 2.1), &Vertex::new(6.4, 2.1))
            .unwrap();
        assert_eq!(more.len(), 3);
        assert_eq!(mesh.node_count(), nodes_before + 3);
        assert_eq!(engine.faults()[id].interface_elements.len(), 6);

        let old_tip = &mesh.elements[ids[2]];
        assert_ne!(old_tip.nodes[1], old_tip.nodes[2]);
        assert_eq!(mesh.canonical_node(old_tip.nodes[2]), old_tip.nodes[1]);
        assert!(!mesh.element_adjacency()[22].contains(&13));
    }

    #[test]
    fn seeded_trace_needs_two_points() {
        let mut engine = FaultPropagationEngine::new(settings());
        let p = Vertex::new(1.0, 1.0);
        assert!(engine.seed_fault(vec![p], RuptureMode::InPlaneShear, 0, 0.0).is_err());
        assert!(engine.seed_fault(vec![p, p], RuptureMode::InPlaneShear, 0, 0.0).is_err());
        let id = engine
            .seed_fault(vec![p, Vertex::new(2.0, 2.0)], RuptureMode::InPlaneShear, 0, 0.0)
            .unwrap();
        assert_relative_eq!(engine.faults()[id].dip_angle, 45.0, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_segment_is_skipped() {
        let mut mesh = grid();
        let mut engine = FaultPropagationEngine::new(settings());
        let results = results_with(&mesh, &[44, 45, 46], 1.0, -5.0);
        engine.generate_faults(&mesh, &results, &materials(), 1, 0.0);
        let p = Vertex::new(3.3, 3.3);
        assert!(engine.insert_segment(&mut mesh, 0, &p, &p).unwrap().is_empty());
        assert!(engine.insert_segment(&mut mesh, 7, &p, &p).is_err());
    }

    #[test]
    fn tips_grow_while_stressed_and_arrest_otherwise() {
        let mesh = grid();
        let hot = results_with(&mesh, &[44, 45, 46], 1.0, -5.0);
        let mut engine = FaultPropagationEngine::new(settings());
        engine.generate_faults(&mesh, &hot, &materials(), 1, 0.0);
        let before = engine.faults()[0].length();

        // nothing grows in the nucleation step
        assert!(engine.propagate_faults(&mesh, &hot, &materials(), 1).is_empty());

        let everywhere: Vec<usize> = (0..mesh.element_count()).collect();
        let stressed = results_with(&mesh, &everywhere, 1.0, -5.0);
        let segments = engine.propagate_faults(&mesh, &stressed, &materials(), 2);
        assert_eq!(segments.len(), 2);
        let fault = &engine.faults()[0];
        assert_eq!(fault.points.len(), 5);
        assert!(fault.length() > before);
        assert!(fault.active);

        let calm = results_with(&mesh, &[], 0.0, 0.0);
        assert!(engine.propagate_faults(&mesh, &calm, &materials(), 3).is_empty());
        assert!(!engine.faults()[0].active);
        assert_eq!(engine.active_fault_count(), 0);
    }

    #[test]
    fn step_inserts_and_tracks_opening() {
        let mut mesh = grid();
        let results = results_with(&mesh, &[44, 45, 46], 1.0, -5.0);
        let mut engine = FaultPropagationEngine::new(settings());

        let summary = engine.step(&mut mesh, &results, &materials(), 1, 0.5).unwrap();
        assert_eq!(summary.ruptures, 1);
        assert_eq!(summary.nucleated, 1);
        assert!(summary.inserted_elements > 0);
        assert_eq!(mesh.interface_count(), summary.inserted_elements);

        let id = engine.faults()[0].interface_elements[0];
        let nodes = mesh.elements[id].nodes.clone();
        let coords = mesh.element_coords(&mesh.elements[id]);
        let length = coords[0].distance(&coords[1]);
        let normal = Vector2::new(
            -(coords[1].y - coords[0].y) / length,
            (coords[1].x - coords[0].x) / length,
        );
        mesh.nodes[nodes[2]].displacement = normal * 0.01;
        mesh.nodes[nodes[3]].displacement = normal * 0.01;
        engine.update_fault_kinematics(&mesh);
        assert_relative_eq!(engine.faults()[0].opening, 0.01, epsilon = 1e-12);

        let discontinuity = engine.faults()[0].to_discontinuity(&engine.settings().joint);
        assert_relative_eq!(discontinuity.aperture, 0.01, epsilon = 1e-12);
        assert_eq!(discontinuity.points, engine.faults()[0].points);

        engine.reset();
        assert!(engine.faults().is_empty());
    }

    #[test]
    fn parses_strategy_names() {
        assert_eq!(
            PropagationStrategy::parse("Principal-Stress-Aligned").unwrap(),
            PropagationStrategy::PrincipalStressAligned
        );
        assert_eq!(
            PropagationStrategy::parse("conjugate").unwrap(),
            PropagationStrategy::ConjugateAngle
        );
        assert!(PropagationStrategy::parse("random").is_err());
    }
}
