use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::{
    error::{FaultlineError, Result},
    fault::GeneratedFault,
    mesh::Mesh,
    results::SimulationResults,
};

fn create(path: &Path) -> Result<BufWriter<File>> {
    match File::create(path) {
        Ok(f) => Ok(BufWriter::new(f)),
        Err(err) => Err(FaultlineError::PostProcessor(format!(
            "Failed to create {}: {err}",
            path.display()
        ))),
    }
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `mesh` - The post-solve mesh
/// * `results` - Results collected from `mesh`
/// * `nodes_output` - The filename of the output nodes csv
/// * `elements_output` - The filename of the output elements csv
pub fn csv_output(
    mesh: &Mesh,
    results: &SimulationResults,
    nodes_output: &Path,
    elements_output: &Path,
) -> Result<()> {
    let mut nodes_file = create(nodes_output)?;
    let mut elements_file = create(elements_output)?;

    // Write nodes
    writeln!(nodes_file, "id,x,y,ux,uy,rx,ry")?;
    for node in &mesh.nodes {
        writeln!(
            nodes_file,
            "{id},{x},{y},{ux},{uy},{rx},{ry}",
            id = node.id,
            x = node.vertex.x,
            y = node.vertex.y,
            ux = node.displacement.x,
            uy = node.displacement.y,
            rx = node.reaction.x,
            ry = node.reaction.y,
        )?;
    }

    // Write elements; node ids are space separated so element kinds can mix
    writeln!(
        elements_file,
        "id,kind,material,nodes,yield_index,sigma1,sigma3,angle,plastic_strain,failed"
    )?;
    for element in &mesh.elements {
        let nodes: Vec<String> = element.nodes.iter().map(|n| n.to_string()).collect();
        let result = results.element(element.id).copied().unwrap_or_default();
        writeln!(
            elements_file,
            "{id},{kind},{material},{nodes},{yield_index},{sigma1},{sigma3},{angle},{plastic},{failed}",
            id = element.id,
            kind = element.kind.name(),
            material = element.material_id,
            nodes = nodes.join(" "),
            yield_index = result.yield_index,
            sigma1 = result.sigma1,
            sigma3 = result.sigma3,
            angle = result.principal_angle,
            plastic = result.plastic_strain,
            failed = element.has_failed,
        )?;
    }

    nodes_file.flush()?;
    elements_file.flush()?;
    info!(
        "wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok(())
}

/// Writes one row per fault trace vertex
pub fn fault_csv_output(faults: &[GeneratedFault], faults_output: &Path) -> Result<()> {
    let mut faults_file = create(faults_output)?;
    writeln!(
        faults_file,
        "fault,point,x,y,mode,dip,slip,opening,interfaces,step,active"
    )?;
    for fault in faults {
        for (index, point) in fault.points.iter().enumerate() {
            writeln!(
                faults_file,
                "{},{},{},{},{:?},{},{},{},{},{},{}",
                fault.id,
                index,
                point.x,
                point.y,
                fault.mode,
                fault.dip_angle,
                fault.slip,
                fault.opening,
                fault.interface_elements.len(),
                fault.nucleation_step,
                fault.active
            )?;
        }
    }
    faults_file.flush()?;
    info!("wrote {} faults to {}", faults.len(), faults_output.display());
    Ok(())
}

/// Writes `step_<n>_nodes.csv`, `step_<n>_elements.csv` and
/// `step_<n>_faults.csv` into `output_dir`, creating it if needed
pub fn write_step(
    output_dir: &Path,
    mesh: &Mesh,
    results: &SimulationResults,
    faults: &[GeneratedFault],
) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let prefix = format!("step_{:04}", results.step);
    csv_output(
        mesh,
        results,
        &output_dir.join(format!("{prefix}_nodes.csv")),
        &output_dir.join(format!("{prefix}_elements.csv")),
    )?;
    fault_csv_output(faults, &output_dir.join(format!("{prefix}_faults.csv")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Vertex;
    use crate::element::ElementKind;
    use crate::fault::RuptureMode;
    use crate::material::MaterialLibrary;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("faultline-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn writes_nodes_elements_and_faults() {
        let mut mesh = Mesh::new(1.0);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
            mesh.add_node(Vertex::new(x, y));
        }
        mesh.add_element(ElementKind::Triangle3, vec![0, 1, 2], 0).unwrap();
        let results = SimulationResults::collect(&mesh, &MaterialLibrary::new(), 2);
        let fault = GeneratedFault {
            id: 0,
            points: vec![Vertex::new(0.1, 0.1), Vertex::new(0.4, 0.4)],
            mode: RuptureMode::InPlaneShear,
            dip_angle: 45.0,
            slip: 0.0,
            opening: 0.0,
            interface_elements: Vec::new(),
            nucleation_step: 2,
            nucleation_time: 1.0,
            active: true,
        };

        let dir = scratch_dir("post");
        write_step(&dir, &mesh, &results, &[fault]).unwrap();

        let nodes = std::fs::read_to_string(dir.join("step_0002_nodes.csv")).unwrap();
        assert_eq!(nodes.lines().count(), 4);
        assert!(nodes.starts_with("id,x,y,ux,uy"));
        let elements = std::fs::read_to_string(dir.join("step_0002_elements.csv")).unwrap();
        assert!(elements.lines().nth(1).unwrap().contains("0 1 2"));
        let faults = std::fs::read_to_string(dir.join("step_0002_faults.csv")).unwrap();
        assert_eq!(faults.lines().count(), 3);
        assert!(faults.contains("InPlaneShear"));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
