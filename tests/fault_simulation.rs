use std::path::Path;

use faultline::config::parse_input;
use faultline::fault::FaultEvent;
use faultline::simulation::Simulation;

const INPUT: &str = r#"{
    "metadata": { "part_thickness": 1.0, "steps": 2, "plasticity": true, "solver": "direct" },
    "geometry": { "type": "rectangle", "width": 10, "height": 5, "nx": 20, "ny": 10 },
    "materials": [
        { "id": 0, "youngs_modulus": 1e4, "poisson_ratio": 0.25,
          "cohesion": 1.0, "friction_angle": 30, "tensile_strength": 0.5 }
    ],
    "boundary_conditions": {
        "left": { "region": { "x_target_max": 0.01 }, "targets": { "ux": 0 } },
        "base": { "region": { "y_target_max": 0.01 }, "targets": { "uy": 0 } },
        "top": { "region": { "y_target_min": 4.99 }, "targets": { "uy": -0.05 } }
    },
    "fault_propagation": {
        "min_cluster_size": 3, "max_faults": 2, "max_propagation_length": 2.0,
        "fault_spacing": 1.0, "strategy": "conjugate_angle"
    }
}"#;

#[test]
fn compressed_block_nucleates_and_inserts_faults() {
    let input = parse_input(INPUT, Path::new(".")).unwrap();
    let mut simulation = Simulation::from_input(&input).unwrap();
    let continuum_elements = simulation.mesh.element_count();

    let first = simulation.step().unwrap();
    assert!(first.results.max_yield_index() > 1.0);
    assert!(first.faults.nucleated >= 1);
    assert!(first.faults.inserted_elements > 0);
    assert!(first
        .events
        .iter()
        .any(|e| matches!(e, FaultEvent::FaultNucleated { .. })));

    let faults = simulation.engine.faults();
    assert!(!faults.is_empty() && faults.len() <= 2);
    for fault in faults {
        assert!(fault.length() <= 2.0 + 1e-9);
        assert!(!fault.interface_elements.is_empty());
        for id in &fault.interface_elements {
            assert!(*id >= continuum_elements);
            assert!(simulation.mesh.elements[*id].is_interface());
        }
    }
    assert!(simulation.mesh.dofs_valid());

    // the cut mesh still solves
    let second = simulation.step().unwrap();
    assert!(simulation.is_finished());
    assert_eq!(second.results.elements.len(), simulation.mesh.element_count() - second.faults.inserted_elements);
    assert!(second.results.max_displacement() > 0.0);
}

#[test]
fn initial_fault_is_cut_before_the_first_step() {
    let text = INPUT
        .replace("\"steps\": 2", "\"steps\": 1")
        .replace(
            "\"min_cluster_size\": 3,",
            "\"enabled\": false, \"initial_faults\": [[[5.1, -1], [5.1, 6]]],",
        );
    let input = parse_input(&text, Path::new(".")).unwrap();
    let mut simulation = Simulation::from_input(&input).unwrap();

    let faults = simulation.engine.faults();
    assert_eq!(faults.len(), 1);
    // one interface per row of elements along x = 5
    assert_eq!(faults[0].interface_elements.len(), 10);
    assert_eq!(simulation.mesh.node_count(), 21 * 11 + 11);

    let outcome = simulation.step().unwrap();
    assert!(outcome
        .events
        .iter()
        .any(|e| matches!(e, FaultEvent::FaultInserted { .. })));
    assert!(outcome.results.max_displacement() > 0.0);
}
