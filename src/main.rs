use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use faultline::{config, post_processor, simulation::Simulation, Result};

/// Plane-strain finite element solver with automatic fault propagation
#[derive(Parser)]
#[command(name = "faultline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "2D geomechanical FE solver with fault nucleation and propagation", long_about = None)]
struct Cli {
    /// Input json file
    input: PathBuf,

    /// Load steps, overriding metadata.steps
    #[arg(short, long)]
    steps: Option<usize>,

    /// Directory for per-step csv output
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Only write the final step
    #[arg(long)]
    final_only: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn run(cli: &Cli) -> Result<()> {
    let input_path = cli.input.to_string_lossy();
    let mut input = config::load_input_file(&input_path)?;
    if let Some(steps) = cli.steps {
        input.metadata.steps = steps.max(1);
    }

    let mut simulation = Simulation::from_input(&input)?;
    info!(
        "meshed {} nodes and {} elements, running {} steps",
        simulation.mesh.node_count(),
        simulation.mesh.element_count(),
        simulation.total_steps()
    );

    while !simulation.is_finished() {
        let outcome = simulation.step()?;
        for event in &outcome.events {
            info!("{event:?}");
        }
        if !cli.final_only || simulation.is_finished() {
            post_processor::write_step(
                &cli.output_dir,
                &simulation.mesh,
                &outcome.results,
                simulation.engine.faults(),
            )?;
        }
    }

    info!(
        "finished with {} faults and {} interface elements",
        simulation.engine.faults().len(),
        simulation.mesh.interface_count()
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str()))
        .format_timestamp(None)
        .init();

    if let Err(err) = run(&cli) {
        error!("{err}");
        std::process::exit(1)
    }
}
