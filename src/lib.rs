//! Two-dimensional plane-strain finite elements with automatic fault
//! nucleation, propagation and insertion as interface elements.

pub mod config;
pub mod datatypes;
pub mod element;
pub mod error;
pub mod fault;
pub mod geometry;
pub mod material;
pub mod mesh;
pub mod mesher;
pub mod post_processor;
pub mod quadrature;
pub mod results;
pub mod simulation;
pub mod solver;

pub use datatypes::{Node, Vertex};
pub use element::{Element, ElementKind, JointParameters};
pub use error::{FaultlineError, Result};
pub use fault::{
    FaultEvent, FaultPropagationEngine, FaultPropagationSettings, GeneratedFault, RuptureMode,
};
pub use material::{Material, MaterialLibrary};
pub use mesh::Mesh;
pub use results::SimulationResults;
pub use simulation::Simulation;
