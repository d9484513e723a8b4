//! smart-rs: Multi-Compartment Reaction-Diffusion Framework
//!
//! Assembles and time-steps reaction-diffusion models whose species live in
//! several compartments of one mesh: 3D volumes and the 2D surfaces between
//! them. Reactions inside a compartment are source terms; reactions between a
//! surface and an adjacent volume become flux boundary conditions of the
//! volume species. Everything is solved monolithically with backward Euler
//! and Newton.
//!
//! # Architecture
//!
//! 1. **Declarations** ([`models`]): compartments, species, parameters and
//!    reactions, each in a name-indexed [`Registry`](models::Registry), with
//!    units and symbolic rate laws. Serializable as a [`ModelDefinition`](models::ModelDefinition).
//! 2. **Physics** ([`physics`]): units, expressions, sub-meshes, coupling
//!    resolution and the discrete residual.
//! 3. **Numerics** ([`solver`]): configuration, Newton, step control and the
//!    [`Model`](solver::Model) lifecycle.
//! 4. **Output** ([`output`]): per-step CSV export.
//!
//! # Quick Start
//!
//! ```rust
//! use smart_rs::prelude::*;
//!
//! # fn main() -> smart_rs::error::Result<()> {
//! let definition = ModelDefinition::new(
//!     Registry::from_entities([
//!         Parameter::constant("kon", 1.0, "1/(uM*s)")?,
//!         Parameter::constant("koff", 0.1, "1/s")?,
//!     ])?,
//!     Registry::from_entities([
//!         Species::new("A", 1.0, "uM", 10.0, "um^2/s", "cyto")?,
//!         Species::new("X", 1000.0, "molecule/um^2", 0.1, "um^2/s", "pm")?,
//!         Species::new("B", 0.0, "molecule/um^2", 0.1, "um^2/s", "pm")?,
//!     ])?,
//!     Registry::from_entities([
//!         Compartment::new("cyto", 3, "um", 1)?,
//!         Compartment::new("pm", 2, "um", 10)?,
//!     ])?,
//!     Registry::from_entities([Reaction::new("r1", ["A", "X"], ["B"])?
//!         .with_parameter("on", "kon")
//!         .with_parameter("off", "koff")])?,
//!     SolverConfiguration::fixed_step(0.2, 0.1),
//! );
//!
//! let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build()?;
//! let mut model = Model::new(definition, mesh);
//! model.initialize()?;
//! model.run_until(0.2)?;
//! assert!(model.average("B")? > 0.0);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`error`]: error taxonomy
//! - [`models`]: model declarations
//! - [`physics`]: units, expressions, meshes, coupling, assembly
//! - [`solver`]: time stepping
//! - [`output`]: export

// Core modules
pub mod error;
pub mod physics;

pub mod models;
pub mod output;
pub mod solver;

pub mod prelude {
    //! Convenient imports for common usage
    //!
    //! ```rust
    //! use smart_rs::prelude::*;
    //! ```
    pub use crate::error::{Result, SmartError};
    pub use crate::models::{Compartment, ModelDefinition, Parameter, Reaction, Registry, Species, TimeEvaluation};
    pub use crate::output::{CsvConfig, CsvTimeSeries, Exporter};
    pub use crate::physics::{BoxMeshBuilder, MeshAdapter, ParentMesh};
    pub use crate::solver::{Model, ModelState, SolverConfiguration, TimeStepping};
}
