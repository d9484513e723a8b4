//! Model entities and their containers
//!
//! A model is described by four kinds of entities, each held in its own
//! [`Registry`]:
//!
//! ## [`Compartment`]: where things live
//!
//! A named domain of the mesh (a 3D volume or a 2D surface) identified by a
//! marker value.
//!
//! ## [`Species`]: what diffuses
//!
//! A concentration field in one compartment, with an initial value and a
//! diffusion coefficient.
//!
//! ## [`Parameter`]: the numbers
//!
//! Constants, closed-form functions of time or sampled time series, each
//! with a unit.
//!
//! ## [`Reaction`]: how species interact
//!
//! Stoichiometry plus a rate law (mass action by default). A reaction may
//! involve species of a volume and of an adjacent surface; it then becomes a
//! flux boundary condition of the volume species.
//!
//! The containers together with the solver configuration form a
//! [`ModelDefinition`], which round-trips through JSON.

// =================================================================================================
// Module Declarations
// =================================================================================================

pub mod compartment;
pub mod definition;
pub mod parameter;
pub mod reaction;
pub mod registry;
pub mod species;

// =================================================================================================
// Public Re-exports
// =================================================================================================

pub use compartment::Compartment;
pub use definition::ModelDefinition;
pub use parameter::{Parameter, ParameterValue, TimeEvaluation};
pub use reaction::Reaction;
pub use registry::{Entity, Registry};
pub use species::Species;
