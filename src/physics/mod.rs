//! Physics of the compartment model
//!
//! # Core Concepts
//!
//! - **Units** ([`units`]): dimensions and SI scale of every declared quantity
//! - **Expressions** ([`expression`]): rate laws and time-dependent parameters,
//!   with symbolic derivatives, dimensional analysis and closed-form integration
//! - **Mesh** ([`mesh`]): the parent mesh seen through [`MeshAdapter`] and the
//!   per-compartment [`SubMesh`]es
//! - **Coupling** ([`coupling`]): domain inference, adjacency, unit
//!   conversion and binding of every reaction
//! - **Assembly** ([`assembly`]): backward Euler residual and Jacobian of the
//!   monolithic system
//!
//! # Architecture
//!
//! Physics describes the discrete equations; the [`solver`](crate::solver)
//! module decides how and when they are solved.
//!
//! ```text
//! ModelDefinition + MeshAdapter ──resolve()──▶ CouplingPlan ──▶ StepSystem (F, J)
//! ```
//!
//! # Example
//!
//! ```rust
//! use smart_rs::physics::units::{Dimension, Unit};
//!
//! let rate: Unit = "uM/s".parse().unwrap();
//! assert_eq!(rate.dimension(), Dimension::concentration_rate(3));
//! ```

// module declaration
pub mod assembly;
pub mod coupling;
pub mod expression;
pub mod mesh;
pub mod units;

// re-export commonly used types for convenience
pub use assembly::{FieldLayout, StepSystem};
pub use coupling::{CouplingKind, CouplingPlan, ReactionPlan, resolve};
pub use expression::{BoundExpression, Expression, ExpressionError, Slot, TimeExpression};
pub use mesh::{BoxMeshBuilder, EntityKind, MeshAdapter, ParentMesh, SubMesh};
pub use units::{Dimension, Unit, UnitError};
