//! Error types shared by every layer of the crate
//!
//! Build-time problems (bad references, ambiguous domains, dimensional
//! inconsistencies, unparsable expressions) are reported before any time step
//! is taken. The only error produced while stepping is [`SmartError::Convergence`].

use crate::output::export::CsvError;
use crate::physics::expression::ExpressionError;
use crate::physics::units::UnitError;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SmartError>;

/// Every failure the model-assembly and solve layers can report
#[derive(Debug, thiserror::Error)]
pub enum SmartError {
    /// An entity with this name already exists in the container
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName {
        /// Entity kind (compartment, species, ...)
        kind: &'static str,
        /// Offending name
        name: String,
    },

    /// Lookup of an unknown entity
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Entity kind (compartment, species, ...)
        kind: &'static str,
        /// Requested name
        name: String,
    },

    /// Invalid model configuration or lifecycle misuse
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Dimensional inconsistency between a declaration and its use
    #[error("unit mismatch in {context}: expected {expected}, found {found}")]
    UnitMismatch {
        /// Where the mismatch was detected
        context: String,
        /// Expected dimension
        expected: String,
        /// Dimension actually found
        found: String,
    },

    /// Unit string could not be understood
    #[error(transparent)]
    Unit(#[from] UnitError),

    /// Expression could not be parsed, bound or integrated
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// Nonlinear solve failed after exhausting the time-step retry budget
    #[error(
        "nonlinear solve did not converge at t = {time} after {attempts} attempt(s) \
         (last dt = {dt}, residual = {residual:e})"
    )]
    Convergence {
        /// Committed time of the step that failed
        time: f64,
        /// Last time step attempted
        dt: f64,
        /// Residual norm of the last attempt
        residual: f64,
        /// Number of attempts made
        attempts: usize,
    },

    /// Filesystem error while persisting or restoring
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed serialized model definition
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing a time series failed
    #[error(transparent)]
    Export(#[from] CsvError),
}

impl SmartError {
    /// Shorthand for a [`SmartError::Configuration`]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True for errors raised while building the model (never while stepping)
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. }
                | Self::NotFound { .. }
                | Self::Configuration(_)
                | Self::UnitMismatch { .. }
                | Self::Unit(_)
                | Self::Expression(_)
        )
    }
}
