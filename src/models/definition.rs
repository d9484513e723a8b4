//! Serializable model definition
//!
//! A [`ModelDefinition`] bundles the four entity containers with the solver
//! configuration. It is independent of the mesh and of any field values, so
//! it can be stored as JSON and rebuilt into a model against any mesh.

use crate::error::Result;
use crate::models::{Compartment, Parameter, Reaction, Registry, Species};
use crate::solver::SolverConfiguration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Containers and configuration of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub parameters: Registry<Parameter>,
    pub species: Registry<Species>,
    pub compartments: Registry<Compartment>,
    pub reactions: Registry<Reaction>,
    pub config: SolverConfiguration,
}

impl ModelDefinition {
    pub fn new(
        parameters: Registry<Parameter>,
        species: Registry<Species>,
        compartments: Registry<Compartment>,
        reactions: Registry<Reaction>,
        config: SolverConfiguration,
    ) -> Self {
        Self {
            parameters,
            species,
            compartments,
            reactions,
            config,
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and re-validate every entity
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write JSON to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read JSON from `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
