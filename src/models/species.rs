//! Species: diffusing concentration fields living in one compartment

use crate::error::{Result, SmartError};
use crate::models::registry::Entity;
use crate::physics::units::{Dimension, Unit};
use serde::{Deserialize, Serialize};

/// Chemical species with a uniform initial concentration
///
/// The concentration unit must be `[amount]/[length]^d` with `d` in 1..=3;
/// the model checks at initialization that `d` equals the dimension of the
/// species' compartment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SpeciesRecord")]
pub struct Species {
    name: String,
    initial_condition: f64,
    concentration_unit: Unit,
    diffusion_coefficient: f64,
    diffusion_unit: Unit,
    compartment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
}

#[derive(Deserialize)]
struct SpeciesRecord {
    name: String,
    initial_condition: f64,
    concentration_unit: Unit,
    diffusion_coefficient: f64,
    diffusion_unit: Unit,
    compartment: String,
    #[serde(default)]
    group: Option<String>,
}

impl TryFrom<SpeciesRecord> for Species {
    type Error = SmartError;

    fn try_from(r: SpeciesRecord) -> Result<Self> {
        let species = Species::with_units(
            r.name,
            r.initial_condition,
            r.concentration_unit,
            r.diffusion_coefficient,
            r.diffusion_unit,
            r.compartment,
        )?;
        Ok(match r.group {
            Some(group) => species.with_group(group),
            None => species,
        })
    }
}

impl Species {
    /// New species from unit strings
    ///
    /// ```rust
    /// use smart_rs::models::Species;
    ///
    /// let a = Species::new("A", 1.0, "uM", 10.0, "um^2/s", "cyto").unwrap();
    /// assert_eq!(a.concentration_dimension(), 3);
    /// ```
    pub fn new(
        name: impl Into<String>,
        initial_condition: f64,
        concentration_unit: &str,
        diffusion_coefficient: f64,
        diffusion_unit: &str,
        compartment: impl Into<String>,
    ) -> Result<Self> {
        Self::with_units(
            name,
            initial_condition,
            Unit::parse(concentration_unit)?,
            diffusion_coefficient,
            Unit::parse(diffusion_unit)?,
            compartment,
        )
    }

    /// New species from parsed units
    pub fn with_units(
        name: impl Into<String>,
        initial_condition: f64,
        concentration_unit: Unit,
        diffusion_coefficient: f64,
        diffusion_unit: Unit,
        compartment: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SmartError::configuration("species name must not be empty"));
        }
        if !initial_condition.is_finite() || initial_condition < 0.0 {
            return Err(SmartError::configuration(format!(
                "initial condition of species '{}' must be finite and non-negative, got {}",
                name, initial_condition
            )));
        }
        if !diffusion_coefficient.is_finite() || diffusion_coefficient < 0.0 {
            return Err(SmartError::configuration(format!(
                "diffusion coefficient of species '{}' must be finite and non-negative, got {}",
                name, diffusion_coefficient
            )));
        }
        if concentration_dimension_of(&concentration_unit).is_none() {
            return Err(SmartError::UnitMismatch {
                context: format!("concentration unit of species '{}'", name),
                expected: "[amount]/[length]^d with d in 1..=3".to_string(),
                found: concentration_unit.dimension().to_string(),
            });
        }
        let expected = Dimension::LENGTH.powi(2) / Dimension::TIME;
        if diffusion_unit.dimension() != expected {
            return Err(SmartError::UnitMismatch {
                context: format!("diffusion unit of species '{}'", name),
                expected: expected.to_string(),
                found: diffusion_unit.dimension().to_string(),
            });
        }

        Ok(Self {
            name,
            initial_condition,
            concentration_unit,
            diffusion_coefficient,
            diffusion_unit,
            compartment: compartment.into(),
            group: None,
        })
    }

    /// Informative group label
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_condition(&self) -> f64 {
        self.initial_condition
    }

    pub fn concentration_unit(&self) -> &Unit {
        &self.concentration_unit
    }

    /// `d` in `[amount]/[length]^d`
    pub fn concentration_dimension(&self) -> usize {
        concentration_dimension_of(&self.concentration_unit).unwrap_or(0)
    }

    pub fn diffusion_coefficient(&self) -> f64 {
        self.diffusion_coefficient
    }

    pub fn diffusion_unit(&self) -> &Unit {
        &self.diffusion_unit
    }

    /// Name of the owning compartment
    pub fn compartment(&self) -> &str {
        &self.compartment
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }
}

fn concentration_dimension_of(unit: &Unit) -> Option<usize> {
    (1..=3).find(|&d| unit.dimension() == Dimension::concentration(d))
}

impl Entity for Species {
    const KIND: &'static str = "species";

    fn name(&self) -> &str {
        &self.name
    }
}
