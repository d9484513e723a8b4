//! Compartments: named geometric domains of a given topological dimension
//!
//! A compartment is identified on the parent mesh by its `cell_marker`: a
//! volume compartment (dimension 3) owns the cells carrying that marker, a
//! surface compartment (dimension 2) owns the facets carrying it. Markers are
//! unique among compartments of the same dimension.

use crate::error::{Result, SmartError};
use crate::models::registry::Entity;
use crate::physics::units::{Dimension, Unit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Geometric domain of the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CompartmentRecord")]
pub struct Compartment {
    name: String,
    dimensionality: usize,
    length_unit: Unit,
    cell_marker: i32,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    nonadjacent_to: BTreeSet<String>,
}

#[derive(Deserialize)]
struct CompartmentRecord {
    name: String,
    dimensionality: usize,
    length_unit: Unit,
    cell_marker: i32,
    #[serde(default)]
    nonadjacent_to: BTreeSet<String>,
}

impl TryFrom<CompartmentRecord> for Compartment {
    type Error = SmartError;

    fn try_from(record: CompartmentRecord) -> Result<Self> {
        let compartment = Compartment::with_unit(
            record.name,
            record.dimensionality,
            record.length_unit,
            record.cell_marker,
        )?;
        Ok(compartment.with_nonadjacent(record.nonadjacent_to))
    }
}

impl Compartment {
    /// New compartment; `length_unit` must parse to a length
    ///
    /// # Example
    ///
    /// ```rust
    /// use smart_rs::models::Compartment;
    ///
    /// let cyto = Compartment::new("cyto", 3, "um", 1).unwrap();
    /// assert_eq!(cyto.dimensionality(), 3);
    /// ```
    pub fn new(name: impl Into<String>, dimensionality: usize, length_unit: &str, cell_marker: i32) -> Result<Self> {
        Self::with_unit(name, dimensionality, Unit::parse(length_unit)?, cell_marker)
    }

    /// New compartment from an already parsed unit
    pub fn with_unit(name: impl Into<String>, dimensionality: usize, length_unit: Unit, cell_marker: i32) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SmartError::configuration("compartment name must not be empty"));
        }
        if !(1..=3).contains(&dimensionality) {
            return Err(SmartError::configuration(format!(
                "compartment '{}' has dimensionality {}, expected 1, 2 or 3",
                name, dimensionality
            )));
        }
        if length_unit.dimension() != Dimension::LENGTH {
            return Err(SmartError::UnitMismatch {
                context: format!("length unit of compartment '{}'", name),
                expected: Dimension::LENGTH.to_string(),
                found: length_unit.dimension().to_string(),
            });
        }

        Ok(Self {
            name,
            dimensionality,
            length_unit,
            cell_marker,
            nonadjacent_to: BTreeSet::new(),
        })
    }

    /// Declare compartments this one never touches
    pub fn with_nonadjacent<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nonadjacent_to.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topological dimension (3 for volumes, 2 for surfaces)
    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    pub fn length_unit(&self) -> &Unit {
        &self.length_unit
    }

    /// Mesh marker identifying the compartment's entities
    pub fn cell_marker(&self) -> i32 {
        self.cell_marker
    }

    /// Names declared non-adjacent
    pub fn nonadjacent_to(&self) -> &BTreeSet<String> {
        &self.nonadjacent_to
    }

    /// True if `other` was declared non-adjacent to this compartment
    pub fn is_declared_nonadjacent(&self, other: &str) -> bool {
        self.nonadjacent_to.contains(other)
    }
}

impl Entity for Compartment {
    const KIND: &'static str = "compartment";

    fn name(&self) -> &str {
        &self.name
    }
}
