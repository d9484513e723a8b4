//! Export of simulation results
//!
//! # Architecture
//!
//! The [`Exporter`] trait abstracts the file format: a format receives one
//! [`TimeSeriesRow`] per committed step and flushes at the end. Adding a
//! format means adding a sub-module.
//!
//! | Format  | Module      |
//! |---------|-------------|
//! | CSV     | [`csv`]     |

pub mod csv;

pub use csv::{CsvConfig, CsvError, CsvMetadata, CsvTimeSeries};

use crate::error::Result;
use crate::physics::mesh::MeshAdapter;
use crate::solver::Model;

/// One sample of a time series
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesRow {
    pub t: f64,
    pub step: usize,
    /// One value per column, in column order
    pub values: Vec<f64>,
}

impl TimeSeriesRow {
    /// Current time, step count and mean concentration of every species
    /// (species registry order)
    pub fn averages<M: MeshAdapter>(model: &Model<M>) -> Result<Self> {
        let values = model
            .definition()
            .species
            .names()
            .map(|name| model.average(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            t: model.t(),
            step: model.step_count(),
            values,
        })
    }
}

/// Abstraction over export formats
///
/// Each format manages its own errors through the associated type.
pub trait Exporter {
    type Error: std::error::Error;

    /// Append one row
    fn write_row(&mut self, row: &TimeSeriesRow) -> std::result::Result<(), Self::Error>;

    /// Flush buffered output
    fn finish(&mut self) -> std::result::Result<(), Self::Error>;
}
