//! CSV time series of species averages
//!
//! [`CsvTimeSeries`] appends one row per committed step: the time, the step
//! number and the measure-weighted mean concentration of every species. It is
//! meant to be driven from [`Model::run_until_with`](crate::solver::Model::run_until_with).
//!
//! # Example
//!
//! ```rust,ignore
//! use smart_rs::output::export::{CsvConfig, CsvMetadata, CsvTimeSeries};
//!
//! let config = CsvConfig::default().with_metadata(CsvMetadata::from_model(&model));
//! let mut csv = CsvTimeSeries::for_model("averages.csv", &model, Some(config))?;
//! csv.record(&model)?;                                   // initial state
//! model.run_until_with(5.0, |model, _| csv.record(model))?;
//! csv.finish()?;
//! ```
//!
//! **Output** (`averages.csv`):
//! ```csv
//! # Reaction-Diffusion Simulation Data
//! # Generated: 2026-10-16T09:30:00+00:00
//! # Model: cyto+pm
//! # Solver: Newton (dense LU)
//! # Time Stepping: Fixed
//! # Final Time: 5 s
//! #
//! Time (s),Step,A (uM),X (molecule/um^2),B (molecule/um^2)
//! 0.000000,0,1.000000,1000.000000,0.000000
//! 0.050000,1,0.990391,996.101541,3.898459
//! ...
//! ```

use crate::error::Result;
use crate::output::export::{Exporter, TimeSeriesRow};
use crate::physics::mesh::MeshAdapter;
use crate::solver::Model;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

// =============================================================================
// Errors
// =============================================================================

/// Failures while writing a CSV time series
#[derive(Debug, thiserror::Error)]
pub enum CsvError {
    #[error("CSV I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("a time series needs at least one column")]
    NoColumns,

    #[error("row at t = {t} has {found} value(s), expected {expected}")]
    ColumnMismatch { t: f64, expected: usize, found: usize },

    #[error("non-finite value in column '{column}' at t = {t}")]
    NonFinite { column: String, t: f64 },
}

// =============================================================================
// Configuration Structures
// =============================================================================

/// Configuration for CSV export
///
/// # Example
///
/// ```rust,ignore
/// let config = CsvConfig {
///     delimiter: ';',
///     precision: 10,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Column delimiter (default: ',')
    pub delimiter: char,

    /// Decimal separator (default: '.')
    pub decimal_separator: char,

    /// Number of decimal places for floating-point values (default: 6)
    pub precision: usize,

    /// Include metadata header comments (default: false)
    pub include_metadata: bool,

    /// Metadata to include in header
    pub metadata: Option<CsvMetadata>,

    /// Header of the time column (default: "Time (s)")
    pub time_header: String,

    /// Header of the step column (default: "Step")
    pub step_header: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            decimal_separator: '.',
            precision: 6,
            include_metadata: false,
            metadata: None,
            time_header: "Time (s)".to_string(),
            step_header: "Step".to_string(),
        }
    }
}

impl CsvConfig {
    /// Semicolon delimiter, comma decimal separator
    pub fn european() -> Self {
        Self {
            delimiter: ';',
            decimal_separator: ',',
            ..Default::default()
        }
    }

    /// 12 decimal places
    pub fn high_precision() -> Self {
        Self {
            precision: 12,
            ..Default::default()
        }
    }

    /// Builder pattern: set delimiter
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Builder pattern: set precision
    pub fn precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Builder pattern: enable metadata
    pub fn with_metadata(mut self, metadata: CsvMetadata) -> Self {
        self.include_metadata = true;
        self.metadata = Some(metadata);
        self
    }
}

/// Metadata for CSV header comments
///
/// Only fields that are set appear in the header.
#[derive(Debug, Clone, Default)]
pub struct CsvMetadata {
    /// Model label, e.g. the compartment names
    pub model_name: Option<String>,

    /// Nonlinear solver name
    pub solver_name: Option<String>,

    /// Time stepping policy ("Fixed", "Adaptive")
    pub time_stepping: Option<String>,

    /// Final simulation time (seconds)
    pub final_time: Option<f64>,

    /// Additional custom entries
    pub custom: Vec<(String, String)>,
}

impl CsvMetadata {
    /// Metadata describing `model`
    pub fn from_model<M: MeshAdapter>(model: &Model<M>) -> Self {
        let definition = model.definition();
        let compartments: Vec<&str> = definition.compartments.names().collect();
        Self {
            model_name: Some(compartments.join("+")),
            solver_name: Some(model.solver_name().to_string()),
            time_stepping: Some(definition.config.time_stepping.name().to_string()),
            final_time: Some(definition.config.final_t),
            custom: Vec::new(),
        }
    }

    /// Add custom entry
    pub fn add_custom(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom.push((key.into(), value.into()));
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn write_metadata_header(out: &mut impl Write, metadata: &CsvMetadata) -> std::io::Result<()> {
    writeln!(out, "# Reaction-Diffusion Simulation Data")?;
    writeln!(out, "# Generated: {}", chrono::Utc::now().to_rfc3339())?;

    if let Some(model) = &metadata.model_name {
        writeln!(out, "# Model: {}", model)?;
    }
    if let Some(solver) = &metadata.solver_name {
        writeln!(out, "# Solver: {}", solver)?;
    }
    if let Some(stepping) = &metadata.time_stepping {
        writeln!(out, "# Time Stepping: {}", stepping)?;
    }
    if let Some(final_time) = metadata.final_time {
        writeln!(out, "# Final Time: {} s", final_time)?;
    }
    for (key, value) in &metadata.custom {
        writeln!(out, "# {}: {}", key, value)?;
    }
    writeln!(out, "#")
}

/// Format number with configured precision and decimal separator
fn format_number(value: f64, config: &CsvConfig) -> String {
    let formatted = format!("{:.prec$}", value, prec = config.precision);
    if config.decimal_separator != '.' {
        formatted.replace('.', &config.decimal_separator.to_string())
    } else {
        formatted
    }
}

// =============================================================================
// Time series writer
// =============================================================================

/// Appends one CSV row per committed step
pub struct CsvTimeSeries {
    out: BufWriter<File>,
    columns: Vec<String>,
    config: CsvConfig,
    rows: usize,
}

impl CsvTimeSeries {
    /// Create `path` and write the header
    ///
    /// `columns` are the headers of the value columns, after time and step.
    pub fn create(path: impl AsRef<Path>, columns: Vec<String>, config: Option<CsvConfig>) -> std::result::Result<Self, CsvError> {
        if columns.is_empty() {
            return Err(CsvError::NoColumns);
        }
        let config = config.unwrap_or_default();
        let mut out = BufWriter::new(File::create(path)?);

        if config.include_metadata
            && let Some(metadata) = &config.metadata
        {
            write_metadata_header(&mut out, metadata)?;
        }

        let d = config.delimiter;
        write!(out, "{}{}{}", config.time_header, d, config.step_header)?;
        for column in &columns {
            write!(out, "{}{}", d, column)?;
        }
        writeln!(out)?;

        Ok(Self { out, columns, config, rows: 0 })
    }

    /// One column per species of `model`, headed `name (unit)`
    pub fn for_model<M: MeshAdapter>(
        path: impl AsRef<Path>,
        model: &Model<M>,
        config: Option<CsvConfig>,
    ) -> std::result::Result<Self, CsvError> {
        let columns = model
            .definition()
            .species
            .iter()
            .map(|s| format!("{} ({})", s.name(), s.concentration_unit()))
            .collect();
        Self::create(path, columns, config)
    }

    /// Append the current species averages of `model`
    pub fn record<M: MeshAdapter>(&mut self, model: &Model<M>) -> Result<()> {
        let row = TimeSeriesRow::averages(model)?;
        self.write_row(&row)?;
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows written so far
    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl Exporter for CsvTimeSeries {
    type Error = CsvError;

    fn write_row(&mut self, row: &TimeSeriesRow) -> std::result::Result<(), CsvError> {
        if row.values.len() != self.columns.len() {
            return Err(CsvError::ColumnMismatch {
                t: row.t,
                expected: self.columns.len(),
                found: row.values.len(),
            });
        }
        if !row.t.is_finite() {
            return Err(CsvError::NonFinite { column: self.config.time_header.clone(), t: row.t });
        }
        if let Some(i) = row.values.iter().position(|v| !v.is_finite()) {
            return Err(CsvError::NonFinite { column: self.columns[i].clone(), t: row.t });
        }

        let d = self.config.delimiter;
        write!(self.out, "{}{}{}", format_number(row.t, &self.config), d, row.step)?;
        for value in &row.values {
            write!(self.out, "{}{}", d, format_number(*value, &self.config))?;
        }
        writeln!(self.out)?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> std::result::Result<(), CsvError> {
        self.out.flush()?;
        Ok(())
    }
}

// =================================================================================================
// Tests
// =================================================================================================
