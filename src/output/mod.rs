//! Output of simulation results
//!
//! ```text
//! output/
//! ├── mod.rs              ← This file
//! └── export/             ← Data export
//!     ├── mod.rs          ← Exporter trait, TimeSeriesRow
//!     └── csv.rs          ← CsvTimeSeries
//! ```
//!
//! Export works per committed step, so a run can be persisted while it
//! progresses through [`Model::run_until_with`](crate::solver::Model::run_until_with).

pub mod export;

pub use export::{CsvConfig, CsvError, CsvMetadata, CsvTimeSeries, Exporter, TimeSeriesRow};
