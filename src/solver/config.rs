//! Solver configuration
//!
//! # Design
//!
//! A central enum, [`TimeStepping`], says what kind of time stepping is
//! wanted and carries the data specific to it. [`SolverConfiguration`] wraps
//! it with the settings shared by every run: the time window, rounding,
//! scheduled `dt` changes, the Newton settings and the build policies.
//!
//! Every configuration is checked by [`SolverConfiguration::validate`] when
//! the model is initialized, so nothing is validated twice and nothing is
//! validated late.
//!
//! # Examples
//!
//! ```rust
//! use smart_rs::solver::SolverConfiguration;
//!
//! // Fixed step of 0.05 s up to t = 5 s
//! let config = SolverConfiguration::fixed_step(5.0, 0.05);
//! assert!(config.validate().is_ok());
//!
//! // Adaptive step starting at 0.01 s, switching to 0.02 s at t = 0.2 s
//! let config = SolverConfiguration::adaptive(0.4, 0.01).with_adjust_dt(vec![(0.2, 0.02)]);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{Result, SmartError};
use crate::models::TimeEvaluation;
use serde::{Deserialize, Serialize};

// =================================================================================================
// Time stepping policy
// =================================================================================================

/// How `dt` evolves between steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeStepping {
    /// Constant `dt`; a step that needed a smaller `dt` to converge returns
    /// to the nominal value afterwards
    Fixed { dt: f64 },

    /// Newton-iteration driven `dt`
    ///
    /// After a step converging in at most `fast_newton_iterations` the next
    /// `dt` is multiplied by `increase_factor`; after one needing at least
    /// `slow_newton_iterations` it is multiplied by `decrease_factor`.
    Adaptive {
        initial_dt: f64,
        increase_factor: f64,
        decrease_factor: f64,
        min_dt: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_dt: Option<f64>,
        fast_newton_iterations: usize,
        slow_newton_iterations: usize,
    },
}

impl TimeStepping {
    /// Get name identifier
    pub fn name(&self) -> &str {
        match self {
            TimeStepping::Fixed { .. } => "Fixed",
            TimeStepping::Adaptive { .. } => "Adaptive",
        }
    }

    /// First `dt` of a run
    pub fn initial_dt(&self) -> f64 {
        match self {
            TimeStepping::Fixed { dt } => *dt,
            TimeStepping::Adaptive { initial_dt, .. } => *initial_dt,
        }
    }

    /// Validate that parameters are meaningful
    pub fn validate(&self) -> Result<()> {
        match self {
            TimeStepping::Fixed { dt } => {
                if !dt.is_finite() || *dt <= 0.0 {
                    return Err(SmartError::configuration(format!("dt must be positive, got {}", dt)));
                }
                Ok(())
            }
            TimeStepping::Adaptive {
                initial_dt,
                increase_factor,
                decrease_factor,
                min_dt,
                max_dt,
                fast_newton_iterations,
                slow_newton_iterations,
            } => {
                if !initial_dt.is_finite() || *initial_dt <= 0.0 {
                    return Err(SmartError::configuration(format!(
                        "initial dt must be positive, got {}",
                        initial_dt
                    )));
                }
                if *increase_factor < 1.0 {
                    return Err(SmartError::configuration(format!(
                        "dt increase factor must be at least 1, got {}",
                        increase_factor
                    )));
                }
                if *decrease_factor <= 0.0 || *decrease_factor > 1.0 {
                    return Err(SmartError::configuration(format!(
                        "dt decrease factor must lie in (0, 1], got {}",
                        decrease_factor
                    )));
                }
                if *min_dt <= 0.0 || *min_dt > *initial_dt {
                    return Err(SmartError::configuration(format!(
                        "min dt must lie in (0, initial dt], got {}",
                        min_dt
                    )));
                }
                if let Some(max) = max_dt
                    && *max < *initial_dt
                {
                    return Err(SmartError::configuration(format!(
                        "max dt {} is below the initial dt {}",
                        max, initial_dt
                    )));
                }
                if fast_newton_iterations >= slow_newton_iterations {
                    return Err(SmartError::configuration(
                        "fast Newton iteration count must be below the slow one",
                    ));
                }
                Ok(())
            }
        }
    }
}

// =================================================================================================
// Newton settings
// =================================================================================================

/// Convergence settings of the nonlinear solve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    /// Converged when the residual norm drops below this value
    pub absolute_tolerance: f64,
    /// Converged when the residual norm drops below this fraction of the initial one
    pub relative_tolerance: f64,
    /// Iterations before the step is declared divergent
    pub max_iterations: usize,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            absolute_tolerance: 1e-8,
            relative_tolerance: 1e-6,
            max_iterations: 20,
        }
    }
}

impl NewtonSettings {
    pub fn validate(&self) -> Result<()> {
        if self.absolute_tolerance < 0.0 || self.relative_tolerance < 0.0 {
            return Err(SmartError::configuration("Newton tolerances must be non-negative"));
        }
        if self.absolute_tolerance == 0.0 && self.relative_tolerance == 0.0 {
            return Err(SmartError::configuration("at least one Newton tolerance must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(SmartError::configuration("Newton needs at least one iteration"));
        }
        Ok(())
    }
}

// =================================================================================================
// Solver configuration
// =================================================================================================

fn default_time_precision() -> u32 {
    6
}

fn default_max_step_retries() -> usize {
    8
}

fn default_failure_shrink_factor() -> f64 {
    0.5
}

/// Configuration of a simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfiguration {
    /// Start time
    #[serde(default)]
    pub initial_t: f64,

    /// End time; the last step is clipped to land on it exactly
    pub final_t: f64,

    /// Time stepping policy
    pub time_stepping: TimeStepping,

    /// Committed times are rounded to this many decimals
    #[serde(default = "default_time_precision")]
    pub time_precision: u32,

    /// Scheduled `(t, dt)` changes: once `t` reaches the time, `dt` is reset
    #[serde(default)]
    pub adjust_dt: Vec<(f64, f64)>,

    /// Attempts with a reduced `dt` before a step fails
    #[serde(default = "default_max_step_retries")]
    pub max_step_retries: usize,

    /// `dt` multiplier after a failed attempt
    #[serde(default = "default_failure_shrink_factor")]
    pub failure_shrink_factor: f64,

    #[serde(default)]
    pub newton: NewtonSettings,

    /// Sampling point of non-preintegrated time-dependent parameters
    #[serde(default)]
    pub time_dependent_evaluation: TimeEvaluation,

    /// Warn instead of failing on compartments without species or mesh entities
    #[serde(default)]
    pub allow_unused_components: bool,
}

impl SolverConfiguration {
    /// Create a new configuration with a given stepping policy
    pub fn new(final_t: f64, time_stepping: TimeStepping) -> Self {
        Self {
            initial_t: 0.0,
            final_t,
            time_stepping,
            time_precision: default_time_precision(),
            adjust_dt: Vec::new(),
            max_step_retries: default_max_step_retries(),
            failure_shrink_factor: default_failure_shrink_factor(),
            newton: NewtonSettings::default(),
            time_dependent_evaluation: TimeEvaluation::default(),
            allow_unused_components: false,
        }
    }

    /// Create a fixed-step configuration
    pub fn fixed_step(final_t: f64, dt: f64) -> Self {
        Self::new(final_t, TimeStepping::Fixed { dt })
    }

    /// Create an adaptive configuration with the default growth policy
    pub fn adaptive(final_t: f64, initial_dt: f64) -> Self {
        let precision = default_time_precision();
        Self::new(
            final_t,
            TimeStepping::Adaptive {
                initial_dt,
                increase_factor: 1.05,
                decrease_factor: 0.7,
                min_dt: 10f64.powi(-(precision as i32)).min(initial_dt),
                max_dt: None,
                fast_newton_iterations: 3,
                slow_newton_iterations: 8,
            },
        )
    }

    pub fn with_initial_t(mut self, initial_t: f64) -> Self {
        self.initial_t = initial_t;
        self
    }

    pub fn with_adjust_dt(mut self, schedule: Vec<(f64, f64)>) -> Self {
        self.adjust_dt = schedule;
        self
    }

    pub fn with_time_precision(mut self, decimals: u32) -> Self {
        self.time_precision = decimals;
        self
    }

    pub fn with_newton(mut self, newton: NewtonSettings) -> Self {
        self.newton = newton;
        self
    }

    pub fn with_max_step_retries(mut self, retries: usize) -> Self {
        self.max_step_retries = retries;
        self
    }

    pub fn with_time_dependent_evaluation(mut self, mode: TimeEvaluation) -> Self {
        self.time_dependent_evaluation = mode;
        self
    }

    pub fn allowing_unused_components(mut self) -> Self {
        self.allow_unused_components = true;
        self
    }

    /// Smallest representable time increment, `10^-time_precision`
    pub fn time_resolution(&self) -> f64 {
        10f64.powi(-(self.time_precision as i32))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.time_stepping.validate()?;
        self.newton.validate()?;

        if !self.initial_t.is_finite() || !self.final_t.is_finite() {
            return Err(SmartError::configuration("initial and final times must be finite"));
        }
        if self.final_t <= self.initial_t {
            return Err(SmartError::configuration(format!(
                "final time {} must exceed initial time {}",
                self.final_t, self.initial_t
            )));
        }
        if self.time_precision > 12 {
            return Err(SmartError::configuration(format!(
                "time precision of {} decimals exceeds the supported 12",
                self.time_precision
            )));
        }

        let resolution = self.time_resolution();
        let smallest_dt = match &self.time_stepping {
            TimeStepping::Fixed { dt } => *dt,
            TimeStepping::Adaptive { min_dt, .. } => *min_dt,
        };
        if smallest_dt < resolution * (1.0 - 1e-9) {
            return Err(SmartError::configuration(format!(
                "dt {} is below the time resolution {} of {} decimals",
                smallest_dt, resolution, self.time_precision
            )));
        }

        if self.failure_shrink_factor <= 0.0 || self.failure_shrink_factor >= 1.0 {
            return Err(SmartError::configuration(format!(
                "failure shrink factor must lie in (0, 1), got {}",
                self.failure_shrink_factor
            )));
        }

        for window in self.adjust_dt.windows(2) {
            if window[1].0 <= window[0].0 {
                return Err(SmartError::configuration("adjust_dt times must be strictly increasing"));
            }
        }
        for (t, dt) in &self.adjust_dt {
            if !t.is_finite() || !dt.is_finite() || *dt < resolution * (1.0 - 1e-9) {
                return Err(SmartError::configuration(format!(
                    "invalid adjust_dt entry ({}, {})",
                    t, dt
                )));
            }
        }

        Ok(())
    }
}

// =================================================================================================
// Tests
// =================================================================================================
