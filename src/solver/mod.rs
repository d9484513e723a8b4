//! Numerical solution of the coupled system
//!
//! # Layers
//!
//! 1. **Configuration** ([`SolverConfiguration`]): time window, step policy,
//!    Newton tolerances, retry budget. Serializable with the model definition.
//! 2. **Nonlinear solve** ([`NonlinearSolver`] over a [`NonlinearSystem`]):
//!    [`NewtonSolver`] with a dense LU by default.
//! 3. **Step control** ([`TimeStepper`]): clipping to `final_t`, rounding,
//!    scheduled `dt` changes, shrink on failure, adaptive growth.
//! 4. **Orchestration** ([`Model`]): lifecycle, backward Euler steps, read
//!    access to fields, averages and amounts.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use smart_rs::solver::{Model, SolverConfiguration};
//!
//! let config = SolverConfiguration::fixed_step(5.0, 0.05);
//! let mut model = Model::new(definition, mesh);
//! model.initialize()?;
//! model.run_until_with(5.0, |model, report| {
//!     println!("t = {}: mean B = {}", report.t, model.average("B")?);
//!     Ok(())
//! })?;
//! ```
//!
//! # Error Handling
//!
//! A step that does not converge is retried with a smaller `dt`; once the
//! retry budget or the minimum `dt` is exhausted the step fails with
//! [`SmartError::Convergence`](crate::error::SmartError::Convergence) and the
//! model enters its absorbing error state.

// =================================================================================================
// Module Declarations
// =================================================================================================

mod config;
pub mod model;
pub mod newton;
pub mod stepping;

// =================================================================================================
// Parallel Execution Threshold
// =================================================================================================
//
// Deciding *when* to hand assembly work off to Rayon is a numerical-execution
// concern, so it lives here rather than in physics/assembly.rs.
//
// The threshold is stored in an AtomicUsize so that it can be changed at
// runtime (benchmarks and tests) without a mutex on every residual
// evaluation. Relaxed ordering is sufficient: the value is a performance
// hint, not a synchronisation point.
// =================================================================================================

use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of reaction sites above which a reaction's flux terms are
/// evaluated in parallel.
///
/// Below roughly a thousand sites the thread-pool dispatch costs more than
/// evaluating a handful of rate laws per site.
const DEFAULT_PARALLEL_THRESHOLD: usize = 999;

/// Runtime-configurable parallel-execution threshold.
///
/// Read via [`parallel_threshold()`], written via [`set_parallel_threshold()`].
static PARALLEL_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_PARALLEL_THRESHOLD);

/// Return the current parallel-execution threshold.
///
/// The residual and Jacobian assembly evaluates the sites of a reaction
/// sequentially when there are at most this many, and with Rayon when there
/// are more (only with the `parallel` feature). The result is identical
/// either way.
///
/// # Example
///
/// ```rust
/// use smart_rs::solver::parallel_threshold;
///
/// assert!(parallel_threshold() > 0);
/// ```
pub fn parallel_threshold() -> usize {
    PARALLEL_THRESHOLD.load(Ordering::Relaxed)
}

/// Set the parallel-execution threshold to a new value.
///
/// # Panics
///
/// Panics when `threshold == 0`.
///
/// # Example
///
/// ```rust
/// use smart_rs::solver::{parallel_threshold, set_parallel_threshold};
///
/// let previous = parallel_threshold();
/// set_parallel_threshold(2048);
/// assert_eq!(parallel_threshold(), 2048);
///
/// // Restore so other tests are not affected.
/// set_parallel_threshold(previous);
/// ```
pub fn set_parallel_threshold(threshold: usize) {
    assert!(threshold > 0, "parallel threshold must be at least 1");
    PARALLEL_THRESHOLD.store(threshold, Ordering::Relaxed);
}

/// RAII guard that saves the current threshold on construction and restores
/// it on drop.
///
/// Only compiled in test builds.  Prevents one test from leaking a modified
/// threshold value into the next.
///
/// ```rust,ignore
/// let _guard = crate::solver::ThresholdGuard::save(50);
/// // threshold is now 50 …
/// // … and is automatically restored when _guard is dropped.
/// ```
#[cfg(test)]
pub(crate) struct ThresholdGuard {
    previous: usize,
}

#[cfg(test)]
impl ThresholdGuard {
    /// Set the threshold to `new_value` and return a guard that will
    /// restore the previous value on drop.
    pub(crate) fn save(new_value: usize) -> Self {
        let previous = parallel_threshold();
        set_parallel_threshold(new_value);
        Self { previous }
    }
}

#[cfg(test)]
impl Drop for ThresholdGuard {
    fn drop(&mut self) {
        PARALLEL_THRESHOLD.store(self.previous, Ordering::Relaxed);
    }
}

// =================================================================================================
// Public Re-exports
// =================================================================================================

pub use config::{NewtonSettings, SolverConfiguration, TimeStepping};
pub use model::{Model, ModelState, StepReport};
pub use newton::{NewtonFailure, NewtonReport, NewtonSolver, NonlinearSolver, NonlinearSystem};
pub use stepping::TimeStepper;

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold_value() {
        assert_eq!(DEFAULT_PARALLEL_THRESHOLD, 999);
    }

    #[test]
    fn test_get_and_set_threshold() {
        let _guard = ThresholdGuard::save(500);
        assert_eq!(parallel_threshold(), 500);
    }

    #[test]
    #[should_panic(expected = "parallel threshold must be at least 1")]
    fn test_zero_threshold_panics() {
        set_parallel_threshold(0);
    }

    #[test]
    fn test_threshold_guard_restores_previous_value() {
        let before = parallel_threshold();
        {
            let _guard = ThresholdGuard::save(42);
            assert_eq!(parallel_threshold(), 42);
        }
        // Guard dropped, value must be back to what it was before.
        assert_eq!(parallel_threshold(), before);
    }

    #[test]
    fn test_threshold_is_visible_across_threads() {
        use std::thread;

        let _guard = ThresholdGuard::save(1234);

        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| parallel_threshold()))
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1234);
        }
    }
}

