//! Newton's method for the implicit step
//!
//! # Algorithm
//!
//! ```text
//! F(u) = 0,   J(u) = ∂F/∂u
//!
//! repeat k = 0, 1, ...
//!     solve J(u_k) δ = -F(u_k)      (dense LU)
//!     u_{k+1} = u_k + δ
//! until ‖F(u_{k+1})‖ ≤ atol  or  ‖F(u_{k+1})‖ ≤ rtol ‖F(u_0)‖
//! ```
//!
//! Norms are Euclidean. A singular Jacobian, a non-finite residual or
//! running out of iterations is reported as [`NewtonFailure`]; the caller
//! decides whether to retry with a smaller step.

use crate::solver::config::NewtonSettings;
use log::trace;
use nalgebra::{DMatrix, DVector};
use std::fmt;

/// A square nonlinear system `F(u) = 0`
pub trait NonlinearSystem {
    /// Number of unknowns
    fn dimension(&self) -> usize;

    fn residual(&self, u: &DVector<f64>) -> DVector<f64>;

    /// Jacobian `∂F/∂u` at `u`
    fn jacobian(&self, u: &DVector<f64>) -> DMatrix<f64>;
}

/// Result of a converged solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonReport {
    pub iterations: usize,
    pub residual_norm: f64,
}

/// Why a solve did not converge
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NewtonFailure {
    SingularJacobian { iteration: usize },
    NonFinite { iteration: usize },
    MaxIterations { residual_norm: f64 },
}

impl NewtonFailure {
    /// Best residual norm known at failure
    pub fn residual_norm(&self) -> f64 {
        match self {
            NewtonFailure::MaxIterations { residual_norm } => *residual_norm,
            _ => f64::INFINITY,
        }
    }
}

impl fmt::Display for NewtonFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NewtonFailure::SingularJacobian { iteration } => write!(f, "singular Jacobian at iteration {}", iteration),
            NewtonFailure::NonFinite { iteration } => write!(f, "non-finite residual at iteration {}", iteration),
            NewtonFailure::MaxIterations { residual_norm } => {
                write!(f, "no convergence, residual norm {:.3e}", residual_norm)
            }
        }
    }
}

/// Nonlinear solver interface
///
/// `u` holds the initial guess on entry and the solution on success. On
/// failure its content is unspecified.
pub trait NonlinearSolver {
    fn solve(&self, system: &dyn NonlinearSystem, u: &mut DVector<f64>) -> Result<NewtonReport, NewtonFailure>;

    fn name(&self) -> &str;
}

/// Full Newton with dense LU
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NewtonSolver {
    settings: NewtonSettings,
}

impl NewtonSolver {
    pub fn new(settings: NewtonSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &NewtonSettings {
        &self.settings
    }
}

impl NonlinearSolver for NewtonSolver {
    fn solve(&self, system: &dyn NonlinearSystem, u: &mut DVector<f64>) -> Result<NewtonReport, NewtonFailure> {
        let mut f = system.residual(u);
        let initial = f.norm();
        if !initial.is_finite() {
            return Err(NewtonFailure::NonFinite { iteration: 0 });
        }
        if initial <= self.settings.absolute_tolerance {
            return Ok(NewtonReport { iterations: 0, residual_norm: initial });
        }

        let mut norm = initial;
        for iteration in 1..=self.settings.max_iterations {
            let jacobian = system.jacobian(u);
            let delta = jacobian
                .lu()
                .solve(&(-&f))
                .ok_or(NewtonFailure::SingularJacobian { iteration })?;
            *u += &delta;

            f = system.residual(u);
            norm = f.norm();
            trace!("newton iteration {}: |F| = {:.3e}, |du| = {:.3e}", iteration, norm, delta.norm());

            if !norm.is_finite() {
                return Err(NewtonFailure::NonFinite { iteration });
            }
            if norm <= self.settings.absolute_tolerance || norm <= self.settings.relative_tolerance * initial {
                return Ok(NewtonReport { iterations: iteration, residual_norm: norm });
            }
        }
        Err(NewtonFailure::MaxIterations { residual_norm: norm })
    }

    fn name(&self) -> &str {
        "Newton (dense LU)"
    }
}
