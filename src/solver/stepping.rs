//! Time step control
//!
//! [`TimeStepper`] owns the nominal `dt` and decides the length of every
//! attempted step:
//!
//! - scheduled changes from `adjust_dt` apply once `t` reaches their time,
//!   and a step never jumps over a scheduled time;
//! - the last step is clipped so it lands exactly on `final_t`;
//! - step end times are rounded to `time_precision` decimals;
//! - after a failed Newton solve the attempted `dt` is multiplied by
//!   `failure_shrink_factor` (adaptive stepping also remembers the smaller `dt`);
//! - adaptive stepping grows or shrinks `dt` from the Newton iteration count.

use crate::solver::config::{SolverConfiguration, TimeStepping};

#[derive(Debug, Clone)]
pub struct TimeStepper {
    policy: TimeStepping,
    final_t: f64,
    precision: u32,
    shrink: f64,
    schedule: Vec<(f64, f64)>,
    next_scheduled: usize,
    nominal_dt: f64,
}

impl TimeStepper {
    pub fn new(config: &SolverConfiguration) -> Self {
        Self {
            policy: config.time_stepping.clone(),
            final_t: config.final_t,
            precision: config.time_precision,
            shrink: config.failure_shrink_factor,
            schedule: config.adjust_dt.clone(),
            next_scheduled: 0,
            nominal_dt: config.time_stepping.initial_dt(),
        }
    }

    /// `dt` the next step will try before clipping
    pub fn nominal_dt(&self) -> f64 {
        self.nominal_dt
    }

    pub fn round(&self, t: f64) -> f64 {
        let factor = 10f64.powi(self.precision as i32);
        (t * factor).round() / factor
    }

    fn resolution(&self) -> f64 {
        10f64.powi(-(self.precision as i32))
    }

    /// Length of the next step from `t`
    ///
    /// Applies every scheduled change that is due, then clips to the next
    /// scheduled time and to `final_t`.
    pub fn plan(&mut self, t: f64) -> f64 {
        let half = 0.5 * self.resolution();
        while let Some(&(at, dt)) = self.schedule.get(self.next_scheduled)
            && at <= t + half
        {
            self.nominal_dt = dt;
            self.next_scheduled += 1;
        }
        self.clip(t, self.nominal_dt)
    }

    fn clip(&self, t: f64, dt: f64) -> f64 {
        let half = 0.5 * self.resolution();
        let mut end = self.round(t + dt);
        if let Some(&(at, _)) = self.schedule.get(self.next_scheduled)
            && end > at + half
        {
            end = self.round(at);
        }
        if end >= self.final_t - half {
            end = self.final_t;
        }
        end - t
    }

    /// Shorter `dt` to retry a failed step from `t`
    ///
    /// `None` when the shrunk step falls below `min_dt` (adaptive) or below
    /// the time resolution.
    pub fn shrink(&mut self, t: f64, failed_dt: f64) -> Option<f64> {
        let candidate = failed_dt * self.shrink;
        if let TimeStepping::Adaptive { min_dt, .. } = self.policy {
            if candidate < min_dt * (1.0 - 1e-9) {
                return None;
            }
            self.nominal_dt = candidate;
        }
        let dt = self.clip(t, candidate);
        if dt < 0.5 * self.resolution() {
            return None;
        }
        Some(dt)
    }

    /// Record a converged step
    ///
    /// Fixed stepping restores the nominal `dt` after a shrink only through
    /// never having changed it; adaptive stepping reacts to the iteration count.
    pub fn accept(&mut self, newton_iterations: usize) {
        if let TimeStepping::Adaptive {
            increase_factor,
            decrease_factor,
            min_dt,
            max_dt,
            fast_newton_iterations,
            slow_newton_iterations,
            ..
        } = self.policy
        {
            if newton_iterations <= fast_newton_iterations {
                self.nominal_dt *= increase_factor;
            } else if newton_iterations >= slow_newton_iterations {
                self.nominal_dt *= decrease_factor;
            }
            self.nominal_dt = self.nominal_dt.max(min_dt);
            if let Some(max) = max_dt {
                self.nominal_dt = self.nominal_dt.min(max);
            }
        }
    }

    /// Whether `t` has reached the end of the run
    pub fn is_finished(&self, t: f64) -> bool {
        t >= self.final_t - 0.5 * self.resolution()
    }
}
