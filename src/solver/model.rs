//! Model lifecycle and time stepping
//!
//! A [`Model`] owns a [`ModelDefinition`], the mesh it is solved on and,
//! once initialized, the coupling plan and the field values.
//!
//! # Lifecycle
//!
//! ```text
//! Unbuilt ──initialize()──▶ Initialized ──step()──▶ Stepping ──step()…──▶ Finished
//!                                  │                    │
//!                                  └──────────┬─────────┘
//!                                             ▼
//!                                  Error (convergence failure)
//! ```
//!
//! `initialize()` either succeeds completely or leaves the model `Unbuilt`.
//! Stepping in `Unbuilt`, `Finished` or `Error` is a configuration error.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut model = Model::new(definition, mesh);
//! model.initialize()?;
//! let times = model.run_until(5.0)?;
//! println!("mean B = {}", model.average("B")?);
//! ```

use crate::error::{Result, SmartError};
use crate::models::ModelDefinition;
use crate::physics::assembly::{FieldLayout, StepSystem, species_amount, species_average};
use crate::physics::coupling::{CouplingPlan, resolve};
use crate::physics::mesh::{MeshAdapter, SubMesh};
use crate::solver::newton::{NewtonSolver, NonlinearSolver};
use crate::solver::stepping::TimeStepper;
use log::{debug, info, warn};
use nalgebra::DVector;
use std::fmt;

/// Lifecycle state of a [`Model`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unbuilt,
    Initialized,
    Stepping,
    Finished,
    /// A step failed to converge; absorbing
    Error,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelState::Unbuilt => "unbuilt",
            ModelState::Initialized => "initialized",
            ModelState::Stepping => "stepping",
            ModelState::Finished => "finished",
            ModelState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Summary of one committed step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Time after the step
    pub t: f64,
    pub dt: f64,
    /// Number of committed steps so far
    pub step: usize,
    pub newton_iterations: usize,
    pub residual_norm: f64,
    /// Solve attempts, 1 when no retry was needed
    pub attempts: usize,
}

/// Everything created by `initialize()`
struct Discretization {
    plan: CouplingPlan,
    layout: FieldLayout,
    u: DVector<f64>,
    stepper: TimeStepper,
}

/// Reaction-diffusion model on a mesh
pub struct Model<M: MeshAdapter> {
    definition: ModelDefinition,
    mesh: M,
    solver: Box<dyn NonlinearSolver + Send + Sync>,
    state: ModelState,
    discretization: Option<Discretization>,
    t: f64,
    dt: f64,
    steps: usize,
}

impl<M: MeshAdapter> Model<M> {
    /// Unbuilt model using Newton with the configured settings
    pub fn new(definition: ModelDefinition, mesh: M) -> Self {
        let solver = Box::new(NewtonSolver::new(definition.config.newton));
        let t = definition.config.initial_t;
        let dt = definition.config.time_stepping.initial_dt();
        Self {
            definition,
            mesh,
            solver,
            state: ModelState::Unbuilt,
            discretization: None,
            t,
            dt,
            steps: 0,
        }
    }

    /// Replace the nonlinear solver
    pub fn with_solver(mut self, solver: impl NonlinearSolver + Send + Sync + 'static) -> Self {
        self.solver = Box::new(solver);
        self
    }

    /// Validate, resolve the coupling and set the initial fields
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != ModelState::Unbuilt {
            return Err(SmartError::configuration(format!(
                "initialize() called on a model that is already {}",
                self.state
            )));
        }

        let config = &self.definition.config;
        config.validate()?;
        let plan = resolve(&self.definition, &self.mesh)?;
        let layout = FieldLayout::new(&plan);
        if layout.is_empty() {
            return Err(SmartError::configuration("model has no unknowns"));
        }
        let u = layout.initial_state(&plan);
        let stepper = TimeStepper::new(config);

        info!(
            "model initialized: {} unknowns, t in [{}, {}], {} stepping with dt = {}, nonlinear solver: {}",
            layout.len(),
            config.initial_t,
            config.final_t,
            config.time_stepping.name(),
            stepper.nominal_dt(),
            self.solver.name()
        );

        self.t = config.initial_t;
        self.dt = stepper.nominal_dt();
        self.steps = 0;
        self.discretization = Some(Discretization { plan, layout, u, stepper });
        self.state = ModelState::Initialized;
        Ok(())
    }

    /// Advance by one backward Euler step
    ///
    /// A step whose Newton solve fails is retried with a smaller `dt` up to
    /// `max_step_retries` times; after that the model enters `Error`.
    pub fn step(&mut self) -> Result<StepReport> {
        match self.state {
            ModelState::Initialized | ModelState::Stepping => {}
            ModelState::Unbuilt => {
                return Err(SmartError::configuration("step() called before initialize()"));
            }
            ModelState::Finished => {
                return Err(SmartError::configuration(format!(
                    "final time {} already reached",
                    self.definition.config.final_t
                )));
            }
            ModelState::Error => {
                return Err(SmartError::configuration("model is in the error state"));
            }
        }

        let config = &self.definition.config;
        let disc = self
            .discretization
            .as_mut()
            .ok_or_else(|| SmartError::configuration("model has no discretization"))?;

        let t = self.t;
        let mut dt = disc.stepper.plan(t);
        let mut residual = f64::INFINITY;
        let max_attempts = config.max_step_retries + 1;

        for attempt in 1..=max_attempts {
            let t_end = disc.stepper.round(t + dt);
            let parameters: Vec<f64> = self
                .definition
                .parameters
                .iter()
                .map(|p| p.value_over(t, t_end, config.time_dependent_evaluation))
                .collect();

            let t_eval = config.time_dependent_evaluation.time_in(t, t_end);
            let system = StepSystem::new(&disc.plan, &disc.layout, &disc.u, &parameters, t_eval, dt);
            let mut candidate = disc.u.clone();

            match self.solver.solve(&system, &mut candidate) {
                Ok(newton) => {
                    disc.u = candidate;
                    disc.stepper.accept(newton.iterations);
                    self.t = t_end;
                    self.dt = dt;
                    self.steps += 1;
                    self.state = if disc.stepper.is_finished(t_end) {
                        ModelState::Finished
                    } else {
                        ModelState::Stepping
                    };

                    debug!(
                        "step {}: t = {}, dt = {}, {} Newton iteration(s), |F| = {:.3e}",
                        self.steps, t_end, dt, newton.iterations, newton.residual_norm
                    );
                    return Ok(StepReport {
                        t: t_end,
                        dt,
                        step: self.steps,
                        newton_iterations: newton.iterations,
                        residual_norm: newton.residual_norm,
                        attempts: attempt,
                    });
                }
                Err(failure) => {
                    residual = failure.residual_norm();
                    match disc.stepper.shrink(t, dt) {
                        Some(smaller) if attempt < max_attempts => {
                            warn!("step from t = {} with dt = {} failed ({}); retrying with dt = {}", t, dt, failure, smaller);
                            dt = smaller;
                        }
                        _ => {
                            warn!("step from t = {} with dt = {} failed ({}); giving up", t, dt, failure);
                            self.state = ModelState::Error;
                            return Err(SmartError::Convergence { time: t, dt, residual, attempts: attempt });
                        }
                    }
                }
            }
        }

        self.state = ModelState::Error;
        Err(SmartError::Convergence { time: t, dt, residual, attempts: max_attempts })
    }

    /// Step until `t` reaches `target`; returns the committed times
    ///
    /// The last step may end past `target` unless `target` lies on the step
    /// grid; it never ends past `final_t`.
    pub fn run_until(&mut self, target: f64) -> Result<Vec<f64>> {
        self.run_until_with(target, |_, _| Ok(()))
    }

    /// [`run_until`](Self::run_until) calling `observer` after every committed step
    pub fn run_until_with<F>(&mut self, target: f64, mut observer: F) -> Result<Vec<f64>>
    where
        F: FnMut(&Self, &StepReport) -> Result<()>,
    {
        let config = &self.definition.config;
        let half = 0.5 * config.time_resolution();
        if target > config.final_t + half {
            return Err(SmartError::configuration(format!(
                "target time {} lies beyond the final time {}",
                target, config.final_t
            )));
        }

        let mut times = Vec::new();
        while self.t < target - half {
            let report = self.step()?;
            times.push(report.t);
            observer(self, &report)?;
            if self.state == ModelState::Finished {
                break;
            }
        }
        Ok(times)
    }

    // ============================================================================================
    // Read access
    // ============================================================================================

    pub fn state(&self) -> ModelState {
        self.state
    }

    /// Current time
    pub fn t(&self) -> f64 {
        self.t
    }

    /// Last committed `dt` (the initial `dt` before the first step)
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn step_count(&self) -> usize {
        self.steps
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    pub fn solver_name(&self) -> &str {
        self.solver.name()
    }

    fn discretization(&self) -> Result<&Discretization> {
        self.discretization
            .as_ref()
            .ok_or_else(|| SmartError::configuration("model is not initialized"))
    }

    /// Coupling plan, once initialized
    pub fn plan(&self) -> Option<&CouplingPlan> {
        self.discretization.as_ref().map(|d| &d.plan)
    }

    /// Unknown vector of every species, once initialized
    pub fn solution(&self) -> Option<&DVector<f64>> {
        self.discretization.as_ref().map(|d| &d.u)
    }

    fn species_index(&self, species: &str) -> Result<usize> {
        self.discretization()?
            .plan
            .species_index(species)
            .ok_or_else(|| SmartError::NotFound { kind: "species", name: species.to_string() })
    }

    /// Values of a species, one per entity of its compartment's sub-mesh
    pub fn field(&self, species: &str) -> Result<&[f64]> {
        let s = self.species_index(species)?;
        let disc = self.discretization()?;
        Ok(&disc.u.as_slice()[disc.layout.range(s)])
    }

    /// Measure-weighted mean concentration of a species
    pub fn average(&self, species: &str) -> Result<f64> {
        let s = self.species_index(species)?;
        let disc = self.discretization()?;
        Ok(species_average(&disc.plan, &disc.layout, &disc.u, s))
    }

    /// Amount of a species in mol
    pub fn total_amount(&self, species: &str) -> Result<f64> {
        let s = self.species_index(species)?;
        let disc = self.discretization()?;
        Ok(species_amount(&disc.plan, &disc.layout, &disc.u, s))
    }

    /// Sub-mesh of a compartment
    pub fn submesh(&self, compartment: &str) -> Result<&SubMesh> {
        self.discretization()?
            .plan
            .submesh(compartment)
            .ok_or_else(|| SmartError::NotFound { kind: "compartment", name: compartment.to_string() })
    }
}

impl<M: MeshAdapter> fmt::Debug for Model<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("state", &self.state)
            .field("t", &self.t)
            .field("dt", &self.dt)
            .field("steps", &self.steps)
            .field("solver", &self.solver.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Compartment, Parameter, Reaction, Registry, Species};
    use crate::physics::mesh::{BoxMeshBuilder, ParentMesh};
    use crate::solver::SolverConfiguration;
    use crate::solver::newton::{NewtonFailure, NewtonReport, NonlinearSystem};
    use approx::assert_relative_eq;

    fn decay_model(config: SolverConfiguration) -> Model<ParentMesh> {
        let definition = ModelDefinition::new(
            Registry::from_entities([Parameter::constant("k", 0.5, "1/s").unwrap()]).unwrap(),
            Registry::from_entities([Species::new("A", 2.0, "uM", 1.0, "um^2/s", "cyto").unwrap()]).unwrap(),
            Registry::from_entities([Compartment::new("cyto", 3, "um", 1).unwrap()]).unwrap(),
            Registry::from_entities([Reaction::new("decay", ["A"], Vec::<String>::new())
                .unwrap()
                .with_parameter("on", "k")])
            .unwrap(),
            config,
        );
        let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build().unwrap();
        Model::new(definition, mesh)
    }

    #[test]
    fn test_lifecycle() {
        let mut model = decay_model(SolverConfiguration::fixed_step(0.2, 0.1));
        assert_eq!(model.state(), ModelState::Unbuilt);
        assert!(matches!(model.step(), Err(SmartError::Configuration(_))));
        assert!(model.field("A").is_err());

        model.initialize().unwrap();
        assert_eq!(model.state(), ModelState::Initialized);
        assert!(matches!(model.initialize(), Err(SmartError::Configuration(_))));

        model.step().unwrap();
        assert_eq!(model.state(), ModelState::Stepping);
        model.step().unwrap();
        assert_eq!(model.state(), ModelState::Finished);
        assert_eq!(model.t(), 0.2);
        assert!(matches!(model.step(), Err(SmartError::Configuration(_))));
    }

    #[test]
    fn test_failed_initialize_leaves_model_unbuilt() {
        let mut model = decay_model(SolverConfiguration::fixed_step(0.2, 0.5).with_initial_t(1.0));
        assert!(model.initialize().is_err());
        assert_eq!(model.state(), ModelState::Unbuilt);
        assert!(model.plan().is_none());
    }

    #[test]
    fn test_uniform_decay_matches_backward_euler() {
        let mut model = decay_model(SolverConfiguration::fixed_step(1.0, 0.1));
        model.initialize().unwrap();
        let times = model.run_until(1.0).unwrap();
        assert_eq!(times.len(), 10);
        // uniform field: diffusion is inactive, each step divides by (1 + k dt)
        let expected = 2.0 / 1.05f64.powi(10);
        assert_relative_eq!(model.average("A").unwrap(), expected, max_relative = 1e-6);
        for value in model.field("A").unwrap() {
            assert_relative_eq!(*value, expected, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_unknown_species() {
        let mut model = decay_model(SolverConfiguration::fixed_step(1.0, 0.1));
        model.initialize().unwrap();
        assert!(matches!(model.average("Z"), Err(SmartError::NotFound { kind: "species", .. })));
        assert!(model.submesh("cyto").is_ok());
    }

    #[test]
    fn test_target_beyond_final_time() {
        let mut model = decay_model(SolverConfiguration::fixed_step(1.0, 0.1));
        model.initialize().unwrap();
        assert!(model.run_until(2.0).is_err());
    }

    /// Fails until the step is small enough
    struct Picky(NewtonSolver);

    impl NonlinearSolver for Picky {
        fn solve(&self, system: &dyn NonlinearSystem, u: &mut DVector<f64>) -> std::result::Result<NewtonReport, NewtonFailure> {
            // m/dt dominates the first diagonal entry; diffusion and decay add 1.5625
            if system.jacobian(u)[(0, 0)] < 3.5 {
                return Err(NewtonFailure::MaxIterations { residual_norm: 1.0 });
            }
            self.0.solve(system, u)
        }

        fn name(&self) -> &str {
            "picky"
        }
    }

    #[test]
    fn test_retry_with_smaller_step() {
        // cell measure 0.125: 0.2 and 0.1 are rejected, 0.05 passes
        let mut model =
            decay_model(SolverConfiguration::fixed_step(1.0, 0.2)).with_solver(Picky(NewtonSolver::default()));
        model.initialize().unwrap();
        let report = model.step().unwrap();
        assert_eq!(report.attempts, 3);
        assert_relative_eq!(report.dt, 0.05, epsilon = 1e-12);
        assert_relative_eq!(model.t(), 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let mut model = decay_model(SolverConfiguration::fixed_step(1.0, 0.2).with_max_step_retries(1))
            .with_solver(Picky(NewtonSolver::default()));
        model.initialize().unwrap();
        let err = model.step().unwrap_err();
        assert!(matches!(err, SmartError::Convergence { attempts: 2, .. }));
        assert_eq!(model.state(), ModelState::Error);
        assert!(matches!(model.step(), Err(SmartError::Configuration(_))));
    }
}
