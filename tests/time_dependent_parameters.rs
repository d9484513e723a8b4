//! Integration tests: time-dependent parameters
//!
//! A preintegrated parameter contributes its exact mean over every step, so
//! a backward Euler step driven only by it integrates the source exactly.

use approx::assert_relative_eq;
use smart_rs::models::{Compartment, ModelDefinition, Parameter, Reaction, Registry, Species, TimeEvaluation};
use smart_rs::physics::{BoxMeshBuilder, ParentMesh};
use smart_rs::solver::{Model, SolverConfiguration};

mod common;
use common::{relative_error, simpson, tight_newton, volume_source_model};

const PULSE: &str = "exp(-t/20) - exp(-t/5)";

fn pulse(t: f64) -> f64 {
    (-t / 20.0).exp() - (-t / 5.0).exp()
}

#[test]
fn test_preintegrated_mean_matches_quadrature() {
    let parameter = Parameter::from_expression("j", PULSE, "uM/s", true).unwrap();
    assert!(parameter.is_preintegrated());

    for (t0, t1) in [(0.0, 0.5), (0.0, 5.0), (2.5, 7.5), (10.0, 30.0)] {
        let closed_form = parameter.value_over(t0, t1, TimeEvaluation::Endpoint);
        let quadrature = simpson(pulse, t0, t1, 2000) / (t1 - t0);
        assert!(
            relative_error(closed_form, quadrature) < 1e-6,
            "[{}, {}]: {} vs {}",
            t0,
            t1,
            closed_form,
            quadrature
        );
    }
}

#[test]
fn test_user_integral_agrees_with_derived_one() {
    let derived = Parameter::from_expression("j", PULSE, "uM/s", true).unwrap();
    let supplied =
        Parameter::from_expression_with_integral("j", PULSE, "-20*exp(-t/20) + 5*exp(-t/5)", "uM/s").unwrap();

    for (t0, t1) in [(0.0, 1.0), (3.0, 4.5), (12.0, 40.0)] {
        assert_relative_eq!(
            derived.value_over(t0, t1, TimeEvaluation::Endpoint),
            supplied.value_over(t0, t1, TimeEvaluation::Endpoint),
            max_relative = 1e-12
        );
    }
}

#[test]
fn test_preintegrated_source_integrates_exactly() {
    let source = Parameter::from_expression("j", PULSE, "uM/s", true).unwrap();
    let config = SolverConfiguration::fixed_step(5.0, 0.5).with_newton(tight_newton());
    let mut model = volume_source_model(source, config);
    model.initialize().unwrap();
    model.run_until(5.0).unwrap();

    // ∫0^5 pulse = 20 (1 - e^-1/4) - 5 (1 - e^-1)
    let exact = 20.0 * (1.0 - (-0.25f64).exp()) - 5.0 * (1.0 - (-1.0f64).exp());
    assert_relative_eq!(model.average("A").unwrap(), exact, max_relative = 1e-8);
}

#[test]
fn test_endpoint_evaluation_is_first_order() {
    let source = Parameter::from_expression("j", PULSE, "uM/s", false).unwrap();
    let config = SolverConfiguration::fixed_step(5.0, 0.5).with_newton(tight_newton());
    let mut model = volume_source_model(source, config);
    model.initialize().unwrap();
    model.run_until(5.0).unwrap();

    // right Riemann sum of the pulse
    let riemann: f64 = (1..=10).map(|i| 0.5 * pulse(0.5 * i as f64)).sum();
    assert_relative_eq!(model.average("A").unwrap(), riemann, max_relative = 1e-8);
}

#[test]
fn test_midpoint_evaluation() {
    let source = Parameter::from_expression("j", PULSE, "uM/s", false).unwrap();
    let config = SolverConfiguration::fixed_step(5.0, 0.5)
        .with_newton(tight_newton())
        .with_time_dependent_evaluation(TimeEvaluation::Midpoint);
    let mut model = volume_source_model(source, config);
    model.initialize().unwrap();
    model.run_until(5.0).unwrap();

    let midpoint: f64 = (0..10).map(|i| 0.5 * pulse(0.5 * i as f64 + 0.25)).sum();
    assert_relative_eq!(model.average("A").unwrap(), midpoint, max_relative = 1e-8);
}

#[test]
fn test_sampled_source() {
    // ramp to 2 uM/s over 1 s, then constant
    let source = Parameter::sampled("j", vec![0.0, 1.0, 10.0], vec![0.0, 2.0, 2.0], "uM/s", true).unwrap();
    let config = SolverConfiguration::fixed_step(2.0, 0.25).with_newton(tight_newton());
    let mut model = volume_source_model(source, config);
    model.initialize().unwrap();
    model.run_until(2.0).unwrap();

    // 1 (ramp) + 2 (plateau)
    assert_relative_eq!(model.average("A").unwrap(), 3.0, max_relative = 1e-8);
}

/// Cytosolic `A` produced at the rate `k t` written directly in the rate law
fn ramp_model(config: SolverConfiguration) -> Model<ParentMesh> {
    let definition = ModelDefinition::new(
        Registry::from_entities([Parameter::constant("k_ramp", 2.0, "uM/s^2").unwrap()]).unwrap(),
        Registry::from_entities([Species::new("A", 0.0, "uM", 1.0, "um^2/s", "cyto").unwrap()]).unwrap(),
        Registry::from_entities([Compartment::new("cyto", 3, "um", 1).unwrap()]).unwrap(),
        Registry::from_entities([Reaction::new("ramp", Vec::<String>::new(), ["A"])
            .unwrap()
            .with_parameter("k", "k_ramp")
            .with_rate_law("k*t")
            .unwrap()])
        .unwrap(),
        config,
    );
    let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build().unwrap();
    Model::new(definition, mesh)
}

#[test]
fn test_time_in_rate_law_follows_evaluation_mode() {
    // k dt^2 (1 + 2 + 3 + 4) with k = 2, dt = 0.25
    let mut endpoint = ramp_model(SolverConfiguration::fixed_step(1.0, 0.25).with_newton(tight_newton()));
    endpoint.initialize().unwrap();
    endpoint.run_until(1.0).unwrap();
    assert_relative_eq!(endpoint.average("A").unwrap(), 1.25, max_relative = 1e-8);

    // the midpoint rule is exact for a linear ramp: k T^2 / 2
    let mut midpoint = ramp_model(
        SolverConfiguration::fixed_step(1.0, 0.25)
            .with_newton(tight_newton())
            .with_time_dependent_evaluation(TimeEvaluation::Midpoint),
    );
    midpoint.initialize().unwrap();
    midpoint.run_until(1.0).unwrap();
    assert_relative_eq!(midpoint.average("A").unwrap(), 1.0, max_relative = 1e-8);
}
