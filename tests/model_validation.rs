//! Integration tests: build-time validation and lifecycle
//!
//! Every inconsistency between declarations, units and mesh must be reported
//! by `initialize()`, before any field exists.

use approx::assert_relative_eq;
use smart_rs::error::SmartError;
use smart_rs::models::{Compartment, ModelDefinition, Parameter, Reaction, Registry, Species};
use smart_rs::physics::BoxMeshBuilder;
use smart_rs::solver::{Model, ModelState, SolverConfiguration};

mod common;
use common::{binding_definition, binding_model, tight_newton};

fn assert_configuration_error<T: std::fmt::Debug>(result: Result<T, SmartError>, fragment: &str) {
    match result {
        Err(SmartError::Configuration(message)) => {
            assert!(message.contains(fragment), "unexpected message: {}", message)
        }
        other => panic!("expected a configuration error, got {:?}", other),
    }
}

// =================================================================================================
// Scenario B: adjacency
// =================================================================================================

#[test]
fn test_declared_nonadjacency_contradicts_reaction() {
    let mut definition = binding_definition(SolverConfiguration::fixed_step(1.0, 0.1));
    definition.compartments = Registry::from_entities([
        Compartment::new("cyto", 3, "um", 1).unwrap(),
        Compartment::new("pm", 2, "um", 10).unwrap().with_nonadjacent(["cyto"]),
    ])
    .unwrap();

    let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build().unwrap();
    let mut model = Model::new(definition, mesh);
    assert_configuration_error(model.initialize(), "non-adjacent");
    assert_eq!(model.state(), ModelState::Unbuilt);
}

#[test]
fn test_surface_not_touching_volume() {
    // cytosol is the inner cube; the outer boundary (marker 10) only touches marker-1 cells
    let mut definition = binding_definition(SolverConfiguration::fixed_step(1.0, 0.1));
    definition.compartments = Registry::from_entities([
        Compartment::new("cyto", 3, "um", 2).unwrap(),
        Compartment::new("pm", 2, "um", 10).unwrap(),
        Compartment::new("extracellular", 3, "um", 1).unwrap(),
    ])
    .unwrap();
    definition
        .species
        .add([Species::new("E", 1.0, "uM", 1.0, "um^2/s", "extracellular").unwrap()])
        .unwrap();

    let mesh = BoxMeshBuilder::cube_in_cube(4, 0.25, 0.75).build().unwrap();
    let mut model = Model::new(definition, mesh);
    assert_configuration_error(model.initialize(), "no facet");
}

// =================================================================================================
// Scenario C: domain inference
// =================================================================================================

fn three_compartment_definition(reaction: Reaction) -> ModelDefinition {
    ModelDefinition::new(
        Registry::from_entities([Parameter::constant("k", 1.0, "1/(uM*s)").unwrap()]).unwrap(),
        Registry::from_entities([
            Species::new("Ca", 0.1, "uM", 10.0, "um^2/s", "cyto").unwrap(),
            Species::new("CaER", 100.0, "uM", 10.0, "um^2/s", "er").unwrap(),
            Species::new("R", 10.0, "molecule/um^2", 0.0, "um^2/s", "erm").unwrap(),
        ])
        .unwrap(),
        Registry::from_entities([
            Compartment::new("cyto", 3, "um", 1).unwrap(),
            Compartment::new("er", 3, "um", 2).unwrap(),
            Compartment::new("erm", 2, "um", 12).unwrap(),
        ])
        .unwrap(),
        Registry::from_entities([reaction]).unwrap(),
        SolverConfiguration::fixed_step(0.2, 0.1),
    )
}

fn release() -> Reaction {
    Reaction::new("release", ["CaER", "R"], ["Ca", "R"])
        .unwrap()
        .with_parameter("on", "k")
}

#[test]
fn test_three_compartments_need_restriction() {
    let mesh = BoxMeshBuilder::cube_in_cube(4, 0.25, 0.75).build().unwrap();
    let mut model = Model::new(three_compartment_definition(release()), mesh);
    assert_configuration_error(model.initialize(), "ambiguous");
}

#[test]
fn test_restricted_three_compartment_release_runs() {
    let mesh = BoxMeshBuilder::cube_in_cube(4, 0.25, 0.75).build().unwrap();
    let mut model = Model::new(three_compartment_definition(release().restricted_to("erm")), mesh);
    model.initialize().unwrap();

    let before = model.average("Ca").unwrap();
    model.run_until(0.2).unwrap();
    assert!(model.average("Ca").unwrap() > before);
    assert!(model.average("CaER").unwrap() < 100.0);
    // R is a catalyst
    assert!((model.average("R").unwrap() - 10.0).abs() < 1e-9);
}

// =================================================================================================
// Units and references
// =================================================================================================

#[test]
fn test_rate_law_with_wrong_dimension() {
    let mut definition = binding_definition(SolverConfiguration::fixed_step(1.0, 0.1));
    // kon * A alone is a volume rate, but the reaction lives on the membrane
    definition.reactions = Registry::from_entities([Reaction::new("r1", ["A", "X"], ["B"])
        .unwrap()
        .with_parameter("on", "kon")
        .with_rate_law("on*A")
        .unwrap()])
    .unwrap();

    let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build().unwrap();
    let mut model = Model::new(definition, mesh);
    assert!(matches!(model.initialize(), Err(SmartError::UnitMismatch { .. })));
}

#[test]
fn test_unknown_parameter_reference() {
    let mut definition = binding_definition(SolverConfiguration::fixed_step(1.0, 0.1));
    definition.reactions = Registry::from_entities([Reaction::new("r1", ["A", "X"], ["B"])
        .unwrap()
        .with_parameter("on", "k_missing")])
    .unwrap();

    let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build().unwrap();
    let mut model = Model::new(definition, mesh);
    assert_configuration_error(model.initialize(), "unknown parameter 'k_missing'");
    assert_eq!(model.state(), ModelState::Unbuilt);
}

#[test]
fn test_inconsistent_terms_in_rate_law() {
    let mut definition = binding_definition(SolverConfiguration::fixed_step(1.0, 0.1));
    // off alone is a plain rate constant, not a surface flux
    definition.reactions = Registry::from_entities([Reaction::new("r1", ["A", "X"], ["B"])
        .unwrap()
        .with_parameter("on", "kon")
        .with_parameter("off", "koff")
        .with_rate_law("on*A*X - off")
        .unwrap()])
    .unwrap();

    let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build().unwrap();
    let mut model = Model::new(definition, mesh);
    assert!(matches!(model.initialize(), Err(SmartError::UnitMismatch { .. })));
}

#[test]
fn test_rate_constants_in_other_units() {
    let config = SolverConfiguration::fixed_step(0.5, 0.1).with_newton(tight_newton());
    let mut reference = binding_model(config.clone());

    // 1000 /(mM s) is the same constant as 1 /(uM s)
    let mut definition = binding_definition(config);
    definition.parameters = Registry::from_entities([
        Parameter::constant("kon", 1000.0, "1/(mM*s)").unwrap(),
        Parameter::constant("koff", 0.1, "1/s").unwrap(),
    ])
    .unwrap();
    let mesh = BoxMeshBuilder::new([1.0; 3], [3, 3, 3]).build().unwrap();
    let mut mixed = Model::new(definition, mesh);

    reference.initialize().unwrap();
    mixed.initialize().unwrap();
    reference.run_until(0.5).unwrap();
    mixed.run_until(0.5).unwrap();

    for species in ["A", "X", "B"] {
        assert_relative_eq!(
            mixed.average(species).unwrap(),
            reference.average(species).unwrap(),
            max_relative = 1e-7
        );
    }
    assert!(mixed.average("B").unwrap() > 0.0);
}

#[test]
fn test_duplicate_names_rejected_atomically() {
    let mut species = Registry::from_entities([Species::new("A", 1.0, "uM", 1.0, "um^2/s", "cyto").unwrap()]).unwrap();
    let result = species.add([
        Species::new("C", 1.0, "uM", 1.0, "um^2/s", "cyto").unwrap(),
        Species::new("A", 2.0, "uM", 1.0, "um^2/s", "cyto").unwrap(),
    ]);
    assert!(matches!(result, Err(SmartError::DuplicateName { kind: "species", .. })));
    assert_eq!(species.len(), 1);
    assert!(!species.contains("C"));
}

#[test]
fn test_unused_compartment_policy() {
    let mut definition = binding_definition(SolverConfiguration::fixed_step(1.0, 0.1));
    definition
        .compartments
        .add([Compartment::new("nucleus", 3, "um", 5).unwrap()])
        .unwrap();

    let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build().unwrap();
    let mut strict = Model::new(definition.clone(), mesh.clone());
    assert_configuration_error(strict.initialize(), "nucleus");

    definition.config.allow_unused_components = true;
    let mut lenient = Model::new(definition, mesh);
    lenient.initialize().unwrap();
    assert_eq!(lenient.plan().unwrap().unused, vec!["nucleus".to_string()]);
}

// =================================================================================================
// Lifecycle
// =================================================================================================

#[test]
fn test_step_before_initialize() {
    let mut model = binding_model(SolverConfiguration::fixed_step(1.0, 0.1));
    assert_configuration_error(model.step(), "before initialize");
    assert_configuration_error(model.run_until(1.0), "before initialize");
    assert_eq!(model.state(), ModelState::Unbuilt);
}

#[test]
fn test_initialize_only_once() {
    let mut model = binding_model(SolverConfiguration::fixed_step(1.0, 0.1));
    model.initialize().unwrap();
    model.step().unwrap();
    assert_configuration_error(model.initialize(), "already");
    assert_eq!(model.step_count(), 1);
}

#[test]
fn test_invalid_configuration_rejected_at_initialize() {
    let mut model = binding_model(SolverConfiguration::fixed_step(1.0, -0.1));
    assert!(matches!(model.initialize(), Err(SmartError::Configuration(_))));
    assert!(model.plan().is_none());
}

// =================================================================================================
// Persistence
// =================================================================================================

#[test]
fn test_definition_json_round_trip() {
    let mut definition = binding_definition(SolverConfiguration::adaptive(5.0, 0.01).with_adjust_dt(vec![(1.0, 0.05)]));
    definition
        .parameters
        .add([Parameter::from_expression("j", "exp(-t/20) - exp(-t/5)", "uM/s", true).unwrap()])
        .unwrap();

    let file = tempfile::NamedTempFile::new().unwrap();
    definition.save(file.path()).unwrap();
    let restored = ModelDefinition::load(file.path()).unwrap();
    assert_eq!(restored, definition);

    // the restored definition builds the same model
    let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build().unwrap();
    let mut model = Model::new(restored, mesh);
    model.initialize().unwrap();
}
