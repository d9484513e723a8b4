//! Reference models shared by the integration tests

use smart_rs::models::{Compartment, ModelDefinition, Parameter, Reaction, Registry, Species};
use smart_rs::physics::{BoxMeshBuilder, ParentMesh};
use smart_rs::solver::{Model, NewtonSettings, SolverConfiguration};

/// Newton settings tight enough for conservation checks
pub fn tight_newton() -> NewtonSettings {
    NewtonSettings {
        absolute_tolerance: 1e-9,
        relative_tolerance: 1e-14,
        max_iterations: 25,
    }
}

/// Surface binding `A + X <-> B`
///
/// Cytosol (marker 1, `A` = 1 uM) inside a 1 um cube, plasma membrane on its
/// boundary (marker 10, `X` = 1000 molecule/um^2, `B` = 0), `kon` = 1/(uM s),
/// `koff` = 0.1/s.
pub fn binding_definition(config: SolverConfiguration) -> ModelDefinition {
    ModelDefinition::new(
        Registry::from_entities([
            Parameter::constant("kon", 1.0, "1/(uM*s)").unwrap(),
            Parameter::constant("koff", 0.1, "1/s").unwrap(),
        ])
        .unwrap(),
        Registry::from_entities([
            Species::new("A", 1.0, "uM", 10.0, "um^2/s", "cyto").unwrap(),
            Species::new("X", 1000.0, "molecule/um^2", 0.1, "um^2/s", "pm").unwrap(),
            Species::new("B", 0.0, "molecule/um^2", 0.1, "um^2/s", "pm").unwrap(),
        ])
        .unwrap(),
        Registry::from_entities([
            Compartment::new("cyto", 3, "um", 1).unwrap(),
            Compartment::new("pm", 2, "um", 10).unwrap(),
        ])
        .unwrap(),
        Registry::from_entities([Reaction::new("r1", ["A", "X"], ["B"])
            .unwrap()
            .with_parameter("on", "kon")
            .with_parameter("off", "koff")])
        .unwrap(),
        config,
    )
}

/// Binding model on a 3x3x3 cube
pub fn binding_model(config: SolverConfiguration) -> Model<ParentMesh> {
    let mesh = BoxMeshBuilder::new([1.0; 3], [3, 3, 3]).build().unwrap();
    Model::new(binding_definition(config), mesh)
}

/// Uniform cytosolic `A` fed by the source `j(t)` (uM/s)
pub fn volume_source_model(source: Parameter, config: SolverConfiguration) -> Model<ParentMesh> {
    let definition = ModelDefinition::new(
        Registry::from_entities([source.clone()]).unwrap(),
        Registry::from_entities([Species::new("A", 0.0, "uM", 1.0, "um^2/s", "cyto").unwrap()]).unwrap(),
        Registry::from_entities([Compartment::new("cyto", 3, "um", 1).unwrap()]).unwrap(),
        Registry::from_entities([Reaction::new("influx", Vec::<String>::new(), ["A"])
            .unwrap()
            .with_parameter("on", source.name())])
        .unwrap(),
        config,
    );
    let mesh = BoxMeshBuilder::new([1.0; 3], [2, 2, 2]).build().unwrap();
    Model::new(definition, mesh)
}
