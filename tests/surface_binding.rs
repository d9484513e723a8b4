//! Integration tests: volume-surface binding
//!
//! `A` (cytosol) binds `X` (membrane) into `B` (membrane). These tests run the
//! whole pipeline: resolver, assembly, Newton and step control.

use approx::assert_relative_eq;
use smart_rs::output::{CsvConfig, CsvMetadata, CsvTimeSeries, Exporter};
use smart_rs::physics::CouplingKind;
use smart_rs::solver::{ModelState, SolverConfiguration};

mod common;
use common::{assert_monotone_times, binding_model, tight_newton};

// =================================================================================================
// Scenario A
// =================================================================================================

#[test]
fn test_bound_species_stays_between_bounds() {
    let mut model = binding_model(SolverConfiguration::fixed_step(5.0, 0.05));
    model.initialize().unwrap();

    let times = model.run_until(5.0).unwrap();
    assert_eq!(times.len(), 100);
    assert_eq!(model.state(), ModelState::Finished);
    assert_eq!(model.t(), 5.0);

    let mean_b = model.average("B").unwrap();
    assert!(mean_b > 0.0, "mean B = {}", mean_b);
    assert!(mean_b < 1000.0, "mean B = {}", mean_b);

    // every facet value is admissible too
    for b in model.field("B").unwrap() {
        assert!(*b >= 0.0 && *b < 1000.0);
    }
    for a in model.field("A").unwrap() {
        assert!(*a > 0.0 && *a < 1.0);
    }
}

#[test]
fn test_resolved_coupling() {
    let mut model = binding_model(SolverConfiguration::fixed_step(5.0, 0.05));
    model.initialize().unwrap();

    let plan = model.plan().unwrap();
    assert_eq!(plan.reactions.len(), 1);
    assert_eq!(plan.reactions[0].kind, CouplingKind::CrossDimension);
    assert_eq!(plan.compartments[plan.reactions[0].domain], "pm");
    assert!(plan.are_adjacent("pm", "cyto"));

    assert_eq!(model.submesh("cyto").unwrap().len(), 27);
    assert_eq!(model.submesh("pm").unwrap().len(), 54);
    assert_relative_eq!(model.submesh("pm").unwrap().total_measure(), 6.0, max_relative = 1e-12);
}

#[test]
fn test_surface_species_conserved() {
    let config = SolverConfiguration::fixed_step(2.0, 0.05).with_newton(tight_newton());
    let mut model = binding_model(config);
    model.initialize().unwrap();

    let before = model.total_amount("X").unwrap() + model.total_amount("B").unwrap();
    model.run_until(2.0).unwrap();
    let after = model.total_amount("X").unwrap() + model.total_amount("B").unwrap();

    assert_relative_eq!(after, before, max_relative = 1e-9);
    assert!(model.total_amount("B").unwrap() > 0.0);
}

#[test]
fn test_flux_conserves_moles_across_dimensions() {
    let config = SolverConfiguration::fixed_step(2.0, 0.05).with_newton(tight_newton());
    let mut model = binding_model(config);
    model.initialize().unwrap();

    let before = model.total_amount("A").unwrap() + model.total_amount("B").unwrap();
    let mut lost_a = 0.0;
    model
        .run_until_with(2.0, |model, _| {
            let now = model.total_amount("A").unwrap() + model.total_amount("B").unwrap();
            assert_relative_eq!(now, before, max_relative = 1e-7);
            lost_a = before - model.total_amount("A").unwrap();
            Ok(())
        })
        .unwrap();

    assert!(lost_a > 0.0);
}

// =================================================================================================
// Time stepping
// =================================================================================================

#[test]
fn test_last_step_lands_on_final_time() {
    let mut model = binding_model(SolverConfiguration::fixed_step(1.0, 0.3));
    model.initialize().unwrap();

    let times = model.run_until(1.0).unwrap();
    assert_eq!(times, vec![0.3, 0.6, 0.9, 1.0]);
    assert_monotone_times(&times, 1.0);
    assert!(model.step().is_err());
}

#[test]
fn test_adaptive_stepping_reaches_final_time() {
    let mut model = binding_model(SolverConfiguration::adaptive(1.0, 0.01));
    model.initialize().unwrap();

    let times = model.run_until(1.0).unwrap();
    assert_monotone_times(&times, 1.0);
    assert_eq!(model.state(), ModelState::Finished);
}

#[test]
fn test_run_in_segments() {
    let mut model = binding_model(SolverConfiguration::fixed_step(1.0, 0.1));
    model.initialize().unwrap();

    let first = model.run_until(0.5).unwrap();
    assert_eq!(first.len(), 5);
    assert_eq!(model.state(), ModelState::Stepping);

    let second = model.run_until(1.0).unwrap();
    assert_eq!(second.len(), 5);
    assert_eq!(model.step_count(), 10);

    let all: Vec<f64> = first.into_iter().chain(second).collect();
    assert_monotone_times(&all, 1.0);
}

// =================================================================================================
// Export
// =================================================================================================

#[test]
fn test_csv_rows_per_step() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut model = binding_model(SolverConfiguration::fixed_step(0.5, 0.1));
    model.initialize().unwrap();

    let config = CsvConfig::default().with_metadata(CsvMetadata::from_model(&model));
    let mut csv = CsvTimeSeries::for_model(file.path(), &model, Some(config)).unwrap();
    csv.record(&model).unwrap();
    model.run_until_with(0.5, |model, _| csv.record(model)).unwrap();
    csv.finish().unwrap();
    assert_eq!(csv.rows(), 6);

    let content = std::fs::read_to_string(file.path()).unwrap();
    assert!(content.contains("# Model: cyto+pm"));
    let data: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(data[0], "Time (s),Step,A (uM),X (molecule/um^2),B (molecule/um^2)");
    assert_eq!(data.len(), 7);
    assert!(data[1].starts_with("0.000000,0,1.000000,1000.000000,0.000000"));
    assert!(data[6].starts_with("0.500000,5,"));
}
