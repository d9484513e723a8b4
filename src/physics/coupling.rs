//! Compartment coupling resolver
//!
//! Turns a [`ModelDefinition`] and a mesh into a [`CouplingPlan`]: the
//! sub-mesh of every compartment, the discretisation data of every species
//! and, for every reaction, the domain it lives on and where its flux goes.
//!
//! # Domain inference
//!
//! The compartments of a reaction are those of its `lhs`, `rhs` and species
//! roles. Its domain is:
//!
//! 1. the explicit restriction, when given;
//! 2. otherwise the single compartment, when there is only one (local source term);
//! 3. otherwise the lower-dimensional one of two compartments whose dimensions
//!    differ by one (flux boundary condition on the higher one);
//! 4. anything else is ambiguous and rejected.
//!
//! Every other compartment of the reaction must be exactly one dimension
//! higher than the domain and adjacent to it in the mesh: some facet tagged
//! with the surface marker has a neighbouring cell tagged with the volume
//! marker. Pairs declared non-adjacent are never searched, and a reaction
//! coupling such a pair is rejected.
//!
//! # Discrete flux exchange
//!
//! A cross-dimension reaction is evaluated on the surface facets. Volume
//! species take the value of the adjacent volume cell (the mean of both cells
//! when a facet separates two cells of the same volume), and the flux into a
//! volume species is split equally among those cells. The amount leaving a
//! volume through a facet therefore equals the amount produced on the facet.

use crate::error::{Result, SmartError};
use crate::models::{Compartment, ModelDefinition, Species};
use crate::physics::expression::{BoundExpression, Expression, ExpressionError, Slot, TIME_SYMBOL};
use crate::physics::mesh::{EntityKind, MeshAdapter, SubMesh};
use crate::physics::units::{Dimension, Unit};
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};

/// How a reaction enters the discrete system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouplingKind {
    /// Every species lives on the domain
    Local,
    /// Surface domain exchanging flux with adjacent volumes
    CrossDimension,
}

/// Discretisation data of one species
#[derive(Debug, Clone)]
pub struct SpeciesPlan {
    pub name: String,
    /// Compartment index (registry order)
    pub compartment: usize,
    pub initial_condition: f64,
    /// Diffusion coefficient in compartment length units squared per second
    pub diffusivity: f64,
    /// Size of one concentration unit times one compartment measure unit, in mol
    pub amount_scale: f64,
    /// Whether any reaction involves the species
    pub reactive: bool,
}

/// Where a reaction reads or writes a species
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// On the domain entity itself
    Domain,
    /// On the adjacent cells of the `i`-th coupled volume
    Volume(usize),
}

/// Species read by a rate law
#[derive(Debug, Clone)]
pub struct ReactionInput {
    pub species: usize,
    pub side: Side,
}

/// Species changed by a reaction
#[derive(Debug, Clone)]
pub struct FluxTarget {
    pub species: usize,
    pub side: Side,
    pub stoichiometry: f64,
    /// Converts `rate × domain measure` into `concentration × target measure`
    pub conversion: f64,
}

/// Domain entity at which a reaction is evaluated
#[derive(Debug, Clone)]
pub struct ReactionSite {
    /// Local index in the domain sub-mesh
    pub entity: usize,
    pub measure: f64,
    /// Local cell indices in each coupled volume
    pub neighbours: Vec<Vec<usize>>,
}

/// Resolved reaction
#[derive(Debug, Clone)]
pub struct ReactionPlan {
    pub name: String,
    /// Compartment index of the domain
    pub domain: usize,
    pub kind: CouplingKind,
    /// Compartment indices of the coupled volumes
    pub volumes: Vec<usize>,
    /// Rate law over roles, with every term expressed in `rate_unit`
    pub rate_law: Expression,
    /// Unit of the rate law
    pub rate_unit: Unit,
    /// Rate bound to `Slot::Species(k)` = `inputs[k]` and `Slot::Parameter(p)` = parameter `p`
    pub rate: BoundExpression,
    /// `∂rate/∂inputs[k]`
    pub derivatives: Vec<BoundExpression>,
    pub inputs: Vec<ReactionInput>,
    pub targets: Vec<FluxTarget>,
    pub sites: Vec<ReactionSite>,
}

/// Everything the assembly needs to know about the model's geometry and coupling
#[derive(Debug, Clone)]
pub struct CouplingPlan {
    /// Compartment names, registry order
    pub compartments: Vec<String>,
    /// Sub-mesh per compartment, registry order
    pub submeshes: Vec<SubMesh>,
    pub species: Vec<SpeciesPlan>,
    pub reactions: Vec<ReactionPlan>,
    /// Adjacent `(surface, volume)` compartment pairs found in the mesh
    pub adjacency: BTreeSet<(usize, usize)>,
    /// Compartments without species or without mesh entities
    pub unused: Vec<String>,
}

impl CouplingPlan {
    pub fn compartment_index(&self, name: &str) -> Option<usize> {
        self.compartments.iter().position(|c| c == name)
    }

    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.species.iter().position(|s| s.name == name)
    }

    /// Sub-mesh of a compartment by name
    pub fn submesh(&self, compartment: &str) -> Option<&SubMesh> {
        self.compartment_index(compartment).map(|i| &self.submeshes[i])
    }

    pub fn are_adjacent(&self, surface: &str, volume: &str) -> bool {
        match (self.compartment_index(surface), self.compartment_index(volume)) {
            (Some(s), Some(v)) => self.adjacency.contains(&(s, v)),
            _ => false,
        }
    }
}

// =================================================================================================
// Resolver
// =================================================================================================

/// Build the coupling plan of `definition` on `mesh`
///
/// Every check happens here, before any field exists: referential integrity,
/// marker uniqueness, units, domain inference and adjacency.
pub fn resolve(definition: &ModelDefinition, mesh: &dyn MeshAdapter) -> Result<CouplingPlan> {
    check_references(definition)?;
    check_markers(definition)?;
    check_species_units(definition)?;

    let compartments: Vec<&Compartment> = definition.compartments.iter().collect();
    let submeshes = compartments
        .iter()
        .map(|c| SubMesh::extract(mesh, c))
        .collect::<Result<Vec<_>>>()?;

    let unused = find_unused(definition, &submeshes)?;
    let adjacency = find_adjacency(mesh, &compartments, &submeshes, &unused);

    let mut species: Vec<SpeciesPlan> = definition
        .species
        .iter()
        .map(|s| species_plan(definition, s))
        .collect::<Result<Vec<_>>>()?;

    let mut reactions = Vec::with_capacity(definition.reactions.len());
    for reaction in definition.reactions.iter() {
        let plan = plan_reaction(definition, mesh, &submeshes, &adjacency, reaction)?;
        for input in &plan.inputs {
            species[input.species].reactive = true;
        }
        for target in &plan.targets {
            species[target.species].reactive = true;
        }
        reactions.push(plan);
    }

    for s in species.iter().filter(|s| !s.reactive) {
        info!("species '{}' takes part in no reaction and only diffuses", s.name);
    }

    let plan = CouplingPlan {
        compartments: compartments.iter().map(|c| c.name().to_string()).collect(),
        submeshes,
        species,
        reactions,
        adjacency,
        unused,
    };
    log_summary(&plan);
    Ok(plan)
}

/// Unresolved reference from a declaration, reported as a configuration error
fn unresolved(owner: &str, kind: &str, name: &str) -> SmartError {
    SmartError::configuration(format!("{} references unknown {} '{}'", owner, kind, name))
}

fn check_references(definition: &ModelDefinition) -> Result<()> {
    for species in definition.species.iter() {
        if !definition.compartments.contains(species.compartment()) {
            let owner = format!("species '{}'", species.name());
            return Err(unresolved(&owner, "compartment", species.compartment()));
        }
    }
    for compartment in definition.compartments.iter() {
        for other in compartment.nonadjacent_to() {
            if !definition.compartments.contains(other) {
                let owner = format!("compartment '{}'", compartment.name());
                return Err(unresolved(&owner, "compartment", other));
            }
        }
    }
    for reaction in definition.reactions.iter() {
        let owner = format!("reaction '{}'", reaction.name());
        for species in reaction.involved_species() {
            if !definition.species.contains(&species) {
                return Err(unresolved(&owner, "species", &species));
            }
        }
        for parameter in reaction.param_map().values() {
            if !definition.parameters.contains(parameter) {
                return Err(unresolved(&owner, "parameter", parameter));
            }
        }
        if let Some(domain) = reaction.explicit_restriction_to_domain()
            && !definition.compartments.contains(domain)
        {
            return Err(unresolved(&owner, "compartment", domain));
        }
    }
    Ok(())
}

fn check_markers(definition: &ModelDefinition) -> Result<()> {
    let mut seen: HashMap<(usize, i32), &str> = HashMap::new();
    for compartment in definition.compartments.iter() {
        let key = (compartment.dimensionality(), compartment.cell_marker());
        if let Some(previous) = seen.insert(key, compartment.name()) {
            return Err(SmartError::configuration(format!(
                "compartments '{}' and '{}' share marker {} in dimension {}",
                previous,
                compartment.name(),
                key.1,
                key.0
            )));
        }
    }
    Ok(())
}

fn check_species_units(definition: &ModelDefinition) -> Result<()> {
    for species in definition.species.iter() {
        let compartment = definition.compartments.get(species.compartment())?;
        if species.concentration_dimension() != compartment.dimensionality() {
            return Err(SmartError::UnitMismatch {
                context: format!(
                    "species '{}' in {}-dimensional compartment '{}'",
                    species.name(),
                    compartment.dimensionality(),
                    compartment.name()
                ),
                expected: Dimension::concentration(compartment.dimensionality()).to_string(),
                found: species.concentration_unit().dimension().to_string(),
            });
        }
    }
    Ok(())
}

fn find_unused(definition: &ModelDefinition, submeshes: &[SubMesh]) -> Result<Vec<String>> {
    let mut unused = Vec::new();
    for (compartment, submesh) in definition.compartments.iter().zip(submeshes) {
        let has_species = definition.species.iter().any(|s| s.compartment() == compartment.name());

        if submesh.is_empty() && has_species {
            return Err(SmartError::configuration(format!(
                "compartment '{}' holds species but no mesh entity carries marker {}",
                compartment.name(),
                compartment.cell_marker()
            )));
        }
        if submesh.is_empty() || !has_species {
            let reason = if submesh.is_empty() { "has no mesh entities" } else { "holds no species" };
            if !definition.config.allow_unused_components {
                return Err(SmartError::configuration(format!(
                    "compartment '{}' {} (set allow_unused_components to ignore it)",
                    compartment.name(),
                    reason
                )));
            }
            warn!("compartment '{}' {} and is ignored", compartment.name(), reason);
            unused.push(compartment.name().to_string());
        }
    }
    Ok(unused)
}

fn find_adjacency(
    mesh: &dyn MeshAdapter,
    compartments: &[&Compartment],
    submeshes: &[SubMesh],
    unused: &[String],
) -> BTreeSet<(usize, usize)> {
    let mut adjacency = BTreeSet::new();
    for (s, surface) in compartments.iter().enumerate() {
        if submeshes[s].kind() != EntityKind::Facet || unused.iter().any(|u| u == surface.name()) {
            continue;
        }
        for (v, volume) in compartments.iter().enumerate() {
            if volume.dimensionality() != surface.dimensionality() + 1 || unused.iter().any(|u| u == volume.name()) {
                continue;
            }
            if surface.is_declared_nonadjacent(volume.name()) || volume.is_declared_nonadjacent(surface.name()) {
                debug!("skipping adjacency search between '{}' and '{}'", surface.name(), volume.name());
                continue;
            }
            let touches = submeshes[s].entities().iter().any(|&facet| {
                mesh.facet_cells(facet)
                    .iter()
                    .any(|&cell| submeshes[v].local_index(cell).is_some())
            });
            if touches {
                adjacency.insert((s, v));
            }
        }
    }
    adjacency
}

fn species_plan(definition: &ModelDefinition, species: &Species) -> Result<SpeciesPlan> {
    let compartment_index = definition
        .compartments
        .index_of(species.compartment())
        .ok_or_else(|| unresolved(&format!("species '{}'", species.name()), "compartment", species.compartment()))?;
    let compartment = definition
        .compartments
        .get_index(compartment_index)
        .ok_or_else(|| unresolved(&format!("species '{}'", species.name()), "compartment", species.compartment()))?;
    let length = compartment.length_unit().scale();
    let d = compartment.dimensionality() as i32;

    Ok(SpeciesPlan {
        name: species.name().to_string(),
        compartment: compartment_index,
        initial_condition: species.initial_condition(),
        diffusivity: species.diffusion_coefficient() * species.diffusion_unit().scale() / (length * length),
        amount_scale: species.concentration_unit().scale() * length.powi(d),
        reactive: false,
    })
}

fn infer_domain(definition: &ModelDefinition, reaction_name: &str, restriction: Option<&str>, involved: &[usize]) -> Result<usize> {
    if let Some(domain) = restriction {
        return definition
            .compartments
            .index_of(domain)
            .ok_or_else(|| unresolved(&format!("reaction '{}'", reaction_name), "compartment", domain));
    }

    let dimension_of = |i: usize| definition.compartments.get_index(i).map(|c| c.dimensionality()).unwrap_or(0);
    match involved {
        [only] => Ok(*only),
        [a, b] if dimension_of(*a) + 1 == dimension_of(*b) => Ok(*a),
        [a, b] if dimension_of(*b) + 1 == dimension_of(*a) => Ok(*b),
        _ => {
            let names: Vec<&str> = involved
                .iter()
                .filter_map(|&i| definition.compartments.get_index(i).map(|c| c.name()))
                .collect();
            Err(SmartError::configuration(format!(
                "reaction '{}' spans compartments [{}]; its domain is ambiguous, set an explicit restriction",
                reaction_name,
                names.join(", ")
            )))
        }
    }
}

fn plan_reaction(
    definition: &ModelDefinition,
    mesh: &dyn MeshAdapter,
    submeshes: &[SubMesh],
    adjacency: &BTreeSet<(usize, usize)>,
    reaction: &crate::models::Reaction,
) -> Result<ReactionPlan> {
    let owner = format!("reaction '{}'", reaction.name());
    let mut involved_species: Vec<usize> = Vec::new();
    for name in reaction.involved_species() {
        let index = definition
            .species
            .index_of(&name)
            .ok_or_else(|| unresolved(&owner, "species", &name))?;
        if !involved_species.contains(&index) {
            involved_species.push(index);
        }
    }

    let compartment_of = |species: usize| -> Result<usize> {
        let s = definition
            .species
            .get_index(species)
            .ok_or_else(|| unresolved(&owner, "species", &species.to_string()))?;
        definition
            .compartments
            .index_of(s.compartment())
            .ok_or_else(|| unresolved(&owner, "compartment", s.compartment()))
    };

    let mut involved_compartments: Vec<usize> = Vec::new();
    for &s in &involved_species {
        let c = compartment_of(s)?;
        if !involved_compartments.contains(&c) {
            involved_compartments.push(c);
        }
    }

    let domain = infer_domain(
        definition,
        reaction.name(),
        reaction.explicit_restriction_to_domain(),
        &involved_compartments,
    )?;
    let domain_compartment = definition.compartments.get_index(domain).ok_or_else(|| {
        SmartError::configuration(format!("reaction '{}' has no domain", reaction.name()))
    })?;

    // coupled volumes must be one dimension up and adjacent
    let mut volumes = Vec::new();
    for &c in involved_compartments.iter().filter(|&&c| c != domain) {
        let other = definition.compartments.get_index(c).ok_or_else(|| {
            SmartError::configuration(format!("reaction '{}' references a missing compartment", reaction.name()))
        })?;
        if other.dimensionality() != domain_compartment.dimensionality() + 1 {
            return Err(SmartError::configuration(format!(
                "reaction '{}' on '{}' ({}D) involves '{}' ({}D); coupled compartments must be exactly one dimension higher",
                reaction.name(),
                domain_compartment.name(),
                domain_compartment.dimensionality(),
                other.name(),
                other.dimensionality()
            )));
        }
        if domain_compartment.is_declared_nonadjacent(other.name()) || other.is_declared_nonadjacent(domain_compartment.name()) {
            return Err(SmartError::configuration(format!(
                "reaction '{}' couples '{}' and '{}', which are declared non-adjacent",
                reaction.name(),
                domain_compartment.name(),
                other.name()
            )));
        }
        if !adjacency.contains(&(domain, c)) {
            return Err(SmartError::configuration(format!(
                "reaction '{}' couples '{}' and '{}', but no facet marked {} touches a cell marked {}",
                reaction.name(),
                domain_compartment.name(),
                other.name(),
                domain_compartment.cell_marker(),
                other.cell_marker()
            )));
        }
        volumes.push(c);
    }
    let kind = if volumes.is_empty() { CouplingKind::Local } else { CouplingKind::CrossDimension };

    let side_of = |species: usize| -> Result<Side> {
        let c = compartment_of(species)?;
        Ok(match volumes.iter().position(|&v| v == c) {
            Some(i) => Side::Volume(i),
            None => Side::Domain,
        })
    };

    // symbols: parameter roles, species roles, then bare parameter names and time
    let rate_law = reaction.rate_expression()?;
    let roles = reaction.species_roles();
    let mut inputs: Vec<ReactionInput> = Vec::new();
    let mut input_roles: Vec<String> = Vec::new();
    let mut parameter_of: HashMap<String, usize> = HashMap::new();

    for symbol in rate_law.free_variables() {
        if let Some(parameter) = reaction.param_map().get(&symbol) {
            let index = definition
                .parameters
                .index_of(parameter)
                .ok_or_else(|| unresolved(&owner, "parameter", parameter))?;
            parameter_of.insert(symbol, index);
        } else if let Some(species) = roles.get(&symbol) {
            let index = definition
                .species
                .index_of(species)
                .ok_or_else(|| unresolved(&owner, "species", species))?;
            inputs.push(ReactionInput { species: index, side: side_of(index)? });
            input_roles.push(symbol);
        } else if let Some(index) = definition.parameters.index_of(&symbol) {
            parameter_of.insert(symbol, index);
        } else if symbol != TIME_SYMBOL {
            return Err(SmartError::configuration(format!(
                "rate law '{}' of {} uses unknown symbol '{}'",
                rate_law.source(),
                owner,
                symbol
            )));
        }
    }

    let resolve_slot = |symbol: &str| -> Option<Slot> {
        if let Some(k) = input_roles.iter().position(|r| r == symbol) {
            Some(Slot::Species(k))
        } else if let Some(&p) = parameter_of.get(symbol) {
            Some(Slot::Parameter(p))
        } else if symbol == TIME_SYMBOL {
            Some(Slot::Time)
        } else {
            None
        }
    };

    // units of the rate law; terms declared in other units are rescaled
    let unit_lookup = |symbol: &str| -> Option<Unit> {
        if let Some(k) = input_roles.iter().position(|r| r == symbol) {
            definition.species.get_index(inputs[k].species).map(|s| s.concentration_unit().clone())
        } else if let Some(&p) = parameter_of.get(symbol) {
            definition.parameters.get_index(p).map(|p| p.unit().clone())
        } else if symbol == TIME_SYMBOL {
            Some(Unit::second())
        } else {
            None
        }
    };
    let (rate_law, rate_unit) = rate_law.with_consistent_units(unit_lookup).map_err(|err| match err {
        ExpressionError::Dimension { expression, message } => SmartError::UnitMismatch {
            context: format!("rate law '{}' of {}", expression, owner),
            expected: "terms of one dimension and dimensionless function arguments".to_string(),
            found: message,
        },
        other => other.into(),
    })?;
    let rate = rate_law.bind(resolve_slot)?;
    let derivatives = input_roles
        .iter()
        .map(|role| rate_law.derivative(role).bind(resolve_slot))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let domain_dimension = domain_compartment.dimensionality();
    let expected = Dimension::concentration_rate(domain_dimension);
    if rate_unit.dimension() != expected {
        return Err(SmartError::UnitMismatch {
            context: format!("rate law of reaction '{}' on '{}'", reaction.name(), domain_compartment.name()),
            expected: expected.to_string(),
            found: rate_unit.dimension().to_string(),
        });
    }

    // flux targets with unit conversion
    let domain_amount = &(&rate_unit * &domain_compartment.length_unit().powi(domain_dimension as i32)) * &Unit::second();
    let mut targets = Vec::new();
    for &s in &involved_species {
        let species = definition
            .species
            .get_index(s)
            .ok_or_else(|| unresolved(&owner, "species", &s.to_string()))?;
        let nu = reaction.stoichiometry(species.name());
        if nu == 0 {
            continue;
        }
        let compartment = definition
            .compartments
            .get(species.compartment())
            .map_err(|_| unresolved(&owner, "compartment", species.compartment()))?;
        let target_amount = species.concentration_unit() * &compartment.length_unit().powi(compartment.dimensionality() as i32);
        let conversion = domain_amount.conversion_factor(&target_amount).map_err(|_| SmartError::UnitMismatch {
            context: format!("flux of reaction '{}' into species '{}'", reaction.name(), species.name()),
            expected: target_amount.dimension().to_string(),
            found: domain_amount.dimension().to_string(),
        })?;
        targets.push(FluxTarget {
            species: s,
            side: side_of(s)?,
            stoichiometry: nu as f64,
            conversion,
        });
    }

    let sites = build_sites(mesh, submeshes, domain, &volumes, reaction.name());

    debug!(
        "reaction '{}': domain '{}' ({:?}), {} input(s), {} target(s), {} site(s)",
        reaction.name(),
        domain_compartment.name(),
        kind,
        inputs.len(),
        targets.len(),
        sites.len()
    );

    Ok(ReactionPlan {
        name: reaction.name().to_string(),
        domain,
        kind,
        volumes,
        rate_law,
        rate_unit,
        rate,
        derivatives,
        inputs,
        targets,
        sites,
    })
}

fn build_sites(mesh: &dyn MeshAdapter, submeshes: &[SubMesh], domain: usize, volumes: &[usize], reaction: &str) -> Vec<ReactionSite> {
    let domain_mesh = &submeshes[domain];
    let mut sites = Vec::with_capacity(domain_mesh.len());
    let mut skipped = 0usize;

    for (local, &global) in domain_mesh.entities().iter().enumerate() {
        let neighbours: Vec<Vec<usize>> = volumes
            .iter()
            .map(|&v| {
                mesh.facet_cells(global)
                    .iter()
                    .filter_map(|&cell| submeshes[v].local_index(cell))
                    .collect()
            })
            .collect();

        if neighbours.iter().any(|cells: &Vec<usize>| cells.is_empty()) {
            skipped += 1;
            continue;
        }
        sites.push(ReactionSite {
            entity: local,
            measure: domain_mesh.measures()[local],
            neighbours,
        });
    }

    if skipped > 0 {
        warn!(
            "reaction '{}': {} facet(s) of '{}' touch no cell of every coupled volume and are skipped",
            reaction,
            skipped,
            domain_mesh.compartment()
        );
    }
    sites
}

fn log_summary(plan: &CouplingPlan) {
    for (i, name) in plan.compartments.iter().enumerate() {
        let species: Vec<&str> = plan
            .species
            .iter()
            .filter(|s| s.compartment == i)
            .map(|s| s.name.as_str())
            .collect();
        info!(
            "compartment '{}': {} entities, species [{}]",
            name,
            plan.submeshes[i].len(),
            species.join(", ")
        );
    }
    let cross = plan
        .reactions
        .iter()
        .filter(|r| r.kind == CouplingKind::CrossDimension)
        .count();
    info!(
        "{} reaction(s) resolved, {} of them flux boundary conditions",
        plan.reactions.len(),
        cross
    );
}

// =================================================================================================
// Tests
// =================================================================================================
