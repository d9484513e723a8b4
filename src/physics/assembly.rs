//! Discrete reaction-diffusion system
//!
//! # Unknowns
//!
//! Every species owns one value per entity of its compartment's sub-mesh.
//! The blocks are laid out in species registry order ([`FieldLayout`]), so
//! the whole model is one vector `u`.
//!
//! # Residual
//!
//! Backward Euler over one step `[t_n, t_n + dt]`, cell-centred finite
//! volumes with lumped measures `m_i` and two-point conductances `G_ij`:
//!
//! ```text
//! F_i(u) = m_i (u_i - u_i^n) / dt + Σ_j G_ij (u_i - u_j) - S_i(u, t_n + dt)
//! ```
//!
//! `G_ij = D × transmissibility_ij`. The source `S_i` gathers every reaction
//! evaluated at the sites that touch entity `i`: local reactions on the
//! entity itself, cross-dimension reactions on adjacent surface facets.
//!
//! Site contributions are computed independently (in parallel above the
//! threshold of [`crate::solver::parallel_threshold`]) and then added in
//! site order, so the result does not depend on the thread count.

use crate::physics::coupling::{CouplingPlan, ReactionPlan, ReactionSite, Side};
use crate::solver::NonlinearSystem;
use nalgebra::{DMatrix, DVector};
use std::ops::Range;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

// =================================================================================================
// Field layout
// =================================================================================================

/// Offsets of the species blocks in the unknown vector
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    offsets: Vec<usize>,
    lengths: Vec<usize>,
}

impl FieldLayout {
    pub fn new(plan: &CouplingPlan) -> Self {
        let lengths: Vec<usize> = plan
            .species
            .iter()
            .map(|s| plan.submeshes[s.compartment].len())
            .collect();
        let mut offsets = Vec::with_capacity(lengths.len());
        let mut next = 0;
        for len in &lengths {
            offsets.push(next);
            next += len;
        }
        Self { offsets, lengths }
    }

    /// Total number of unknowns
    pub fn len(&self) -> usize {
        self.offsets.last().zip(self.lengths.last()).map_or(0, |(o, l)| o + l)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset(&self, species: usize) -> usize {
        self.offsets[species]
    }

    /// Index range of a species block
    pub fn range(&self, species: usize) -> Range<usize> {
        self.offsets[species]..self.offsets[species] + self.lengths[species]
    }

    /// Initial state: every species at its initial condition
    pub fn initial_state(&self, plan: &CouplingPlan) -> DVector<f64> {
        let mut u = DVector::zeros(self.len());
        for (s, species) in plan.species.iter().enumerate() {
            u.rows_mut(self.offsets[s], self.lengths[s]).fill(species.initial_condition);
        }
        u
    }
}

/// Measure-weighted mean of a species block
pub fn species_average(plan: &CouplingPlan, layout: &FieldLayout, u: &DVector<f64>, species: usize) -> f64 {
    let measures = plan.submeshes[plan.species[species].compartment].measures();
    let total: f64 = measures.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = u.as_slice()[layout.range(species)]
        .iter()
        .zip(measures)
        .map(|(value, m)| value * m)
        .sum();
    weighted / total
}

/// Amount of a species in mol
pub fn species_amount(plan: &CouplingPlan, layout: &FieldLayout, u: &DVector<f64>, species: usize) -> f64 {
    let measures = plan.submeshes[plan.species[species].compartment].measures();
    let integral: f64 = u.as_slice()[layout.range(species)]
        .iter()
        .zip(measures)
        .map(|(value, m)| value * m)
        .sum();
    integral * plan.species[species].amount_scale
}

// =================================================================================================
// Backward Euler step
// =================================================================================================

/// Nonlinear system of one backward Euler step
pub struct StepSystem<'a> {
    plan: &'a CouplingPlan,
    layout: &'a FieldLayout,
    previous: &'a DVector<f64>,
    parameters: &'a [f64],
    t: f64,
    dt: f64,
}

/// Contributions of one reaction site
#[derive(Debug, Default)]
struct SiteTerms {
    residual: Vec<(usize, f64)>,
    jacobian: Vec<(usize, usize, f64)>,
}

impl<'a> StepSystem<'a> {
    /// `parameters` holds one value per parameter (registry order), already
    /// evaluated over the step; `t` is the time rate laws are evaluated at
    /// (the end of the step, or its midpoint).
    pub fn new(
        plan: &'a CouplingPlan,
        layout: &'a FieldLayout,
        previous: &'a DVector<f64>,
        parameters: &'a [f64],
        t: f64,
        dt: f64,
    ) -> Self {
        Self { plan, layout, previous, parameters, t, dt }
    }

    fn dofs(&self, species: usize, side: Side, site: &ReactionSite) -> Vec<usize> {
        let offset = self.layout.offset(species);
        match side {
            Side::Domain => vec![offset + site.entity],
            Side::Volume(i) => site.neighbours[i].iter().map(|n| offset + n).collect(),
        }
    }

    fn site_terms(&self, reaction: &ReactionPlan, site: &ReactionSite, u: &DVector<f64>, with_jacobian: bool) -> SiteTerms {
        let input_dofs: Vec<Vec<usize>> = reaction
            .inputs
            .iter()
            .map(|input| self.dofs(input.species, input.side, site))
            .collect();
        let values: Vec<f64> = input_dofs
            .iter()
            .map(|dofs| dofs.iter().map(|&d| u[d]).sum::<f64>() / dofs.len() as f64)
            .collect();

        let rate = reaction.rate.evaluate(&values, self.parameters, self.t);
        let slopes: Vec<f64> = if with_jacobian {
            reaction
                .derivatives
                .iter()
                .map(|d| d.evaluate(&values, self.parameters, self.t))
                .collect()
        } else {
            Vec::new()
        };

        let mut terms = SiteTerms::default();
        for target in &reaction.targets {
            let rows = self.dofs(target.species, target.side, site);
            let weight = target.stoichiometry * target.conversion * site.measure / rows.len() as f64;
            for &row in &rows {
                terms.residual.push((row, -weight * rate));
                if with_jacobian {
                    for (k, cols) in input_dofs.iter().enumerate() {
                        let share = slopes[k] / cols.len() as f64;
                        for &col in cols {
                            terms.jacobian.push((row, col, -weight * share));
                        }
                    }
                }
            }
        }
        terms
    }

    fn reaction_terms(&self, reaction: &ReactionPlan, u: &DVector<f64>, with_jacobian: bool) -> Vec<SiteTerms> {
        #[cfg(feature = "parallel")]
        if reaction.sites.len() > crate::solver::parallel_threshold() {
            return reaction
                .sites
                .par_iter()
                .map(|site| self.site_terms(reaction, site, u, with_jacobian))
                .collect();
        }
        reaction
            .sites
            .iter()
            .map(|site| self.site_terms(reaction, site, u, with_jacobian))
            .collect()
    }
}

impl NonlinearSystem for StepSystem<'_> {
    fn dimension(&self) -> usize {
        self.layout.len()
    }

    fn residual(&self, u: &DVector<f64>) -> DVector<f64> {
        let mut f = DVector::zeros(self.layout.len());

        for (s, species) in self.plan.species.iter().enumerate() {
            let submesh = &self.plan.submeshes[species.compartment];
            let offset = self.layout.offset(s);

            for (i, m) in submesh.measures().iter().enumerate() {
                let dof = offset + i;
                f[dof] += m * (u[dof] - self.previous[dof]) / self.dt;
            }
            if species.diffusivity > 0.0 {
                for c in submesh.connections() {
                    let (a, b) = (offset + c.a, offset + c.b);
                    let flow = species.diffusivity * c.transmissibility * (u[a] - u[b]);
                    f[a] += flow;
                    f[b] -= flow;
                }
            }
        }

        for reaction in &self.plan.reactions {
            for terms in self.reaction_terms(reaction, u, false) {
                for (row, value) in terms.residual {
                    f[row] += value;
                }
            }
        }
        f
    }

    fn jacobian(&self, u: &DVector<f64>) -> DMatrix<f64> {
        let n = self.layout.len();
        let mut j = DMatrix::zeros(n, n);

        for (s, species) in self.plan.species.iter().enumerate() {
            let submesh = &self.plan.submeshes[species.compartment];
            let offset = self.layout.offset(s);

            for (i, m) in submesh.measures().iter().enumerate() {
                j[(offset + i, offset + i)] += m / self.dt;
            }
            if species.diffusivity > 0.0 {
                for c in submesh.connections() {
                    let (a, b) = (offset + c.a, offset + c.b);
                    let g = species.diffusivity * c.transmissibility;
                    j[(a, a)] += g;
                    j[(a, b)] -= g;
                    j[(b, b)] += g;
                    j[(b, a)] -= g;
                }
            }
        }

        for reaction in &self.plan.reactions {
            for terms in self.reaction_terms(reaction, u, true) {
                for (row, col, value) in terms.jacobian {
                    j[(row, col)] += value;
                }
            }
        }
        j
    }
}

// =================================================================================================
// Tests
// =================================================================================================
