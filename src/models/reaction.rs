//! Reactions: stoichiometry, role maps and rate laws
//!
//! A rate law is written in terms of *roles*. Parameter roles map to
//! parameter names through `param_map`; species roles map to species names
//! through `species_map`, and every species of `lhs`/`rhs` that is not mapped
//! explicitly is its own role. Without an explicit rate law the reaction
//! follows mass action:
//!
//! ```text
//! rate = on * Π lhs - off * Π rhs
//! ```
//!
//! where `on` and `off` are parameter roles and `off` is optional.
//!
//! The rate is a flux density on the reaction's domain. Each species changes
//! at `ν · rate` where `ν` is its net stoichiometric coefficient
//! (occurrences in `rhs` minus occurrences in `lhs`).

use crate::error::{Result, SmartError};
use crate::models::registry::Entity;
use crate::physics::expression::{Expression, Node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter role of the forward rate constant
pub const FORWARD_ROLE: &str = "on";
/// Parameter role of the reverse rate constant
pub const REVERSE_ROLE: &str = "off";

/// Chemical reaction between species, possibly in different compartments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReactionRecord")]
pub struct Reaction {
    name: String,
    lhs: Vec<String>,
    rhs: Vec<String>,
    #[serde(default)]
    param_map: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    species_map: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rate_law: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    explicit_restriction_to_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
}

#[derive(Deserialize)]
struct ReactionRecord {
    name: String,
    lhs: Vec<String>,
    rhs: Vec<String>,
    #[serde(default)]
    param_map: BTreeMap<String, String>,
    #[serde(default)]
    species_map: BTreeMap<String, String>,
    #[serde(default)]
    rate_law: Option<Expression>,
    #[serde(default)]
    explicit_restriction_to_domain: Option<String>,
    #[serde(default)]
    group: Option<String>,
}

impl TryFrom<ReactionRecord> for Reaction {
    type Error = SmartError;

    fn try_from(r: ReactionRecord) -> Result<Self> {
        let mut reaction = Reaction::new(r.name, r.lhs, r.rhs)?;
        reaction.param_map = r.param_map;
        reaction.species_map = r.species_map;
        reaction.rate_law = r.rate_law;
        reaction.explicit_restriction_to_domain = r.explicit_restriction_to_domain;
        reaction.group = r.group;
        Ok(reaction)
    }
}

impl Reaction {
    /// New reaction `lhs -> rhs`
    ///
    /// ```rust
    /// use smart_rs::models::Reaction;
    ///
    /// let binding = Reaction::new("A+X <-> B", ["A", "X"], ["B"])
    ///     .unwrap()
    ///     .with_parameter("on", "kon")
    ///     .with_parameter("off", "koff");
    /// assert_eq!(binding.stoichiometry("B"), 1);
    /// assert_eq!(binding.stoichiometry("A"), -1);
    /// ```
    pub fn new<L, R>(name: impl Into<String>, lhs: L, rhs: R) -> Result<Self>
    where
        L: IntoIterator,
        L::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        let name = name.into();
        let lhs: Vec<String> = lhs.into_iter().map(Into::into).collect();
        let rhs: Vec<String> = rhs.into_iter().map(Into::into).collect();
        if name.is_empty() {
            return Err(SmartError::configuration("reaction name must not be empty"));
        }
        if lhs.is_empty() && rhs.is_empty() {
            return Err(SmartError::configuration(format!(
                "reaction '{}' has neither reactants nor products",
                name
            )));
        }

        Ok(Self {
            name,
            lhs,
            rhs,
            param_map: BTreeMap::new(),
            species_map: BTreeMap::new(),
            rate_law: None,
            explicit_restriction_to_domain: None,
            group: None,
        })
    }

    /// Map a parameter role to a parameter name
    pub fn with_parameter(mut self, role: impl Into<String>, parameter: impl Into<String>) -> Self {
        self.param_map.insert(role.into(), parameter.into());
        self
    }

    /// Map a species role to a species name
    pub fn with_species(mut self, role: impl Into<String>, species: impl Into<String>) -> Self {
        self.species_map.insert(role.into(), species.into());
        self
    }

    /// Replace mass action by an explicit rate law over roles
    pub fn with_rate_law(mut self, rate_law: &str) -> Result<Self> {
        self.rate_law = Some(Expression::parse(rate_law)?);
        Ok(self)
    }

    /// Force the reaction onto one compartment
    pub fn restricted_to(mut self, compartment: impl Into<String>) -> Self {
        self.explicit_restriction_to_domain = Some(compartment.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lhs(&self) -> &[String] {
        &self.lhs
    }

    pub fn rhs(&self) -> &[String] {
        &self.rhs
    }

    pub fn param_map(&self) -> &BTreeMap<String, String> {
        &self.param_map
    }

    pub fn explicit_restriction_to_domain(&self) -> Option<&str> {
        self.explicit_restriction_to_domain.as_deref()
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Species roles: explicit entries plus the identity for every lhs/rhs species
    pub fn species_roles(&self) -> BTreeMap<String, String> {
        let mut roles = self.species_map.clone();
        for species in self.lhs.iter().chain(self.rhs.iter()) {
            if !roles.values().any(|mapped| mapped == species) {
                roles.entry(species.clone()).or_insert_with(|| species.clone());
            }
        }
        roles
    }

    /// Net stoichiometric coefficient of `species`
    pub fn stoichiometry(&self, species: &str) -> i32 {
        let produced = self.rhs.iter().filter(|s| *s == species).count() as i32;
        let consumed = self.lhs.iter().filter(|s| *s == species).count() as i32;
        produced - consumed
    }

    /// Distinct species named in `lhs`, `rhs` or the species roles, in first-seen order
    pub fn involved_species(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let candidates = self
            .lhs
            .iter()
            .chain(self.rhs.iter())
            .cloned()
            .chain(self.species_map.values().cloned());
        for species in candidates {
            if !out.contains(&species) {
                out.push(species);
            }
        }
        out
    }

    /// Explicit rate law, or the mass-action law over species roles
    pub fn rate_expression(&self) -> Result<Expression> {
        if let Some(rate_law) = &self.rate_law {
            return Ok(rate_law.clone());
        }

        if !self.param_map.contains_key(FORWARD_ROLE) {
            return Err(SmartError::configuration(format!(
                "reaction '{}' uses mass action but maps no '{}' parameter",
                self.name, FORWARD_ROLE
            )));
        }

        let roles = self.species_roles();
        let role_of = |species: &str| -> String {
            roles
                .iter()
                .find(|(_, mapped)| mapped.as_str() == species)
                .map(|(role, _)| role.clone())
                .unwrap_or_else(|| species.to_string())
        };
        let product = |factor: Node, species: &[String]| {
            species.iter().fold(factor, |acc, s| {
                Node::Mul(Box::new(acc), Box::new(Node::Var(role_of(s))))
            })
        };

        let forward = product(Node::Var(FORWARD_ROLE.to_string()), &self.lhs);
        let rate = if self.param_map.contains_key(REVERSE_ROLE) {
            let reverse = product(Node::Var(REVERSE_ROLE.to_string()), &self.rhs);
            Node::Sub(Box::new(forward), Box::new(reverse))
        } else {
            forward
        };
        Ok(Expression::from_node(rate))
    }
}

impl Entity for Reaction {
    const KIND: &'static str = "reaction";

    fn name(&self) -> &str {
        &self.name
    }
}
