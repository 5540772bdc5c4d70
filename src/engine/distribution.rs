//! # Probability Tables
//!
//! Dense row-major probability tables and the factor type the composition
//! engine multiplies.
//!
//! ## Key Components
//!
//! - [`MarginalTable`]: `P(V)` for a root variable.
//! - [`ConditionalTable`]: `P(child | parent)`, parent-major rows.
//! - [`ObservationTable`]: per-observation distributions backing derived
//!   leaves, laid out as `observation_index * cardinality + value`.
//! - [`Factor`]: the tagged marginal/conditional variant with a uniform
//!   evaluation capability.
//! - [`SoftEvidence`]: per-state likelihood weights for virtual evidence.
//!
//! Constructors validate eagerly: lengths must match cardinalities, entries
//! must be finite and non-negative, and every row must sum to one within
//! [`PROBABILITY_TOLERANCE`]. A table that constructs successfully never
//! produces an invalid probability later.

use smallvec::{smallvec, SmallVec};

use crate::engine::errors::ModelError;
use crate::engine::variable::{Assignment, Variable};

/// Tolerance for row-normalization checks at table construction.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

fn validate_row(op: &str, label: &str, row: &[f64]) -> Result<(), ModelError> {
    for (state, p) in row.iter().enumerate() {
        if !p.is_finite() || *p < 0.0 {
            return Err(ModelError::Numerical(format!(
                "{op}: {label} has invalid probability {p} at state {state}"
            )));
        }
    }
    let sum: f64 = row.iter().sum();
    if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(ModelError::Numerical(format!(
            "{op}: {label} sums to {sum}, expected 1 within {PROBABILITY_TOLERANCE}"
        )));
    }
    Ok(())
}

/// Marginal distribution `P(V)` over one variable.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MarginalTable {
    variable: Variable,
    probs: Vec<f64>,
}

impl MarginalTable {
    /// Builds a marginal table from one probability per state.
    ///
    /// # Arguments
    ///
    /// * `variable` - the variable the table is over
    /// * `probs` - `probs[v] = P(V = v)`, one entry per state
    pub fn new(variable: Variable, probs: Vec<f64>) -> Result<Self, ModelError> {
        if probs.len() != variable.cardinality() {
            return Err(ModelError::Structural(format!(
                "MarginalTable::new: variable '{}' has {} states but {} probabilities were given",
                variable.name(),
                variable.cardinality(),
                probs.len()
            )));
        }
        validate_row(
            "MarginalTable::new",
            &format!("distribution of '{}'", variable.name()),
            &probs,
        )?;
        Ok(Self { variable, probs })
    }

    /// Uniform distribution over the variable's states.
    pub fn uniform(variable: Variable) -> Self {
        let p = 1.0 / variable.cardinality() as f64;
        let probs = vec![p; variable.cardinality()];
        Self { variable, probs }
    }

    /// `P(V = value)`, with `value` bounds-checked against the cardinality.
    pub fn probability(&self, value: usize) -> Result<f64, ModelError> {
        self.probs.get(value).copied().ok_or_else(|| {
            ModelError::Index(format!(
                "probability: state {value} is out of range for variable '{}' with {} states",
                self.variable.name(),
                self.variable.cardinality()
            ))
        })
    }

    /// The variable this table is over.
    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    /// All state probabilities, in state order.
    pub fn probabilities(&self) -> &[f64] {
        &self.probs
    }
}

/// Conditional distribution `P(child | parent)`.
///
/// Parent-major layout: `probs[parent_value * child_cardinality + child_value]`,
/// so each parent state owns one contiguous row over the child's states.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConditionalTable {
    child: Variable,
    parent: Variable,
    probs: Vec<f64>,
}

impl ConditionalTable {
    /// Builds a conditional table.
    ///
    /// # Arguments
    ///
    /// * `child` - the conditioned variable
    /// * `parent` - the conditioning variable
    /// * `probs` - parent-major rows; row `p` is the distribution of the
    ///   child given `parent = p` and must sum to one
    pub fn new(child: Variable, parent: Variable, probs: Vec<f64>) -> Result<Self, ModelError> {
        if child.name() == parent.name() {
            return Err(ModelError::Structural(format!(
                "ConditionalTable::new: child and parent are both '{}'; a variable cannot condition on itself",
                child.name()
            )));
        }
        let expected = child.cardinality() * parent.cardinality();
        if probs.len() != expected {
            return Err(ModelError::Structural(format!(
                "ConditionalTable::new: P({} | {}) needs {expected} entries, got {}",
                child.name(),
                parent.name(),
                probs.len()
            )));
        }
        for parent_value in 0..parent.cardinality() {
            let start = parent_value * child.cardinality();
            validate_row(
                "ConditionalTable::new",
                &format!("row P({} | {}={parent_value})", child.name(), parent.name()),
                &probs[start..start + child.cardinality()],
            )?;
        }
        Ok(Self { child, parent, probs })
    }

    /// Table with a uniform child distribution for every parent state.
    pub fn uniform(child: Variable, parent: Variable) -> Result<Self, ModelError> {
        let p = 1.0 / child.cardinality() as f64;
        let probs = vec![p; child.cardinality() * parent.cardinality()];
        Self::new(child, parent, probs)
    }

    /// `P(child = child_value | parent = parent_value)`, bounds-checked.
    pub fn probability(&self, child_value: usize, parent_value: usize) -> Result<f64, ModelError> {
        if child_value >= self.child.cardinality() {
            return Err(ModelError::Index(format!(
                "probability: state {child_value} is out of range for child '{}' with {} states",
                self.child.name(),
                self.child.cardinality()
            )));
        }
        if parent_value >= self.parent.cardinality() {
            return Err(ModelError::Index(format!(
                "probability: state {parent_value} is out of range for parent '{}' with {} states",
                self.parent.name(),
                self.parent.cardinality()
            )));
        }
        Ok(self.probs[parent_value * self.child.cardinality() + child_value])
    }

    /// The conditioned variable.
    pub fn child(&self) -> &Variable {
        &self.child
    }

    /// The conditioning variable.
    pub fn parent(&self) -> &Variable {
        &self.parent
    }
}

/// Conditional-observation table backing a derived leaf.
///
/// Each observation index owns one row over the leaf variable's states:
/// `probs[observation_index * cardinality + value]`. The observation axis is
/// external to the model; rows typically come from a per-sample classifier or
/// a noisy measurement channel.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObservationTable {
    cardinality: usize,
    probs: Vec<f64>,
}

impl ObservationTable {
    /// Builds an observation table with `probs.len() / cardinality` rows.
    pub fn new(cardinality: usize, probs: Vec<f64>) -> Result<Self, ModelError> {
        if cardinality < 2 {
            return Err(ModelError::Structural(format!(
                "ObservationTable::new: cardinality must be at least 2, got {cardinality}"
            )));
        }
        if probs.is_empty() || probs.len() % cardinality != 0 {
            return Err(ModelError::Structural(format!(
                "ObservationTable::new: {} entries do not form whole rows of {cardinality}",
                probs.len()
            )));
        }
        for (row_index, row) in probs.chunks(cardinality).enumerate() {
            validate_row(
                "ObservationTable::new",
                &format!("observation row {row_index}"),
                row,
            )?;
        }
        Ok(Self { cardinality, probs })
    }

    /// `P(value | observation_index)`, bounds-checked on both axes.
    pub fn probability(&self, observation_index: usize, value: usize) -> Result<f64, ModelError> {
        if value >= self.cardinality {
            return Err(ModelError::Index(format!(
                "probability: state {value} is out of range for a table with {} states",
                self.cardinality
            )));
        }
        Ok(self.row(observation_index)?[value])
    }

    /// The full distribution row for one observation index.
    pub fn row(&self, observation_index: usize) -> Result<&[f64], ModelError> {
        if observation_index >= self.observation_count() {
            return Err(ModelError::Index(format!(
                "row: observation {observation_index} is out of range for a table with {} rows",
                self.observation_count()
            )));
        }
        let start = observation_index * self.cardinality;
        Ok(&self.probs[start..start + self.cardinality])
    }

    /// Number of observation rows.
    pub fn observation_count(&self) -> usize {
        self.probs.len() / self.cardinality
    }

    /// Number of states per row.
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }
}

/// One factor of a tree factorization.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Factor {
    /// A root marginal `P(V)`.
    Marginal(MarginalTable),
    /// A parent-to-child conditional `P(child | parent)`.
    Conditional(ConditionalTable),
}

impl Factor {
    /// The factor's scope, primary variable first (the marginal variable, or
    /// the conditional child followed by its parent).
    pub fn variables(&self) -> SmallVec<[&Variable; 2]> {
        match self {
            Factor::Marginal(table) => smallvec![table.variable()],
            Factor::Conditional(table) => smallvec![table.child(), table.parent()],
        }
    }

    /// Evaluates the factor under `assignment`.
    ///
    /// Every scope variable must be assigned; a missing one is a
    /// missing-data error.
    pub fn evaluate(&self, assignment: &Assignment) -> Result<f64, ModelError> {
        match self {
            Factor::Marginal(table) => {
                let value = require(assignment, table.variable())?;
                table.probability(value)
            }
            Factor::Conditional(table) => {
                let child_value = require(assignment, table.child())?;
                let parent_value = require(assignment, table.parent())?;
                table.probability(child_value, parent_value)
            }
        }
    }

    /// Whether this is a marginal factor.
    pub fn is_marginal(&self) -> bool {
        matches!(self, Factor::Marginal(_))
    }

    /// Whether this is a conditional factor.
    pub fn is_conditional(&self) -> bool {
        matches!(self, Factor::Conditional(_))
    }
}

fn require(assignment: &Assignment, variable: &Variable) -> Result<usize, ModelError> {
    assignment.get(variable).ok_or_else(|| {
        ModelError::MissingData(format!(
            "evaluate: assignment is missing variable '{}'",
            variable.name()
        ))
    })
}

/// Virtual evidence on one variable: a likelihood weight per state.
///
/// Weights are not probabilities and need not normalize; a derived leaf's
/// observation row is the canonical source.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SoftEvidence {
    variable: Variable,
    weights: Vec<f64>,
}

impl SoftEvidence {
    /// Builds soft evidence from one weight per state.
    pub fn new(variable: Variable, weights: Vec<f64>) -> Result<Self, ModelError> {
        if weights.len() != variable.cardinality() {
            return Err(ModelError::Structural(format!(
                "SoftEvidence::new: variable '{}' has {} states but {} weights were given",
                variable.name(),
                variable.cardinality(),
                weights.len()
            )));
        }
        for (state, w) in weights.iter().enumerate() {
            if !w.is_finite() || *w < 0.0 {
                return Err(ModelError::Numerical(format!(
                    "SoftEvidence::new: variable '{}' has invalid weight {w} at state {state}",
                    variable.name()
                )));
            }
        }
        Ok(Self { variable, weights })
    }

    /// Soft evidence from one row of a derived leaf's observation table.
    pub fn from_observation(
        variable: &Variable,
        table: &ObservationTable,
        observation_index: usize,
    ) -> Result<Self, ModelError> {
        if table.cardinality() != variable.cardinality() {
            return Err(ModelError::Structural(format!(
                "SoftEvidence::from_observation: table has {} states but variable '{}' has {}",
                table.cardinality(),
                variable.name(),
                variable.cardinality()
            )));
        }
        Ok(Self {
            variable: variable.clone(),
            weights: table.row(observation_index)?.to_vec(),
        })
    }

    /// The weighted variable.
    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    /// Per-state weights, in state order.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}
