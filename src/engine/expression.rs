//! # Joint and Conditional Expressions
//!
//! Symbolic products of factors and the query machinery over them.
//!
//! ## Key Components
//!
//! - [`JointExpression`]: an ordered product of [`Factor`]s together with the
//!   covered-variable list. Factors are pushed in multiplication order; each
//!   scope variable is resolved to a stable slot once, at push time.
//! - [`ConditionalExpression`]: `P(query | evidence)` over a borrowed joint,
//!   with the evidence normalizer computed when the query is formed.
//!
//! Full-assignment evaluation is a plain product over the factors. Partial
//! queries (`marginal_probability` and the soft-evidence variant) run
//! sum-product variable elimination instead of enumerating the joint state
//! space: free variables are eliminated in reverse coverage order, which on
//! tree-built joints means leaves first, so every intermediate table stays as
//! small as one parent row. The full joint table is never materialized.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::engine::distribution::{Factor, SoftEvidence};
use crate::engine::errors::ModelError;
use crate::engine::variable::{Assignment, Variable};

/// A factor with its scope resolved to expression slots.
#[derive(Debug, Clone)]
struct BoundFactor {
    factor: Factor,
    primary_slot: usize,
    /// Mirrors `primary_slot` for marginal factors and is never read there.
    parent_slot: usize,
}

impl BoundFactor {
    fn evaluate(&self, values_by_slot: &[usize]) -> Result<f64, ModelError> {
        match &self.factor {
            Factor::Marginal(table) => table.probability(values_by_slot[self.primary_slot]),
            Factor::Conditional(table) => table.probability(
                values_by_slot[self.primary_slot],
                values_by_slot[self.parent_slot],
            ),
        }
    }
}

/// Intermediate table during variable elimination: a dense row-major table
/// over a small ordered scope of expression slots.
#[derive(Debug, Clone)]
struct WorkingFactor {
    vars: SmallVec<[usize; 2]>,
    cards: SmallVec<[usize; 2]>,
    table: Vec<f64>,
}

impl WorkingFactor {
    fn constant(value: f64) -> Self {
        Self {
            vars: SmallVec::new(),
            cards: SmallVec::new(),
            table: vec![value],
        }
    }

    fn contains(&self, slot: usize) -> bool {
        self.vars.contains(&slot)
    }

    fn value(&self, values_by_slot: &[usize]) -> f64 {
        let mut idx = 0usize;
        for (pos, &slot) in self.vars.iter().enumerate() {
            idx = idx * self.cards[pos] + values_by_slot[slot];
        }
        self.table[idx]
    }
}

/// The symbolic product of the factors covering one tree.
///
/// The covered-variable list is kept in first-coverage order; for joints
/// produced by the tree builder that is the breadth-first attach order, root
/// first.
#[derive(Debug, Clone, Default)]
pub struct JointExpression {
    factors: Vec<BoundFactor>,
    variables: Vec<Variable>,
    slots: FxHashMap<Arc<str>, usize>,
}

impl JointExpression {
    /// Creates an empty expression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Multiplies `factor` into the expression.
    ///
    /// Newly seen scope variables extend the covered set; a variable that
    /// reappears with a different cardinality is a structural error.
    pub fn push_factor(&mut self, factor: Factor) -> Result<(), ModelError> {
        let (primary_slot, parent_slot) = match &factor {
            Factor::Marginal(table) => {
                let slot = self.intern(table.variable())?;
                (slot, slot)
            }
            Factor::Conditional(table) => {
                let child = self.intern(table.child())?;
                let parent = self.intern(table.parent())?;
                (child, parent)
            }
        };
        self.factors.push(BoundFactor {
            factor,
            primary_slot,
            parent_slot,
        });
        Ok(())
    }

    fn intern(&mut self, variable: &Variable) -> Result<usize, ModelError> {
        if let Some(&slot) = self.slots.get(variable.name()) {
            let known = &self.variables[slot];
            if known.cardinality() != variable.cardinality() {
                return Err(ModelError::Structural(format!(
                    "push_factor: variable '{}' appears with both {} and {} states",
                    variable.name(),
                    known.cardinality(),
                    variable.cardinality()
                )));
            }
            return Ok(slot);
        }
        let slot = self.variables.len();
        self.slots.insert(variable.name_arc(), slot);
        self.variables.push(variable.clone());
        Ok(slot)
    }

    /// Covered variables in first-coverage order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Whether `variable` is covered.
    pub fn covers(&self, variable: &Variable) -> bool {
        self.covers_name(variable.name())
    }

    /// Whether a variable name is covered.
    pub fn covers_name(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Factors in multiplication order.
    pub fn factors(&self) -> impl Iterator<Item = &Factor> + '_ {
        self.factors.iter().map(|bound| &bound.factor)
    }

    /// Total number of factors.
    pub fn factor_count(&self) -> usize {
        self.factors.len()
    }

    /// Number of marginal factors.
    pub fn marginal_factor_count(&self) -> usize {
        self.factors
            .iter()
            .filter(|bound| bound.factor.is_marginal())
            .count()
    }

    /// Number of conditional factors.
    pub fn conditional_factor_count(&self) -> usize {
        self.factors
            .iter()
            .filter(|bound| bound.factor.is_conditional())
            .count()
    }

    /// Whether no factor has been pushed.
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Evaluates the full joint at a complete assignment.
    ///
    /// Every covered variable must be assigned; assignment entries for
    /// uncovered names are ignored.
    pub fn evaluate(&self, assignment: &Assignment) -> Result<f64, ModelError> {
        let states = self.resolve_states(assignment)?;
        let mut values = Vec::with_capacity(states.len());
        for (slot, state) in states.iter().enumerate() {
            match state {
                Some(value) => values.push(*value),
                None => {
                    return Err(ModelError::MissingData(format!(
                        "evaluate: assignment is missing variable '{}'",
                        self.variables[slot].name()
                    )))
                }
            }
        }
        let mut product = 1.0;
        for bound in &self.factors {
            product *= bound.evaluate(&values)?;
            if product == 0.0 {
                break;
            }
        }
        Ok(product)
    }

    /// Probability of a partial assignment, summing out every unassigned
    /// covered variable.
    ///
    /// Assignment entries for uncovered names are ignored; assigned states
    /// are validated against the covered variables' cardinalities.
    pub fn marginal_probability(&self, assignment: &Assignment) -> Result<f64, ModelError> {
        let states = self.resolve_states(assignment)?;
        self.eliminate_all(&states, &[])
    }

    /// [`marginal_probability`](Self::marginal_probability) with virtual
    /// evidence: each [`SoftEvidence`] weights the states of one free
    /// covered variable.
    ///
    /// A soft-evidence variable that is uncovered, hard-assigned, or listed
    /// twice is rejected.
    pub fn soft_marginal_probability(
        &self,
        assignment: &Assignment,
        soft: &[SoftEvidence],
    ) -> Result<f64, ModelError> {
        let states = self.resolve_states(assignment)?;
        let mut weighted: Vec<(usize, &[f64])> = Vec::with_capacity(soft.len());
        for evidence in soft {
            let name = evidence.variable().name();
            let Some(&slot) = self.slots.get(name) else {
                return Err(ModelError::UnsupportedQuery(format!(
                    "soft_marginal_probability: variable '{name}' is not covered by this joint"
                )));
            };
            if states[slot].is_some() {
                return Err(ModelError::UnsupportedQuery(format!(
                    "soft_marginal_probability: variable '{name}' already has a hard assignment"
                )));
            }
            if weighted.iter().any(|(seen, _)| *seen == slot) {
                return Err(ModelError::UnsupportedQuery(format!(
                    "soft_marginal_probability: variable '{name}' appears twice in the soft evidence"
                )));
            }
            if evidence.weights().len() != self.variables[slot].cardinality() {
                return Err(ModelError::Structural(format!(
                    "soft_marginal_probability: variable '{name}' has {} states but {} weights were given",
                    self.variables[slot].cardinality(),
                    evidence.weights().len()
                )));
            }
            weighted.push((slot, evidence.weights()));
        }
        self.eliminate_all(&states, &weighted)
    }

    /// Maps the assignment onto expression slots, validating state ranges.
    fn resolve_states(&self, assignment: &Assignment) -> Result<Vec<Option<usize>>, ModelError> {
        let mut states = vec![None; self.variables.len()];
        for (slot, variable) in self.variables.iter().enumerate() {
            if let Some(value) = assignment.get_by_name(variable.name()) {
                if value >= variable.cardinality() {
                    return Err(ModelError::Index(format!(
                        "evaluate: value {value} is out of range for variable '{}' with {} states",
                        variable.name(),
                        variable.cardinality()
                    )));
                }
                states[slot] = Some(value);
            }
        }
        Ok(states)
    }

    /// Sum-product elimination of every free slot, in reverse coverage
    /// order. Hard-assigned slots are baked into the working tables up
    /// front; soft weights enter as unary factors.
    fn eliminate_all(
        &self,
        states: &[Option<usize>],
        soft: &[(usize, &[f64])],
    ) -> Result<f64, ModelError> {
        let mut working = Vec::with_capacity(self.factors.len() + soft.len());
        for bound in &self.factors {
            working.push(self.restrict(bound, states)?);
        }
        for (slot, weights) in soft {
            working.push(WorkingFactor {
                vars: smallvec![*slot],
                cards: smallvec![weights.len()],
                table: weights.to_vec(),
            });
        }

        for slot in (0..self.variables.len()).rev() {
            if states[slot].is_some() {
                continue;
            }
            let (with_slot, rest): (Vec<_>, Vec<_>) =
                working.into_iter().partition(|factor| factor.contains(slot));
            working = rest;
            if with_slot.is_empty() {
                // a free variable no remaining factor mentions: summing it
                // out scales the result by its state count
                working.push(WorkingFactor::constant(
                    self.variables[slot].cardinality() as f64,
                ));
                continue;
            }
            working.push(self.multiply_and_sum_out(with_slot, slot));
        }

        let mut product = 1.0;
        for factor in &working {
            product *= factor.table[0];
            if product == 0.0 {
                break;
            }
        }
        Ok(product)
    }

    /// Restricts one bound factor to the free slots, with assigned states
    /// baked in. The result is a constant, a unary row, or the full table
    /// re-laid over `[child, parent]`.
    fn restrict(
        &self,
        bound: &BoundFactor,
        states: &[Option<usize>],
    ) -> Result<WorkingFactor, ModelError> {
        match &bound.factor {
            Factor::Marginal(table) => {
                let slot = bound.primary_slot;
                match states[slot] {
                    Some(value) => Ok(WorkingFactor::constant(table.probability(value)?)),
                    None => Ok(WorkingFactor {
                        vars: smallvec![slot],
                        cards: smallvec![table.variable().cardinality()],
                        table: table.probabilities().to_vec(),
                    }),
                }
            }
            Factor::Conditional(table) => {
                let child_slot = bound.primary_slot;
                let parent_slot = bound.parent_slot;
                let child_card = table.child().cardinality();
                let parent_card = table.parent().cardinality();
                match (states[child_slot], states[parent_slot]) {
                    (Some(child_value), Some(parent_value)) => Ok(WorkingFactor::constant(
                        table.probability(child_value, parent_value)?,
                    )),
                    (Some(child_value), None) => {
                        let mut row = Vec::with_capacity(parent_card);
                        for parent_value in 0..parent_card {
                            row.push(table.probability(child_value, parent_value)?);
                        }
                        Ok(WorkingFactor {
                            vars: smallvec![parent_slot],
                            cards: smallvec![parent_card],
                            table: row,
                        })
                    }
                    (None, Some(parent_value)) => {
                        let mut row = Vec::with_capacity(child_card);
                        for child_value in 0..child_card {
                            row.push(table.probability(child_value, parent_value)?);
                        }
                        Ok(WorkingFactor {
                            vars: smallvec![child_slot],
                            cards: smallvec![child_card],
                            table: row,
                        })
                    }
                    (None, None) => {
                        let mut full = Vec::with_capacity(child_card * parent_card);
                        for child_value in 0..child_card {
                            for parent_value in 0..parent_card {
                                full.push(table.probability(child_value, parent_value)?);
                            }
                        }
                        Ok(WorkingFactor {
                            vars: smallvec![child_slot, parent_slot],
                            cards: smallvec![child_card, parent_card],
                            table: full,
                        })
                    }
                }
            }
        }
    }

    /// Multiplies the given working factors and sums out `eliminate`,
    /// producing one table over the union of their remaining scopes.
    fn multiply_and_sum_out(&self, parts: Vec<WorkingFactor>, eliminate: usize) -> WorkingFactor {
        let mut union_vars: SmallVec<[usize; 2]> = SmallVec::new();
        for part in &parts {
            for &slot in &part.vars {
                if slot != eliminate && !union_vars.contains(&slot) {
                    union_vars.push(slot);
                }
            }
        }
        let union_cards: SmallVec<[usize; 2]> = union_vars
            .iter()
            .map(|&slot| self.variables[slot].cardinality())
            .collect();
        let out_len: usize = union_cards.iter().product();
        let eliminate_card = self.variables[eliminate].cardinality();

        let mut values: SmallVec<[usize; 2]> = smallvec![0; union_vars.len()];
        let mut values_by_slot = vec![0usize; self.variables.len()];
        let mut out = Vec::with_capacity(out_len);
        for _ in 0..out_len {
            for (pos, &slot) in union_vars.iter().enumerate() {
                values_by_slot[slot] = values[pos];
            }
            let mut acc = 0.0;
            for eliminated_value in 0..eliminate_card {
                values_by_slot[eliminate] = eliminated_value;
                let mut term = 1.0;
                for part in &parts {
                    term *= part.value(&values_by_slot);
                    if term == 0.0 {
                        break;
                    }
                }
                acc += term;
            }
            out.push(acc);
            // row-major advance, last scope variable fastest
            for pos in (0..values.len()).rev() {
                values[pos] += 1;
                if values[pos] < union_cards[pos] {
                    break;
                }
                values[pos] = 0;
            }
        }
        WorkingFactor {
            vars: union_vars,
            cards: union_cards,
            table: out,
        }
    }
}

/// A conditional distribution `P(query | evidence)` over a built joint.
///
/// The evidence normalizer is computed when the expression is formed, so
/// zero-probability evidence fails at [`ask`](crate::engine::session::InferenceSession::ask)
/// time rather than on the first lookup.
#[derive(Debug)]
pub struct ConditionalExpression<'a> {
    joint: &'a JointExpression,
    query: Vec<Variable>,
    evidence: Assignment,
    evidence_probability: f64,
}

impl<'a> ConditionalExpression<'a> {
    pub(crate) fn new(
        joint: &'a JointExpression,
        query: Vec<Variable>,
        evidence: Assignment,
    ) -> Result<Self, ModelError> {
        let evidence_probability = joint.marginal_probability(&evidence)?;
        if evidence_probability <= 0.0 {
            return Err(ModelError::Numerical(
                "ask: conditioning evidence has zero probability".to_string(),
            ));
        }
        Ok(Self {
            joint,
            query,
            evidence,
            evidence_probability,
        })
    }

    /// `P(query = assignment | evidence)`.
    ///
    /// The assignment must give a state to every query variable; unassigned
    /// non-query variables stay summed out.
    pub fn probability(&self, assignment: &Assignment) -> Result<f64, ModelError> {
        let mut combined = self.evidence.clone();
        for variable in &self.query {
            let value = assignment.get(variable).ok_or_else(|| {
                ModelError::MissingData(format!(
                    "probability: assignment is missing query variable '{}'",
                    variable.name()
                ))
            })?;
            combined.set(variable, value)?;
        }
        Ok(self.joint.marginal_probability(&combined)? / self.evidence_probability)
    }

    /// Materializes the conditional over the whole query space.
    ///
    /// Rows are `(states, probability)` in row-major state order, first
    /// query variable slowest; the probabilities sum to one.
    pub fn tabulate(&self) -> Result<Vec<(Vec<usize>, f64)>, ModelError> {
        let mut rows = Vec::new();
        let mut values = vec![0usize; self.query.len()];
        'rows: loop {
            let mut assignment = Assignment::new();
            for (variable, value) in self.query.iter().zip(&values) {
                assignment.set(variable, *value)?;
            }
            rows.push((values.clone(), self.probability(&assignment)?));

            let mut pos = self.query.len();
            while pos > 0 {
                pos -= 1;
                values[pos] += 1;
                if values[pos] < self.query[pos].cardinality() {
                    continue 'rows;
                }
                values[pos] = 0;
            }
            return Ok(rows);
        }
    }

    /// The ordered query variables.
    pub fn query(&self) -> &[Variable] {
        &self.query
    }

    /// The conditioning evidence.
    pub fn evidence(&self) -> &Assignment {
        &self.evidence
    }

    /// The evidence normalizer `P(evidence)`.
    pub fn evidence_probability(&self) -> f64 {
        self.evidence_probability
    }
}
