//! # Variables and Assignments
//!
//! Discrete random variables, the name registry that binds them to graph
//! nodes, and partial state assignments used as evidence and queries.
//!
//! ## Key Components
//!
//! - [`Variable`]: a named discrete variable with a fixed number of states.
//!   Identity is by name; two values with the same name refer to the same
//!   variable wherever coverage or evidence is concerned.
//! - [`VariableRegistry`]: the name-to-node table owned by the forest. There
//!   is no global registry; every lookup goes through the owning graph.
//! - [`Assignment`]: a partial map from variable names to states, validated
//!   against cardinality when entries are inserted.

use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::engine::errors::ModelError;
use crate::engine::node::NodeId;

/// A discrete random variable: a shared name and a state count.
///
/// States are `0..cardinality`. The name is the variable's identity:
/// equality and hashing ignore the cardinality, and cardinality agreement
/// between same-named values is checked at the points where tables are
/// combined.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variable {
    name: Arc<str>,
    cardinality: usize,
}

impl Variable {
    /// Creates a variable with states `0..cardinality`.
    ///
    /// # Panics
    ///
    /// Panics if `cardinality < 2`. A one-state variable carries no
    /// information and is always a programming error, not a runtime
    /// condition.
    pub fn new(name: impl Into<Arc<str>>, cardinality: usize) -> Self {
        let name = name.into();
        assert!(
            cardinality >= 2,
            "variable '{name}': cardinality must be at least 2, got {cardinality}"
        );
        Self { name, cardinality }
    }

    /// Creates a two-state variable.
    pub fn binary(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, 2)
    }

    /// The variable's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of states.
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.cardinality)
    }
}

/// Name-to-node table owned by a forest.
///
/// Variable names are unique per forest; registering the same name twice is
/// rejected so that local-to-global index translation stays unambiguous.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    ids: FxHashMap<Arc<str>, NodeId>,
}

impl VariableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `variable`'s name to `id`.
    ///
    /// Fails with a structural error if the name is already bound.
    pub fn register(&mut self, variable: &Variable, id: NodeId) -> Result<(), ModelError> {
        match self.ids.entry(variable.name_arc()) {
            Entry::Occupied(slot) => Err(ModelError::Structural(format!(
                "register: variable '{}' is already bound to node {}",
                variable.name(),
                slot.get()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    /// Resolves a variable name to its node.
    ///
    /// Fails with an index error when the name is unknown.
    pub fn resolve(&self, name: &str) -> Result<NodeId, ModelError> {
        self.ids.get(name).copied().ok_or_else(|| {
            ModelError::Index(format!("resolve: variable '{name}' is not registered"))
        })
    }

    /// Whether `name` is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A partial assignment of states to variables, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    values: FxHashMap<Arc<str>, usize>,
}

impl Assignment {
    /// Creates an empty assignment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `variable` to `value`, overwriting any earlier entry.
    ///
    /// Fails with an index error if `value` is not a state of `variable`.
    pub fn set(&mut self, variable: &Variable, value: usize) -> Result<(), ModelError> {
        if value >= variable.cardinality() {
            return Err(ModelError::Index(format!(
                "set: value {value} is out of range for variable '{}' with {} states",
                variable.name(),
                variable.cardinality()
            )));
        }
        self.values.insert(variable.name_arc(), value);
        Ok(())
    }

    /// Chainable [`set`](Self::set).
    pub fn with(mut self, variable: &Variable, value: usize) -> Result<Self, ModelError> {
        self.set(variable, value)?;
        Ok(self)
    }

    /// The assigned state of `variable`, if any.
    pub fn get(&self, variable: &Variable) -> Option<usize> {
        self.get_by_name(variable.name())
    }

    /// The assigned state for a variable name, if any.
    pub fn get_by_name(&self, name: &str) -> Option<usize> {
        self.values.get(name).copied()
    }

    /// Whether `variable` has an assigned state.
    pub fn contains(&self, variable: &Variable) -> bool {
        self.values.contains_key(variable.name())
    }

    /// Number of assigned variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no variable is assigned.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(name, state)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.values.iter().map(|(name, value)| (name.as_ref(), *value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_identity_is_by_name() {
        let a = Variable::new("geno", 3);
        let b = Variable::new("geno", 4);
        let c = Variable::new("other", 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    #[should_panic(expected = "cardinality must be at least 2")]
    fn variable_rejects_single_state() {
        let _ = Variable::new("degenerate", 1);
    }

    #[test]
    fn binary_variable_has_two_states() {
        let v = Variable::binary("flag");
        assert_eq!(v.cardinality(), 2);
        assert_eq!(v.name(), "flag");
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let v = Variable::binary("m1");
        let mut registry = VariableRegistry::new();
        registry.register(&v, NodeId(0)).unwrap();
        let err = registry.register(&v, NodeId(1)).unwrap_err();
        assert!(matches!(err, ModelError::Structural(_)), "got {err:?}");
    }

    #[test]
    fn registry_resolves_registered_names() {
        let v = Variable::binary("m1");
        let mut registry = VariableRegistry::new();
        registry.register(&v, NodeId(7)).unwrap();
        assert_eq!(registry.resolve("m1").unwrap(), NodeId(7));
        assert!(registry.contains("m1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_unknown_name_is_an_index_error() {
        let registry = VariableRegistry::new();
        let err = registry.resolve("missing").unwrap_err();
        assert!(matches!(err, ModelError::Index(_)), "got {err:?}");
    }

    #[test]
    fn assignment_validates_state_range() {
        let v = Variable::new("geno", 3);
        let mut assignment = Assignment::new();
        assignment.set(&v, 2).unwrap();
        assert_eq!(assignment.get(&v), Some(2));

        let err = assignment.set(&v, 3).unwrap_err();
        assert!(matches!(err, ModelError::Index(_)), "got {err:?}");
        // the failed set leaves the earlier entry untouched
        assert_eq!(assignment.get(&v), Some(2));
    }

    #[test]
    fn assignment_with_chains() {
        let a = Variable::binary("a");
        let b = Variable::new("b", 3);
        let assignment = Assignment::new().with(&a, 1).unwrap().with(&b, 2).unwrap();
        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment.get_by_name("a"), Some(1));
        assert_eq!(assignment.get_by_name("b"), Some(2));
    }

    #[test]
    fn assignment_overwrites_on_reset() {
        let a = Variable::binary("a");
        let mut assignment = Assignment::new();
        assignment.set(&a, 0).unwrap();
        assignment.set(&a, 1).unwrap();
        assert_eq!(assignment.get(&a), Some(1));
        assert_eq!(assignment.len(), 1);
    }
}
