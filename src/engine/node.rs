//! # Nodes
//!
//! A node binds one discrete variable into a hierarchy: its identity in the
//! owning arena, derived placement metadata, the distributions it carries,
//! and — for leaves — the observation backing.
//!
//! ## Key Components
//!
//! - [`NodeId`]: stable global index into the owning forest's arena.
//! - [`LeafBacking`]: the two mutually exclusive ways a leaf meets data,
//!   raw per-sample category codes or a derived observation table.
//! - [`Node`]: variable + level + position + marginal / child distributions
//!   + the local-to-global child index map.
//!
//! Node queries are strictly local: anything that needs another node goes
//! through the forest, which owns the arena and the registry. Mutation is
//! crate-internal for the same reason; callers build through the forest API.

use std::fmt;

use crate::engine::distribution::{ConditionalTable, MarginalTable, ObservationTable};
use crate::engine::errors::ModelError;
use crate::engine::variable::{Variable, VariableRegistry};

/// Stable global index of a node within its owning forest.
///
/// Ids are dense and allocated in insertion order; they are never reused or
/// renumbered.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

impl NodeId {
    /// The id as an arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// How a leaf meets its observed data.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LeafBacking {
    /// Directly observed per-sample category codes.
    Raw(Vec<u16>),
    /// Per-observation distributions derived upstream (for example from a
    /// noisy caller), indexed by `observation_index * cardinality + value`.
    Derived(ObservationTable),
}

/// One node of a hierarchy.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    variable: Variable,
    level: u32,
    position: f64,
    marginal: Option<MarginalTable>,
    children_distributions: Vec<ConditionalTable>,
    local_to_global: Vec<NodeId>,
    backing: Option<LeafBacking>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        variable: Variable,
        position: f64,
        backing: Option<LeafBacking>,
    ) -> Self {
        Self {
            id,
            variable,
            level: 0,
            position,
            marginal: None,
            children_distributions: Vec::new(),
            local_to_global: Vec::new(),
            backing,
        }
    }

    /// The node's global index.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The variable this node carries.
    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    /// Height above the leaves: leaves are 0, a parent is one more than its
    /// highest child.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Placement coordinate: externally supplied for leaves, the mean of the
    /// children for parents.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// The root marginal, if one has been attached.
    pub fn marginal(&self) -> Option<&MarginalTable> {
        self.marginal.as_ref()
    }

    /// Whether a marginal is attached.
    pub fn has_marginal(&self) -> bool {
        self.marginal.is_some()
    }

    /// Child conditional tables in attach order, one per child.
    pub fn children_distributions(&self) -> &[ConditionalTable] {
        &self.children_distributions
    }

    /// The local-to-global child index map, in the same order as
    /// [`children_distributions`](Self::children_distributions).
    pub fn local_to_global(&self) -> &[NodeId] {
        &self.local_to_global
    }

    /// The leaf's observation backing, if any.
    pub fn backing(&self) -> Option<&LeafBacking> {
        self.backing.as_ref()
    }

    /// Whether this node is backed by observed data.
    pub fn is_data_leaf(&self) -> bool {
        self.backing.is_some()
    }

    /// Number of observations behind a data leaf, `None` for latent nodes.
    pub fn sample_count(&self) -> Option<usize> {
        match &self.backing {
            Some(LeafBacking::Raw(codes)) => Some(codes.len()),
            Some(LeafBacking::Derived(table)) => Some(table.observation_count()),
            None => None,
        }
    }

    /// `P(variable = value)` from the node's own marginal.
    ///
    /// Only roots carry a marginal; asking a marginal-less node is a
    /// structural error, an out-of-range state an index error.
    pub fn compute_prob(&self, value: usize) -> Result<f64, ModelError> {
        let marginal = self.marginal.as_ref().ok_or_else(|| {
            ModelError::Structural(format!(
                "compute_prob: node {} ('{}') has no marginal distribution; only roots carry one",
                self.id,
                self.variable.name()
            ))
        })?;
        marginal.probability(value)
    }

    /// `P(child = child_value | this = own_value)` for the child at a local
    /// index.
    pub fn compute_cond_prob(
        &self,
        child_local_index: usize,
        child_value: usize,
        own_value: usize,
    ) -> Result<f64, ModelError> {
        let table = self
            .children_distributions
            .get(child_local_index)
            .ok_or_else(|| {
                ModelError::Index(format!(
                    "compute_cond_prob: node {} has {} child distributions, local index {child_local_index} is out of range",
                    self.id,
                    self.children_distributions.len()
                ))
            })?;
        table.probability(child_value, own_value)
    }

    /// `P(this shows value | observation)` for a data leaf.
    ///
    /// Raw backing compares the stored code (a 0/1 indicator); derived
    /// backing looks up the observation row. A latent node is a
    /// missing-data error.
    pub fn compute_cond_prob_obs(
        &self,
        value: usize,
        observation_index: usize,
    ) -> Result<f64, ModelError> {
        match &self.backing {
            Some(LeafBacking::Raw(codes)) => {
                if value >= self.variable.cardinality() {
                    return Err(ModelError::Index(format!(
                        "compute_cond_prob_obs: state {value} is out of range for variable '{}' with {} states",
                        self.variable.name(),
                        self.variable.cardinality()
                    )));
                }
                let code = codes.get(observation_index).ok_or_else(|| {
                    ModelError::Index(format!(
                        "compute_cond_prob_obs: observation {observation_index} is out of range for node {} with {} samples",
                        self.id,
                        codes.len()
                    ))
                })?;
                Ok(if usize::from(*code) == value { 1.0 } else { 0.0 })
            }
            Some(LeafBacking::Derived(table)) => table.probability(observation_index, value),
            None => Err(ModelError::MissingData(format!(
                "compute_cond_prob_obs: node {} ('{}') has no observation backing",
                self.id,
                self.variable.name()
            ))),
        }
    }

    /// Translates a local child index to the child's global id.
    ///
    /// Fails with an index error when the index is out of range or the local
    /// map has not been rebuilt to cover that child.
    pub fn child_global(&self, child_local_index: usize) -> Result<NodeId, ModelError> {
        self.local_to_global
            .get(child_local_index)
            .copied()
            .ok_or_else(|| {
                ModelError::Index(format!(
                    "child_global: local index {child_local_index} is out of range for node {} with {} mapped children",
                    self.id,
                    self.local_to_global.len()
                ))
            })
    }

    /// Whether `other` is a direct child of this node, according to the
    /// local index map. Transitive ancestry is a forest-level query.
    pub fn is_parent_of(&self, other: &Node) -> bool {
        self.local_to_global.contains(&other.id)
    }

    pub(crate) fn set_marginal(&mut self, marginal: MarginalTable) {
        self.marginal = Some(marginal);
    }

    pub(crate) fn push_child_distribution(&mut self, table: ConditionalTable) {
        self.children_distributions.push(table);
    }

    /// Rebuilds the local-to-global map by resolving each child table's
    /// variable through the registry. With no children the map is empty and
    /// the rebuild trivially succeeds; an unknown name leaves the old map
    /// untouched.
    pub(crate) fn rebuild_local_indexes(
        &mut self,
        registry: &VariableRegistry,
    ) -> Result<(), ModelError> {
        let mut map = Vec::with_capacity(self.children_distributions.len());
        for table in &self.children_distributions {
            map.push(registry.resolve(table.child().name())?);
        }
        self.local_to_global = map;
        Ok(())
    }

    pub(crate) fn set_level(&mut self, level: u32) {
        self.level = level;
    }

    pub(crate) fn set_position(&mut self, position: f64) {
        self.position = position;
    }
}
