//! # Latent Forest
//!
//! The owning arena for hierarchy nodes and their tree structure.
//!
//! ## Key Components
//!
//! - [`LatentForest`]: sole owner of every [`Node`], the parent/child edge
//!   structure, and the [`VariableRegistry`]. All cross-node operations live
//!   here; nodes never hold references to each other, only [`NodeId`]s.
//!
//! Construction is fail-fast and single-threaded: invalid indices, duplicate
//! variable names, second-parent edges, and cycles are rejected at the call
//! that introduces them. Edges are kept in insertion order per parent, which
//! is also the order child distributions are multiplied during joint
//! composition.
//!
//! Levels and positions are maintained bottom-up by the construction driver:
//! after attaching children to a fresh parent, one [`update_level`] /
//! [`update_position`] call per shape change keeps them consistent. Both are
//! no-ops on childless nodes, whose values are externally owned.
//!
//! [`update_level`]: LatentForest::update_level
//! [`update_position`]: LatentForest::update_position

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::engine::distribution::{ConditionalTable, MarginalTable, ObservationTable, SoftEvidence};
use crate::engine::errors::ModelError;
use crate::engine::node::{LeafBacking, Node, NodeId};
use crate::engine::variable::{Assignment, Variable, VariableRegistry};

/// Tolerance when cross-checking a stored position against the recomputed
/// mean of the children.
pub const POSITION_TOLERANCE: f64 = 1e-9;

fn unknown_node(op: &str, id: NodeId, len: usize) -> ModelError {
    ModelError::Index(format!("{op}: unknown node {id}; {len} nodes exist"))
}

/// An owning arena of hierarchy nodes forming a forest of trees.
#[derive(Debug, Clone, Default)]
pub struct LatentForest {
    nodes: Vec<Node>,
    children: Vec<SmallVec<[NodeId; 4]>>,
    parents: Vec<Option<NodeId>>,
    registry: VariableRegistry,
}

impl LatentForest {
    /// Creates an empty forest.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    fn allocate(
        &mut self,
        op: &str,
        variable: Variable,
        position: f64,
        backing: Option<LeafBacking>,
    ) -> Result<NodeId, ModelError> {
        let id = u32::try_from(self.nodes.len())
            .map(NodeId)
            .map_err(|_| ModelError::Index(format!("{op}: node capacity exceeded")))?;
        self.registry.register(&variable, id)?;
        self.nodes.push(Node::new(id, variable, position, backing));
        self.children.push(SmallVec::new());
        self.parents.push(None);
        Ok(id)
    }

    /// Adds a latent internal node. Level and position start at zero and are
    /// recomputed once children are attached.
    pub fn add_latent_node(&mut self, variable: Variable) -> Result<NodeId, ModelError> {
        self.allocate("add_latent_node", variable, 0.0, None)
    }

    /// Adds a leaf backed by raw per-sample category codes.
    ///
    /// # Arguments
    ///
    /// * `variable` - the leaf variable
    /// * `position` - externally supplied placement coordinate
    /// * `codes` - one category code per sample, each `< cardinality`
    pub fn add_observed_leaf(
        &mut self,
        variable: Variable,
        position: f64,
        codes: Vec<u16>,
    ) -> Result<NodeId, ModelError> {
        for (sample, code) in codes.iter().enumerate() {
            if usize::from(*code) >= variable.cardinality() {
                return Err(ModelError::Index(format!(
                    "add_observed_leaf: code {code} at sample {sample} is out of range for variable '{}' with {} states",
                    variable.name(),
                    variable.cardinality()
                )));
            }
        }
        self.allocate(
            "add_observed_leaf",
            variable,
            position,
            Some(LeafBacking::Raw(codes)),
        )
    }

    /// Adds a leaf backed by a derived conditional-observation table.
    pub fn add_derived_leaf(
        &mut self,
        variable: Variable,
        position: f64,
        table: ObservationTable,
    ) -> Result<NodeId, ModelError> {
        if table.cardinality() != variable.cardinality() {
            return Err(ModelError::Structural(format!(
                "add_derived_leaf: observation table has {} states but variable '{}' has {}",
                table.cardinality(),
                variable.name(),
                variable.cardinality()
            )));
        }
        self.allocate(
            "add_derived_leaf",
            variable,
            position,
            Some(LeafBacking::Derived(table)),
        )
    }

    /// Adds a parent-to-child edge.
    ///
    /// Each node has at most one parent and edges may not close a cycle;
    /// both violations are structural errors. The child is appended to the
    /// parent's child list, and that insertion order is the order child
    /// distributions are expected and multiplied.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        self.lookup("add_edge", parent)?;
        self.lookup("add_edge", child)?;
        if parent == child {
            return Err(ModelError::Structural(format!(
                "add_edge: node {parent} cannot parent itself"
            )));
        }
        if let Some(existing) = self.parents[child.index()] {
            return Err(ModelError::Structural(format!(
                "add_edge: node {child} already has parent {existing}; trees allow one parent per node"
            )));
        }
        if self.is_ancestor_of(child, parent)? {
            return Err(ModelError::Structural(format!(
                "add_edge: {child} is an ancestor of {parent}; the edge would close a cycle"
            )));
        }
        self.children[parent.index()].push(child);
        self.parents[child.index()] = Some(parent);
        Ok(())
    }

    /// Attaches the marginal distribution of a root.
    ///
    /// Fails with a structural error if the node has a parent (only roots
    /// carry a marginal) or if the table's variable does not match the
    /// node's.
    pub fn set_marginal(&mut self, id: NodeId, marginal: MarginalTable) -> Result<(), ModelError> {
        if self.parent_of(id)?.is_some() {
            return Err(ModelError::Structural(format!(
                "set_marginal: node {id} has a parent; only roots carry a marginal distribution"
            )));
        }
        let node = self.lookup_mut("set_marginal", id)?;
        if marginal.variable().name() != node.variable().name() {
            return Err(ModelError::Structural(format!(
                "set_marginal: table is over '{}' but node {id} holds '{}'",
                marginal.variable().name(),
                node.variable().name()
            )));
        }
        if marginal.variable().cardinality() != node.variable().cardinality() {
            return Err(ModelError::Structural(format!(
                "set_marginal: table has {} states but node {id} holds '{}' with {}",
                marginal.variable().cardinality(),
                node.variable().name(),
                node.variable().cardinality()
            )));
        }
        node.set_marginal(marginal);
        Ok(())
    }

    /// Appends one child conditional table `P(child | this)` to a node.
    ///
    /// Tables must arrive in the same order as the child edges; the builder
    /// and [`validate_structure`](Self::validate_structure) cross-check the
    /// alignment.
    pub fn add_child_distribution(
        &mut self,
        parent: NodeId,
        table: ConditionalTable,
    ) -> Result<(), ModelError> {
        let node = self.lookup_mut("add_child_distribution", parent)?;
        if table.parent().name() != node.variable().name()
            || table.parent().cardinality() != node.variable().cardinality()
        {
            return Err(ModelError::Structural(format!(
                "add_child_distribution: table conditions on '{}' with {} states but node {parent} holds '{}' with {}",
                table.parent().name(),
                table.parent().cardinality(),
                node.variable().name(),
                node.variable().cardinality()
            )));
        }
        node.push_child_distribution(table);
        Ok(())
    }

    /// Rebuilds a node's local-to-global child index map by resolving each
    /// child table's variable through the registry.
    ///
    /// A node with no child distributions ends up with an empty map; that is
    /// success, not an error.
    pub fn finalize_child_indexes(&mut self, id: NodeId) -> Result<(), ModelError> {
        let len = self.nodes.len();
        let registry = &self.registry;
        let node = self
            .nodes
            .get_mut(id.index())
            .ok_or_else(|| unknown_node("finalize_child_indexes", id, len))?;
        node.rebuild_local_indexes(registry)
    }

    /// Recomputes a node's level as one more than its highest child.
    /// No-op for childless nodes.
    pub fn update_level(&mut self, id: NodeId) -> Result<(), ModelError> {
        self.lookup("update_level", id)?;
        let highest = self.children[id.index()]
            .iter()
            .map(|child| self.nodes[child.index()].level())
            .max();
        if let Some(level) = highest {
            self.nodes[id.index()].set_level(level + 1);
        }
        Ok(())
    }

    /// Recomputes a node's position as the mean of its children's positions.
    /// No-op for childless nodes, whose positions are externally supplied.
    pub fn update_position(&mut self, id: NodeId) -> Result<(), ModelError> {
        self.lookup("update_position", id)?;
        let kids = &self.children[id.index()];
        if kids.is_empty() {
            return Ok(());
        }
        let sum: f64 = kids
            .iter()
            .map(|child| self.nodes[child.index()].position())
            .sum();
        let mean = sum / kids.len() as f64;
        self.nodes[id.index()].set_position(mean);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookups and structural queries
    // ------------------------------------------------------------------

    fn lookup(&self, op: &str, id: NodeId) -> Result<&Node, ModelError> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| unknown_node(op, id, self.nodes.len()))
    }

    fn lookup_mut(&mut self, op: &str, id: NodeId) -> Result<&mut Node, ModelError> {
        let len = self.nodes.len();
        self.nodes
            .get_mut(id.index())
            .ok_or_else(|| unknown_node(op, id, len))
    }

    /// The node at `id`, or an index error for an unknown id.
    pub fn node(&self, id: NodeId) -> Result<&Node, ModelError> {
        self.lookup("node", id)
    }

    /// Resolves a variable name and returns its node.
    pub fn node_by_name(&self, name: &str) -> Result<&Node, ModelError> {
        self.node(self.resolve(name)?)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of parent-to-child edges.
    pub fn edge_count(&self) -> usize {
        self.children.iter().map(SmallVec::len).sum()
    }

    /// Whether the forest has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// The name-to-node registry.
    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    /// Resolves a variable name to its node id.
    pub fn resolve(&self, name: &str) -> Result<NodeId, ModelError> {
        self.registry.resolve(name)
    }

    /// Nodes without a parent, in ascending id order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.parents
            .iter()
            .enumerate()
            .filter(|(_, parent)| parent.is_none())
            .map(|(index, _)| NodeId(index as u32))
            .collect()
    }

    /// A node's children in edge insertion order.
    pub fn children_of(&self, id: NodeId) -> Result<&[NodeId], ModelError> {
        self.lookup("children_of", id)?;
        Ok(&self.children[id.index()])
    }

    /// A node's parent, if any.
    pub fn parent_of(&self, id: NodeId) -> Result<Option<NodeId>, ModelError> {
        self.lookup("parent_of", id)?;
        Ok(self.parents[id.index()])
    }

    /// Whether `id` has no parent.
    pub fn is_root(&self, id: NodeId) -> Result<bool, ModelError> {
        Ok(self.parent_of(id)?.is_none())
    }

    /// Whether `ancestor` lies on the parent chain above `descendant`.
    ///
    /// Transitive, unlike [`Node::is_parent_of`] which tests direct
    /// parenthood only. A node is not its own ancestor.
    pub fn is_ancestor_of(&self, ancestor: NodeId, descendant: NodeId) -> Result<bool, ModelError> {
        self.lookup("is_ancestor_of", ancestor)?;
        self.lookup("is_ancestor_of", descendant)?;
        let mut current = self.parents[descendant.index()];
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            current = self.parents[id.index()];
        }
        Ok(false)
    }

    /// Every node under `root` (inclusive) in breadth-first order, children
    /// in insertion order.
    pub fn subtree_nodes(&self, root: NodeId) -> Result<Vec<NodeId>, ModelError> {
        self.lookup("subtree_nodes", root)?;
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(root);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &child in &self.children[id.index()] {
                queue.push_back(child);
            }
        }
        Ok(order)
    }

    /// Childless nodes under `root`, in first-reached breadth-first order.
    pub fn leaves_reachable_from(&self, root: NodeId) -> Result<Vec<NodeId>, ModelError> {
        Ok(self
            .subtree_nodes(root)?
            .into_iter()
            .filter(|id| self.children[id.index()].is_empty())
            .collect())
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Sweeps the whole forest for structural inconsistencies and returns
    /// human-readable findings. An empty list means the forest is clean.
    ///
    /// Checks: marginal placement, child distribution counts and alignment
    /// with edges, local index maps, levels and positions against a
    /// bottom-up recomputation, and per-root sample-count agreement.
    pub fn validate_structure(&self) -> Result<Vec<String>, ModelError> {
        let mut findings = Vec::new();
        for node in &self.nodes {
            let id = node.id();
            let kids = &self.children[id.index()];
            let is_root = self.parents[id.index()].is_none();

            if node.has_marginal() && !is_root {
                findings.push(format!(
                    "node {id} ('{}') carries a marginal but has a parent",
                    node.variable().name()
                ));
            }
            if is_root && !kids.is_empty() && !node.has_marginal() {
                findings.push(format!(
                    "root {id} ('{}') has no marginal distribution",
                    node.variable().name()
                ));
            }

            if node.children_distributions().len() != kids.len() {
                findings.push(format!(
                    "node {id} has {} child distributions for {} children",
                    node.children_distributions().len(),
                    kids.len()
                ));
            }

            let map = node.local_to_global();
            if map.is_empty() {
                if !kids.is_empty() {
                    findings.push(format!(
                        "node {id} has children but no local index map; call finalize_child_indexes"
                    ));
                }
            } else {
                if map.len() != kids.len() {
                    findings.push(format!(
                        "node {id} local index map covers {} of {} children",
                        map.len(),
                        kids.len()
                    ));
                }
                for (local, (mapped, actual)) in map.iter().zip(kids.iter()).enumerate() {
                    if mapped != actual {
                        findings.push(format!(
                            "node {id} local index {local} maps to {mapped} but the edge points at {actual}"
                        ));
                    }
                }
            }

            for (local, table) in node.children_distributions().iter().enumerate() {
                let Some(&child_id) = kids.get(local) else {
                    continue;
                };
                let child = &self.nodes[child_id.index()];
                if table.child().name() != child.variable().name() {
                    findings.push(format!(
                        "node {id} child distribution {local} is over '{}' but the edge points at '{}'",
                        table.child().name(),
                        child.variable().name()
                    ));
                } else if table.child().cardinality() != child.variable().cardinality() {
                    findings.push(format!(
                        "node {id} child distribution {local} gives '{}' {} states but the child has {}",
                        table.child().name(),
                        table.child().cardinality(),
                        child.variable().cardinality()
                    ));
                }
            }

            if !kids.is_empty() {
                let highest = kids
                    .iter()
                    .map(|child| self.nodes[child.index()].level())
                    .max()
                    .unwrap_or(0);
                if node.level() != highest + 1 {
                    findings.push(format!(
                        "node {id} level {} disagrees with recomputed {}",
                        node.level(),
                        highest + 1
                    ));
                }
                let mean = kids
                    .iter()
                    .map(|child| self.nodes[child.index()].position())
                    .sum::<f64>()
                    / kids.len() as f64;
                if (node.position() - mean).abs() > POSITION_TOLERANCE {
                    findings.push(format!(
                        "node {id} position {} disagrees with recomputed {mean}",
                        node.position()
                    ));
                }
            }
        }

        for root in self.roots() {
            let mut counts: Vec<(NodeId, usize)> = Vec::new();
            for leaf in self.leaves_reachable_from(root)? {
                if let Some(count) = self.nodes[leaf.index()].sample_count() {
                    counts.push((leaf, count));
                }
            }
            if let Some((first_leaf, first_count)) = counts.first().copied() {
                for (leaf, count) in counts.iter().skip(1) {
                    if *count != first_count {
                        findings.push(format!(
                            "root {root}: leaf {leaf} has {count} samples but leaf {first_leaf} has {first_count}"
                        ));
                    }
                }
            }
        }

        Ok(findings)
    }

    // ------------------------------------------------------------------
    // Evidence helpers
    // ------------------------------------------------------------------

    /// The agreed sample count of the data leaves under `root`.
    ///
    /// Fails with a missing-data error when no leaf carries data or when two
    /// leaves disagree.
    pub fn sample_count(&self, root: NodeId) -> Result<usize, ModelError> {
        let mut agreed: Option<usize> = None;
        for leaf in self.leaves_reachable_from(root)? {
            let node = &self.nodes[leaf.index()];
            let Some(count) = node.sample_count() else {
                continue;
            };
            match agreed {
                None => agreed = Some(count),
                Some(existing) if existing != count => {
                    return Err(ModelError::MissingData(format!(
                        "sample_count: leaf {leaf} ('{}') has {count} samples but other leaves under {root} have {existing}",
                        node.variable().name()
                    )));
                }
                Some(_) => {}
            }
        }
        agreed.ok_or_else(|| {
            ModelError::MissingData(format!(
                "sample_count: no data-backed leaves under root {root}"
            ))
        })
    }

    /// The evidence one sample induces on the leaves under `root`: hard
    /// assignments from raw leaves, soft weights from derived leaves.
    ///
    /// Every leaf under the root must carry a backing; a latent leaf is a
    /// missing-data error, an out-of-range sample an index error.
    pub fn leaf_evidence(
        &self,
        root: NodeId,
        sample: usize,
    ) -> Result<(Assignment, Vec<SoftEvidence>), ModelError> {
        let mut hard = Assignment::new();
        let mut soft = Vec::new();
        for leaf in self.leaves_reachable_from(root)? {
            let node = &self.nodes[leaf.index()];
            match node.backing() {
                Some(LeafBacking::Raw(codes)) => {
                    let code = codes.get(sample).ok_or_else(|| {
                        ModelError::Index(format!(
                            "leaf_evidence: sample {sample} is out of range for leaf {leaf} with {} samples",
                            codes.len()
                        ))
                    })?;
                    hard.set(node.variable(), usize::from(*code))?;
                }
                Some(LeafBacking::Derived(table)) => {
                    soft.push(SoftEvidence::from_observation(node.variable(), table, sample)?);
                }
                None => {
                    return Err(ModelError::MissingData(format!(
                        "leaf_evidence: leaf {leaf} ('{}') has no observation backing",
                        node.variable().name()
                    )));
                }
            }
        }
        Ok((hard, soft))
    }
}
