//! # Tree Joint Composition
//!
//! Turns one tree of a [`LatentForest`] into the factored joint expression
//! the query layer consumes.
//!
//! ## Key Components
//!
//! - [`build_tree_joint`]: breadth-first walk from a root that pushes the
//!   root marginal followed by every parent-to-child conditional, each node
//!   contributing exactly one factor.
//! - [`TreeJoint`]: the composed expression tagged with its root.
//! - [`build_forest_joints`]: one joint per root, independently.
//!
//! The walk visits parents before children, so every conditional lands after
//! the factor that covers its parent and the expression's first-coverage
//! order is exactly the traversal order. That ordering is what lets the
//! expression eliminate leaf variables first and keep marginal queries cheap
//! on deep trees.

use std::collections::VecDeque;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::engine::distribution::Factor;
use crate::engine::errors::ModelError;
use crate::engine::expression::JointExpression;
use crate::engine::graph::LatentForest;
use crate::engine::node::NodeId;

/// A joint expression composed from one tree, tagged with the root it was
/// built from.
#[derive(Debug, Clone)]
pub struct TreeJoint {
    root: NodeId,
    expression: JointExpression,
}

impl TreeJoint {
    /// The root the joint was composed from.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The composed joint expression.
    pub fn expression(&self) -> &JointExpression {
        &self.expression
    }

    /// Consumes the joint, yielding the bare expression.
    pub fn into_expression(self) -> JointExpression {
        self.expression
    }
}

/// Composes the joint distribution of the tree rooted at `root`.
///
/// The root contributes its marginal; every other node in the subtree
/// contributes the conditional `P(node | parent)` taken from its parent's
/// child distributions, in edge order. Each node is visited exactly once, so
/// the expression ends up with one marginal and `n - 1` conditionals for an
/// `n`-node tree.
///
/// # Arguments
///
/// * `forest` - the owning forest
/// * `root` - must be a root carrying a marginal distribution
///
/// # Returns
///
/// The composed [`TreeJoint`], or the first structural or missing-data
/// problem found along the walk: a non-root start, a missing marginal, a
/// child-count/distribution-count mismatch, a conditional whose child
/// variable does not match the edge target, or a node reached twice.
pub fn build_tree_joint(forest: &LatentForest, root: NodeId) -> Result<TreeJoint, ModelError> {
    let root_node = forest.node(root)?;
    if let Some(parent) = forest.parent_of(root)? {
        return Err(ModelError::Structural(format!(
            "build_tree_joint: node {root} has parent {parent}; joints are composed from roots"
        )));
    }
    let marginal = root_node.marginal().ok_or_else(|| {
        ModelError::Structural(format!(
            "build_tree_joint: root {root} ('{}') has no marginal distribution",
            root_node.variable().name()
        ))
    })?;

    let mut expression = JointExpression::new();
    expression.push_factor(Factor::Marginal(marginal.clone()))?;

    let mut visited = vec![false; forest.node_count()];
    visited[root.index()] = true;
    let mut queue = VecDeque::new();
    queue.push_back(root);

    while let Some(id) = queue.pop_front() {
        let node = forest.node(id)?;
        let children = forest.children_of(id)?;
        let tables = node.children_distributions();
        if tables.len() != children.len() {
            return Err(ModelError::MissingData(format!(
                "build_tree_joint: node {id} ('{}') has {} children but {} child distributions",
                node.variable().name(),
                children.len(),
                tables.len()
            )));
        }
        for (local, (&child_id, table)) in children.iter().zip(tables.iter()).enumerate() {
            let child = forest.node(child_id)?;
            if table.child().name() != child.variable().name() {
                return Err(ModelError::Structural(format!(
                    "build_tree_joint: node {id} child distribution {local} is over '{}' but the edge points at '{}'",
                    table.child().name(),
                    child.variable().name()
                )));
            }
            if table.child().cardinality() != child.variable().cardinality() {
                return Err(ModelError::Structural(format!(
                    "build_tree_joint: node {id} child distribution {local} gives '{}' {} states but the child has {}",
                    table.child().name(),
                    table.child().cardinality(),
                    child.variable().cardinality()
                )));
            }
            if visited[child_id.index()] {
                return Err(ModelError::Structural(format!(
                    "build_tree_joint: node {child_id} reached twice; the subtree under {root} is not a tree"
                )));
            }
            visited[child_id.index()] = true;
            expression.push_factor(Factor::Conditional(table.clone()))?;
            queue.push_back(child_id);
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        root = %root,
        factors = expression.factor_count(),
        variables = expression.variables().len(),
        "tree joint composed"
    );

    Ok(TreeJoint { root, expression })
}

/// Composes one joint per root of the forest, in ascending root order.
///
/// Trees are independent, so the joints are built independently; with the
/// `rayon` feature enabled the builds run in parallel. The first error from
/// any tree fails the whole call.
pub fn build_forest_joints(forest: &LatentForest) -> Result<Vec<TreeJoint>, ModelError> {
    let roots = forest.roots();
    #[cfg(feature = "rayon")]
    {
        roots
            .par_iter()
            .map(|&root| build_tree_joint(forest, root))
            .collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        roots
            .iter()
            .map(|&root| build_tree_joint(forest, root))
            .collect()
    }
}
