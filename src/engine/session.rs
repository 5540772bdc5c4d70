//! # Inference Sessions
//!
//! The query surface over a composed tree joint.
//!
//! ## Key Components
//!
//! - [`InferenceSession`]: owns one tree's joint expression and answers
//!   conditional and evidence queries against it.
//! - [`forest_sessions`]: one session per root of a forest.
//!
//! A session is a frozen snapshot: it owns the joint it was built from, so
//! later mutation of the forest never leaks into answers already being
//! served. Queries are strict about coverage — naming a variable the
//! session's tree does not contain is an unsupported-query error, not a
//! silent marginalization.

use crate::engine::distribution::SoftEvidence;
use crate::engine::errors::ModelError;
use crate::engine::expression::{ConditionalExpression, JointExpression};
use crate::engine::graph::LatentForest;
use crate::engine::joint::{build_forest_joints, build_tree_joint, TreeJoint};
use crate::engine::node::NodeId;
use crate::engine::variable::{Assignment, Variable};

/// An immutable query session over one tree's joint distribution.
#[derive(Debug, Clone)]
pub struct InferenceSession {
    root: NodeId,
    joint: JointExpression,
}

impl InferenceSession {
    /// Wraps an already-composed tree joint.
    pub fn new(joint: TreeJoint) -> Self {
        let root = joint.root();
        let joint = joint.into_expression();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            root = %root,
            variables = joint.variables().len(),
            "inference session opened"
        );
        Self { root, joint }
    }

    /// Composes the tree under `root` and opens a session over it.
    pub fn for_root(forest: &LatentForest, root: NodeId) -> Result<Self, ModelError> {
        Ok(Self::new(build_tree_joint(forest, root)?))
    }

    /// The root of the tree this session answers for.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The underlying joint expression.
    pub fn joint(&self) -> &JointExpression {
        &self.joint
    }

    /// Variables the session can answer about, in first-coverage order.
    pub fn covered_variables(&self) -> &[Variable] {
        self.joint.variables()
    }

    /// Whether the session's tree contains a variable with this name.
    pub fn covers(&self, name: &str) -> bool {
        self.joint.covers_name(name)
    }

    /// Forms the conditional `P(query | known)`.
    ///
    /// # Arguments
    ///
    /// * `query` - the variables to distribute over; must be non-empty,
    ///   duplicate-free, covered by this tree, and disjoint from `known`
    /// * `known` - hard evidence to condition on; every named variable must
    ///   be covered by this tree
    ///
    /// # Returns
    ///
    /// A [`ConditionalExpression`] borrowing this session, or an
    /// unsupported-query error for a malformed query, or a numerical error
    /// when the known assignment has zero probability under the joint.
    pub fn ask(
        &self,
        query: &[Variable],
        known: &Assignment,
    ) -> Result<ConditionalExpression<'_>, ModelError> {
        if query.is_empty() {
            return Err(ModelError::UnsupportedQuery(format!(
                "ask: query over the tree at {} must name at least one variable",
                self.root
            )));
        }
        for (position, variable) in query.iter().enumerate() {
            if !self.joint.covers(variable) {
                return Err(ModelError::UnsupportedQuery(format!(
                    "ask: variable '{}' is not part of the tree at {}",
                    variable.name(),
                    self.root
                )));
            }
            if known.contains(variable) {
                return Err(ModelError::UnsupportedQuery(format!(
                    "ask: variable '{}' appears in both the query and the known assignment",
                    variable.name()
                )));
            }
            if query[..position].iter().any(|earlier| earlier == variable) {
                return Err(ModelError::UnsupportedQuery(format!(
                    "ask: variable '{}' appears twice in the query",
                    variable.name()
                )));
            }
        }
        self.require_covered("ask", known)?;
        ConditionalExpression::new(&self.joint, query.to_vec(), known.clone())
    }

    /// `P(evidence)` under this tree's joint.
    ///
    /// Unlike the raw expression, the session insists every named variable
    /// belongs to its tree.
    pub fn evidence_probability(&self, evidence: &Assignment) -> Result<f64, ModelError> {
        self.require_covered("evidence_probability", evidence)?;
        self.joint.marginal_probability(evidence)
    }

    /// `P(evidence)` with additional soft (virtual) evidence weights.
    ///
    /// Hard assignments and soft weights must target disjoint, covered
    /// variables; the expression layer enforces the disjointness.
    pub fn soft_evidence_probability(
        &self,
        evidence: &Assignment,
        soft: &[SoftEvidence],
    ) -> Result<f64, ModelError> {
        self.require_covered("soft_evidence_probability", evidence)?;
        self.joint.soft_marginal_probability(evidence, soft)
    }

    fn require_covered(&self, op: &str, assignment: &Assignment) -> Result<(), ModelError> {
        for (name, _) in assignment.iter() {
            if !self.joint.covers_name(name) {
                return Err(ModelError::UnsupportedQuery(format!(
                    "{op}: variable '{name}' is not part of the tree at {}",
                    self.root
                )));
            }
        }
        Ok(())
    }
}

/// Opens one session per root of the forest, in ascending root order.
pub fn forest_sessions(forest: &LatentForest) -> Result<Vec<InferenceSession>, ModelError> {
    Ok(build_forest_joints(forest)?
        .into_iter()
        .map(InferenceSession::new)
        .collect())
}
