//! # Latree
//!
//! Hierarchical tree models over discrete random variables, with exact
//! inference by composition.
//!
//! A model is a forest: latent variables inside the trees, observed leaves
//! at the bottom, a marginal distribution at each root and one conditional
//! table per edge. Composing a tree multiplies those tables into a factored
//! joint expression that answers marginal, conditional, and soft-evidence
//! queries by eliminating variables leaf-first — the full joint table is
//! never materialized, so deep trees stay cheap to query.
//!
//! ```
//! use latree::{
//!     Assignment, ConditionalTable, InferenceSession, LatentForest, MarginalTable, Variable,
//! };
//!
//! # fn main() -> Result<(), latree::ModelError> {
//! let rain = Variable::binary("rain");
//! let wet = Variable::binary("wet");
//!
//! let mut forest = LatentForest::new();
//! let leaf = forest.add_observed_leaf(wet.clone(), 0.0, vec![0, 1, 1])?;
//! let root = forest.add_latent_node(rain.clone())?;
//! forest.add_edge(root, leaf)?;
//! forest.set_marginal(root, MarginalTable::new(rain.clone(), vec![0.8, 0.2])?)?;
//! forest.add_child_distribution(
//!     root,
//!     ConditionalTable::new(wet.clone(), rain.clone(), vec![0.9, 0.1, 0.2, 0.8])?,
//! )?;
//!
//! let session = InferenceSession::for_root(&forest, root)?;
//!
//! // P(wet=1) = 0.8*0.1 + 0.2*0.8
//! let p = session.evidence_probability(&Assignment::new().with(&wet, 1)?)?;
//! assert!((p - 0.24).abs() < 1e-12);
//!
//! // posterior P(rain=1 | wet=1) = 0.16 / 0.24
//! let posterior = session.ask(&[rain.clone()], &Assignment::new().with(&wet, 1)?)?;
//! let p = posterior.probability(&Assignment::new().with(&rain, 1)?)?;
//! assert!((p - 16.0 / 24.0).abs() < 1e-12);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod engine;

// Re-export commonly used types
pub use engine::distribution::{
    ConditionalTable, Factor, MarginalTable, ObservationTable, SoftEvidence, PROBABILITY_TOLERANCE,
};
pub use engine::errors::ModelError;
pub use engine::expression::{ConditionalExpression, JointExpression};
pub use engine::graph::{LatentForest, POSITION_TOLERANCE};
pub use engine::joint::{build_forest_joints, build_tree_joint, TreeJoint};
pub use engine::node::{LeafBacking, Node, NodeId};
pub use engine::selection::{
    log_likelihood, parameter_count, score_tree, select_best_tree, ScoreCriterion, SelectedTree,
    TreeScore, MIN_PROBABILITY,
};
pub use engine::session::{forest_sessions, InferenceSession};
pub use engine::variable::{Assignment, Variable, VariableRegistry};
