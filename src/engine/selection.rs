//! # Model Selection
//!
//! Likelihood-based scoring of candidate trees against their observed
//! leaves.
//!
//! ## Key Components
//!
//! - [`log_likelihood`]: total log-probability of the leaf data under one
//!   tree, each sample entering as hard or soft evidence.
//! - [`parameter_count`]: free parameters of a tree's distributions.
//! - [`ScoreCriterion`] / [`score_tree`]: AIC and BIC penalized scores,
//!   lower is better.
//! - [`select_best_tree`]: ranks candidate roots and picks the winner.
//!
//! Per-sample probabilities are clamped to [`MIN_PROBABILITY`] before the
//! logarithm, so a structurally possible but numerically impossible sample
//! drags the score down hard instead of poisoning it with infinities.

use std::cmp::Ordering;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::engine::errors::ModelError;
use crate::engine::graph::LatentForest;
use crate::engine::node::NodeId;
use crate::engine::session::InferenceSession;

/// Floor applied to per-sample probabilities before taking the logarithm.
pub const MIN_PROBABILITY: f64 = 1e-300;

/// Penalized-likelihood criterion for comparing trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScoreCriterion {
    /// Akaike information criterion, `2k - 2·LL`.
    Aic,
    /// Bayesian information criterion, `k·ln(n) - 2·LL`.
    Bic,
}

/// One tree's fit summary under a criterion. Lower `score` is better.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeScore {
    /// Root of the scored tree.
    pub root: NodeId,
    /// Total log-likelihood of the leaf data.
    pub log_likelihood: f64,
    /// Free parameters in the tree's distributions.
    pub parameter_count: usize,
    /// Samples behind the leaves.
    pub sample_count: usize,
    /// The penalized score, per the chosen criterion.
    pub score: f64,
}

/// Outcome of ranking candidate trees.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectedTree {
    /// The winning tree's score.
    pub best: TreeScore,
    /// Every candidate's score, best first.
    pub ranked: Vec<TreeScore>,
}

fn sample_log_prob(
    forest: &LatentForest,
    session: &InferenceSession,
    root: NodeId,
    sample: usize,
) -> Result<f64, ModelError> {
    let (hard, soft) = forest.leaf_evidence(root, sample)?;
    let p = session.soft_evidence_probability(&hard, &soft)?;
    Ok(p.max(MIN_PROBABILITY).ln())
}

/// Total log-likelihood of the observed leaves under the tree at `root`.
///
/// Raw leaves contribute their sample's code as hard evidence, derived
/// leaves their observation row as soft evidence. Samples are independent;
/// with the `rayon` feature they are scored in parallel.
pub fn log_likelihood(forest: &LatentForest, root: NodeId) -> Result<f64, ModelError> {
    let session = InferenceSession::for_root(forest, root)?;
    let samples = forest.sample_count(root)?;

    #[cfg(feature = "rayon")]
    let total = (0..samples)
        .into_par_iter()
        .map(|sample| sample_log_prob(forest, &session, root, sample))
        .collect::<Result<Vec<f64>, ModelError>>()?
        .iter()
        .sum::<f64>();

    #[cfg(not(feature = "rayon"))]
    let total = {
        let mut acc = 0.0;
        for sample in 0..samples {
            acc += sample_log_prob(forest, &session, root, sample)?;
        }
        acc
    };

    Ok(total)
}

/// Number of free parameters in the tree at `root`.
///
/// A marginal over `c` states contributes `c - 1`; a conditional
/// `P(child | parent)` contributes `(child_states - 1) · parent_states`,
/// one short row per parent state.
pub fn parameter_count(forest: &LatentForest, root: NodeId) -> Result<usize, ModelError> {
    if forest.parent_of(root)?.is_some() {
        return Err(ModelError::Structural(format!(
            "parameter_count: node {root} is not a root"
        )));
    }
    let mut count = 0;
    for id in forest.subtree_nodes(root)? {
        let node = forest.node(id)?;
        if id == root {
            let marginal = node.marginal().ok_or_else(|| {
                ModelError::Structural(format!(
                    "parameter_count: root {root} ('{}') has no marginal distribution",
                    node.variable().name()
                ))
            })?;
            count += marginal.variable().cardinality() - 1;
        }
        for table in node.children_distributions() {
            count += (table.child().cardinality() - 1) * table.parent().cardinality();
        }
    }
    Ok(count)
}

/// Scores the tree at `root` under a criterion.
///
/// # Returns
///
/// The filled [`TreeScore`], or a missing-data error when the tree has no
/// samples to score against.
pub fn score_tree(
    forest: &LatentForest,
    root: NodeId,
    criterion: ScoreCriterion,
) -> Result<TreeScore, ModelError> {
    let samples = forest.sample_count(root)?;
    if samples == 0 {
        return Err(ModelError::MissingData(format!(
            "score_tree: no samples behind the leaves of root {root}"
        )));
    }
    let ll = log_likelihood(forest, root)?;
    let params = parameter_count(forest, root)?;
    let k = params as f64;
    let score = match criterion {
        ScoreCriterion::Aic => 2.0 * k - 2.0 * ll,
        ScoreCriterion::Bic => k * (samples as f64).ln() - 2.0 * ll,
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        root = %root,
        criterion = ?criterion,
        log_likelihood = ll,
        parameters = params,
        samples,
        score,
        "tree scored"
    );

    Ok(TreeScore {
        root,
        log_likelihood: ll,
        parameter_count: params,
        sample_count: samples,
        score,
    })
}

/// Scores every candidate root and returns them ranked, best first.
///
/// Ties on score break toward the lower root id, so selection is
/// deterministic. An empty candidate list is an unsupported query.
pub fn select_best_tree(
    forest: &LatentForest,
    candidates: &[NodeId],
    criterion: ScoreCriterion,
) -> Result<SelectedTree, ModelError> {
    if candidates.is_empty() {
        return Err(ModelError::UnsupportedQuery(
            "select_best_tree: candidate list must not be empty".to_string(),
        ));
    }
    let mut ranked = candidates
        .iter()
        .map(|&root| score_tree(forest, root, criterion))
        .collect::<Result<Vec<TreeScore>, ModelError>>()?;
    ranked.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(Ordering::Equal)
            .then(a.root.cmp(&b.root))
    });
    let best = ranked[0].clone();
    Ok(SelectedTree { best, ranked })
}
