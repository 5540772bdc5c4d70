//! End-to-end model selection: likelihood scoring across candidate trees
//! and the AIC/BIC trade-off between fit and complexity.

use latree::{
    select_best_tree, score_tree, ConditionalTable, LatentForest, MarginalTable, ModelError,
    NodeId, ScoreCriterion, Variable,
};

fn assert_close(actual: f64, expected: f64, tol: f64, label: &str) {
    assert!(
        (actual - expected).abs() <= tol,
        "{label} mismatch: expected {expected:.15}, got {actual:.15}"
    );
}

/// A two-leaf star with an all-zeros sample column of length `samples`.
///
/// The root's cardinality and the per-leaf CPT rows are the knobs; both
/// leaves share the same CPT so closed forms stay short.
fn add_star(
    forest: &mut LatentForest,
    prefix: &str,
    marginal: Vec<f64>,
    cpt_rows: Vec<f64>,
    samples: usize,
) -> NodeId {
    let t = Variable::new(format!("{prefix}_t"), marginal.len());
    let a = Variable::binary(format!("{prefix}_a"));
    let b = Variable::binary(format!("{prefix}_b"));
    let leaf_a = forest
        .add_observed_leaf(a.clone(), 0.0, vec![0; samples])
        .unwrap();
    let leaf_b = forest
        .add_observed_leaf(b.clone(), 1.0, vec![0; samples])
        .unwrap();
    let root = forest.add_latent_node(t.clone()).unwrap();
    forest.add_edge(root, leaf_a).unwrap();
    forest.add_edge(root, leaf_b).unwrap();
    forest
        .set_marginal(root, MarginalTable::new(t.clone(), marginal).unwrap())
        .unwrap();
    forest
        .add_child_distribution(
            root,
            ConditionalTable::new(a, t.clone(), cpt_rows.clone()).unwrap(),
        )
        .unwrap();
    forest
        .add_child_distribution(root, ConditionalTable::new(b, t, cpt_rows).unwrap())
        .unwrap();
    root
}

#[test]
fn aic_and_bic_can_disagree_on_complexity() {
    let mut forest = LatentForest::new();
    // rich: 3-state latent, 8 parameters, per-sample P = 1.6225/3
    let rich = add_star(
        &mut forest,
        "rich",
        vec![1.0 / 3.0; 3],
        vec![0.9, 0.1, 0.75, 0.25, 0.5, 0.5],
        20,
    );
    // lean: binary latent, 5 parameters, per-sample P = 0.445
    let lean = add_star(
        &mut forest,
        "lean",
        vec![0.5, 0.5],
        vec![0.8, 0.2, 0.5, 0.5],
        20,
    );

    let n = 20.0f64;
    let ll_rich = n * (1.6225f64 / 3.0).ln();
    let ll_lean = n * 0.445f64.ln();

    // the extra latent state buys ~3.9 nats of fit for 3 extra parameters:
    // worth it under AIC's flat 2-per-parameter price, not under BIC's ln(20)
    let by_aic = select_best_tree(&forest, &[rich, lean], ScoreCriterion::Aic).unwrap();
    assert_eq!(by_aic.best.root, rich);
    assert_close(by_aic.best.score, 2.0 * 8.0 - 2.0 * ll_rich, 1e-9, "AIC winner score");

    let by_bic = select_best_tree(&forest, &[rich, lean], ScoreCriterion::Bic).unwrap();
    assert_eq!(by_bic.best.root, lean);
    assert_close(
        by_bic.best.score,
        5.0 * n.ln() - 2.0 * ll_lean,
        1e-9,
        "BIC winner score",
    );
}

#[test]
fn ranking_orders_every_candidate() {
    let mut forest = LatentForest::new();
    let strong = add_star(
        &mut forest,
        "strong",
        vec![0.5, 0.5],
        vec![0.95, 0.05, 0.6, 0.4],
        10,
    );
    let middle = add_star(
        &mut forest,
        "middle",
        vec![0.5, 0.5],
        vec![0.8, 0.2, 0.5, 0.5],
        10,
    );
    let weak = add_star(
        &mut forest,
        "weak",
        vec![0.5, 0.5],
        vec![0.3, 0.7, 0.1, 0.9],
        10,
    );

    let selected = select_best_tree(&forest, &[weak, strong, middle], ScoreCriterion::Aic).unwrap();
    assert_eq!(selected.ranked.len(), 3);
    assert_eq!(selected.best.root, selected.ranked[0].root);

    let order: Vec<NodeId> = selected.ranked.iter().map(|s| s.root).collect();
    assert_eq!(order, vec![strong, middle, weak]);
    assert!(selected.ranked[0].score <= selected.ranked[1].score);
    assert!(selected.ranked[1].score <= selected.ranked[2].score);
}

#[test]
fn forest_roots_make_natural_candidates() {
    let mut forest = LatentForest::new();
    add_star(
        &mut forest,
        "one",
        vec![0.5, 0.5],
        vec![0.9, 0.1, 0.2, 0.8],
        5,
    );
    add_star(
        &mut forest,
        "two",
        vec![0.5, 0.5],
        vec![0.7, 0.3, 0.4, 0.6],
        5,
    );

    let roots = forest.roots();
    assert_eq!(roots.len(), 2);
    let selected = select_best_tree(&forest, &roots, ScoreCriterion::Bic).unwrap();
    assert_eq!(selected.ranked.len(), 2);
    assert!(roots.contains(&selected.best.root));
}

#[test]
fn scores_carry_their_components() {
    let mut forest = LatentForest::new();
    let root = add_star(
        &mut forest,
        "x",
        vec![0.5, 0.5],
        vec![0.8, 0.2, 0.5, 0.5],
        12,
    );

    let score = score_tree(&forest, root, ScoreCriterion::Bic).unwrap();
    assert_eq!(score.root, root);
    assert_eq!(score.parameter_count, 5);
    assert_eq!(score.sample_count, 12);
    assert!(score.log_likelihood < 0.0);
    assert_close(
        score.score,
        5.0 * 12.0f64.ln() - 2.0 * score.log_likelihood,
        1e-9,
        "BIC assembly",
    );
}

#[test]
fn candidate_failures_propagate() {
    let mut forest = LatentForest::new();
    let scored = add_star(
        &mut forest,
        "ok",
        vec![0.5, 0.5],
        vec![0.8, 0.2, 0.5, 0.5],
        4,
    );
    // a candidate with no samples cannot be scored
    let dataless = add_star(
        &mut forest,
        "empty",
        vec![0.5, 0.5],
        vec![0.8, 0.2, 0.5, 0.5],
        0,
    );

    let err = select_best_tree(&forest, &[scored, dataless], ScoreCriterion::Aic).unwrap_err();
    assert!(matches!(err, ModelError::MissingData(_)), "got {err:?}");

    let err = select_best_tree(&forest, &[], ScoreCriterion::Aic).unwrap_err();
    assert!(matches!(err, ModelError::UnsupportedQuery(_)), "got {err:?}");
}
