//! End-to-end structural tests: building forests, maintaining levels and
//! positions, composing joints, and the structural failure modes a model
//! builder runs into.

use latree::{
    build_forest_joints, build_tree_joint, ConditionalTable, LatentForest, MarginalTable,
    ModelError, NodeId, ObservationTable, Variable,
};

fn assert_close(actual: f64, expected: f64, tol: f64, label: &str) {
    assert!(
        (actual - expected).abs() <= tol,
        "{label} mismatch: expected {expected:.15}, got {actual:.15}"
    );
}

/// Balanced three-level tree:
///
/// ```text
///            top
///          /     \
///        h1       h2
///       /  \     /  \
///      m1  m2   m3  m4
/// ```
///
/// Leaves carry two samples each; positions are 10/20/30/40.
fn balanced_tree(forest: &mut LatentForest) -> NodeId {
    let top = Variable::binary("top");
    let h1 = Variable::binary("h1");
    let h2 = Variable::binary("h2");

    let mut leaves = Vec::new();
    for (index, name) in ["m1", "m2", "m3", "m4"].iter().enumerate() {
        let variable = Variable::binary(*name);
        let position = 10.0 * (index + 1) as f64;
        let codes = vec![(index % 2) as u16, 0];
        leaves.push(
            forest
                .add_observed_leaf(variable, position, codes)
                .unwrap(),
        );
    }
    let left = forest.add_latent_node(h1.clone()).unwrap();
    let right = forest.add_latent_node(h2.clone()).unwrap();
    let root = forest.add_latent_node(top.clone()).unwrap();

    forest.add_edge(left, leaves[0]).unwrap();
    forest.add_edge(left, leaves[1]).unwrap();
    forest.add_edge(right, leaves[2]).unwrap();
    forest.add_edge(right, leaves[3]).unwrap();
    forest.add_edge(root, left).unwrap();
    forest.add_edge(root, right).unwrap();

    forest
        .set_marginal(root, MarginalTable::new(top.clone(), vec![0.5, 0.5]).unwrap())
        .unwrap();
    for (parent, parent_var, children) in [
        (root, top.clone(), vec![h1.clone(), h2.clone()]),
        (left, h1, vec![Variable::binary("m1"), Variable::binary("m2")]),
        (right, h2, vec![Variable::binary("m3"), Variable::binary("m4")]),
    ] {
        for child_var in children {
            forest
                .add_child_distribution(
                    parent,
                    ConditionalTable::new(child_var, parent_var.clone(), vec![0.9, 0.1, 0.2, 0.8])
                        .unwrap(),
                )
                .unwrap();
        }
        forest.finalize_child_indexes(parent).unwrap();
    }
    for id in [left, right, root] {
        forest.update_level(id).unwrap();
        forest.update_position(id).unwrap();
    }
    root
}

#[test]
fn levels_and_positions_hold_across_the_tree() {
    let mut forest = LatentForest::new();
    let root = balanced_tree(&mut forest);

    let left = forest.children_of(root).unwrap()[0];
    let right = forest.children_of(root).unwrap()[1];

    assert_eq!(forest.node(root).unwrap().level(), 2);
    assert_eq!(forest.node(left).unwrap().level(), 1);
    for leaf in forest.leaves_reachable_from(root).unwrap() {
        assert_eq!(forest.node(leaf).unwrap().level(), 0);
    }

    // positions: h1 = (10+20)/2, h2 = (30+40)/2, top = (15+35)/2
    assert_close(forest.node(left).unwrap().position(), 15.0, 1e-12, "h1 position");
    assert_close(forest.node(right).unwrap().position(), 35.0, 1e-12, "h2 position");
    assert_close(forest.node(root).unwrap().position(), 25.0, 1e-12, "top position");

    let findings = forest.validate_structure().unwrap();
    assert!(findings.is_empty(), "unexpected findings: {findings:?}");
}

#[test]
fn names_and_nodes_map_one_to_one() {
    let mut forest = LatentForest::new();
    let root = balanced_tree(&mut forest);

    for id in forest.subtree_nodes(root).unwrap() {
        let name = forest.node(id).unwrap().variable().name().to_string();
        assert_eq!(forest.resolve(&name).unwrap(), id);
        assert_eq!(forest.node_by_name(&name).unwrap().id(), id);
    }

    // a second node under an existing name never enters the arena
    let before = forest.node_count();
    let err = forest.add_latent_node(Variable::binary("m1")).unwrap_err();
    assert!(matches!(err, ModelError::Structural(_)), "got {err:?}");
    assert_eq!(forest.node_count(), before);
}

#[test]
fn composition_uses_every_node_exactly_once() {
    let mut forest = LatentForest::new();
    let root = balanced_tree(&mut forest);

    let joint = build_tree_joint(&forest, root).unwrap();
    let expr = joint.expression();

    assert_eq!(expr.factor_count(), 7);
    assert_eq!(expr.marginal_factor_count(), 1);
    assert_eq!(expr.conditional_factor_count(), 6);

    // coverage is complete: every variable in the subtree, root first
    let covered: Vec<&str> = expr.variables().iter().map(|v| v.name()).collect();
    assert_eq!(covered, vec!["top", "h1", "h2", "m1", "m2", "m3", "m4"]);
    for id in forest.subtree_nodes(root).unwrap() {
        assert!(expr.covers(forest.node(id).unwrap().variable()));
    }
}

#[test]
fn one_parent_rule_and_acyclicity_are_enforced() {
    let mut forest = LatentForest::new();
    let root = balanced_tree(&mut forest);
    let left = forest.children_of(root).unwrap()[0];
    let m1 = forest.resolve("m1").unwrap();

    // m1 already hangs under h1
    let err = forest.add_edge(root, m1).unwrap_err();
    assert!(matches!(err, ModelError::Structural(_)), "got {err:?}");

    // h1 -> top would close a cycle
    let err = forest.add_edge(left, root).unwrap_err();
    assert!(matches!(err, ModelError::Structural(_)), "got {err:?}");

    assert!(forest.is_ancestor_of(root, m1).unwrap());
    assert!(!forest.is_ancestor_of(m1, root).unwrap());
}

#[test]
fn composing_from_a_non_root_is_structural() {
    let mut forest = LatentForest::new();
    let root = balanced_tree(&mut forest);
    let left = forest.children_of(root).unwrap()[0];

    let err = build_tree_joint(&forest, left).unwrap_err();
    assert!(matches!(err, ModelError::Structural(_)), "got {err:?}");
}

#[test]
fn incomplete_distributions_fail_composition() {
    let top = Variable::binary("top");
    let m1 = Variable::binary("m1");
    let m2 = Variable::binary("m2");

    let mut forest = LatentForest::new();
    let l1 = forest.add_observed_leaf(m1.clone(), 0.0, vec![0]).unwrap();
    let l2 = forest.add_observed_leaf(m2, 1.0, vec![1]).unwrap();
    let root = forest.add_latent_node(top.clone()).unwrap();
    forest.add_edge(root, l1).unwrap();
    forest.add_edge(root, l2).unwrap();
    forest
        .set_marginal(root, MarginalTable::new(top.clone(), vec![0.6, 0.4]).unwrap())
        .unwrap();
    // only one of the two required conditionals
    forest
        .add_child_distribution(
            root,
            ConditionalTable::new(m1, top, vec![0.9, 0.1, 0.2, 0.8]).unwrap(),
        )
        .unwrap();

    let err = build_tree_joint(&forest, root).unwrap_err();
    assert!(matches!(err, ModelError::MissingData(_)), "got {err:?}");
}

#[test]
fn forest_composes_trees_independently() {
    let mut forest = LatentForest::new();
    let big = balanced_tree(&mut forest);

    let solo = Variable::binary("solo");
    let lone = forest.add_latent_node(solo.clone()).unwrap();
    forest
        .set_marginal(lone, MarginalTable::new(solo, vec![0.1, 0.9]).unwrap())
        .unwrap();

    let joints = build_forest_joints(&forest).unwrap();
    assert_eq!(joints.len(), 2);
    assert_eq!(joints[0].root(), big);
    assert_eq!(joints[1].root(), lone);
    assert_eq!(joints[0].expression().factor_count(), 7);
    assert_eq!(joints[1].expression().factor_count(), 1);

    // neither joint covers the other's variables
    assert!(!joints[0].expression().covers_name("solo"));
    assert!(!joints[1].expression().covers_name("top"));
}

#[test]
fn mixed_leaf_backings_agree_on_samples() {
    let top = Variable::binary("top");
    let raw_var = Variable::binary("raw");
    let derived_var = Variable::new("derived", 3);

    let mut forest = LatentForest::new();
    let raw = forest.add_observed_leaf(raw_var.clone(), 0.0, vec![0, 1]).unwrap();
    let derived = forest
        .add_derived_leaf(
            derived_var.clone(),
            1.0,
            ObservationTable::new(3, vec![0.7, 0.2, 0.1, 0.1, 0.1, 0.8]).unwrap(),
        )
        .unwrap();
    let root = forest.add_latent_node(top.clone()).unwrap();
    forest.add_edge(root, raw).unwrap();
    forest.add_edge(root, derived).unwrap();
    forest
        .set_marginal(root, MarginalTable::new(top.clone(), vec![0.5, 0.5]).unwrap())
        .unwrap();
    forest
        .add_child_distribution(
            root,
            ConditionalTable::new(raw_var, top.clone(), vec![0.9, 0.1, 0.2, 0.8]).unwrap(),
        )
        .unwrap();
    forest
        .add_child_distribution(
            root,
            ConditionalTable::new(derived_var, top, vec![0.6, 0.3, 0.1, 0.1, 0.3, 0.6]).unwrap(),
        )
        .unwrap();
    forest.finalize_child_indexes(root).unwrap();
    forest.update_level(root).unwrap();
    forest.update_position(root).unwrap();

    assert_eq!(forest.sample_count(root).unwrap(), 2);
    let findings = forest.validate_structure().unwrap();
    assert!(findings.is_empty(), "unexpected findings: {findings:?}");

    let (hard, soft) = forest.leaf_evidence(root, 0).unwrap();
    assert_eq!(hard.get_by_name("raw"), Some(0));
    assert_eq!(soft.len(), 1);
    assert_eq!(soft[0].weights(), &[0.7, 0.2, 0.1]);
}

#[test]
fn validation_reports_drift_without_failing() {
    let mut forest = LatentForest::new();
    let root = balanced_tree(&mut forest);

    // grow a new subtree without refreshing the root's metadata
    let extra = Variable::binary("m5");
    let leaf = forest.add_observed_leaf(extra.clone(), 90.0, vec![0, 0]).unwrap();
    forest.add_edge(root, leaf).unwrap();
    forest
        .add_child_distribution(
            root,
            ConditionalTable::new(extra, Variable::binary("top"), vec![0.5, 0.5, 0.5, 0.5])
                .unwrap(),
        )
        .unwrap();

    let findings = forest.validate_structure().unwrap();
    // stale position (the new child moved the mean) and a stale local map
    assert!(!findings.is_empty());
    assert!(
        findings.iter().any(|f| f.contains("position")),
        "findings: {findings:?}"
    );
    assert!(
        findings.iter().any(|f| f.contains("local index map")),
        "findings: {findings:?}"
    );

    // repair and re-validate
    forest.finalize_child_indexes(root).unwrap();
    forest.update_level(root).unwrap();
    forest.update_position(root).unwrap();
    let findings = forest.validate_structure().unwrap();
    assert!(findings.is_empty(), "unexpected findings: {findings:?}");
}
