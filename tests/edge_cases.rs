//! Edge case tests for ambit.
//!
//! Unusual inputs and boundary conditions: single entries, degenerate
//! metrics, zero and negative radii, argument errors, and reuse after
//! clearing.

use ambit::{MTree, MTreeError, PartitionAlgorithm, SplitPolicy};

fn abs_tree<const C: usize>() -> MTree<f64, u32, f64, C> {
    MTree::new(|a: &f64, b: &f64| (a - b).abs()).expect("capacity is valid")
}

// =============================================================================
// Single-entry trees
// =============================================================================

#[test]
fn single_value_is_found_by_both_queries() {
    let mut tree = abs_tree::<3>();
    tree.insert(1, 42.0);

    assert_eq!(tree.len(), 1);
    assert!(!tree.is_empty());
    assert_eq!(tree.range(&42.0, 0.0), vec![1]);
    assert_eq!(tree.knn(&42.0, 1).expect("k is positive"), vec![(1, 0.0)]);
}

#[test]
fn fresh_tree_is_empty_and_queryable() {
    let tree = abs_tree::<3>();
    assert!(tree.is_empty());
    assert_eq!(tree.len(), 0);
    assert!(tree.range(&0.0, 1e9).is_empty());
    assert!(tree.knn(&0.0, 5).expect("k is positive").is_empty());
}

// =============================================================================
// A small saturated tree
// =============================================================================

#[test]
fn ten_values_split_and_answer_exactly() {
    let mut tree = abs_tree::<3>();
    for id in 0..10u32 {
        tree.insert(id, f64::from(id + 1) * 10.0);
    }
    assert_eq!(tree.len(), 10);
    tree.check_invariants().expect("tree is consistent");

    // Values in [40, 70] are ids 3..=6.
    let mut in_range = tree.range(&55.0, 15.0);
    in_range.sort_unstable();
    assert_eq!(in_range, vec![3, 4, 5, 6]);

    let nearest = tree.knn(&55.0, 3).expect("k is positive");
    let dists: Vec<f64> = nearest.iter().map(|(_, d)| *d).collect();
    assert_eq!(dists, vec![5.0, 5.0, 15.0]);
    let mut two_closest = [nearest[0].0, nearest[1].0];
    two_closest.sort_unstable();
    assert_eq!(two_closest, [4, 5]);
    assert!(nearest[2].0 == 3 || nearest[2].0 == 6);
}

// =============================================================================
// Argument errors and degenerate radii
// =============================================================================

#[test]
fn capacity_below_two_is_rejected() {
    let result = MTree::<f64, u32, f64, 1>::new(|a: &f64, b: &f64| (a - b).abs());
    assert!(matches!(result, Err(MTreeError::InvalidArgument(_))));
}

#[test]
fn knn_with_zero_k_is_rejected() {
    let mut tree = abs_tree::<3>();
    tree.insert(1, 5.0);
    assert!(matches!(
        tree.knn(&5.0, 0),
        Err(MTreeError::InvalidArgument(_))
    ));
}

#[test]
fn negative_radius_matches_nothing() {
    let mut tree = abs_tree::<3>();
    tree.insert(1, 5.0);
    assert!(tree.range(&5.0, -1.0).is_empty());
}

#[test]
fn zero_radius_matches_exact_values_only() {
    let mut tree = abs_tree::<3>();
    tree.insert(1, 5.0);
    tree.insert(2, 6.0);
    assert_eq!(tree.range(&5.0, 0.0), vec![1]);
}

// =============================================================================
// k larger than the stored set
// =============================================================================

#[test]
fn oversized_k_returns_every_value_once() {
    let mut tree = abs_tree::<3>();
    for id in 0..5u32 {
        tree.insert(id, f64::from(id) * 3.0);
    }
    let nearest = tree.knn(&7.0, 50).expect("k is positive");
    assert_eq!(nearest.len(), 5);
    for i in 0..nearest.len() {
        for j in (i + 1)..nearest.len() {
            assert_ne!(nearest[i].0, nearest[j].0, "duplicate id in results");
        }
        if i + 1 < nearest.len() {
            assert!(nearest[i].1 <= nearest[i + 1].1, "distances not ascending");
        }
    }
}

// =============================================================================
// Clearing
// =============================================================================

#[test]
fn clear_is_idempotent_and_the_tree_stays_usable() {
    let mut tree = abs_tree::<3>();
    for id in 0..20u32 {
        tree.insert(id, f64::from(id));
    }
    tree.clear();
    tree.clear();
    assert!(tree.is_empty());
    assert!(tree.range(&3.0, 100.0).is_empty());

    tree.insert(7, 3.5);
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.range(&3.0, 1.0), vec![7]);
    tree.check_invariants().expect("tree is consistent");
}

// =============================================================================
// Degenerate metrics
// =============================================================================

#[test]
fn zero_metric_builds_a_valid_tree_and_range_finds_everything() {
    let mut tree: MTree<f64, u32, f64, 3> =
        MTree::new(|_: &f64, _: &f64| 0.0).expect("capacity is valid");
    for id in 0..10u32 {
        tree.insert(id, 7.0);
    }
    tree.check_invariants().expect("tree is consistent");

    let mut all = tree.range(&7.0, 0.0);
    all.sort_unstable();
    assert_eq!(all, (0..10).collect::<Vec<u32>>());
}

// =============================================================================
// Reconfiguration mid-stream
// =============================================================================

#[test]
fn switching_policies_on_a_live_tree_keeps_it_consistent() {
    let mut tree = abs_tree::<3>();
    for id in 0..12u32 {
        tree.insert(id, f64::from(id) * 7.0);
    }
    tree.set_split_policy(SplitPolicy::MinRad);
    tree.set_partition_algorithm(PartitionAlgorithm::GenHyperplane);
    for id in 12..30u32 {
        tree.insert(id, f64::from(id) * 7.0);
    }
    tree.check_invariants().expect("tree is consistent");
    assert_eq!(tree.len(), 30);

    let mut got = tree.range(&100.0, 30.0);
    got.sort_unstable();
    // Values i*7 within [70, 130] are ids 10..=18.
    assert_eq!(got, (10..=18).collect::<Vec<u32>>());
}

#[test]
fn replacing_the_distance_function_with_an_equivalent_one_is_transparent() {
    let mut tree = abs_tree::<3>();
    for id in 0..8u32 {
        tree.insert(id, f64::from(id));
    }
    tree.set_distance_function(|a: &f64, b: &f64| if a > b { a - b } else { b - a });
    tree.check_invariants().expect("metrics agree");
    let nearest = tree.knn(&2.2, 1).expect("k is positive");
    assert_eq!(nearest[0].0, 2);
    assert!((nearest[0].1 - 0.2).abs() < 1e-9);
}

// =============================================================================
// Smallest legal capacity
// =============================================================================

#[test]
fn capacity_two_tree_works() {
    let mut tree = abs_tree::<2>();
    for id in 0..16u32 {
        tree.insert(id, f64::from(id) * 2.0);
    }
    tree.check_invariants().expect("tree is consistent");
    let mut got = tree.range(&9.0, 3.0);
    got.sort_unstable();
    // Values 2i within [6, 12] are ids 3..=6.
    assert_eq!(got, vec![3, 4, 5, 6]);
}
