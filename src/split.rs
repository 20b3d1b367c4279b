//! Node overflow handling: promotion policies and partition algorithms.
//!
//! A split takes the `C + 1` entries of an overflowing node plus newcomer,
//! promotes two of them to pivots, partitions the bag between the pivots,
//! and installs the two resulting routing entries in the parent —
//! recursively splitting upward when the parent overflows in turn, and
//! growing a new root when the overflow reaches the top.
//!
//! All pairwise distances over the bag are computed once per split and
//! shared by promotion and partitioning, so even the pair-enumerating
//! policies spend `O(C²)` metric calls per split, not `O(C⁴)`.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::Rng;
use smallvec::SmallVec;

use crate::distance::DistanceValue;
use crate::node::{LeafEntry, Node, NodeId, NodeKind, RoutingEntry};
use crate::tree::MTree;

/// How the two replacement pivots are chosen when a node overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Enumerate all pivot pairs; minimize the sum of the two covering
    /// radii. The most expensive policy.
    MinRad,
    /// Enumerate all pivot pairs; minimize the larger of the two covering
    /// radii.
    MinMaxRad,
    /// Promote the two entries farthest from each other (maximum lower
    /// bound on distance). The default.
    MLbDist,
    /// Promote two distinct entries uniformly at random.
    Random,
    /// Draw several random pivot pairs and keep the one with the smallest
    /// covering-radius sum.
    Sampling,
}

/// How the overflowing bag is distributed between the two new pivots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionAlgorithm {
    /// Pivots alternate turns, each taking its nearest unassigned entry.
    /// Produces an exactly even split for even bags. The default.
    Balanced,
    /// Every entry goes to its nearer pivot (ties to the first). Cheaper,
    /// but the split can be arbitrarily lopsided.
    GenHyperplane,
}

/// All pairwise distances over a split bag, symmetric with a zero diagonal.
pub(crate) struct DistanceMatrix<R> {
    n: usize,
    cells: Vec<R>,
}

impl<R: DistanceValue> DistanceMatrix<R> {
    pub(crate) fn build<T>(distance: &dyn Fn(&T, &T) -> R, values: &[&T]) -> Self {
        let n = values.len();
        let mut cells = vec![R::ZERO; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = distance(values[i], values[j]);
                cells[i * n + j] = d;
                cells[j * n + i] = d;
            }
        }
        Self { n, cells }
    }

    #[inline]
    pub(crate) fn get(&self, i: usize, j: usize) -> R {
        self.cells[i * self.n + j]
    }
}

/// Common face of leaf and routing entries during a split.
pub(crate) trait SplitEntry<T, R> {
    /// The value the metric sees for this entry.
    fn own_value(&self) -> &T;

    fn set_dist_parent(&mut self, dist: R);

    /// Farthest a stored value under this entry can lie from a pivot
    /// `dist` away. For a leaf entry that is `dist` itself; for a routing
    /// entry the entry's own covering radius stacks on top.
    fn reach(&self, dist: R) -> R;
}

impl<T, ID, R: DistanceValue> SplitEntry<T, R> for LeafEntry<T, ID, R> {
    fn own_value(&self) -> &T {
        &self.value
    }

    fn set_dist_parent(&mut self, dist: R) {
        self.dist_parent = dist;
    }

    fn reach(&self, dist: R) -> R {
        dist
    }
}

impl<T, R: DistanceValue> SplitEntry<T, R> for RoutingEntry<T, R> {
    fn own_value(&self) -> &T {
        &self.pivot
    }

    fn set_dist_parent(&mut self, dist: R) {
        self.dist_parent = dist;
    }

    fn reach(&self, dist: R) -> R {
        dist.add_clamped(self.covering_radius)
    }
}

/// Outcome of promote + partition over one bag: the two pivots, the radii
/// their sides induce, and the per-entry side assignment (`true` = second).
pub(crate) struct SplitPlan<T, R> {
    pub(crate) pivot1: T,
    pub(crate) radius1: R,
    pub(crate) pivot2: T,
    pub(crate) radius2: R,
    pub(crate) side: Vec<bool>,
}

struct Assignment<R> {
    side: Vec<bool>,
    radius1: R,
    radius2: R,
}

fn partition_bag<T, R, E>(
    algorithm: PartitionAlgorithm,
    cap: usize,
    bag: &[E],
    p1: usize,
    p2: usize,
    dmat: &DistanceMatrix<R>,
) -> Assignment<R>
where
    R: DistanceValue,
    E: SplitEntry<T, R>,
{
    let side = match algorithm {
        PartitionAlgorithm::Balanced => balanced_sides(cap, bag.len(), p1, p2, dmat),
        PartitionAlgorithm::GenHyperplane => hyperplane_sides(cap, bag.len(), p1, p2, dmat),
    };
    let mut radius1 = R::ZERO;
    let mut radius2 = R::ZERO;
    for (u, e) in bag.iter().enumerate() {
        if side[u] {
            let r = e.reach(dmat.get(p2, u));
            if r.cmp_dist(radius2) == Ordering::Greater {
                radius2 = r;
            }
        } else {
            let r = e.reach(dmat.get(p1, u));
            if r.cmp_dist(radius1) == Ordering::Greater {
                radius1 = r;
            }
        }
    }
    Assignment {
        side,
        radius1,
        radius2,
    }
}

fn balanced_sides<R: DistanceValue>(
    cap: usize,
    n: usize,
    p1: usize,
    p2: usize,
    dmat: &DistanceMatrix<R>,
) -> Vec<bool> {
    let mut side = vec![false; n];
    let mut taken = vec![false; n];
    let mut counts = [0usize; 2];
    let mut to_second = false;
    for _ in 0..n {
        let (pivot, slot) = if to_second { (p2, 1) } else { (p1, 0) };
        if counts[slot] == cap {
            // One side is full; the other takes everything left.
            for u in 0..n {
                if !taken[u] {
                    taken[u] = true;
                    side[u] = !to_second;
                }
            }
            break;
        }
        let mut pick: Option<(usize, R)> = None;
        for u in 0..n {
            if taken[u] {
                continue;
            }
            let dist = dmat.get(pivot, u);
            if pick.map_or(true, |(_, best)| dist.cmp_dist(best) == Ordering::Less) {
                pick = Some((u, dist));
            }
        }
        if let Some((u, _)) = pick {
            taken[u] = true;
            side[u] = to_second;
            counts[slot] += 1;
        }
        to_second = !to_second;
    }
    side
}

fn hyperplane_sides<R: DistanceValue>(
    cap: usize,
    n: usize,
    p1: usize,
    p2: usize,
    dmat: &DistanceMatrix<R>,
) -> Vec<bool> {
    let mut side = vec![false; n];
    let mut counts = [0usize; 2];
    for u in 0..n {
        let d1 = dmat.get(p1, u);
        let d2 = dmat.get(p2, u);
        // Ties stay with the first pivot.
        let mut to_second = d2.cmp_dist(d1) == Ordering::Less;
        if to_second && counts[1] == cap {
            to_second = false;
        } else if !to_second && counts[0] == cap {
            to_second = true;
        }
        side[u] = to_second;
        counts[usize::from(to_second)] += 1;
    }
    side
}

fn random_pair(n: usize, rng: &mut StdRng) -> (usize, usize) {
    let a = rng.gen_range(0..n);
    let mut b = rng.gen_range(0..n - 1);
    if b >= a {
        b += 1;
    }
    (a, b)
}

fn promote_pair<T, R, E>(
    policy: SplitPolicy,
    algorithm: PartitionAlgorithm,
    cap: usize,
    bag: &[E],
    dmat: &DistanceMatrix<R>,
    rng: &mut StdRng,
) -> (usize, usize)
where
    R: DistanceValue,
    E: SplitEntry<T, R>,
{
    let n = bag.len();
    match policy {
        SplitPolicy::Random => random_pair(n, rng),
        SplitPolicy::MLbDist => {
            let mut best = (0, 1);
            let mut best_dist = dmat.get(0, 1);
            for i in 0..n {
                for j in (i + 1)..n {
                    let dist = dmat.get(i, j);
                    if dist.cmp_dist(best_dist) == Ordering::Greater {
                        best = (i, j);
                        best_dist = dist;
                    }
                }
            }
            best
        }
        SplitPolicy::MinRad | SplitPolicy::MinMaxRad => {
            let mut best: Option<(usize, usize, R)> = None;
            for i in 0..n {
                for j in (i + 1)..n {
                    let trial = partition_bag(algorithm, cap, bag, i, j, dmat);
                    let score = match policy {
                        SplitPolicy::MinRad => trial.radius1.add_clamped(trial.radius2),
                        _ => {
                            if trial.radius2.cmp_dist(trial.radius1) == Ordering::Greater {
                                trial.radius2
                            } else {
                                trial.radius1
                            }
                        }
                    };
                    if best.map_or(true, |(_, _, s)| score.cmp_dist(s) == Ordering::Less) {
                        best = Some((i, j, score));
                    }
                }
            }
            let (i, j, _) = best.expect("overflowing bag holds at least two entries");
            (i, j)
        }
        SplitPolicy::Sampling => {
            let samples = 2.max((cap as f64 * 0.1).ceil() as usize);
            let mut best: Option<(usize, usize, R)> = None;
            for _ in 0..samples {
                let (i, j) = random_pair(n, rng);
                let trial = partition_bag(algorithm, cap, bag, i, j, dmat);
                let score = trial.radius1.add_clamped(trial.radius2);
                if best.map_or(true, |(_, _, s)| score.cmp_dist(s) == Ordering::Less) {
                    best = Some((i, j, score));
                }
            }
            let (i, j, _) = best.expect("sampling draws at least one pair");
            (i, j)
        }
    }
}

impl<T, ID, R, const C: usize> MTree<T, ID, R, C>
where
    T: Clone,
    ID: Clone + PartialEq,
    R: DistanceValue,
{
    /// Promote two pivots from the bag and assign every entry a side,
    /// rewriting each entry's cached parent distance in place.
    fn plan_split<E: SplitEntry<T, R>>(&mut self, bag: &mut [E]) -> SplitPlan<T, R> {
        let values: Vec<&T> = bag.iter().map(SplitEntry::own_value).collect();
        let dmat = DistanceMatrix::build(self.distance.as_ref(), &values);
        let (p1, p2) = promote_pair(
            self.split_policy,
            self.partition_algorithm,
            C,
            bag,
            &dmat,
            &mut self.rng,
        );
        let assignment = partition_bag(self.partition_algorithm, C, bag, p1, p2, &dmat);
        let pivot1 = bag[p1].own_value().clone();
        let pivot2 = bag[p2].own_value().clone();
        for (u, e) in bag.iter_mut().enumerate() {
            let pivot = if assignment.side[u] { p2 } else { p1 };
            e.set_dist_parent(dmat.get(pivot, u));
        }
        SplitPlan {
            pivot1,
            radius1: assignment.radius1,
            pivot2,
            radius2: assignment.radius2,
            side: assignment.side,
        }
    }

    /// Split a full leaf that must additionally absorb `extra`.
    pub(crate) fn split_leaf(&mut self, node: NodeId, extra: LeafEntry<T, ID, R>) {
        let mut bag: Vec<LeafEntry<T, ID, R>> = match &mut self.pool.node_mut(node).kind {
            NodeKind::Leaf(entries) => entries.drain(..).collect(),
            NodeKind::Internal(_) => unreachable!("split_leaf called on an internal node"),
        };
        bag.push(extra);
        let plan = self.plan_split(&mut bag);

        let mut first: SmallVec<[LeafEntry<T, ID, R>; C]> = SmallVec::new();
        let mut second: SmallVec<[LeafEntry<T, ID, R>; C]> = SmallVec::new();
        for (entry, to_second) in bag.into_iter().zip(plan.side.iter()) {
            if *to_second {
                second.push(entry);
            } else {
                first.push(entry);
            }
        }

        let parent = self.pool.node(node).parent;
        let sibling = self.pool.alloc(Node {
            parent,
            kind: NodeKind::Leaf(second),
        });
        self.pool.node_mut(node).kind = NodeKind::Leaf(first);
        self.finish_split(node, sibling, plan);
    }

    /// Split a full internal node that must additionally absorb `extra`.
    pub(crate) fn split_internal(&mut self, node: NodeId, extra: RoutingEntry<T, R>) {
        let mut bag: Vec<RoutingEntry<T, R>> = match &mut self.pool.node_mut(node).kind {
            NodeKind::Internal(entries) => entries.drain(..).collect(),
            NodeKind::Leaf(_) => unreachable!("split_internal called on a leaf"),
        };
        bag.push(extra);
        let plan = self.plan_split(&mut bag);

        let mut first: SmallVec<[RoutingEntry<T, R>; C]> = SmallVec::new();
        let mut second: SmallVec<[RoutingEntry<T, R>; C]> = SmallVec::new();
        for (entry, to_second) in bag.into_iter().zip(plan.side.iter()) {
            if *to_second {
                second.push(entry);
            } else {
                first.push(entry);
            }
        }
        let first_children: Vec<NodeId> = first.iter().map(|e| e.child).collect();
        let second_children: Vec<NodeId> = second.iter().map(|e| e.child).collect();

        let parent = self.pool.node(node).parent;
        let sibling = self.pool.alloc(Node {
            parent,
            kind: NodeKind::Internal(second),
        });
        self.pool.node_mut(node).kind = NodeKind::Internal(first);
        for child in first_children {
            self.pool.node_mut(child).parent = Some(node);
        }
        for child in second_children {
            self.pool.node_mut(child).parent = Some(sibling);
        }
        self.finish_split(node, sibling, plan);
    }

    /// Install the two routing entries a split produced: grow a new root,
    /// or replace the split node's slot in its parent and hand the second
    /// entry over — recursing when the parent is itself full.
    fn finish_split(&mut self, node: NodeId, sibling: NodeId, plan: SplitPlan<T, R>) {
        if node == self.root {
            let mut entries: SmallVec<[RoutingEntry<T, R>; C]> = SmallVec::new();
            entries.push(RoutingEntry {
                pivot: plan.pivot1,
                covering_radius: plan.radius1,
                dist_parent: R::ZERO,
                child: node,
            });
            entries.push(RoutingEntry {
                pivot: plan.pivot2,
                covering_radius: plan.radius2,
                dist_parent: R::ZERO,
                child: sibling,
            });
            let new_root = self.pool.alloc(Node {
                parent: None,
                kind: NodeKind::Internal(entries),
            });
            self.pool.node_mut(node).parent = Some(new_root);
            self.pool.node_mut(sibling).parent = Some(new_root);
            self.root = new_root;
            return;
        }

        let parent = self
            .pool
            .node(node)
            .parent
            .expect("non-root node has a parent");
        let (d1, d2) = match self.pivot_above(parent) {
            Some(pivot) => (
                (self.distance)(&pivot, &plan.pivot1),
                (self.distance)(&pivot, &plan.pivot2),
            ),
            None => (R::ZERO, R::ZERO),
        };
        let replacement = RoutingEntry {
            pivot: plan.pivot1,
            covering_radius: plan.radius1,
            dist_parent: d1,
            child: node,
        };
        let promoted = RoutingEntry {
            pivot: plan.pivot2,
            covering_radius: plan.radius2,
            dist_parent: d2,
            child: sibling,
        };
        self.pool.node_mut(sibling).parent = Some(parent);

        let overflow = match &mut self.pool.node_mut(parent).kind {
            NodeKind::Internal(entries) => {
                let slot = entries
                    .iter()
                    .position(|e| e.child == node)
                    .expect("parent routes to the split node");
                entries[slot] = replacement;
                if entries.len() < C {
                    entries.push(promoted);
                    None
                } else {
                    Some(promoted)
                }
            }
            NodeKind::Leaf(_) => unreachable!("parents are internal nodes"),
        };
        if let Some(promoted) = overflow {
            self.split_internal(parent, promoted);
        }
    }

    /// Pivot of the routing entry that owns `node`, cloned; `None` when
    /// `node` is the root.
    fn pivot_above(&self, node: NodeId) -> Option<T> {
        let parent = self.pool.node(node).parent?;
        match &self.pool.node(parent).kind {
            NodeKind::Internal(entries) => entries
                .iter()
                .find(|e| e.child == node)
                .map(|e| e.pivot.clone()),
            NodeKind::Leaf(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn abs(a: &f64, b: &f64) -> f64 {
        (a - b).abs()
    }

    fn leaf_bag(values: &[f64]) -> Vec<LeafEntry<f64, u32, f64>> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| LeafEntry {
                value: v,
                id: i as u32,
                dist_parent: 0.0,
            })
            .collect()
    }

    fn matrix_over(values: &[f64]) -> DistanceMatrix<f64> {
        let refs: Vec<&f64> = values.iter().collect();
        DistanceMatrix::build(&abs, &refs)
    }

    #[test]
    fn matrix_is_symmetric_with_zero_diagonal() {
        let dmat = matrix_over(&[1.0, 4.0, 9.0]);
        for i in 0..3 {
            assert_eq!(dmat.get(i, i), 0.0);
            for j in 0..3 {
                assert_eq!(dmat.get(i, j), dmat.get(j, i));
            }
        }
        assert_eq!(dmat.get(0, 2), 8.0);
    }

    #[test]
    fn balanced_partition_of_even_bag_is_even() {
        let values = [0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        let bag = leaf_bag(&values);
        let dmat = matrix_over(&values);
        let assignment = partition_bag(PartitionAlgorithm::Balanced, 5, &bag, 0, 5, &dmat);
        let second = assignment.side.iter().filter(|s| **s).count();
        assert_eq!(second, 3);
        assert_eq!(assignment.side.len() - second, 3);
    }

    #[test]
    fn balanced_partition_honors_the_capacity_cap() {
        // Everything is closest to pivot 0, yet neither side may exceed the cap.
        let values = [0.0, 0.1, 0.2, 0.3, 100.0];
        let bag = leaf_bag(&values);
        let dmat = matrix_over(&values);
        let assignment = partition_bag(PartitionAlgorithm::Balanced, 4, &bag, 0, 4, &dmat);
        let second = assignment.side.iter().filter(|s| **s).count();
        assert!(second >= 1 && assignment.side.len() - second >= 1);
        assert!(second <= 4 && assignment.side.len() - second <= 4);
    }

    #[test]
    fn hyperplane_partition_keeps_both_sides_populated_under_zero_metric() {
        fn zero(_: &f64, _: &f64) -> f64 {
            0.0
        }
        let values = [5.0, 5.0, 5.0, 5.0];
        let bag = leaf_bag(&values);
        let refs: Vec<&f64> = values.iter().collect();
        let dmat = DistanceMatrix::build(&zero, &refs);
        let assignment = partition_bag(PartitionAlgorithm::GenHyperplane, 3, &bag, 0, 1, &dmat);
        let second = assignment.side.iter().filter(|s| **s).count();
        assert!(second >= 1);
        assert!(assignment.side.len() - second >= 1);
        assert_eq!(assignment.radius1, 0.0);
        assert_eq!(assignment.radius2, 0.0);
    }

    #[test]
    fn hyperplane_partition_sends_entries_to_the_nearer_pivot() {
        let values = [0.0, 1.0, 9.0, 10.0];
        let bag = leaf_bag(&values);
        let dmat = matrix_over(&values);
        let assignment = partition_bag(PartitionAlgorithm::GenHyperplane, 3, &bag, 0, 3, &dmat);
        assert_eq!(assignment.side, vec![false, false, true, true]);
        assert_eq!(assignment.radius1, 1.0);
        assert_eq!(assignment.radius2, 1.0);
    }

    #[test]
    fn farthest_pair_promotion_finds_the_diameter() {
        let values = [3.0, 7.0, -20.0, 41.0, 5.0];
        let bag = leaf_bag(&values);
        let dmat = matrix_over(&values);
        let mut rng = StdRng::seed_from_u64(0);
        let pair = promote_pair(
            SplitPolicy::MLbDist,
            PartitionAlgorithm::Balanced,
            4,
            &bag,
            &dmat,
            &mut rng,
        );
        assert_eq!(pair, (2, 3));
    }

    #[test]
    fn routing_entries_stack_their_radius_onto_the_partition_radius() {
        let bag = vec![
            RoutingEntry {
                pivot: 0.0,
                covering_radius: 2.0,
                dist_parent: 0.0,
                child: NodeId(0),
            },
            RoutingEntry {
                pivot: 10.0,
                covering_radius: 5.0,
                dist_parent: 0.0,
                child: NodeId(1),
            },
            RoutingEntry {
                pivot: 1.0,
                covering_radius: 1.0,
                dist_parent: 0.0,
                child: NodeId(2),
            },
        ];
        let values = [0.0, 10.0, 1.0];
        let dmat = matrix_over(&values);
        let assignment = partition_bag(PartitionAlgorithm::GenHyperplane, 2, &bag, 0, 1, &dmat);
        // Side one holds pivots 0.0 (radius 2) and 1.0 (dist 1 + radius 1).
        assert_eq!(assignment.side, vec![false, true, false]);
        assert_eq!(assignment.radius1, 2.0);
        assert_eq!(assignment.radius2, 5.0);
    }
}
