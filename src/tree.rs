//! The M-tree handle: construction, configuration, insertion, maintenance.

use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as _;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distance::DistanceValue;
use crate::error::{MTreeError, Result};
use crate::node::{LeafEntry, Node, NodeId, NodeKind, NodePool};
use crate::split::{PartitionAlgorithm, SplitPolicy};

/// Boxed metric over stored values.
///
/// Must be a proper metric (non-negative, symmetric, zero exactly on equal
/// values, triangle inequality). A non-metric function yields undefined
/// query results but cannot corrupt the tree.
pub type DistanceFn<T, R> = Box<dyn Fn(&T, &T) -> R>;

/// An M-tree: a height-balanced index for exact similarity search in an
/// arbitrary metric space.
///
/// Stores `(id, value)` pairs and answers [`range`](MTree::range) and
/// [`knn`](MTree::knn) queries, pruning subtrees with the triangle
/// inequality instead of scanning every value. `C` is the node capacity
/// (at least 2).
pub struct MTree<T, ID, R, const C: usize = 3> {
    pub(crate) pool: NodePool<T, ID, R, C>,
    pub(crate) root: NodeId,
    pub(crate) distance: DistanceFn<T, R>,
    pub(crate) split_policy: SplitPolicy,
    pub(crate) partition_algorithm: PartitionAlgorithm,
    pub(crate) rng: StdRng,
    pub(crate) len: usize,
}

/// Shape summary of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of stored values.
    pub values: usize,
    /// Total node count.
    pub nodes: usize,
    /// Leaf node count.
    pub leaves: usize,
    /// Levels from root to leaves inclusive; 1 for a tree that is a single leaf.
    pub height: usize,
}

impl<T, ID, R, const C: usize> MTree<T, ID, R, C>
where
    T: Clone,
    ID: Clone + PartialEq,
    R: DistanceValue,
{
    /// Create an empty tree over the given metric.
    ///
    /// Defaults to [`SplitPolicy::MLbDist`] and
    /// [`PartitionAlgorithm::Balanced`]. Fails with
    /// [`MTreeError::InvalidArgument`] when `C < 2`.
    pub fn new<F>(distance: F) -> Result<Self>
    where
        F: Fn(&T, &T) -> R + 'static,
    {
        Self::build(Box::new(distance), StdRng::from_entropy())
    }

    /// Like [`MTree::new`], with a pinned seed for the randomized split
    /// policies.
    ///
    /// Two trees built with the same seed, configuration, and insertion
    /// sequence have identical structure even under [`SplitPolicy::Random`]
    /// and [`SplitPolicy::Sampling`].
    pub fn with_seed<F>(distance: F, seed: u64) -> Result<Self>
    where
        F: Fn(&T, &T) -> R + 'static,
    {
        Self::build(Box::new(distance), StdRng::seed_from_u64(seed))
    }

    fn build(distance: DistanceFn<T, R>, rng: StdRng) -> Result<Self> {
        if C < 2 {
            return Err(MTreeError::InvalidArgument(format!(
                "node capacity must be at least 2, got {}",
                C
            )));
        }
        let mut pool = NodePool::new();
        let root = pool.alloc(Node::empty_leaf(None));
        Ok(Self {
            pool,
            root,
            distance,
            split_policy: SplitPolicy::MLbDist,
            partition_algorithm: PartitionAlgorithm::Balanced,
            rng,
            len: 0,
        })
    }

    /// Replace the metric.
    ///
    /// Cached distances and radii are kept as-is; queries are only
    /// meaningful if the new function agrees with the one used at insert
    /// time on already-stored values.
    pub fn set_distance_function<F>(&mut self, distance: F)
    where
        F: Fn(&T, &T) -> R + 'static,
    {
        self.distance = Box::new(distance);
    }

    /// Select the promotion policy used by future splits.
    pub fn set_split_policy(&mut self, policy: SplitPolicy) {
        self.split_policy = policy;
    }

    /// Select the partition algorithm used by future splits.
    pub fn set_partition_algorithm(&mut self, algorithm: PartitionAlgorithm) {
        self.partition_algorithm = algorithm;
    }

    /// Insert a `(id, value)` pair.
    ///
    /// Duplicate ids are not detected; uniqueness is the caller's
    /// responsibility.
    pub fn insert(&mut self, id: ID, value: T) {
        let mut node = self.root;
        let mut dist_parent = R::ZERO;

        // Ball routing: while the node is internal, descend into the entry
        // whose covering ball already holds the value, or failing that the
        // one needing the smallest radius enlargement.
        loop {
            let decision = match &self.pool.node(node).kind {
                NodeKind::Internal(entries) => {
                    let mut covered: Option<(usize, R)> = None;
                    let mut closest: Option<(usize, R, R)> = None;
                    for (i, e) in entries.iter().enumerate() {
                        let de = (self.distance)(&value, &e.pivot);
                        if de.cmp_dist(e.covering_radius) != Ordering::Greater {
                            if covered
                                .map_or(true, |(_, best)| de.cmp_dist(best) == Ordering::Less)
                            {
                                covered = Some((i, de));
                            }
                        } else if covered.is_none() {
                            let gap = de.sub_clamped(e.covering_radius);
                            if closest
                                .map_or(true, |(_, _, best)| gap.cmp_dist(best) == Ordering::Less)
                            {
                                closest = Some((i, de, gap));
                            }
                        }
                    }
                    match covered {
                        Some((i, de)) => Some((i, de, false)),
                        None => {
                            let (i, de, _) =
                                closest.expect("internal node holds at least one entry");
                            Some((i, de, true))
                        }
                    }
                }
                NodeKind::Leaf(_) => None,
            };

            match decision {
                Some((idx, de, enlarge)) => {
                    if let NodeKind::Internal(entries) = &mut self.pool.node_mut(node).kind {
                        if enlarge {
                            // Minimum enlargement keeping the new value covered.
                            entries[idx].covering_radius = de;
                        }
                        dist_parent = de;
                        node = entries[idx].child;
                    }
                }
                None => break,
            }
        }

        let entry = LeafEntry {
            value,
            id,
            dist_parent,
        };
        let has_room = matches!(
            &self.pool.node(node).kind,
            NodeKind::Leaf(entries) if entries.len() < C
        );
        if has_room {
            if let NodeKind::Leaf(entries) = &mut self.pool.node_mut(node).kind {
                entries.push(entry);
            }
        } else {
            self.split_leaf(node, entry);
        }
        self.len += 1;
    }

    /// Drop every stored value; the tree becomes a fresh single empty leaf.
    pub fn clear(&mut self) {
        self.pool.clear();
        self.root = self.pool.alloc(Node::empty_leaf(None));
        self.len = 0;
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree stores no values.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shape summary: value, node, and leaf counts plus height.
    pub fn stats(&self) -> TreeStats {
        let mut nodes = 0;
        let mut leaves = 0;
        let mut height = 0;
        let mut pending = vec![(self.root, 1usize)];
        while let Some((id, depth)) = pending.pop() {
            nodes += 1;
            if depth > height {
                height = depth;
            }
            match &self.pool.node(id).kind {
                NodeKind::Leaf(_) => leaves += 1,
                NodeKind::Internal(entries) => {
                    for e in entries {
                        pending.push((e.child, depth + 1));
                    }
                }
            }
        }
        TreeStats {
            values: self.len,
            nodes,
            leaves,
            height,
        }
    }

    /// Walk the whole tree and verify its structural invariants: parent
    /// links, uniform leaf depth, node occupancy, covering radii, cached
    /// parent distances, and the root's zero sentinel.
    ///
    /// Diagnostic surface for tests and debugging; a failure means a bug in
    /// the tree, never a caller error.
    pub fn check_invariants(&self) -> Result<()> {
        let mut leaf_depth = None;
        self.check_node(self.root, None, None, 1, &mut leaf_depth)
    }

    fn check_node(
        &self,
        id: NodeId,
        expect_parent: Option<NodeId>,
        parent_pivot: Option<&T>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<()> {
        let node = self.pool.node(id);
        if node.parent != expect_parent {
            return Err(MTreeError::InvariantViolation(format!(
                "node {} has a stale parent link",
                id.0
            )));
        }
        let count = node.entry_count();
        if count > C {
            return Err(MTreeError::InvariantViolation(format!(
                "node {} holds {} entries, capacity is {}",
                id.0, count, C
            )));
        }
        if count == 0 && id != self.root {
            return Err(MTreeError::InvariantViolation(format!(
                "non-root node {} is empty",
                id.0
            )));
        }
        match &node.kind {
            NodeKind::Leaf(entries) => {
                match leaf_depth {
                    Some(expected) if *expected != depth => {
                        return Err(MTreeError::InvariantViolation(format!(
                            "leaf at depth {depth}, others at depth {expected}"
                        )));
                    }
                    None => *leaf_depth = Some(depth),
                    _ => {}
                }
                for e in entries {
                    self.check_dist_parent(parent_pivot, &e.value, e.dist_parent)?;
                }
            }
            NodeKind::Internal(entries) => {
                for e in entries {
                    self.check_dist_parent(parent_pivot, &e.pivot, e.dist_parent)?;
                    let mut values = Vec::new();
                    self.collect_values(e.child, &mut values);
                    for v in values {
                        if (self.distance)(&e.pivot, v).cmp_dist(e.covering_radius)
                            == Ordering::Greater
                        {
                            return Err(MTreeError::InvariantViolation(format!(
                                "stored value outside the covering ball of node {}",
                                e.child.0
                            )));
                        }
                    }
                    self.check_node(e.child, Some(id), Some(&e.pivot), depth + 1, leaf_depth)?;
                }
            }
        }
        Ok(())
    }

    fn check_dist_parent(&self, parent_pivot: Option<&T>, own: &T, recorded: R) -> Result<()> {
        let expected = match parent_pivot {
            Some(pivot) => (self.distance)(pivot, own),
            None => R::ZERO,
        };
        if expected.cmp_dist(recorded) != Ordering::Equal {
            return Err(MTreeError::InvariantViolation(
                "cached parent distance is stale".to_string(),
            ));
        }
        Ok(())
    }

    fn collect_values<'a>(&'a self, id: NodeId, out: &mut Vec<&'a T>) {
        match &self.pool.node(id).kind {
            NodeKind::Leaf(entries) => out.extend(entries.iter().map(|e| &e.value)),
            NodeKind::Internal(entries) => {
                for e in entries {
                    self.collect_values(e.child, out);
                }
            }
        }
    }
}

impl<T, ID, R, const C: usize> MTree<T, ID, R, C>
where
    T: Clone + fmt::Debug,
    ID: Clone + PartialEq + fmt::Debug,
    R: DistanceValue + fmt::Debug,
{
    /// Canonical pre-order rendering of the structure.
    ///
    /// Two trees with identical structure produce identical strings, which
    /// makes this the comparison key for determinism checks.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let pad = "  ".repeat(depth);
        match &self.pool.node(id).kind {
            NodeKind::Internal(entries) => {
                for e in entries {
                    let _ = writeln!(
                        out,
                        "{pad}* pivot={:?} radius={:?} dist_parent={:?}",
                        e.pivot, e.covering_radius, e.dist_parent
                    );
                    self.dump_node(e.child, depth + 1, out);
                }
            }
            NodeKind::Leaf(entries) => {
                for e in entries {
                    let _ = writeln!(
                        out,
                        "{pad}- id={:?} value={:?} dist_parent={:?}",
                        e.id, e.value, e.dist_parent
                    );
                }
            }
        }
    }
}
