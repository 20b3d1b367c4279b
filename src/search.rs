//! Range and k-nearest-neighbour queries.
//!
//! Both traversals prune with the triangle inequality twice over: a cheap
//! filter on the cached parent distance that needs no metric call at all,
//! then one exact distance per surviving entry. Every comparison is
//! non-strict — tightening any of them to a strict one silently loses
//! boundary results.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::distance::DistanceValue;
use crate::error::{MTreeError, Result};
use crate::node::{NodeId, NodeKind};
use crate::tree::MTree;

/// Subtree awaiting a visit during kNN search.
///
/// `dmin` is a lower bound on the distance from the query to anything under
/// the node; `dp` is the exact distance from the query to the node's pivot,
/// kept so the visit does not recompute it.
struct PendingVisit<R> {
    dmin: R,
    dp: R,
    node: NodeId,
}

impl<R: DistanceValue> PartialEq for PendingVisit<R> {
    fn eq(&self, other: &Self) -> bool {
        self.dmin.cmp_dist(other.dmin) == Ordering::Equal
    }
}

impl<R: DistanceValue> Eq for PendingVisit<R> {}

impl<R: DistanceValue> Ord for PendingVisit<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smaller lower bound = higher priority.
        other.dmin.cmp_dist(self.dmin)
    }
}

impl<R: DistanceValue> PartialOrd for PendingVisit<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One slot of the kNN result list: either a confirmed hit or an upper
/// bound on the nearest value inside a still-unvisited subtree.
enum NearSlot<ID, R> {
    Hit { id: ID, dist: R },
    Bound { node: NodeId, dist: R },
}

impl<ID, R: Copy> NearSlot<ID, R> {
    fn dist(&self) -> R {
        match self {
            NearSlot::Hit { dist, .. } => *dist,
            NearSlot::Bound { dist, .. } => *dist,
        }
    }
}

/// The k best claims seen so far, ascending by distance.
///
/// A `Bound` slot tightens the pruning distance using the guarantee that at
/// least one stored value lives within `dist` of the query inside its
/// subtree. Each bound is retired the moment its subtree is visited —
/// sibling subtrees are disjoint, so the list never counts one stored value
/// twice — and whatever bounds remain are stripped from the returned hits.
struct NearestList<ID, R> {
    slots: Vec<NearSlot<ID, R>>,
    k: usize,
}

impl<ID, R: DistanceValue> NearestList<ID, R> {
    fn new(k: usize) -> Self {
        // Oversized k must not panic or pre-allocate absurdly.
        Self {
            slots: Vec::with_capacity(k.min(1024) + 1),
            k,
        }
    }

    /// Pruning distance: the k-th best claim, or `MAX` while under k claims.
    fn dk(&self) -> R {
        if self.slots.len() == self.k {
            self.slots[self.k - 1].dist()
        } else {
            R::MAX
        }
    }

    fn insert(&mut self, slot: NearSlot<ID, R>) {
        let dist = slot.dist();
        // After existing claims at the same distance: stable, deterministic.
        let pos = self
            .slots
            .partition_point(|s| s.dist().cmp_dist(dist) != Ordering::Greater);
        self.slots.insert(pos, slot);
        self.slots.truncate(self.k);
    }

    fn retire(&mut self, node: NodeId) {
        self.slots
            .retain(|s| !matches!(s, NearSlot::Bound { node: n, .. } if *n == node));
    }

    fn into_hits(self) -> Vec<(ID, R)> {
        self.slots
            .into_iter()
            .filter_map(|slot| match slot {
                NearSlot::Hit { id, dist } => Some((id, dist)),
                NearSlot::Bound { .. } => None,
            })
            .collect()
    }
}

impl<T, ID, R, const C: usize> MTree<T, ID, R, C>
where
    T: Clone,
    ID: Clone + PartialEq,
    R: DistanceValue,
{
    /// Ids of all stored values within `radius` of `query`, in no
    /// particular order. A negative radius matches nothing.
    pub fn range(&self, query: &T, radius: R) -> Vec<ID> {
        let mut hits = Vec::new();
        if radius.cmp_dist(R::ZERO) == Ordering::Less {
            return hits;
        }
        // (node, distance from query to the node's pivot); zero at the root,
        // where the parent-distance filter is trivially inclusive.
        let mut pending: Vec<(NodeId, R)> = vec![(self.root, R::ZERO)];
        while let Some((node, dp)) = pending.pop() {
            match &self.pool.node(node).kind {
                NodeKind::Internal(entries) => {
                    for e in entries {
                        let reach = radius.add_clamped(e.covering_radius);
                        if dp.abs_diff(e.dist_parent).cmp_dist(reach) == Ordering::Greater {
                            continue;
                        }
                        let de = (self.distance)(query, &e.pivot);
                        if de.cmp_dist(reach) != Ordering::Greater {
                            pending.push((e.child, de));
                        }
                    }
                }
                NodeKind::Leaf(entries) => {
                    for e in entries {
                        if dp.abs_diff(e.dist_parent).cmp_dist(radius) == Ordering::Greater {
                            continue;
                        }
                        let de = (self.distance)(query, &e.value);
                        if de.cmp_dist(radius) != Ordering::Greater {
                            hits.push(e.id.clone());
                        }
                    }
                }
            }
        }
        hits
    }

    /// The up-to-`k` stored values nearest to `query`, as `(id, distance)`
    /// pairs in ascending distance. Ties are broken arbitrarily but
    /// deterministically. `k == 0` is an error.
    pub fn knn(&self, query: &T, k: usize) -> Result<Vec<(ID, R)>> {
        if k == 0 {
            return Err(MTreeError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }
        let mut nearest: NearestList<ID, R> = NearestList::new(k);
        let mut pending = BinaryHeap::new();
        pending.push(PendingVisit {
            dmin: R::ZERO,
            dp: R::ZERO,
            node: self.root,
        });

        while let Some(visit) = pending.pop() {
            if visit.dmin.cmp_dist(nearest.dk()) == Ordering::Greater {
                // The heap pops ascending lower bounds, so nothing left can
                // improve the list.
                break;
            }
            // This subtree's claims are about to be replaced by its
            // children's; its own bound must go first.
            nearest.retire(visit.node);
            let dp = visit.dp;
            match &self.pool.node(visit.node).kind {
                NodeKind::Internal(entries) => {
                    for e in entries {
                        let reach = nearest.dk().add_clamped(e.covering_radius);
                        if dp.abs_diff(e.dist_parent).cmp_dist(reach) == Ordering::Greater {
                            continue;
                        }
                        let de = (self.distance)(query, &e.pivot);
                        let dmin = de.sub_clamped(e.covering_radius);
                        let dmax = de.add_clamped(e.covering_radius);
                        if dmin.cmp_dist(nearest.dk()) != Ordering::Greater {
                            pending.push(PendingVisit {
                                dmin,
                                dp: de,
                                node: e.child,
                            });
                        }
                        if dmax.cmp_dist(nearest.dk()) == Ordering::Less {
                            nearest.insert(NearSlot::Bound {
                                node: e.child,
                                dist: dmax,
                            });
                        }
                    }
                }
                NodeKind::Leaf(entries) => {
                    for e in entries {
                        if dp.abs_diff(e.dist_parent).cmp_dist(nearest.dk()) == Ordering::Greater
                        {
                            continue;
                        }
                        let de = (self.distance)(query, &e.value);
                        if de.cmp_dist(nearest.dk()) != Ordering::Greater {
                            nearest.insert(NearSlot::Hit {
                                id: e.id.clone(),
                                dist: de,
                            });
                        }
                    }
                }
            }
        }
        Ok(nearest.into_hits())
    }
}
