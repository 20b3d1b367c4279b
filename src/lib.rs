//! ambit: exact similarity search in arbitrary metric spaces.
//!
//! An **M-tree** is a height-balanced index over a user-supplied metric
//! `d: (T, T) -> R`. Stored values are grouped into nested covering balls;
//! every routing entry remembers a pivot, a covering radius, and its
//! distance to the parent pivot, and queries use those cached scalars with
//! the triangle inequality to discard whole subtrees — often without a
//! single metric call for the discarded branch.
//!
//! Two query primitives are supported over a dynamic set of `(id, value)`
//! pairs:
//!
//! - [`MTree::range`] — all ids within a given radius of a query value.
//! - [`MTree::knn`] — the k nearest ids with their distances, ascending.
//!
//! Both are **exact**: results always agree with a linear scan under the
//! same metric. The tree only changes *how fast* the answer is found.
//!
//! # Example
//!
//! ```
//! use ambit::MTree;
//!
//! // A tree over scalar values with node capacity 4.
//! let mut tree: MTree<f64, u32, f64, 4> =
//!     MTree::new(|a: &f64, b: &f64| (a - b).abs()).unwrap();
//!
//! for (id, value) in [(1, 10.0), (2, 20.0), (3, 35.0), (4, 70.0)] {
//!     tree.insert(id, value);
//! }
//!
//! let mut close = tree.range(&18.0, 5.0);
//! close.sort_unstable();
//! assert_eq!(close, vec![2]);
//!
//! let best = tree.knn(&18.0, 2).unwrap();
//! assert_eq!(best[0], (2, 2.0));
//! assert_eq!(best[1], (1, 8.0));
//! ```
//!
//! # Choosing a configuration
//!
//! Node overflow is resolved by promoting two pivots
//! ([`SplitPolicy`]) and partitioning the overflowing entries between them
//! ([`PartitionAlgorithm`]):
//!
//! | Policy | Quality | Split cost |
//! |--------|---------|------------|
//! | [`SplitPolicy::MinRad`] | best | all pivot pairs, trial partitions |
//! | [`SplitPolicy::MinMaxRad`] | best | all pivot pairs, trial partitions |
//! | [`SplitPolicy::MLbDist`] (default) | good | all pairwise distances |
//! | [`SplitPolicy::Sampling`] | fair | a few trial partitions |
//! | [`SplitPolicy::Random`] | naive | constant |
//!
//! The randomized policies draw from a generator seeded at construction;
//! use [`MTree::with_seed`] when runs must be reproducible.
//!
//! # Scope
//!
//! The index is single-threaded and entirely in memory. Values are removed
//! only wholesale via [`MTree::clear`].

pub mod distance;
pub mod error;

mod node;
mod search;
mod split;
mod tree;

pub use error::{MTreeError, Result};
pub use split::{PartitionAlgorithm, SplitPolicy};
pub use tree::{DistanceFn, MTree, TreeStats};
