//! Node data model and arena.
//!
//! Nodes live in a [`NodePool`] and address each other by [`NodeId`], so
//! parent back-links are plain indices rather than owning pointers. A node is
//! either a leaf bag of stored values or an internal bag of routing entries;
//! the two never mix. Bags hold at most `C` entries inline — the only time a
//! bag conceptually exceeds `C` is the transient overflow handled by a split,
//! which never touches the node's own storage.

use smallvec::SmallVec;

/// Index of a node inside its [`NodePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeId(pub(crate) usize);

/// A stored value together with its external id.
#[derive(Debug, Clone)]
pub(crate) struct LeafEntry<T, ID, R> {
    pub(crate) value: T,
    pub(crate) id: ID,
    /// Cached `d(parent_pivot, value)`; zero when the leaf is the root.
    pub(crate) dist_parent: R,
}

/// A pivot owning one child subtree.
#[derive(Debug, Clone)]
pub(crate) struct RoutingEntry<T, R> {
    pub(crate) pivot: T,
    /// Every stored value below `child` lies within this distance of `pivot`.
    pub(crate) covering_radius: R,
    /// Cached `d(parent_pivot, pivot)`; zero when the node is the root.
    pub(crate) dist_parent: R,
    pub(crate) child: NodeId,
}

/// Tagged node body: leaf bag or routing bag.
#[derive(Debug)]
pub(crate) enum NodeKind<T, ID, R, const C: usize> {
    Leaf(SmallVec<[LeafEntry<T, ID, R>; C]>),
    Internal(SmallVec<[RoutingEntry<T, R>; C]>),
}

#[derive(Debug)]
pub(crate) struct Node<T, ID, R, const C: usize> {
    /// The unique internal node routing to this one; `None` iff root.
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind<T, ID, R, C>,
}

impl<T, ID, R, const C: usize> Node<T, ID, R, C> {
    pub(crate) fn empty_leaf(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            kind: NodeKind::Leaf(SmallVec::new()),
        }
    }

    pub(crate) fn entry_count(&self) -> usize {
        match &self.kind {
            NodeKind::Leaf(entries) => entries.len(),
            NodeKind::Internal(entries) => entries.len(),
        }
    }
}

/// Flat arena owning every node of one tree.
///
/// Splits only ever allocate; the sole deallocation point is [`clear`],
/// which releases the whole tree at once.
///
/// [`clear`]: NodePool::clear
#[derive(Debug)]
pub(crate) struct NodePool<T, ID, R, const C: usize> {
    nodes: Vec<Node<T, ID, R, C>>,
}

impl<T, ID, R, const C: usize> NodePool<T, ID, R, C> {
    pub(crate) fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub(crate) fn alloc(&mut self, node: Node<T, ID, R, C>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &Node<T, ID, R, C> {
        &self.nodes[id.0]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<T, ID, R, C> {
        &mut self.nodes[id.0]
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
    }
}
