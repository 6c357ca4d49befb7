//! Arena representation of a phylogenetic tree.
//!
//! # Overview
//! Every node lives in one `Vec<Node>` owned by a [`Topology`] and is addressed
//! by a [`NodeIndex`]. Parent and child links are plain indices, so a topology
//! can be cloned cheaply into a new snapshot before an edit.
//!
//! # Invariants (checked by [`Topology::validate`])
//! - `c` is in `children[p]` iff `parent[c] == Some(p)`
//! - exactly one node has no parent: the root
//! - every node is reachable from the root
//!
//! The edit primitives in this module (`reroot`, `unroot`, `remove_leaf`, ...)
//! work in place and may leave detached nodes behind. Callers finish an edit
//! with [`Topology::compact`], which drops them.

use crate::bitset::Bitset;
use crate::error::StructuralError;
use std::collections::HashMap;
use std::fmt;

/// Index of a node in a [`Topology`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for NodeIndex {
    fn from(value: usize) -> Self {
        NodeIndex(value)
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One node and the edge leading to its parent.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    /// Length of the edge to the parent; NaN when absent.
    pub branch_length: f64,
    /// Raw support text, e.g. `95` or `0.98/100`.
    pub branch_support: Option<String>,
    /// Taxon name for leaves, clade name for internal nodes.
    pub label: Option<String>,
}

impl Default for Node {
    fn default() -> Self {
        Node {
            parent: None,
            children: Vec::new(),
            branch_length: f64::NAN,
            branch_support: None,
            label: None,
        }
    }
}

impl Node {
    /// A detached leaf carrying `label`.
    pub fn leaf(label: impl Into<String>) -> Self {
        Node {
            label: Some(label.into()),
            ..Node::default()
        }
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.branch_length = length;
        self
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Branch length with absent values read as 0.
    #[inline]
    pub fn length_or_zero(&self) -> f64 {
        if self.branch_length.is_nan() { 0.0 } else { self.branch_length }
    }
}

/// Sum two branch lengths; absent (NaN) counts as 0 unless both are absent.
pub(crate) fn add_lengths(a: f64, b: f64) -> f64 {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => f64::NAN,
        (true, false) => b,
        (false, true) => a,
        (false, false) => a + b,
    }
}

/// Owner of all nodes of one tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    nodes: Vec<Node>,
    root: NodeIndex,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    /// A topology holding a single unlabeled root node.
    pub fn new() -> Self {
        Topology {
            nodes: vec![Node::default()],
            root: NodeIndex(0),
        }
    }

    /// Builds a topology from prepared nodes; the links are validated.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeIndex) -> Result<Self, StructuralError> {
        let topology = Topology { nodes, root };
        topology.validate()?;
        Ok(topology)
    }

    #[inline]
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn set_root(&mut self, root: NodeIndex) {
        self.root = root;
    }

    /// Number of nodes in the arena.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn contains(&self, idx: NodeIndex) -> bool {
        idx.0 < self.nodes.len()
    }

    /// Returns the node at `idx`.
    ///
    /// # Panics
    /// Panics if `idx` is out of range; use [`Topology::get`] for a checked lookup.
    #[inline]
    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx.0]
    }

    #[inline]
    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx.0]
    }

    pub fn get(&self, idx: NodeIndex) -> Result<&Node, StructuralError> {
        self.nodes.get(idx.0).ok_or(StructuralError::NodeOutOfRange(idx))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i), n))
    }

    #[inline]
    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.nodes[idx.0].parent
    }

    #[inline]
    pub fn children(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.nodes[idx.0].children
    }

    #[inline]
    pub fn is_leaf(&self, idx: NodeIndex) -> bool {
        self.nodes[idx.0].children.is_empty()
    }

    /// A tree is rooted iff its top node has exactly two children.
    ///
    /// Otherwise the top node is a pseudo-root of an unrooted tree.
    pub fn is_rooted(&self) -> bool {
        self.children(self.root).len() == 2
    }

    /// Adds a detached node and returns its index.
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        let idx = NodeIndex(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            ..node
        });
        idx
    }

    /// Adds `node` as the last child of `parent`.
    pub fn add_child(&mut self, parent: NodeIndex, node: Node) -> NodeIndex {
        let idx = self.add_node(node);
        self.attach(idx, parent);
        idx
    }

    /// Links a detached `child` as the last child of `parent`.
    pub fn attach(&mut self, child: NodeIndex, parent: NodeIndex) {
        let pos = self.nodes[parent.0].children.len();
        self.attach_at(child, parent, pos);
    }

    pub fn attach_at(&mut self, child: NodeIndex, parent: NodeIndex, pos: usize) {
        debug_assert!(self.nodes[child.0].parent.is_none());
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(pos, child);
    }

    /// Unlinks `child` from its parent; returns its former position.
    pub fn detach(&mut self, child: NodeIndex) -> Option<usize> {
        let parent = self.nodes[child.0].parent.take()?;
        let siblings = &mut self.nodes[parent.0].children;
        let pos = siblings.iter().position(|&c| c == child)?;
        siblings.remove(pos);
        Some(pos)
    }

    /// Nodes reachable from the root, parents before children.
    pub fn preorder(&self) -> Vec<NodeIndex> {
        self.subtree_preorder(self.root)
    }

    pub fn subtree_preorder(&self, from: NodeIndex) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![from];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(self.children(idx).iter().rev());
        }
        order
    }

    /// Nodes reachable from the root, children before parents.
    pub fn postorder(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(self.children(idx).iter());
        }
        order.reverse();
        order
    }

    /// Leaves in preorder.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.preorder()
            .into_iter()
            .filter(|&idx| self.is_leaf(idx))
            .collect()
    }

    /// Leaf labels in preorder; unlabeled leaves read as the empty string.
    pub fn leaf_labels(&self) -> Vec<String> {
        self.leaves()
            .into_iter()
            .map(|idx| self.node(idx).label.clone().unwrap_or_default())
            .collect()
    }

    pub fn find_leaf(&self, label: &str) -> Option<NodeIndex> {
        self.preorder()
            .into_iter()
            .find(|&idx| self.is_leaf(idx) && self.node(idx).label.as_deref() == Some(label))
    }

    /// `[idx, parent(idx), ..., root]`.
    pub fn path_to_root(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut path = vec![idx];
        let mut current = idx;
        while let Some(parent) = self.parent(current) {
            path.push(parent);
            current = parent;
        }
        path
    }

    /// Number of leaves below each node (a leaf counts itself), indexed by node.
    pub fn leaf_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.nodes.len()];
        for idx in self.postorder() {
            counts[idx.0] = if self.is_leaf(idx) {
                1
            } else {
                self.children(idx).iter().map(|c| counts[c.0]).sum()
            };
        }
        counts
    }

    /// Leaf set below every node as a bitset over `taxon_index`.
    ///
    /// Leaves whose label is not in `taxon_index` contribute nothing.
    pub fn clade_bitsets(&self, taxon_index: &HashMap<String, usize>, universe: usize) -> Vec<Bitset> {
        let mut clades = vec![Bitset::empty(universe); self.nodes.len()];
        for idx in self.postorder() {
            if self.is_leaf(idx) {
                if let Some(&bit) = self.node(idx).label.as_ref().and_then(|l| taxon_index.get(l)) {
                    clades[idx.0].set(bit);
                }
            } else {
                let mut set = Bitset::empty(universe);
                for child in self.children(idx) {
                    set.or_assign(&clades[child.0]);
                }
                clades[idx.0] = set;
            }
        }
        clades
    }

    /// Leading numeric value of a node's support text.
    ///
    /// `"95"` → 95, `"0.98/100"` → 0.98, `"abc"` → `None`.
    pub fn support_value(&self, idx: NodeIndex) -> Option<f64> {
        let raw = self.node(idx).branch_support.as_deref()?.trim();
        let end = raw
            .char_indices()
            .find(|&(i, c)| {
                !(c.is_ascii_digit() || c == '.' || ((c == '-' || c == '+') && i == 0) || c == 'e' || c == 'E')
            })
            .map_or(raw.len(), |(i, _)| i);
        raw[..end].parse().ok()
    }

    /// Checks the structural invariants listed in the module docs.
    pub fn validate(&self) -> Result<(), StructuralError> {
        let fail = |msg: String| Err(StructuralError::Invariant(msg));
        if !self.contains(self.root) {
            return fail(format!("root {} out of range", self.root));
        }
        if self.node(self.root).parent.is_some() {
            return fail(format!("root {} has a parent", self.root));
        }
        let mut parentless = 0;
        for (idx, node) in self.nodes() {
            match node.parent {
                None => parentless += 1,
                Some(p) => {
                    if !self.contains(p) {
                        return fail(format!("{idx} points to missing parent {p}"));
                    }
                    let hits = self.children(p).iter().filter(|&&c| c == idx).count();
                    if hits != 1 {
                        return fail(format!("{idx} listed {hits} times under its parent {p}"));
                    }
                }
            }
            for &child in &node.children {
                if !self.contains(child) || self.parent(child) != Some(idx) {
                    return fail(format!("{child} listed under {idx} but not linked back"));
                }
            }
        }
        if parentless != 1 {
            return fail(format!("{parentless} nodes without a parent"));
        }
        let reachable = self.preorder().len();
        if reachable != self.nodes.len() {
            return fail(format!("{} of {} nodes reachable from the root", reachable, self.nodes.len()));
        }
        Ok(())
    }

    /// Drops nodes not reachable from the root, keeping the relative order of
    /// the survivors. Returns the new topology and the old→new index map.
    pub fn compact(&self) -> (Topology, Vec<Option<NodeIndex>>) {
        let mut remap = vec![None; self.nodes.len()];
        let mut reachable = self.preorder();
        reachable.sort_unstable();
        for (new, old) in reachable.iter().enumerate() {
            remap[old.0] = Some(NodeIndex(new));
        }
        let map = |idx: NodeIndex| remap[idx.0].unwrap_or(idx);
        let nodes = reachable
            .iter()
            .map(|&old| {
                let node = self.node(old);
                Node {
                    parent: node.parent.map(map),
                    children: node.children.iter().map(|&c| map(c)).collect(),
                    ..node.clone()
                }
            })
            .collect();
        let topology = Topology {
            nodes,
            root: map(self.root),
        };
        (topology, remap)
    }

    // ------------------------------------------------------------------
    // Edit primitives (in place, followed by `compact` in the engine)
    // ------------------------------------------------------------------

    fn check(&self, idx: NodeIndex) -> Result<(), StructuralError> {
        if self.contains(idx) { Ok(()) } else { Err(StructuralError::NodeOutOfRange(idx)) }
    }

    /// `(child, parent)` for two directly connected nodes.
    pub fn edge_between(&self, a: NodeIndex, b: NodeIndex) -> Result<(NodeIndex, NodeIndex), StructuralError> {
        self.check(a)?;
        self.check(b)?;
        if self.parent(a) == Some(b) {
            Ok((a, b))
        } else if self.parent(b) == Some(a) {
            Ok((b, a))
        } else {
            Err(StructuralError::NotAdjacent(a, b))
        }
    }

    /// Removes a bifurcating root, hanging one of its children below the other.
    ///
    /// The child that already has children becomes the new top node. The two
    /// root edges are merged into one. Returns `false` when the tree is not
    /// rooted or when both root children are leaves.
    pub(crate) fn unroot(&mut self) -> bool {
        if !self.is_rooted() {
            return false;
        }
        let old_root = self.root;
        let (c1, c2) = (self.children(old_root)[0], self.children(old_root)[1]);
        let (top, hung) = match (self.is_leaf(c1), self.is_leaf(c2)) {
            (true, true) => return false,
            (false, _) => (c1, c2),
            (true, false) => (c2, c1),
        };

        let merged = add_lengths(self.node(c1).branch_length, self.node(c2).branch_length);
        self.detach(c1);
        self.detach(c2);
        self.attach(hung, top);

        let top_support = self.node_mut(top).branch_support.take();
        let hung_node = self.node_mut(hung);
        hung_node.branch_length = merged;
        if hung_node.branch_support.is_none() {
            hung_node.branch_support = top_support;
        }
        self.node_mut(top).branch_length = f64::NAN;
        self.root = top;
        true
    }

    /// Places a new bifurcating root on the edge between `a` and `b`.
    ///
    /// `root_point` is the position along the edge: 0.0 puts the root at `a`,
    /// 1.0 at `b`. A rooted tree is unrooted first; when the chosen edge is one
    /// of the two root edges, the position is measured along the merged edge.
    pub(crate) fn reroot(&mut self, a: NodeIndex, b: NodeIndex, root_point: f64) -> Result<(), StructuralError> {
        if !(0.0..=1.0).contains(&root_point) {
            return Err(StructuralError::InvalidRootPoint(root_point));
        }
        let (child, parent) = self.edge_between(a, b)?;

        if self.is_rooted() {
            if parent == self.root {
                let sibling = self
                    .children(parent)
                    .iter()
                    .copied()
                    .find(|&c| c != child)
                    .ok_or_else(|| StructuralError::Invariant("root without second child".into()))?;
                let child_len = self.node(child).length_or_zero();
                let total = child_len + self.node(sibling).length_or_zero();
                // distance of the new root from `child`
                let from_child = if a == child { root_point * child_len } else { (1.0 - root_point) * child_len };
                if !self.unroot() {
                    // two leaves under the root: only the root position moves
                    self.node_mut(child).branch_length = from_child;
                    self.node_mut(sibling).branch_length = total - from_child;
                    return Ok(());
                }
                let fraction = if total > 0.0 { from_child / total } else { 0.5 };
                return self.place_root(child, sibling, fraction);
            }
            self.unroot();
        }
        self.place_root(a, b, root_point)
    }

    /// Core of [`Topology::reroot`] on an unrooted tree.
    ///
    /// Parent/child direction is reversed along the path from the top node to
    /// the chosen edge; each reversed edge keeps its length and support.
    fn place_root(&mut self, a: NodeIndex, b: NodeIndex, fraction_from_a: f64) -> Result<(), StructuralError> {
        let (child, parent) = self.edge_between(a, b)?;
        let edge_length = self.node(child).branch_length;
        let edge_support = self.node(child).branch_support.clone();

        let path = self.path_to_root(parent);
        let lengths: Vec<f64> = path.iter().map(|&n| self.node(n).branch_length).collect();
        let supports: Vec<Option<String>> = path.iter().map(|&n| self.node(n).branch_support.clone()).collect();

        self.detach(child);
        for &n in &path {
            self.detach(n);
        }
        for i in 0..path.len().saturating_sub(1) {
            let (lower, upper) = (path[i], path[i + 1]);
            self.attach(upper, lower);
            let upper_node = self.node_mut(upper);
            upper_node.branch_length = lengths[i];
            upper_node.branch_support = supports[i].clone();
        }

        let new_root = self.add_node(Node::default());
        self.attach(a, new_root);
        self.attach(b, new_root);
        let (len_a, len_b) = if edge_length.is_nan() {
            (f64::NAN, f64::NAN)
        } else {
            (fraction_from_a * edge_length, (1.0 - fraction_from_a) * edge_length)
        };
        for (node, len) in [(a, len_a), (b, len_b)] {
            let n = self.node_mut(node);
            n.branch_length = len;
            n.branch_support = edge_support.clone();
        }
        self.root = new_root;
        self.suppress_unary();
        Ok(())
    }

    /// Elides every non-root internal node that has exactly one child,
    /// merging its edge into the child's edge.
    pub(crate) fn suppress_unary(&mut self) {
        for idx in self.preorder() {
            if idx == self.root || self.children(idx).len() != 1 {
                continue;
            }
            self.elide(idx);
        }
        while self.children(self.root).len() == 1 && self.node(self.root).label.is_none() {
            let only = self.children(self.root)[0];
            self.detach(only);
            self.node_mut(only).branch_length = f64::NAN;
            self.root = only;
        }
    }

    /// Replaces a single-child node by its child in the parent's child list.
    fn elide(&mut self, idx: NodeIndex) {
        let Some(grandparent) = self.parent(idx) else {
            return;
        };
        let only = self.children(idx)[0];
        let own_length = self.node(idx).branch_length;
        let own_support = self.node(idx).branch_support.clone();
        self.detach(only);
        let Some(pos) = self.detach(idx) else {
            return;
        };
        self.attach_at(only, grandparent, pos);
        let child = self.node_mut(only);
        child.branch_length = add_lengths(child.branch_length, own_length);
        if child.branch_support.is_none() {
            child.branch_support = own_support;
        }
    }

    /// Removes a leaf; a parent left with a single child is elided.
    ///
    /// When the elided parent is the root, its remaining child becomes the root.
    pub(crate) fn remove_leaf(&mut self, leaf: NodeIndex) -> Result<(), StructuralError> {
        self.check(leaf)?;
        if !self.is_leaf(leaf) {
            return Err(StructuralError::NotInternal(leaf));
        }
        if self.leaves().len() <= 1 {
            return Err(StructuralError::LastTaxon);
        }
        let mut target = leaf;
        while let Some(parent) = self.parent(target) {
            self.detach(target);
            match self.children(parent).len() {
                0 => target = parent,
                1 => {
                    if parent == self.root {
                        let only = self.children(parent)[0];
                        self.detach(only);
                        self.node_mut(only).branch_length = f64::NAN;
                        self.root = only;
                    } else {
                        self.elide(parent);
                    }
                    break;
                }
                _ => break,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::newick::format(self, true, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;

    fn parse(s: &str) -> Topology {
        newick::parse(s).unwrap()
    }

    fn label_of(t: &Topology, idx: NodeIndex) -> Option<&str> {
        t.node(idx).label.as_deref()
    }

    /// Builds
    /// ```text
    ///        root
    ///       /    \
    ///      x      C
    ///     / \
    ///    A   B
    /// ```
    #[test]
    fn test_manual_construction() {
        let mut t = Topology::new();
        let root = t.root();
        let x = t.add_child(root, Node::default().with_length(1.0));
        t.add_child(x, Node::leaf("A").with_length(0.5));
        t.add_child(x, Node::leaf("B").with_length(0.5));
        t.add_child(root, Node::leaf("C").with_length(2.0));

        assert!(t.validate().is_ok());
        assert!(t.is_rooted());
        assert_eq!(t.leaf_labels(), vec!["A", "B", "C"]);
        assert_eq!(t.leaf_counts()[x.0], 2);
        assert_eq!(t.leaf_counts()[root.0], 3);
        assert_eq!(t.path_to_root(t.find_leaf("A").unwrap()).len(), 3);
    }

    #[test]
    fn test_validate_detects_broken_links() {
        let mut t = parse("(A,B,C);");
        let a = t.find_leaf("A").unwrap();
        t.node_mut(a).parent = None;
        assert!(matches!(t.validate(), Err(StructuralError::Invariant(_))));
    }

    #[test]
    fn test_compact_keeps_order_of_survivors() {
        let mut t = parse("((A,B),C,D);");
        let b = t.find_leaf("B").unwrap();
        t.remove_leaf(b).unwrap();
        let (compacted, remap) = t.compact();
        assert!(compacted.validate().is_ok());
        assert_eq!(compacted.len(), 4);
        assert!(remap.iter().filter(|m| m.is_none()).count() == 2);
        assert_eq!(compacted.leaf_labels(), vec!["A", "C", "D"]);
    }

    #[test]
    fn test_unroot_merges_root_edges() {
        let mut t = parse("((A:1,B:1):0.5,C:1.5);");
        assert!(t.unroot());
        let (t, _) = t.compact();
        assert!(t.validate().is_ok());
        assert!(!t.is_rooted());
        assert_eq!(t.children(t.root()).len(), 3);
        let c = t.find_leaf("C").unwrap();
        assert!((t.node(c).branch_length - 2.0).abs() < 1e-12);
        assert!(t.node(t.root()).branch_length.is_nan());

        let mut unrooted = parse("(A,B,C);");
        assert!(!unrooted.unroot());
    }

    #[test]
    fn test_unroot_two_leaves_is_noop() {
        let mut t = parse("(A:1,B:1);");
        assert!(!t.unroot());
        assert!(t.is_rooted());
        assert!(t.validate().is_ok());
        assert_eq!(t.leaf_labels(), vec!["A", "B"]);
        assert_eq!(newick::format(&t, true, false), "(A:1,B:1);");

        let (a, b) = (t.find_leaf("A").unwrap(), t.find_leaf("B").unwrap());
        t.reroot(a, t.root(), 0.25).unwrap();
        assert_eq!(t.leaf_labels(), vec!["A", "B"]);
        assert!((t.node(a).branch_length - 0.25).abs() < 1e-12);
        assert!((t.node(b).branch_length - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_reroot_on_leaf_edge() {
        let mut t = parse("((A:1,B:2):1,C:1,D:1);");
        let b = t.find_leaf("B").unwrap();
        let x = t.parent(b).unwrap();
        t.reroot(b, x, 0.25).unwrap();
        let (t, _) = t.compact();
        assert!(t.validate().is_ok());
        assert!(t.is_rooted());

        let root_children: Vec<_> = t.children(t.root()).to_vec();
        assert_eq!(label_of(&t, root_children[0]), Some("B"));
        assert!((t.node(root_children[0]).branch_length - 0.5).abs() < 1e-12);
        assert!((t.node(root_children[1]).branch_length - 1.5).abs() < 1e-12);
        // the old top node now hangs below x with x's old length
        let old_top = t.children(root_children[1]).iter().copied().find(|&c| !t.is_leaf(c)).unwrap();
        assert!((t.node(old_top).branch_length - 1.0).abs() < 1e-12);
        assert_eq!(t.leaf_counts()[old_top.0], 2);
    }

    #[test]
    fn test_reroot_rejects_non_adjacent_nodes() {
        let mut t = parse("((A,B),C,D);");
        let a = t.find_leaf("A").unwrap();
        let c = t.find_leaf("C").unwrap();
        assert_eq!(t.reroot(a, c, 0.5), Err(StructuralError::NotAdjacent(a, c)));
        assert!(matches!(t.reroot(a, t.parent(a).unwrap(), 1.5), Err(StructuralError::InvalidRootPoint(_))));
    }

    #[test]
    fn test_reroot_on_root_edge_moves_along_merged_edge() {
        let mut t = parse("((A:1,B:1):1,(C:1,D:1):3);");
        let root = t.root();
        let left = t.children(root)[0];
        // halfway between root and `left`: 0.5 from left, 3.5 from right
        t.reroot(root, left, 0.5).unwrap();
        let (t, _) = t.compact();
        assert!(t.validate().is_ok());
        let kids = t.children(t.root()).to_vec();
        let lengths: Vec<f64> = kids.iter().map(|&k| t.node(k).branch_length).collect();
        assert!((lengths[0] - 0.5).abs() < 1e-12);
        assert!((lengths[1] - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_remove_leaf_elides_parent() {
        let mut t = parse("((A:1,B:2):3,C:1,D:1);");
        let a = t.find_leaf("A").unwrap();
        t.remove_leaf(a).unwrap();
        let (t, _) = t.compact();
        assert!(t.validate().is_ok());
        let b = t.find_leaf("B").unwrap();
        assert_eq!(t.parent(b), Some(t.root()));
        assert!((t.node(b).branch_length - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_remove_leaf_under_root_promotes_sibling() {
        let mut t = parse("(A:1,(B:1,C:1):2);");
        let a = t.find_leaf("A").unwrap();
        t.remove_leaf(a).unwrap();
        let (t, _) = t.compact();
        assert!(t.validate().is_ok());
        assert_eq!(t.leaf_labels(), vec!["B", "C"]);
        assert!(t.is_rooted());
        assert!(t.node(t.root()).branch_length.is_nan());

        let mut single = parse("(A);");
        let a = single.find_leaf("A").unwrap();
        assert_eq!(single.remove_leaf(a), Err(StructuralError::LastTaxon));
    }

    #[test]
    fn test_support_value_parsing() {
        let mut t = parse("((A,B)95,(C,D)'0.98/100',E);");
        let ab = t.parent(t.find_leaf("A").unwrap()).unwrap();
        assert_eq!(t.support_value(ab), Some(95.0));
        let cd = t.parent(t.find_leaf("C").unwrap()).unwrap();
        t.node_mut(cd).branch_support = Some("0.98/100".into());
        assert_eq!(t.support_value(cd), Some(0.98));
        t.node_mut(cd).branch_support = Some("n/a".into());
        assert_eq!(t.support_value(cd), None);
    }
}
