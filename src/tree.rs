//! Traversal & mutation engine over immutable topology snapshots.
//!
//! # Overview
//! A [`Tree`] owns a linear history of [`Topology`] snapshots plus the
//! collapse state of every node. An edit never touches the current snapshot:
//! it clones it, applies the change, compacts the arena and pushes the result.
//! Anything after the history cursor is discarded first, so a new edit after
//! an undo drops the redo branch.
//!
//! Derived data (visible preorder, tips, leaf counts, distances from the root)
//! is computed lazily and thrown away whenever the current snapshot changes.
//!
//! # Example
//! ```
//! # use rust_python_tree_topology::tree::Tree;
//! let mut tree = Tree::from_newick("((A,B),C,D);").unwrap();
//! tree.set_outgroup(&["D"]).unwrap();
//! assert!(tree.is_rooted());
//! assert!(tree.undo());
//! assert!(!tree.is_rooted());
//! ```

use crate::bipartition::{Bipartition, bipartitions_of};
use crate::distances::{self, Comparison};
use crate::error::{ParseError, StructuralError};
use crate::newick;
use crate::topology::{NodeIndex, Topology};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Display state of an internal node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NodeState {
    #[default]
    Expanded,
    /// Treated as a tip by traversal, tip and distance queries; the subtree is kept.
    Collapsed,
}

/// Child order produced by [`Tree::ladderize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ladder {
    /// Smaller clades first.
    Ascending,
    /// Larger clades first.
    Descending,
}

/// Change notification sent to every subscribed [`TreeObserver`].
///
/// Node indices refer to the snapshot the edit was applied to.
#[derive(Clone, Debug, PartialEq)]
pub enum TreeEvent {
    Rerooted { a: NodeIndex, b: NodeIndex, root_point: f64 },
    Unrooted,
    Ladderized(Ladder),
    Collapsed(NodeIndex),
    Expanded(NodeIndex),
    ExpandedAll,
    TaxonRemoved(String),
    OutgroupSet(Vec<String>),
    MidpointRooted,
    Undone,
    Redone,
}

pub trait TreeObserver: Send + Sync {
    fn notify(&self, event: &TreeEvent);
}

impl<F> TreeObserver for F
where
    F: Fn(&TreeEvent) + Send + Sync,
{
    fn notify(&self, event: &TreeEvent) {
        self(event)
    }
}

#[derive(Clone, Debug)]
struct HistoryEntry {
    topology: Arc<Topology>,
    states: Arc<Vec<NodeState>>,
}

#[derive(Clone, Debug, Default)]
struct Caches {
    preorder: OnceLock<Vec<NodeIndex>>,
    tips: OnceLock<Vec<NodeIndex>>,
    leaf_counts: OnceLock<Vec<usize>>,
    root_distances: OnceLock<Vec<f64>>,
}

#[derive(Clone)]
pub struct Tree {
    history: Vec<HistoryEntry>,
    cursor: usize,
    observers: Vec<Arc<dyn TreeObserver>>,
    caches: Caches,
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("current", &self.to_newick(true, true))
            .field("cursor", &self.cursor)
            .field("history", &self.history.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.topology(), f)
    }
}

impl From<Topology> for Tree {
    fn from(topology: Topology) -> Self {
        Tree::new(topology)
    }
}

impl Tree {
    /// Wraps `topology` as the first history entry, every node expanded.
    pub fn new(topology: Topology) -> Self {
        let states = vec![NodeState::Expanded; topology.len()];
        Tree {
            history: vec![HistoryEntry {
                topology: Arc::new(topology),
                states: Arc::new(states),
            }],
            cursor: 0,
            observers: Vec::new(),
            caches: Caches::default(),
        }
    }

    pub fn from_newick(text: &str) -> Result<Self, ParseError> {
        Ok(Tree::new(newick::parse(text)?))
    }

    pub fn to_newick(&self, include_lengths: bool, include_supports: bool) -> String {
        newick::format(self.topology(), include_lengths, include_supports)
    }

    fn current(&self) -> &HistoryEntry {
        &self.history[self.cursor]
    }

    /// The current snapshot.
    pub fn topology(&self) -> &Topology {
        &self.current().topology
    }

    /// Shared handle on the current snapshot; stays valid across later edits.
    pub fn snapshot(&self) -> Arc<Topology> {
        Arc::clone(&self.current().topology)
    }

    pub fn subscribe(&mut self, observer: Arc<dyn TreeObserver>) {
        self.observers.push(observer);
    }

    fn notify(&self, event: &TreeEvent) {
        for observer in &self.observers {
            observer.notify(event);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn root(&self) -> NodeIndex {
        self.topology().root()
    }

    pub fn is_rooted(&self) -> bool {
        self.topology().is_rooted()
    }

    pub fn state(&self, idx: NodeIndex) -> NodeState {
        self.current().states.get(idx.index()).copied().unwrap_or_default()
    }

    pub fn is_collapsed(&self, idx: NodeIndex) -> bool {
        self.state(idx) == NodeState::Collapsed
    }

    /// Visible nodes in preorder; the subtrees of collapsed nodes are skipped.
    pub fn preorder(&self) -> &[NodeIndex] {
        self.caches.preorder.get_or_init(|| {
            let topology = self.topology();
            let mut order = Vec::with_capacity(topology.len());
            let mut stack = vec![topology.root()];
            while let Some(idx) = stack.pop() {
                order.push(idx);
                if !self.is_collapsed(idx) {
                    stack.extend(topology.children(idx).iter().rev());
                }
            }
            order
        })
    }

    /// Leaves and collapsed nodes, in visible preorder.
    pub fn tips(&self) -> &[NodeIndex] {
        self.caches.tips.get_or_init(|| {
            let topology = self.topology();
            self.preorder()
                .iter()
                .copied()
                .filter(|&idx| topology.is_leaf(idx) || self.is_collapsed(idx))
                .collect()
        })
    }

    /// Label per tip. An unlabeled collapsed clade reads as its leaf labels
    /// joined with `,`.
    pub fn tip_labels(&self) -> Vec<String> {
        let topology = self.topology();
        self.tips()
            .iter()
            .map(|&idx| match &topology.node(idx).label {
                Some(label) => label.clone(),
                None if !topology.is_leaf(idx) => topology
                    .subtree_preorder(idx)
                    .into_iter()
                    .filter(|&n| topology.is_leaf(n))
                    .filter_map(|n| topology.node(n).label.clone())
                    .collect::<Vec<_>>()
                    .join(","),
                None => String::new(),
            })
            .collect()
    }

    /// All leaf labels, collapsed or not.
    pub fn leaf_labels(&self) -> Vec<String> {
        self.topology().leaf_labels()
    }

    pub fn find_leaf(&self, label: &str) -> Option<NodeIndex> {
        self.topology().find_leaf(label)
    }

    /// Descendant leaf count per node, ignoring collapse state.
    pub fn leaf_counts(&self) -> &[usize] {
        self.caches.leaf_counts.get_or_init(|| self.topology().leaf_counts())
    }

    /// Sum of branch lengths from the root to every node; absent lengths count as 0.
    pub fn root_distances(&self) -> &[f64] {
        self.caches.root_distances.get_or_init(|| {
            let topology = self.topology();
            let mut dist = vec![0.0; topology.len()];
            for idx in topology.preorder() {
                if let Some(parent) = topology.parent(idx) {
                    dist[idx.index()] = dist[parent.index()] + topology.node(idx).length_or_zero();
                }
            }
            dist
        })
    }

    /// Sum of all branch lengths.
    pub fn total_length(&self) -> f64 {
        let topology = self.topology();
        topology
            .preorder()
            .into_iter()
            .filter(|&idx| idx != topology.root())
            .map(|idx| topology.node(idx).length_or_zero())
            .sum()
    }

    /// Most recent common ancestor of the leaves named in `labels`.
    ///
    /// `None` when `labels` is empty or names a taxon that is not in the tree.
    pub fn mrca<S: AsRef<str>>(&self, labels: &[S]) -> Option<NodeIndex> {
        let topology = self.topology();
        let mut leaves = labels.iter().map(|l| topology.find_leaf(l.as_ref()));
        let mut acc = leaves.next()??;
        for leaf in leaves {
            acc = lowest_common_ancestor(topology, acc, leaf?);
        }
        Some(acc)
    }

    /// Patristic distance between two nodes.
    pub fn path_length(&self, a: NodeIndex, b: NodeIndex) -> Result<f64, StructuralError> {
        let topology = self.topology();
        topology.get(a)?;
        topology.get(b)?;
        let lca = lowest_common_ancestor(topology, a, b);
        let dist = self.root_distances();
        Ok(dist[a.index()] + dist[b.index()] - 2.0 * dist[lca.index()])
    }

    /// Non-trivial splits of the current snapshot keyed to `taxon_order`.
    pub fn get_bipartitions(&self, taxon_order: &[String]) -> Vec<Bipartition> {
        bipartitions_of(self.topology(), taxon_order)
    }

    /// Robinson–Foulds distance to `other` over the shared leaf labels.
    pub fn robinson_foulds(&self, other: &Tree) -> Comparison {
        distances::robinson_foulds(self.topology(), other.topology())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        crate::json::to_json(self)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.history.len()
    }

    /// Number of snapshots kept, including the current one and any redo entries.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Steps back one snapshot; `false` at the start of history.
    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        self.caches = Caches::default();
        debug!(cursor = self.cursor, "undo");
        self.notify(&TreeEvent::Undone);
        true
    }

    /// Steps forward one snapshot; `false` at the end of history.
    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor += 1;
        self.caches = Caches::default();
        debug!(cursor = self.cursor, "redo");
        self.notify(&TreeEvent::Redone);
        true
    }

    /// Runs `edit` on a copy of the current snapshot and pushes the result.
    ///
    /// `edit` returns `Ok(false)` when it changed nothing; no entry is pushed then.
    /// On error the current snapshot, history and caches are left as they were.
    fn commit<F>(&mut self, event: TreeEvent, edit: F) -> Result<(), StructuralError>
    where
        F: FnOnce(&mut Topology, &mut Vec<NodeState>) -> Result<bool, StructuralError>,
    {
        let current = self.current();
        let mut topology = Topology::clone(&current.topology);
        let mut states = current.states.to_vec();
        if !edit(&mut topology, &mut states)? {
            return Ok(());
        }
        states.resize(topology.len(), NodeState::Expanded);

        let (topology, remap) = topology.compact();
        topology.validate()?;
        let mut kept = vec![NodeState::Expanded; topology.len()];
        for (old, new) in remap.iter().enumerate() {
            if let Some(new) = new {
                kept[new.index()] = states[old];
            }
        }

        self.history.truncate(self.cursor + 1);
        self.history.push(HistoryEntry {
            topology: Arc::new(topology),
            states: Arc::new(kept),
        });
        self.cursor += 1;
        self.caches = Caches::default();
        debug!(
            ?event,
            nodes = self.topology().len(),
            history = self.history.len(),
            "committed tree edit"
        );
        self.notify(&event);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Roots the tree on the edge between two adjacent nodes.
    ///
    /// `root_point` 0.0 places the root at `a`, 1.0 at `b`; the edge length is
    /// split accordingly. A rooted tree is unrooted first.
    pub fn reroot_between(&mut self, a: NodeIndex, b: NodeIndex, root_point: f64) -> Result<(), StructuralError> {
        self.commit(TreeEvent::Rerooted { a, b, root_point }, |t, _| {
            t.reroot(a, b, root_point)?;
            Ok(true)
        })
    }

    /// Removes a bifurcating root; a no-op on an unrooted tree.
    pub fn unroot(&mut self) -> Result<(), StructuralError> {
        self.commit(TreeEvent::Unrooted, |t, _| Ok(t.unroot()))
    }

    /// Stable-sorts every node's children by descendant leaf count.
    pub fn ladderize(&mut self, direction: Ladder) -> Result<(), StructuralError> {
        self.commit(TreeEvent::Ladderized(direction), |t, _| {
            let counts = t.leaf_counts();
            let mut changed = false;
            for idx in t.preorder() {
                let mut children = t.children(idx).to_vec();
                match direction {
                    Ladder::Ascending => children.sort_by_key(|c| counts[c.index()]),
                    Ladder::Descending => children.sort_by(|x, y| counts[y.index()].cmp(&counts[x.index()])),
                }
                if children.as_slice() != t.children(idx) {
                    t.node_mut(idx).children = children;
                    changed = true;
                }
            }
            Ok(changed)
        })
    }

    fn set_state(&mut self, idx: NodeIndex, state: NodeState, event: TreeEvent) -> Result<(), StructuralError> {
        self.commit(event, |t, states| {
            t.get(idx)?;
            if t.is_leaf(idx) {
                return Err(StructuralError::NotInternal(idx));
            }
            let changed = states[idx.index()] != state;
            states[idx.index()] = state;
            Ok(changed)
        })
    }

    /// Marks an internal node as collapsed.
    pub fn collapse(&mut self, idx: NodeIndex) -> Result<(), StructuralError> {
        self.set_state(idx, NodeState::Collapsed, TreeEvent::Collapsed(idx))
    }

    pub fn expand(&mut self, idx: NodeIndex) -> Result<(), StructuralError> {
        self.set_state(idx, NodeState::Expanded, TreeEvent::Expanded(idx))
    }

    pub fn expand_all(&mut self) -> Result<(), StructuralError> {
        self.commit(TreeEvent::ExpandedAll, |_, states| {
            let changed = states.contains(&NodeState::Collapsed);
            states.fill(NodeState::Expanded);
            Ok(changed)
        })
    }

    /// Removes the leaf named `label`, eliding a parent left with one child.
    pub fn remove_taxon(&mut self, label: &str) -> Result<(), StructuralError> {
        self.commit(TreeEvent::TaxonRemoved(label.to_string()), |t, _| {
            let leaf = t
                .find_leaf(label)
                .ok_or_else(|| StructuralError::TaxonNotFound(label.to_string()))?;
            t.remove_leaf(leaf)?;
            Ok(true)
        })
    }

    /// Roots the tree so the outgroup taxa are separated from the rest as
    /// well as the topology allows.
    ///
    /// The tree is first rooted on the edge of some ingroup leaf. Then every
    /// node is scored with `outgroup leaves − ingroup leaves` below it and the
    /// root is moved to the midpoint of the edge above the best-scoring node
    /// (the last one in preorder on ties). Labels not present in the tree are
    /// ignored.
    pub fn set_outgroup<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<(), StructuralError> {
        let wanted: HashSet<&str> = labels.iter().map(|l| l.as_ref()).collect();
        let event = TreeEvent::OutgroupSet(labels.iter().map(|l| l.as_ref().to_string()).collect());
        self.commit(event, |t, _| {
            let leaves = t.leaves();
            let is_out = |t: &Topology, idx: NodeIndex| {
                t.node(idx).label.as_deref().is_some_and(|l| wanted.contains(l))
            };
            let outgroup = leaves.iter().filter(|&&l| is_out(t, l)).count();
            if outgroup == 0 {
                return Err(StructuralError::EmptyOutgroup);
            }
            if outgroup == leaves.len() {
                return Err(StructuralError::OutgroupCoversAllTaxa);
            }

            let anchor = leaves
                .iter()
                .copied()
                .find(|&l| !is_out(t, l))
                .ok_or(StructuralError::OutgroupCoversAllTaxa)?;
            let anchor_parent = t
                .parent(anchor)
                .ok_or_else(|| StructuralError::Invariant("ingroup leaf without parent".into()))?;
            t.reroot(anchor, anchor_parent, 0.0)?;

            let mut score = vec![0i64; t.len()];
            for idx in t.postorder() {
                score[idx.index()] = if t.is_leaf(idx) {
                    if is_out(t, idx) { 1 } else { -1 }
                } else {
                    t.children(idx).iter().map(|c| score[c.index()]).sum()
                };
            }
            let root = t.root();
            let mut best: Option<NodeIndex> = None;
            for idx in t.preorder().into_iter().filter(|&idx| idx != root) {
                if best.is_none_or(|b| score[idx.index()] >= score[b.index()]) {
                    best = Some(idx);
                }
            }
            let best = best.ok_or_else(|| StructuralError::Invariant("tree without edges".into()))?;
            let parent = t
                .parent(best)
                .ok_or_else(|| StructuralError::Invariant("non-root node without parent".into()))?;
            t.reroot(best, parent, 0.5)?;
            Ok(true)
        })
    }

    /// Roots the tree halfway along its longest leaf-to-leaf path.
    ///
    /// A no-op on a tree with fewer than two leaves.
    pub fn midpoint_root(&mut self) -> Result<(), StructuralError> {
        self.commit(TreeEvent::MidpointRooted, |t, _| {
            let leaves = t.leaves();
            if leaves.len() < 2 {
                return Ok(false);
            }
            let farthest = |t: &Topology, from: NodeIndex| {
                let dist = distances_from(t, from);
                let mut best = (from, f64::NEG_INFINITY);
                for &leaf in &leaves {
                    if dist[leaf.index()] > best.1 {
                        best = (leaf, dist[leaf.index()]);
                    }
                }
                best
            };
            let (u, _) = farthest(t, leaves[0]);
            let (v, diameter) = farthest(t, u);
            let half = diameter / 2.0;
            let lca = lowest_common_ancestor(t, u, v);

            let (node, fraction) = locate_along(t, u, lca, half)
                .or_else(|| locate_along(t, v, lca, half))
                .ok_or_else(|| StructuralError::Invariant("midpoint not found on the longest path".into()))?;
            let parent = t
                .parent(node)
                .ok_or_else(|| StructuralError::Invariant("non-root node without parent".into()))?;
            t.reroot(node, parent, fraction)?;
            Ok(true)
        })
    }
}

fn lowest_common_ancestor(topology: &Topology, a: NodeIndex, b: NodeIndex) -> NodeIndex {
    let above_a: HashSet<NodeIndex> = topology.path_to_root(a).into_iter().collect();
    topology
        .path_to_root(b)
        .into_iter()
        .find(|n| above_a.contains(n))
        .unwrap_or_else(|| topology.root())
}

/// Distance from `start` to every node, walking edges in both directions.
fn distances_from(topology: &Topology, start: NodeIndex) -> Vec<f64> {
    let mut dist = vec![f64::NAN; topology.len()];
    dist[start.index()] = 0.0;
    let mut stack = vec![start];
    while let Some(idx) = stack.pop() {
        let here = dist[idx.index()];
        let up = topology
            .parent(idx)
            .map(|p| (p, topology.node(idx).length_or_zero()));
        let down = topology
            .children(idx)
            .iter()
            .map(|&c| (c, topology.node(c).length_or_zero()));
        for (next, len) in up.into_iter().chain(down) {
            if dist[next.index()].is_nan() {
                dist[next.index()] = here + len;
                stack.push(next);
            }
        }
    }
    dist
}

/// Walks up from `from` towards `stop` and returns the edge (as its lower
/// node) containing the point `target` away from `from`, with the fractional
/// position measured from that lower node.
fn locate_along(topology: &Topology, from: NodeIndex, stop: NodeIndex, target: f64) -> Option<(NodeIndex, f64)> {
    let mut covered = 0.0;
    let mut node = from;
    while node != stop {
        let len = topology.node(node).length_or_zero();
        if covered + len >= target {
            let fraction = if len > 0.0 { ((target - covered) / len).clamp(0.0, 1.0) } else { 0.0 };
            return Some((node, fraction));
        }
        covered += len;
        node = topology.parent(node)?;
    }
    None
}
