//! Extract split snapshots from trees.
//!
//! # Overview
//! A [`TreeSnapshot`] captures every bipartition of one tree together with the
//! length of the branch inducing it. Snapshots own no reference to the tree,
//! so a batch of them can be compared in parallel.
//!
//! # Why taxon names and not node indices
//! Node indices depend on how a tree was parsed or edited. Taxon names do not.
//! Bits are assigned from a taxon order shared by all snapshots that will be
//! compared; [`TreeSnapshot::from_topology`] uses the sorted leaf names so
//! that the same taxa always land on the same bits.
//!
//! # Rooted trees
//! The two branches below a bifurcating root induce the same split. The
//! snapshot stores it once, with the two lengths added up.

use crate::bipartition::{Bipartition, node_bipartitions};
use crate::bitset::Bitset;
use crate::topology::Topology;
use crate::tree::Tree;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Keep single-taxon splits (terminal branches), needed by branch-length metrics.
    pub include_trivial: bool,
}

impl SnapshotOptions {
    pub fn with_trivial() -> Self {
        SnapshotOptions { include_trivial: true }
    }
}

/// Immutable split summary of one tree.
///
/// # Fields
/// - `parts`: canonical splits, for O(1) membership tests
/// - `lengths`: branch length per split; absent lengths read as 0
/// - `taxa`: the taxon order the bits refer to
/// - `present`: taxa of `taxa` that occur in the tree
/// - `rooted`: whether the source tree had a bifurcating root
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    pub parts: HashSet<Bipartition>,
    pub lengths: HashMap<Bipartition, f64>,
    pub taxa: Vec<String>,
    pub present: Bitset,
    pub rooted: bool,
}

impl TreeSnapshot {
    /// Snapshot keyed to an explicit taxon order.
    ///
    /// Leaves missing from `taxon_order` are ignored, which restricts the
    /// splits to the listed taxa.
    pub fn new(topology: &Topology, taxon_order: &[String], options: SnapshotOptions) -> Self {
        let mut parts = HashSet::new();
        let mut lengths: HashMap<Bipartition, f64> = HashMap::new();
        let mut present = Bitset::empty(taxon_order.len());

        for (idx, split) in node_bipartitions(topology, taxon_order, options.include_trivial) {
            present = split.participating_taxa().clone();
            *lengths.entry(split.clone()).or_insert(0.0) += topology.node(idx).length_or_zero();
            parts.insert(split);
        }
        if parts.is_empty() {
            let index = crate::bipartition::taxon_index(taxon_order);
            for label in topology.leaf_labels() {
                if let Some(&bit) = index.get(&label) {
                    present.set(bit);
                }
            }
        }

        TreeSnapshot {
            parts,
            lengths,
            taxa: taxon_order.to_vec(),
            present,
            rooted: topology.is_rooted(),
        }
    }

    /// Snapshot keyed to the tree's own leaf names in sorted order.
    pub fn from_topology(topology: &Topology, options: SnapshotOptions) -> Self {
        let mut taxa = topology.leaf_labels();
        taxa.sort();
        Self::new(topology, &taxa, options)
    }

    /// Snapshot of the current state of an engine tree.
    pub fn from_tree(tree: &Tree, taxon_order: &[String], options: SnapshotOptions) -> Self {
        Self::new(tree.topology(), taxon_order, options)
    }

    /// Number of stored splits.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn taxon_count(&self) -> usize {
        self.present.count_ones()
    }

    pub fn length(&self, split: &Bipartition) -> f64 {
        self.lengths.get(split).copied().unwrap_or(0.0)
    }

    /// Longest stored branch; 0 for a snapshot without splits.
    pub fn max_length(&self) -> f64 {
        self.lengths.values().copied().fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;

    fn snapshot(text: &str, options: SnapshotOptions) -> TreeSnapshot {
        TreeSnapshot::from_topology(&newick::parse(text).unwrap(), options)
    }

    /// ```text
    ///              root
    ///             /    \
    ///         node1     E
    ///         /   \
    ///     node2    D
    ///     /   \
    ///    A    node3
    ///         /   \
    ///        B     C
    /// ```
    ///
    /// Leaves sorted: A=0, B=1, C=2, D=3, E=4. node1 and E are the two root
    /// branches and induce the trivial split {E}; node2 gives {D,E} and node3 {B,C}.
    #[test]
    fn test_asymmetric_tree_splits() {
        let snap = snapshot("(((A:1,(B:1,C:1):0.5):2,D:1):3,E:4);", SnapshotOptions::default());
        assert!(snap.rooted);
        assert_eq!(snap.len(), 2);
        let smaller: HashSet<u64> = snap.parts.iter().map(|p| p.smaller_side().0[0]).collect();
        assert_eq!(smaller, HashSet::from([0b00110, 0b11000]));

        let with_leaves = snapshot("(((A:1,(B:1,C:1):0.5):2,D:1):3,E:4);", SnapshotOptions::with_trivial());
        assert_eq!(with_leaves.len(), 7);
        // the root branches are one split {E}: 3 + 4
        let e = with_leaves.parts.iter().find(|p| p.smaller_side().0[0] == 0b10000).unwrap();
        assert_eq!(with_leaves.length(e), 7.0);
        assert_eq!(with_leaves.max_length(), 7.0);
    }

    /// Two files list the same taxa in different orders; the split {Chimp, Human}
    /// must get the same bits in both.
    #[test]
    fn test_consistent_leaf_ordering() {
        let a = snapshot("((Human,Chimp),Gorilla,Orangutan);", SnapshotOptions::default());
        let b = snapshot("(Orangutan,(Chimp,Human),Gorilla);", SnapshotOptions::default());
        assert_eq!(a.taxa, vec!["Chimp", "Gorilla", "Human", "Orangutan"]);
        assert_eq!(a.taxa, b.taxa);
        assert_eq!(a.parts, b.parts);
        let only = a.parts.iter().next().unwrap();
        assert_eq!(only.labels(&a.taxa).0, vec!["Chimp", "Human"]);
    }

    /// Both sides of a rooted split collapse onto one canonical split.
    #[test]
    fn test_root_children_are_one_split() {
        let snap = snapshot("((A:1,B:1):2,(C:1,D:1):3);", SnapshotOptions::default());
        assert_eq!(snap.len(), 1);
        let split = snap.parts.iter().next().unwrap();
        assert_eq!(snap.length(split), 5.0);
    }

    #[test]
    fn test_restricted_taxon_order() {
        let topology = newick::parse("((A:1,B:1):1,(C:1,(D:1,X:1):1):1);").unwrap();
        let order: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let snap = TreeSnapshot::new(&topology, &order, SnapshotOptions::with_trivial());
        assert_eq!(snap.taxon_count(), 4);
        // X is ignored; D's terminal branch picks up the edge above (D,X)
        let d = snap.parts.iter().find(|p| p.smaller_side().0[0] == 0b1000).unwrap();
        assert_eq!(snap.length(d), 2.0);
    }
}
