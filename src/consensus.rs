//! Consensus trees and support decoration from sets of trees.
//!
//! Splits are collected into a [`BipartitionSet`], reduced to a compatible
//! subset and turned back into a tree. Supports are written as percentages of
//! the input trees that contain a split, rounded to an integer.

use crate::bipartition::{Bipartition, node_bipartitions};
use crate::bipartition_set::BipartitionSet;
use crate::bitset::Bitset;
use crate::error::StructuralError;
use crate::topology::{Node, NodeIndex, Topology};
use std::collections::HashSet;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConsensusConfig {
    /// Splits must occur in more than this fraction of the trees.
    pub threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig { threshold: 0.5 }
    }
}

/// Leaf labels of all trees, in order of first appearance.
pub fn taxon_union(trees: &[Topology]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut taxa = Vec::new();
    for tree in trees {
        for label in tree.leaf_labels() {
            if seen.insert(label.clone()) {
                taxa.push(label);
            }
        }
    }
    taxa
}

fn percent(count: usize, total: usize) -> String {
    let pct = if total == 0 { 0.0 } else { 100.0 * count as f64 / total as f64 };
    format!("{pct:.0}")
}

/// Builds the tree displaying `splits`, which must be pairwise compatible.
///
/// One leaf is created per taxon of `taxa`, under a multifurcating top node;
/// each split then becomes an internal node above its smaller side, largest
/// splits first. Trivial and repeated splits are skipped.
pub fn tree_from_bipartitions(taxa: &[String], splits: &[Bipartition]) -> Result<Topology, StructuralError> {
    let supported: Vec<(Bipartition, Option<String>)> = splits.iter().map(|s| (s.clone(), None)).collect();
    build_tree(taxa, &supported)
}

fn build_tree(taxa: &[String], splits: &[(Bipartition, Option<String>)]) -> Result<Topology, StructuralError> {
    let universe = taxa.len();
    let mut topology = Topology::new();
    let root = topology.root();
    let mut clades: Vec<Bitset> = vec![Bitset::full(universe)];
    for (i, label) in taxa.iter().enumerate() {
        topology.add_child(root, Node::leaf(label.clone()));
        let mut clade = Bitset::empty(universe);
        clade.set(i);
        clades.push(clade);
    }

    let mut ordered: Vec<&(Bipartition, Option<String>)> = splits.iter().filter(|(s, _)| !s.is_trivial()).collect();
    ordered.sort_by_key(|(s, _)| std::cmp::Reverse(s.size()));

    for (split, support) in ordered {
        let clade = split.smaller_side();
        if clades.contains(clade) {
            continue;
        }
        // deepest existing node containing the clade
        let mut host = root;
        while let Some(&next) = topology
            .children(host)
            .iter()
            .find(|c| clade.is_subset_of(&clades[c.index()]) && !topology.is_leaf(**c))
        {
            host = next;
        }
        let (inside, crossing): (Vec<NodeIndex>, Vec<NodeIndex>) = topology
            .children(host)
            .iter()
            .copied()
            .filter(|c| clades[c.index()].intersects(clade))
            .partition(|c| clades[c.index()].is_subset_of(clade));
        if let Some(&bad) = crossing.first() {
            return Err(StructuralError::Invariant(format!(
                "split {:?} conflicts with the clade below {bad}",
                split.labels(taxa).0
            )));
        }
        let Some(&first) = inside.first() else {
            continue;
        };
        let pos = topology.detach(first).unwrap_or(0);
        let node = topology.add_node(Node {
            branch_support: support.clone(),
            ..Node::default()
        });
        topology.attach_at(node, host, pos);
        topology.attach(first, node);
        for &child in &inside[1..] {
            topology.detach(child);
            topology.attach(child, node);
        }
        clades.push(clade.clone());
    }
    Ok(topology)
}

/// Majority-rule style consensus of `trees`.
///
/// All splits are pooled, reduced with
/// [`BipartitionSet::find_compatible_subset`] and kept when they occur in
/// more than `config.threshold` of the trees. A threshold of 0 keeps the
/// whole greedy compatible subset. Internal nodes carry percentage supports.
pub fn majority_consensus(trees: &[Topology], config: &ConsensusConfig) -> Result<Topology, StructuralError> {
    if trees.is_empty() {
        return Err(StructuralError::Invariant("consensus of zero trees".into()));
    }
    let taxa = taxon_union(trees);
    let pooled = BipartitionSet::from_trees(trees, &taxa);
    let compatible = pooled.find_compatible_subset();
    let total = pooled.tree_count();
    let kept: Vec<(Bipartition, Option<String>)> = compatible
        .iter()
        .filter(|(_, count)| *count as f64 / total as f64 > config.threshold)
        .map(|(split, count)| (split.clone(), Some(percent(count, total))))
        .collect();
    debug!(
        trees = total,
        distinct = pooled.len(),
        compatible = compatible.len(),
        kept = kept.len(),
        "built consensus"
    );
    build_tree(&taxa, &kept)
}

/// Copies `target`, writing onto every internal branch the percentage of
/// `replicates` that contain its split.
pub fn decorate_support(target: &Topology, replicates: &[Topology]) -> Topology {
    let mut decorated = target.clone();
    if replicates.is_empty() {
        return decorated;
    }
    let taxa = target.leaf_labels();
    let counts = BipartitionSet::from_trees(replicates, &taxa);
    for (idx, split) in node_bipartitions(target, &taxa, false) {
        decorated.node_mut(idx).branch_support = Some(percent(counts.count(&split), replicates.len()));
    }
    decorated
}
