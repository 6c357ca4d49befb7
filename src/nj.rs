//! Neighbor-joining tree construction (Saitou & Nei 1987).
//!
//! # Overview
//! Builds a tree from a labelled pairwise matrix. While more than three
//! clusters remain, the pair `(i, j)` with the best Q value
//!
//! ```text
//! Q[i][j] = (n - 2)·d[i][j] − S_i − S_j        S_i = Σ_k d[i][k]
//! ```
//!
//! is joined under a new internal node. The joined cluster's distance to every
//! other cluster is the simple average of the two merged rows. The last three
//! clusters are resolved with the three-point formula and hang from the top
//! node, so the result is an unrooted tree with a trifurcating pseudo-root.
//!
//! [`add_lengths_to_topology`] runs the same reduction but only joins pairs
//! allowed by a fixed topology, then copies the resulting lengths onto it.

use crate::bipartition::{Bipartition, node_bipartitions, taxon_index};
use crate::bitset::Bitset;
use crate::error::MatrixError;
use crate::topology::{Node, NodeIndex, Topology};
use std::collections::HashMap;
use tracing::{debug, trace};

/// How matrix values relate to evolutionary distance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatrixKind {
    /// Zero diagonal, larger means further apart.
    #[default]
    Distance,
    /// Larger means closer; converted with `max_diagonal − value` before joining.
    Similarity,
}

/// Which Q value picks the pair to join.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinCriterion {
    #[default]
    MinimizeQ,
    /// For raw similarity scores used without conversion.
    MaximizeQ,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NjConfig {
    pub kind: MatrixKind,
    pub criterion: JoinCriterion,
}

impl NjConfig {
    pub fn similarity() -> Self {
        NjConfig {
            kind: MatrixKind::Similarity,
            ..Self::default()
        }
    }

    /// Similarity values joined as they are, largest Q first.
    pub fn raw_similarity() -> Self {
        NjConfig {
            kind: MatrixKind::Distance,
            criterion: JoinCriterion::MaximizeQ,
        }
    }
}

/// Square matrix with one label per row and column.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceMatrix {
    labels: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    /// Checks shape and finiteness; symmetry is assumed, not checked.
    pub fn new(labels: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self, MatrixError> {
        if labels.is_empty() && values.is_empty() {
            return Err(MatrixError::Empty);
        }
        if labels.len() != values.len() {
            return Err(MatrixError::LabelCountMismatch {
                labels: labels.len(),
                rows: values.len(),
            });
        }
        let n = values.len();
        for (row, cells) in values.iter().enumerate() {
            if cells.len() != n {
                return Err(MatrixError::NotSquare {
                    row,
                    len: cells.len(),
                    expected: n,
                });
            }
            if let Some(col) = cells.iter().position(|v| !v.is_finite()) {
                return Err(MatrixError::NonFinite { row, col });
            }
        }
        Ok(DistanceMatrix { labels, values })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    /// `max_diagonal − value` for every off-diagonal cell; the diagonal becomes 0.
    pub fn similarity_to_distance(&self) -> DistanceMatrix {
        let max_diagonal = (0..self.len())
            .map(|i| self.values[i][i])
            .fold(f64::NEG_INFINITY, f64::max);
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .map(|(j, &v)| if i == j { 0.0 } else { max_diagonal - v })
                    .collect()
            })
            .collect();
        DistanceMatrix {
            labels: self.labels.clone(),
            values,
        }
    }

    fn working_values(&self, config: &NjConfig) -> Vec<Vec<f64>> {
        match config.kind {
            MatrixKind::Distance => self.values.clone(),
            MatrixKind::Similarity => self.similarity_to_distance().values,
        }
    }
}

/// Active clusters of one neighbor-joining run.
struct Joiner {
    topology: Topology,
    nodes: Vec<NodeIndex>,
    clades: Vec<Bitset>,
    dist: Vec<Vec<f64>>,
    joins: usize,
}

impl Joiner {
    fn new(labels: &[String], dist: Vec<Vec<f64>>) -> Self {
        let mut topology = Topology::new();
        let universe = labels.len();
        let mut nodes = Vec::with_capacity(universe);
        let mut clades = Vec::with_capacity(universe);
        for (i, label) in labels.iter().enumerate() {
            nodes.push(topology.add_node(Node::leaf(label.clone())));
            let mut clade = Bitset::empty(universe);
            clade.set(i);
            clades.push(clade);
        }
        Joiner {
            topology,
            nodes,
            clades,
            dist,
            joins: 0,
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn row_sums(&self) -> Vec<f64> {
        self.dist.iter().map(|row| row.iter().sum()).collect()
    }

    /// Best pair `(i, j)` with `i < j` among those `allowed`; the first one
    /// in row-major order wins ties.
    fn best_pair(&self, criterion: JoinCriterion, allowed: impl Fn(usize, usize) -> bool) -> Option<(usize, usize)> {
        let n = self.len();
        let sums = self.row_sums();
        let scale = (n - 2) as f64;
        let mut best: Option<((usize, usize), f64)> = None;
        for i in 0..n {
            for j in (i + 1)..n {
                if !allowed(i, j) {
                    continue;
                }
                let q = scale * self.dist[i][j] - sums[i] - sums[j];
                let better = match best {
                    None => true,
                    Some((_, b)) => match criterion {
                        JoinCriterion::MinimizeQ => q < b,
                        JoinCriterion::MaximizeQ => q > b,
                    },
                };
                if better {
                    best = Some(((i, j), q));
                }
            }
        }
        best.map(|(pair, _)| pair)
    }

    /// Joins clusters `i < j` under a new node that takes position `i`.
    fn join(&mut self, i: usize, j: usize) {
        let n = self.len();
        let sums = self.row_sums();
        let dij = self.dist[i][j];
        let li = dij / 2.0 + (sums[i] - sums[j]) / (2.0 * (n - 2) as f64);
        let lj = dij - li;

        let parent = self.topology.add_node(Node::default());
        for (child, len) in [(self.nodes[i], li), (self.nodes[j], lj)] {
            self.topology.attach(child, parent);
            self.topology.node_mut(child).branch_length = len.max(0.0);
        }
        trace!(left = i, right = j, li, lj, remaining = n - 1, "neighbor-joining step");

        let merged: Vec<f64> = (0..n).map(|k| (self.dist[i][k] + self.dist[j][k]) / 2.0).collect();
        for k in 0..n {
            self.dist[i][k] = merged[k];
            self.dist[k][i] = merged[k];
        }
        self.dist[i][i] = 0.0;
        self.dist.remove(j);
        for row in &mut self.dist {
            row.remove(j);
        }
        let right = self.clades.remove(j);
        self.clades[i].or_assign(&right);
        self.nodes[i] = parent;
        self.nodes.remove(j);
        self.joins += 1;
    }

    /// Hangs the remaining (at most three) clusters from the top node.
    fn finish(mut self) -> Topology {
        let root = self.topology.root();
        let d = &self.dist;
        let lengths: Vec<f64> = match self.nodes.len() {
            3 => vec![
                (d[0][1] + d[0][2] - d[1][2]) / 2.0,
                (d[0][1] + d[1][2] - d[0][2]) / 2.0,
                (d[0][2] + d[1][2] - d[0][1]) / 2.0,
            ],
            2 => vec![d[0][1] / 2.0; 2],
            _ => Vec::new(),
        };
        if self.nodes.len() == 1 {
            let only = self.nodes[0];
            self.topology.set_root(only);
            let (topology, _) = self.topology.compact();
            return topology;
        }
        for (&child, len) in self.nodes.iter().zip(lengths) {
            self.topology.attach(child, root);
            self.topology.node_mut(child).branch_length = len.max(0.0);
        }
        debug!(joins = self.joins, nodes = self.topology.len(), "neighbor-joining finished");
        self.topology
    }
}

/// Builds a tree from `matrix`.
///
/// # Example
/// ```
/// # use rust_python_tree_topology::nj::{DistanceMatrix, NjConfig, neighbor_joining};
/// # use rust_python_tree_topology::newick;
/// let labels = vec!["A".to_string(), "B".to_string(), "C".to_string()];
/// let d = vec![vec![0.0, 2.0, 4.0], vec![2.0, 0.0, 4.0], vec![4.0, 4.0, 0.0]];
/// let matrix = DistanceMatrix::new(labels, d).unwrap();
/// let tree = neighbor_joining(&matrix, &NjConfig::default());
/// assert_eq!(newick::format(&tree, true, false), "(A:1,B:1,C:3);");
/// ```
pub fn neighbor_joining(matrix: &DistanceMatrix, config: &NjConfig) -> Topology {
    let mut joiner = Joiner::new(&matrix.labels, matrix.working_values(config));
    while joiner.len() > 3 {
        let Some((i, j)) = joiner.best_pair(config.criterion, |_, _| true) else {
            break;
        };
        joiner.join(i, j);
    }
    joiner.finish()
}

/// Neighbor-joining restricted to a fixed topology; returns that topology
/// with branch lengths taken from the constrained reduction.
///
/// Two clusters may be joined only when the lowest node of `topology` that
/// strictly contains each of them is the same node. A rooted `topology` gets
/// half of the length of its root branch on each of the two root edges.
/// Labels and supports of `topology` are kept.
pub fn add_lengths_to_topology(
    topology: &Topology,
    matrix: &DistanceMatrix,
    config: &NjConfig,
) -> Result<Topology, MatrixError> {
    let order = matrix.labels();
    let mut tree_labels = topology.leaf_labels();
    tree_labels.sort();
    let mut matrix_labels = order.to_vec();
    matrix_labels.sort();
    if tree_labels != matrix_labels {
        return Err(MatrixError::TopologyMismatch(format!(
            "tree has {} leaves, matrix has {} labels, and the label sets differ",
            tree_labels.len(),
            matrix_labels.len()
        )));
    }

    let index = taxon_index(order);
    let clades = topology.clade_bitsets(&index, order.len());
    let postorder = topology.postorder();
    // lowest node whose clade strictly contains `set`
    let enclosing = |set: &Bitset| {
        postorder
            .iter()
            .copied()
            .find(|n| &clades[n.index()] != set && set.is_subset_of(&clades[n.index()]))
    };

    let mut joiner = Joiner::new(order, matrix.working_values(config));
    while joiner.len() > 3 {
        let parents: Vec<Option<NodeIndex>> = joiner.clades.iter().map(&enclosing).collect();
        let pair = joiner.best_pair(config.criterion, |i, j| parents[i].is_some() && parents[i] == parents[j]);
        let Some((i, j)) = pair else {
            return Err(MatrixError::TopologyMismatch(
                "no pair of clusters can be joined under the given topology".into(),
            ));
        };
        joiner.join(i, j);
    }
    let built = joiner.finish();

    let mut lengths: HashMap<Bipartition, f64> = HashMap::new();
    for (idx, split) in node_bipartitions(&built, order, true) {
        *lengths.entry(split).or_insert(0.0) += built.node(idx).length_or_zero();
    }

    let targets = node_bipartitions(topology, order, true);
    let mut uses: HashMap<&Bipartition, usize> = HashMap::new();
    for (_, split) in &targets {
        *uses.entry(split).or_insert(0) += 1;
    }
    let mut decorated = topology.clone();
    for (idx, split) in &targets {
        decorated.node_mut(*idx).branch_length = match lengths.get(split) {
            Some(len) => len / uses[split] as f64,
            None => f64::NAN,
        };
    }
    Ok(decorated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bipartition::bipartitions_of;
    use crate::newick;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn matrix(names: &[&str], rows: &[&[f64]]) -> DistanceMatrix {
        DistanceMatrix::new(labels(names), rows.iter().map(|r| r.to_vec()).collect()).unwrap()
    }

    fn length_of(t: &Topology, label: &str) -> f64 {
        t.node(t.find_leaf(label).unwrap()).branch_length
    }

    #[test]
    fn test_nj_3taxon() {
        let m = matrix(&["A", "B", "C"], &[&[0.0, 2.0, 4.0], &[2.0, 0.0, 4.0], &[4.0, 4.0, 0.0]]);
        let t = neighbor_joining(&m, &NjConfig::default());
        assert_eq!(newick::format(&t, true, false), "(A:1,B:1,C:3);");
    }

    #[test]
    fn test_nj_5taxon_first_join() {
        let names = ["a", "b", "c", "d", "e"];
        let m = matrix(
            &names,
            &[
                &[0.0, 5.0, 9.0, 9.0, 8.0],
                &[5.0, 0.0, 10.0, 10.0, 9.0],
                &[9.0, 10.0, 0.0, 8.0, 7.0],
                &[9.0, 10.0, 8.0, 0.0, 3.0],
                &[8.0, 9.0, 7.0, 3.0, 0.0],
            ],
        );
        let t = neighbor_joining(&m, &NjConfig::default());
        assert!(t.validate().is_ok());
        assert!(!t.is_rooted());
        assert_eq!(t.leaves().len(), 5);
        assert!((length_of(&t, "a") - 2.0).abs() < 1e-12);
        assert!((length_of(&t, "b") - 3.0).abs() < 1e-12);

        let order = labels(&names);
        let splits = bipartitions_of(&t, &order);
        let sides: Vec<Vec<&str>> = splits.iter().map(|s| s.labels(&order).0).collect();
        assert!(sides.contains(&vec!["a", "b"]));
        assert!(sides.contains(&vec!["d", "e"]));
    }

    #[test]
    fn test_nj_clamps_negative_lengths() {
        let m = matrix(
            &["A", "B", "C", "D"],
            &[
                &[0.0, 2.0, 1.0, 1.0],
                &[2.0, 0.0, 9.0, 9.0],
                &[1.0, 9.0, 0.0, 2.0],
                &[1.0, 9.0, 2.0, 0.0],
            ],
        );
        let t = neighbor_joining(&m, &NjConfig::default());
        assert_eq!(length_of(&t, "A"), 0.0);
        assert!((length_of(&t, "B") - 5.0).abs() < 1e-12);
        let mut all: Vec<f64> = t.nodes().filter(|(i, _)| *i != t.root()).map(|(_, n)| n.branch_length).collect();
        all.retain(|l| *l < 0.0);
        assert!(all.is_empty());
    }

    #[test]
    fn test_nj_deterministic() {
        let m = matrix(
            &["a", "b", "c", "d"],
            &[&[0.0, 3.0, 7.0, 8.0], &[3.0, 0.0, 6.0, 9.0], &[7.0, 6.0, 0.0, 5.0], &[8.0, 9.0, 5.0, 0.0]],
        );
        let first = newick::format(&neighbor_joining(&m, &NjConfig::default()), true, false);
        let second = newick::format(&neighbor_joining(&m, &NjConfig::default()), true, false);
        assert_eq!(first, second);
    }

    #[test]
    fn test_similarity_matrix_is_converted() {
        let m = matrix(&["A", "B", "C"], &[&[10.0, 8.0, 6.0], &[8.0, 10.0, 6.0], &[6.0, 6.0, 10.0]]);
        let t = neighbor_joining(&m, &NjConfig::similarity());
        assert_eq!(newick::format(&t, true, false), "(A:1,B:1,C:3);");
    }

    #[test]
    fn test_raw_similarity_joins_largest_q() {
        let m = matrix(
            &["a", "b", "c", "d"],
            &[&[9.0, 8.0, 1.0, 1.0], &[8.0, 9.0, 1.0, 1.0], &[1.0, 1.0, 9.0, 7.0], &[1.0, 1.0, 7.0, 9.0]],
        );
        let t = neighbor_joining(&m, &NjConfig::raw_similarity());
        assert!(t.validate().is_ok());
        assert_eq!(t.leaves().len(), 4);
    }

    #[test]
    fn test_small_matrices() {
        let one = matrix(&["A"], &[&[0.0]]);
        let t = neighbor_joining(&one, &NjConfig::default());
        assert_eq!(newick::format(&t, false, false), "A;");

        let two = matrix(&["A", "B"], &[&[0.0, 3.0], &[3.0, 0.0]]);
        let t = neighbor_joining(&two, &NjConfig::default());
        assert_eq!(newick::format(&t, true, false), "(A:1.5,B:1.5);");
    }

    #[test]
    fn test_matrix_validation() {
        assert_eq!(DistanceMatrix::new(vec![], vec![]), Err(MatrixError::Empty));
        assert_eq!(
            DistanceMatrix::new(labels(&["A"]), vec![vec![0.0], vec![0.0]]),
            Err(MatrixError::LabelCountMismatch { labels: 1, rows: 2 })
        );
        assert_eq!(
            DistanceMatrix::new(labels(&["A", "B"]), vec![vec![0.0, 1.0], vec![1.0]]),
            Err(MatrixError::NotSquare { row: 1, len: 1, expected: 2 })
        );
        assert_eq!(
            DistanceMatrix::new(labels(&["A", "B"]), vec![vec![0.0, f64::NAN], vec![1.0, 0.0]]),
            Err(MatrixError::NonFinite { row: 0, col: 1 })
        );
    }

    #[test]
    fn test_add_lengths_to_topology_follows_shape() {
        // additive for ((A:1,B:2):2,(C:1,D:2)) but the shape asks for (A,C),(B,D)
        let m = matrix(
            &["A", "B", "C", "D"],
            &[&[0.0, 3.0, 4.0, 5.0], &[3.0, 0.0, 5.0, 6.0], &[4.0, 5.0, 0.0, 3.0], &[5.0, 6.0, 3.0, 0.0]],
        );
        let shape = newick::parse("((A,C)x,(B,D)y);").unwrap();
        let t = add_lengths_to_topology(&shape, &m, &NjConfig::default()).unwrap();
        assert_eq!(newick::format(&t, true, false), "((A:2,C:2)x:0.5,(B:3,D:3)y:0.5);");
    }

    #[test]
    fn test_add_lengths_rejects_other_taxa() {
        let m = matrix(&["A", "B", "C"], &[&[0.0, 2.0, 4.0], &[2.0, 0.0, 4.0], &[4.0, 4.0, 0.0]]);
        let shape = newick::parse("((A,B),D);").unwrap();
        assert!(matches!(
            add_lengths_to_topology(&shape, &m, &NjConfig::default()),
            Err(MatrixError::TopologyMismatch(_))
        ));
    }
}
