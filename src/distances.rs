//! Tree distance metrics using bipartition snapshots.
//!
//! This module implements four phylogenetic tree distance measures:
//!
//! 1. **Robinson-Foulds (RF)**: half the number of bipartitions found in
//!    exactly one of the two trees. Range: [0, n-3] for n shared leaves.
//!
//! 2. **Weighted Robinson-Foulds**: like RF but considers branch lengths.
//!    For shared partitions, adds |length_a - length_b|.
//!    For unique partitions, adds the full branch length.
//!
//! 3. **Kuhner-Felsenstein**: like weighted RF but uses squared differences:
//!    sqrt(Σ(length_a - length_b)²)
//!
//! 4. **Branch score**: the Kuhner-Felsenstein sum scaled by the lengths of
//!    both trees, sqrt(Σ diff²) / sqrt(Σ a² + Σ b²), with optional per-tree
//!    normalization by the longest branch.
//!
//! Trees are compared over the leaf labels they share. When the label sets
//! differ the result carries a [`ComparisonPrecondition`] and a warning is
//! logged.

use crate::error::ComparisonPrecondition;
use crate::snapshot::{SnapshotOptions, TreeSnapshot};
use crate::topology::Topology;
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::warn;

/// Result of comparing two trees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub value: f64,
    /// Set when the two trees do not have the same leaf labels.
    pub precondition: Option<ComparisonPrecondition>,
}

impl Comparison {
    /// True when the value was computed over identical label sets.
    pub fn is_exact(&self) -> bool {
        self.precondition.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    RobinsonFoulds,
    WeightedRobinsonFoulds,
    KuhnerFelsenstein,
    BranchScore { normalize: bool },
}

impl Metric {
    /// Snapshot options the metric needs; length-based metrics count terminal branches.
    pub fn snapshot_options(self) -> SnapshotOptions {
        match self {
            Metric::RobinsonFoulds => SnapshotOptions::default(),
            _ => SnapshotOptions::with_trivial(),
        }
    }

    pub fn between(self, a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
        match self {
            Metric::RobinsonFoulds => rf_from_snapshots(a, b),
            Metric::WeightedRobinsonFoulds => weighted_rf_from_snapshots(a, b),
            Metric::KuhnerFelsenstein => kf_from_snapshots(a, b),
            Metric::BranchScore { normalize } => branch_score_from_snapshots(a, b, normalize),
        }
    }
}

/// Sorted shared labels, plus the precondition signal when the sets differ.
fn shared_taxa(a: &Topology, b: &Topology) -> (Vec<String>, Option<ComparisonPrecondition>) {
    let left: BTreeSet<String> = a.leaf_labels().into_iter().collect();
    let right: BTreeSet<String> = b.leaf_labels().into_iter().collect();
    let shared: Vec<String> = left.intersection(&right).cloned().collect();
    if left == right {
        return (shared, None);
    }
    let precondition = ComparisonPrecondition {
        shared: shared.len(),
        left_only: left.len() - shared.len(),
        right_only: right.len() - shared.len(),
    };
    warn!(
        shared = precondition.shared,
        left_only = precondition.left_only,
        right_only = precondition.right_only,
        "comparing trees with different leaf sets; distance uses the shared taxa only"
    );
    (shared, Some(precondition))
}

fn compare(a: &Topology, b: &Topology, metric: Metric) -> Comparison {
    let (taxa, precondition) = shared_taxa(a, b);
    let options = metric.snapshot_options();
    let snap_a = TreeSnapshot::new(a, &taxa, options);
    let snap_b = TreeSnapshot::new(b, &taxa, options);
    Comparison {
        value: metric.between(&snap_a, &snap_b),
        precondition,
    }
}

/// Compute Robinson-Foulds distance between two trees.
///
/// # Algorithm
/// RF = (|A| + |B| - 2|A ∩ B|) / 2
///
/// Where A and B are the sets of non-trivial bipartitions in each tree. A
/// rooted tree's two root branches count as one bipartition, so rooting
/// alone never changes the distance.
///
/// # Example
/// ```text
/// Tree 1:  ((A,B),(C,D))     Partitions: {A,B | C,D}
/// Tree 2:  ((A,C),(B,D))     Partitions: {A,C | B,D}
///
/// Intersection: 0 partitions match
/// RF = (1 + 1 - 2*0) / 2 = 1
/// ```
pub fn robinson_foulds(tree_a: &Topology, tree_b: &Topology) -> Comparison {
    compare(tree_a, tree_b, Metric::RobinsonFoulds)
}

/// Number of bipartitions present in exactly one snapshot.
pub fn symmetric_difference(a: &TreeSnapshot, b: &TreeSnapshot) -> usize {
    let inter = a.parts.intersection(&b.parts).count();
    a.parts.len() + b.parts.len() - 2 * inter
}

/// Compute Robinson-Foulds distance from two pre-computed snapshots.
pub fn rf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
    symmetric_difference(a, b) as f64 / 2.0
}

/// Compute Weighted Robinson-Foulds distance between two trees.
///
/// # Algorithm
/// For each partition, terminal branches included:
/// - If in both trees: add |length_a - length_b|
/// - If only in A: add length_a
/// - If only in B: add length_b
pub fn weighted_robinson_foulds(tree_a: &Topology, tree_b: &Topology) -> Comparison {
    compare(tree_a, tree_b, Metric::WeightedRobinsonFoulds)
}

/// Compute Weighted RF distance from two pre-computed snapshots.
pub fn weighted_rf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
    let mut distance = 0.0;

    for part in &a.parts {
        let length_a = a.length(part);
        if b.parts.contains(part) {
            distance += (length_a - b.length(part)).abs();
        } else {
            distance += length_a;
        }
    }

    for part in &b.parts {
        if !a.parts.contains(part) {
            distance += b.length(part);
        }
    }

    distance
}

/// Compute Kuhner-Felsenstein distance between two trees.
///
/// # Properties
/// - More sensitive to large branch length differences
/// - Euclidean metric in branch length space
/// - Range: [0, ∞)
pub fn kuhner_felsenstein(tree_a: &Topology, tree_b: &Topology) -> Comparison {
    compare(tree_a, tree_b, Metric::KuhnerFelsenstein)
}

/// Σ (length_a - length_b)² over the union of both split sets, with optional scaling.
fn squared_length_difference(a: &TreeSnapshot, b: &TreeSnapshot, scale_a: f64, scale_b: f64) -> f64 {
    let mut sum_squared = 0.0;

    for part in &a.parts {
        let length_a = a.length(part) * scale_a;
        let length_b = if b.parts.contains(part) { b.length(part) * scale_b } else { 0.0 };
        let diff = length_a - length_b;
        sum_squared += diff * diff;
    }

    for part in &b.parts {
        if !a.parts.contains(part) {
            let length_b = b.length(part) * scale_b;
            sum_squared += length_b * length_b;
        }
    }

    sum_squared
}

/// Compute Kuhner-Felsenstein distance from two pre-computed snapshots.
pub fn kf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
    squared_length_difference(a, b, 1.0, 1.0).sqrt()
}

/// Branch score distance between two trees, in [0, 1].
///
/// Branches are matched by identical bipartition. With `normalize`, each
/// tree's lengths are first divided by its own longest branch so that trees
/// on different scales can be compared by shape and relative length.
pub fn branch_score_distance(tree_a: &Topology, tree_b: &Topology, normalize: bool) -> Comparison {
    compare(tree_a, tree_b, Metric::BranchScore { normalize })
}

fn scale_for(snapshot: &TreeSnapshot, normalize: bool) -> f64 {
    let longest = snapshot.max_length();
    if normalize && longest > 0.0 { 1.0 / longest } else { 1.0 }
}

fn squared_norm(snapshot: &TreeSnapshot, scale: f64) -> f64 {
    snapshot
        .parts
        .iter()
        .map(|part| {
            let length = snapshot.length(part) * scale;
            length * length
        })
        .sum()
}

/// Branch score from two pre-computed snapshots; 0 when neither tree has any length.
pub fn branch_score_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot, normalize: bool) -> f64 {
    let scale_a = scale_for(a, normalize);
    let scale_b = scale_for(b, normalize);
    let denominator = (squared_norm(a, scale_a) + squared_norm(b, scale_b)).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    squared_length_difference(a, b, scale_a, scale_b).sqrt() / denominator
}

/// Snapshots of `trees` keyed to the sorted union of their leaf labels.
pub fn snapshots_for(trees: &[Topology], options: SnapshotOptions) -> Vec<TreeSnapshot> {
    let taxa: Vec<String> = trees
        .iter()
        .flat_map(|t| t.leaf_labels())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    trees
        .par_iter()
        .map(|t| TreeSnapshot::new(t, &taxa, options))
        .collect()
}

/// Symmetric matrix of `metric` over all pairs of snapshots, computed in parallel.
pub fn pairwise_matrix(snapshots: &[TreeSnapshot], metric: Metric) -> Vec<Vec<f64>> {
    let n = snapshots.len();
    let mut matrix = vec![vec![0.0f64; n]; n];

    let pairs: Vec<(usize, usize, f64)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| (i, j, metric.between(&snapshots[i], &snapshots[j])))
        .collect();

    for (i, j, dist) in pairs {
        matrix[i][j] = dist;
        matrix[j][i] = dist;
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;
    use itertools::Itertools;
    use tracing_test::traced_test;

    // Reference trees from
    // https://evolution.genetics.washington.edu/phylip/doc/treedist.html
    const TREEDIST: [&str; 12] = [
        "(A:0.1,(B:0.1,(H:0.1,(D:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,((J:0.1,H:0.1):0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,(H:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,(H:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
    ];

    // Symmetric differences reported by treedist for the trees above.
    const SYMDIFF: [[usize; 12]; 12] = [
        [0, 4, 2, 10, 10, 10, 10, 10, 10, 10, 2, 10],
        [4, 0, 2, 10, 8, 10, 8, 10, 8, 10, 2, 10],
        [2, 2, 0, 10, 10, 10, 10, 10, 10, 10, 0, 10],
        [10, 10, 10, 0, 2, 2, 4, 2, 4, 0, 10, 2],
        [10, 8, 10, 2, 0, 4, 2, 4, 2, 2, 10, 4],
        [10, 10, 10, 2, 4, 0, 2, 2, 4, 2, 10, 2],
        [10, 8, 10, 4, 2, 2, 0, 4, 2, 4, 10, 4],
        [10, 10, 10, 2, 4, 2, 4, 0, 2, 2, 10, 0],
        [10, 8, 10, 4, 2, 4, 2, 2, 0, 4, 10, 2],
        [10, 10, 10, 0, 2, 2, 4, 2, 4, 0, 10, 2],
        [2, 2, 0, 10, 10, 10, 10, 10, 10, 10, 0, 10],
        [10, 10, 10, 2, 4, 2, 4, 0, 2, 2, 10, 0],
    ];

    fn treedist_trees() -> Vec<Topology> {
        TREEDIST.iter().map(|t| newick::parse(t).unwrap()).collect()
    }

    #[test]
    fn robinson_foulds_treedist() {
        let trees = treedist_trees();
        let snaps = snapshots_for(&trees, SnapshotOptions::default());

        for indices in (0..trees.len()).combinations(2) {
            let (i0, i1) = (indices[0], indices[1]);
            assert_eq!(symmetric_difference(&snaps[i0], &snaps[i1]), SYMDIFF[i0][i1]);

            let rf = robinson_foulds(&trees[i0], &trees[i1]);
            assert_eq!(rf.value, SYMDIFF[i0][i1] as f64 / 2.0);
            assert!(rf.is_exact());
        }
    }

    #[test]
    // Every branch is 0.1 long, so each unmatched split adds 0.1.
    fn weighted_robinson_foulds_treedist() {
        let trees = treedist_trees();
        for indices in (0..trees.len()).combinations(2) {
            let (i0, i1) = (indices[0], indices[1]);
            let expected = 0.1 * SYMDIFF[i0][i1] as f64;
            let got = weighted_robinson_foulds(&trees[i0], &trees[i1]).value;
            assert!((got - expected).abs() < 1e-9, "[{i0}, {i1}] {got} != {expected}");
        }
    }

    #[test]
    // Branch score distances according to treedist: sqrt(0.01 * symdiff).
    fn kuhner_felsenstein_treedist() {
        let trees = treedist_trees();
        for indices in (0..trees.len()).combinations(2) {
            let (i0, i1) = (indices[0], indices[1]);
            let expected = (0.01 * SYMDIFF[i0][i1] as f64).sqrt();
            let got = kuhner_felsenstein(&trees[i0], &trees[i1]).value;
            assert!((got - expected).abs() < 1e-9, "[{i0}, {i1}] {got} != {expected}");
        }
    }

    #[test]
    fn test_quartet_rf() {
        let a = newick::parse("((A,B),(C,D));").unwrap();
        let b = newick::parse("((A,C),(B,D));").unwrap();
        assert_eq!(robinson_foulds(&a, &b).value, 1.0);
        assert_eq!(robinson_foulds(&a, &a).value, 0.0);
        // rooting on a different edge of the same unrooted tree
        let c = newick::parse("(A,(B,(C,D)));").unwrap();
        assert_eq!(robinson_foulds(&a, &c).value, 0.0);
    }

    #[test]
    fn test_branch_score() {
        let a = newick::parse("((A:1,B:1):2,(C:1,D:1):2);").unwrap();
        let b = newick::parse("((A:1,B:1):1,(C:1,D:1):1);").unwrap();
        assert_eq!(branch_score_distance(&a, &a, true).value, 0.0);

        // central branch 4 vs 2: sqrt(4) / sqrt(20 + 8)
        let raw = branch_score_distance(&a, &b, false).value;
        assert!((raw - 2.0 / 28f64.sqrt()).abs() < 1e-12);

        // normalized: leaves 0.25 vs 0.5, central 1 vs 1
        let scaled = branch_score_distance(&a, &b, true).value;
        assert!((scaled - 0.5 / 3.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_branch_score_without_lengths() {
        let a = newick::parse("((A,B),(C,D));").unwrap();
        let b = newick::parse("((A,C),(B,D));").unwrap();
        assert_eq!(branch_score_distance(&a, &b, true).value, 0.0);
    }

    #[test]
    #[traced_test]
    fn test_mismatched_leaf_sets() {
        let a = newick::parse("((A,B),(C,D),E);").unwrap();
        let b = newick::parse("((A,B),(C,D),F);").unwrap();
        let rf = robinson_foulds(&a, &b);
        assert_eq!(rf.value, 0.0);
        assert_eq!(
            rf.precondition,
            Some(ComparisonPrecondition {
                shared: 4,
                left_only: 1,
                right_only: 1,
            })
        );
        assert!(logs_contain("different leaf sets"));
    }

    #[test]
    fn test_pairwise_matrix() {
        let trees: Vec<Topology> = ["((A,B),(C,D),E);", "((A,C),(B,D),E);", "((A,B),(C,D),E);"]
            .iter()
            .map(|t| newick::parse(t).unwrap())
            .collect();
        let snaps = snapshots_for(&trees, Metric::RobinsonFoulds.snapshot_options());
        let matrix = pairwise_matrix(&snaps, Metric::RobinsonFoulds);
        assert_eq!(matrix, vec![vec![0.0, 2.0, 0.0], vec![2.0, 0.0, 2.0], vec![0.0, 2.0, 0.0]]);
    }
}
