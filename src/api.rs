//! Python binding layer.
//!
//! Exposes pairwise tree distances over Newick files, neighbor joining,
//! majority consensus and outgroup rerooting to Python.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::collections::HashSet;
use std::fmt::Display;

use crate::consensus::ConsensusConfig;
use crate::distances::{Metric, pairwise_matrix, snapshots_for};
use crate::io::read_newick_trees;
use crate::newick;
use crate::nj::{DistanceMatrix, NjConfig};
use crate::topology::Topology;
use crate::tree::Tree;

fn value_error(e: impl Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Compute pairwise Robinson-Foulds distances from multiple tree files.
///
/// Args:
///     paths: List of Newick files (plain or .gz), one or more trees each
///
/// Returns:
///     A tuple of (tree_names, distance_matrix) where:
///     - tree_names is a list of tree identifiers
///     - distance_matrix is a 2D list of RF distances (half the symmetric difference)
///
/// Raises:
///     ValueError: If no trees are found, trees have different leaf sets, or a file cannot be parsed
#[pyfunction]
#[pyo3(signature = (paths))]
fn pairwise_rf(paths: Vec<String>) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    pairwise(&paths, Metric::RobinsonFoulds)
}

/// Compute pairwise branch score distances from multiple tree files.
///
/// Args:
///     paths: List of Newick files (plain or .gz)
///     normalize: Divide each tree's lengths by its longest branch first (default: True)
///
/// Returns:
///     A tuple of (tree_names, distance_matrix) with values in [0, 1]
#[pyfunction]
#[pyo3(signature = (paths, normalize=true))]
fn pairwise_branch_score(paths: Vec<String>, normalize: bool) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    pairwise(&paths, Metric::BranchScore { normalize })
}

fn pairwise(paths: &[String], metric: Metric) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    let (tree_names, trees) = read_all_trees(paths)?;
    sanity_check_trees(&trees)?;
    let snapshots = snapshots_for(&trees, metric.snapshot_options());
    Ok((tree_names, pairwise_matrix(&snapshots, metric)))
}

/// Build a neighbor-joining tree.
///
/// Args:
///     labels: One name per row/column
///     matrix: Square matrix of distances, or similarities with `similarity=True`
///     similarity: Convert similarities with max_diagonal - value (default: False)
///
/// Returns:
///     The tree in Newick format with branch lengths
#[pyfunction]
#[pyo3(signature = (labels, matrix, similarity=false))]
fn neighbor_joining(labels: Vec<String>, matrix: Vec<Vec<f64>>, similarity: bool) -> PyResult<String> {
    let matrix = DistanceMatrix::new(labels, matrix).map_err(value_error)?;
    let config = if similarity { NjConfig::similarity() } else { NjConfig::default() };
    let tree = crate::nj::neighbor_joining(&matrix, &config);
    Ok(newick::format(&tree, true, false))
}

/// Majority-rule consensus of Newick trees, with percentage supports.
#[pyfunction]
#[pyo3(signature = (trees, threshold=0.5))]
fn majority_consensus(trees: Vec<String>, threshold: f64) -> PyResult<String> {
    let parsed = trees
        .iter()
        .map(|t| newick::parse(t))
        .collect::<Result<Vec<_>, _>>()
        .map_err(value_error)?;
    let consensus =
        crate::consensus::majority_consensus(&parsed, &ConsensusConfig { threshold }).map_err(value_error)?;
    Ok(newick::format(&consensus, false, true))
}

/// Reroot a Newick tree on the branch above the outgroup taxa.
#[pyfunction]
#[pyo3(signature = (newick, outgroup))]
fn reroot_outgroup(newick: String, outgroup: Vec<String>) -> PyResult<String> {
    let mut tree = Tree::from_newick(&newick).map_err(value_error)?;
    tree.set_outgroup(outgroup.as_slice()).map_err(value_error)?;
    Ok(tree.to_newick(true, true))
}

/// Helper function to read trees from multiple files
fn read_all_trees(paths: &[String]) -> PyResult<(Vec<String>, Vec<Topology>)> {
    let mut all_tree_names = Vec::new();
    let mut all_trees = Vec::new();

    for (file_idx, path) in paths.iter().enumerate() {
        let trees = read_newick_trees(path).map_err(|e| value_error(format!("{path}: {e}")))?;
        if trees.is_empty() {
            return Err(PyValueError::new_err(format!("No trees found in file '{}'", path)));
        }
        for (idx, tree) in trees.into_iter().enumerate() {
            all_tree_names.push(format!("file{file_idx}_tree{idx}"));
            all_trees.push(tree);
        }
    }

    Ok((all_tree_names, all_trees))
}

/// Perform sanity checks on trees
fn sanity_check_trees(trees: &[Topology]) -> PyResult<()> {
    if trees.len() < 2 {
        return Err(PyValueError::new_err(
            "Need at least 2 trees to compute pairwise distances",
        ));
    }

    let first_leaves: HashSet<String> = trees[0].leaf_labels().into_iter().collect();
    for (idx, tree) in trees.iter().enumerate().skip(1) {
        let leaves: HashSet<String> = tree.leaf_labels().into_iter().collect();
        if leaves != first_leaves {
            return Err(PyValueError::new_err(format!(
                "Tree {} has different leaf set than tree 0. All trees must have the same taxa.",
                idx
            )));
        }
    }

    Ok(())
}

/// Python module definition
#[pymodule]
fn rust_python_tree_topology(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(pairwise_rf, m)?)?;
    m.add_function(wrap_pyfunction!(pairwise_branch_score, m)?)?;
    m.add_function(wrap_pyfunction!(neighbor_joining, m)?)?;
    m.add_function(wrap_pyfunction!(majority_consensus, m)?)?;
    m.add_function(wrap_pyfunction!(reroot_outgroup, m)?)?;
    Ok(())
}
