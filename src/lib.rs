//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `topology`: arena tree model and pure structural edits.
//! - `newick`: Newick parser and formatter.
//! - `tree`: mutation engine with caches, collapse state and undo/redo history.
//! - `bitset`: compact bitset representation for tree partitions.
//! - `bipartition` / `bipartition_set`: split algebra and counted split sets.
//! - `consensus`: consensus trees and support decoration.
//! - `nj`: neighbor joining from distance or similarity matrices.
//! - `snapshot`: tree snapshot for efficient distance calculations.
//! - `distances`: RF / weighted RF / Kuhner-Felsenstein / branch score.
//! - `json`: compact JSON dump of a tree.
//! - `io`: reading tree files, reading and writing TSV matrices.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bipartition;
pub mod bipartition_set;
pub mod bitset;
pub mod consensus;
pub mod distances;
pub mod error;
pub mod io;
pub mod json;
pub mod newick;
pub mod nj;
pub mod snapshot;
pub mod topology;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use bipartition::Bipartition;
pub use bipartition_set::BipartitionSet;
pub use bitset::Bitset;
pub use distances::{Comparison, Metric};
pub use error::{ComparisonPrecondition, Error, MatrixError, ParseError, StructuralError};
pub use io::{read_matrix_tsv, read_newick_trees, write_matrix_tsv};
pub use nj::{DistanceMatrix, NjConfig, neighbor_joining};
pub use snapshot::TreeSnapshot;
pub use topology::{Node, NodeIndex, Topology};
pub use tree::{Tree, TreeEvent, TreeObserver};
