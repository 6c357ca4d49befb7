//! Error kinds for parsing, tree editing, matrices and comparisons.
//!
//! Parse and matrix errors are fatal to the call that produced them.
//! Structural errors are recoverable: the tree engine skips the edit and the
//! current snapshot stays as it was. [`ComparisonPrecondition`] is not an
//! error in the control-flow sense; it travels alongside a distance value.

use crate::topology::NodeIndex;
use thiserror::Error;

/// Failure to read a Newick statement.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty tree description")]
    Empty,

    #[error("unbalanced parentheses: {open} '(' versus {close} ')'")]
    UnbalancedParentheses { open: usize, close: usize },

    #[error("invalid branch length {token:?} at byte {position}")]
    InvalidBranchLength { token: String, position: usize },

    #[error("unterminated quoted label starting at byte {position}")]
    UnterminatedQuote { position: usize },

    #[error("unterminated bracket comment starting at byte {position}")]
    UnterminatedComment { position: usize },

    #[error("unexpected character {found:?} at byte {position}")]
    UnexpectedCharacter { found: char, position: usize },

    #[error("leaf label {0:?} occurs more than once")]
    DuplicateLeafLabel(String),
}

/// A topology edit that cannot be applied to the current tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructuralError {
    #[error("node {0} does not exist")]
    NodeOutOfRange(NodeIndex),

    #[error("nodes {0} and {1} are not directly connected")]
    NotAdjacent(NodeIndex, NodeIndex),

    #[error("root point {0} is outside 0.0..=1.0")]
    InvalidRootPoint(f64),

    #[error("taxon {0:?} is not in the tree")]
    TaxonNotFound(String),

    #[error("cannot remove the last remaining taxon")]
    LastTaxon,

    #[error("node {0} is a leaf")]
    NotInternal(NodeIndex),

    #[error("no outgroup taxon is present in the tree")]
    EmptyOutgroup,

    #[error("the outgroup contains every taxon of the tree")]
    OutgroupCoversAllTaxa,

    #[error("broken topology invariant: {0}")]
    Invariant(String),
}

/// Invalid input to the neighbor-joining builder.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatrixError {
    #[error("distance matrix is empty")]
    Empty,

    #[error("{labels} labels for a matrix with {rows} rows")]
    LabelCountMismatch { labels: usize, rows: usize },

    #[error("row {row} has {len} columns, expected {expected}")]
    NotSquare { row: usize, len: usize, expected: usize },

    #[error("non-finite value at ({row}, {col})")]
    NonFinite { row: usize, col: usize },

    #[error("topology does not match the matrix: {0}")]
    TopologyMismatch(String),
}

/// Two compared trees do not share the same leaf labels.
///
/// Distances are still computed over the shared labels, but they are only
/// meaningful when the label sets are identical or nearly so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("trees share {shared} taxa ({left_only} only in the first, {right_only} only in the second)")]
pub struct ComparisonPrecondition {
    pub shared: usize,
    pub left_only: usize,
    pub right_only: usize,
}

/// Crate-level error used at the I/O, CLI and binding boundaries.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{path}: {message}")]
    Format { path: String, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
