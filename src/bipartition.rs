//! Canonical two-way splits of a taxon universe.
//!
//! # What is a bipartition?
//! Each internal branch of a tree divides the taxa into two groups:
//! ```text
//!   A --\                   /-- C
//!       x ---------------- y
//!   B --/                   \-- D
//! ```
//! The branch `x`-`y` induces `{A,B} | {C,D}`.
//!
//! # Canonical form
//! A split can be written either way round, so it is normalized: the side
//! with fewer taxa is `smaller_side`; on a tie, the side holding the lowest
//! taxon index is. Equality and hashing only look at the two sides.
//!
//! # Partial taxon overlap
//! Trees built from different taxon sets are compared through the
//! `participating_taxa` mask: the taxa of the universe that were present in
//! the source tree. Supertree comparisons only look at taxa present in both.

use crate::bitset::Bitset;
use crate::topology::{NodeIndex, Topology};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

#[derive(Clone, Debug)]
pub struct Bipartition {
    smaller: Bitset,
    larger: Bitset,
    participating: Bitset,
}

impl Bipartition {
    /// Split of a full universe of `universe` taxa into `side` and its complement.
    ///
    /// ```
    /// # use rust_python_tree_topology::bitset::Bitset;
    /// # use rust_python_tree_topology::bipartition::Bipartition;
    /// let mut ab = Bitset::empty(4);
    /// ab.set(0);
    /// ab.set(1);
    /// let mut cd = Bitset::empty(4);
    /// cd.set(2);
    /// cd.set(3);
    /// assert_eq!(Bipartition::new(ab, 4), Bipartition::new(cd, 4));
    /// ```
    pub fn new(side: Bitset, universe: usize) -> Self {
        Self::with_participating(side, Bitset::full(universe))
    }

    /// Split given by both of its sides; participating taxa are their union.
    pub fn from_sides(a: Bitset, b: Bitset) -> Self {
        let participating = a.or(&b);
        let b = b.and_not(&a);
        Self::canonical(a, b, participating)
    }

    /// Split of the `participating` taxa into `side` and the rest of them.
    pub fn with_participating(side: Bitset, participating: Bitset) -> Self {
        let a = side.and(&participating);
        let b = participating.and_not(&a);
        Self::canonical(a, b, participating)
    }

    fn canonical(a: Bitset, b: Bitset, participating: Bitset) -> Self {
        let a_is_smaller = match a.count_ones().cmp(&b.count_ones()) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => {
                a.first_one().unwrap_or(usize::MAX) <= b.first_one().unwrap_or(usize::MAX)
            }
        };
        let (smaller, larger) = if a_is_smaller { (a, b) } else { (b, a) };
        Bipartition {
            smaller,
            larger,
            participating,
        }
    }

    pub fn smaller_side(&self) -> &Bitset {
        &self.smaller
    }

    pub fn larger_side(&self) -> &Bitset {
        &self.larger
    }

    pub fn participating_taxa(&self) -> &Bitset {
        &self.participating
    }

    /// Number of taxa on the smaller side.
    pub fn size(&self) -> usize {
        self.smaller.count_ones()
    }

    /// A split that separates at most one taxon from the rest.
    pub fn is_trivial(&self) -> bool {
        self.size() <= 1
    }

    /// Whether `clade` is exactly one of the two sides.
    pub fn has_side(&self, clade: &Bitset) -> bool {
        &self.smaller == clade || &self.larger == clade
    }

    /// Buneman compatibility of two splits over the same universe.
    ///
    /// The smaller sides must be disjoint or nested.
    pub fn is_compatible(&self, other: &Bipartition) -> bool {
        let shared = self.smaller.and(&other.smaller);
        shared.is_empty() || shared == self.smaller || shared == other.smaller
    }

    /// Compatibility restricted to taxa that participate in both splits.
    ///
    /// Taxa missing from either source tree cannot cause a conflict.
    pub fn is_supertree_compatible(&self, other: &Bipartition) -> bool {
        let [a, a_rest, b, b_rest] = self.masked_sides(other);
        !a.intersects(&b) || !a.intersects(&b_rest) || !a_rest.intersects(&b) || !a_rest.intersects(&b_rest)
    }

    /// Number of taxon reassignments needed to reconcile two splits.
    ///
    /// 0 for compatible splits; otherwise the smaller of the two masked
    /// symmetric differences between `self`'s smaller side and either side of `other`.
    pub fn compatibility_cost(&self, other: &Bipartition) -> usize {
        if self.is_supertree_compatible(other) {
            return 0;
        }
        let [a, _, b, b_rest] = self.masked_sides(other);
        a.xor(&b).count_ones().min(a.xor(&b_rest).count_ones())
    }

    fn masked_sides(&self, other: &Bipartition) -> [Bitset; 4] {
        let mask = self.participating.and(&other.participating);
        [
            self.smaller.and(&mask),
            self.larger.and(&mask),
            other.smaller.and(&mask),
            other.larger.and(&mask),
        ]
    }

    /// Equality that also requires identical participating taxa.
    pub fn supertree_eq(&self, other: &Bipartition) -> bool {
        self == other && self.participating == other.participating
    }

    /// Labels of both sides, smaller side first.
    pub fn labels<'t>(&self, taxa: &'t [String]) -> (Vec<&'t str>, Vec<&'t str>) {
        let pick = |side: &Bitset| -> Vec<&'t str> {
            side.iter_ones().filter_map(|i| taxa.get(i).map(String::as_str)).collect()
        };
        (pick(&self.smaller), pick(&self.larger))
    }
}

impl PartialEq for Bipartition {
    fn eq(&self, other: &Self) -> bool {
        self.smaller == other.smaller && self.larger == other.larger
    }
}

impl Eq for Bipartition {}

impl Hash for Bipartition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.smaller.hash(state);
        self.larger.hash(state);
    }
}

/// Maps taxon labels to bit positions.
pub fn taxon_index(taxon_order: &[String]) -> HashMap<String, usize> {
    taxon_order
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

/// One split per non-root node, keyed to `taxon_order`.
///
/// Leaves whose label is not in `taxon_order` are ignored. The participating
/// mask holds the ordered taxa present in `topology`. With `include_trivial`
/// single-taxon splits are kept; otherwise both sides need two taxa or more.
/// The two root edges of a rooted tree yield the same split twice.
pub fn node_bipartitions(
    topology: &Topology,
    taxon_order: &[String],
    include_trivial: bool,
) -> Vec<(NodeIndex, Bipartition)> {
    let index = taxon_index(taxon_order);
    let universe = taxon_order.len();
    let clades = topology.clade_bitsets(&index, universe);
    let participating = clades[topology.root().index()].clone();
    let min_size = if include_trivial { 1 } else { 2 };

    topology
        .preorder()
        .into_iter()
        .filter(|&idx| idx != topology.root())
        .filter_map(|idx| {
            let split = Bipartition::with_participating(clades[idx.index()].clone(), participating.clone());
            (split.size() >= min_size).then_some((idx, split))
        })
        .collect()
}

/// Non-trivial splits of `topology`, one per branch, in preorder.
pub fn bipartitions_of(topology: &Topology, taxon_order: &[String]) -> Vec<Bipartition> {
    let mut seen = HashSet::new();
    node_bipartitions(topology, taxon_order, false)
        .into_iter()
        .map(|(_, split)| split)
        .filter(|split| seen.insert(split.clone()))
        .collect()
}
