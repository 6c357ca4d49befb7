//! Multiset of bipartitions collected over many trees.
//!
//! Used for consensus and supertree building: every tree contributes its
//! splits, identical splits are counted, and conflicting splits are weighed
//! against each other by their counts.

use crate::bipartition::{Bipartition, bipartitions_of};
use crate::bitset::Bitset;
use crate::topology::Topology;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

/// Hash key; supertree mode folds the participating taxa into equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SetKey {
    split: Bipartition,
    participating: Option<Bitset>,
}

#[derive(Clone, Debug, Default)]
pub struct BipartitionSet {
    entries: Vec<(Bipartition, usize)>,
    index: HashMap<SetKey, usize>,
    supertree: bool,
    trees: usize,
    /// Per-entry sum of counts of incompatible entries.
    costs: OnceLock<Vec<usize>>,
}

impl BipartitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set whose equality also compares participating taxa, for merging
    /// splits of trees over different taxon sets.
    pub fn supertree() -> Self {
        BipartitionSet {
            supertree: true,
            ..Self::default()
        }
    }

    /// Collects the splits of every tree, keyed to `taxon_order`.
    pub fn from_trees<'t>(trees: impl IntoIterator<Item = &'t Topology>, taxon_order: &[String]) -> Self {
        let mut set = Self::new();
        for tree in trees {
            set.add_tree(tree, taxon_order);
        }
        set
    }

    fn key(&self, split: &Bipartition) -> SetKey {
        SetKey {
            split: split.clone(),
            participating: self.supertree.then(|| split.participating_taxa().clone()),
        }
    }

    /// Records one more occurrence of `split`.
    pub fn add(&mut self, split: Bipartition) {
        self.add_count(split, 1);
    }

    pub fn add_count(&mut self, split: Bipartition, count: usize) {
        if count == 0 {
            return;
        }
        let key = self.key(&split);
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 += count,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((split, count));
            }
        }
        self.costs = OnceLock::new();
    }

    /// Adds the non-trivial splits of one tree.
    pub fn add_tree(&mut self, topology: &Topology, taxon_order: &[String]) {
        for split in bipartitions_of(topology, taxon_order) {
            self.add(split);
        }
        self.trees += 1;
    }

    /// Number of trees passed to [`BipartitionSet::add_tree`].
    pub fn tree_count(&self) -> usize {
        self.trees
    }

    /// Number of distinct splits.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_supertree(&self) -> bool {
        self.supertree
    }

    /// Distinct splits with their counts, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bipartition, usize)> {
        self.entries.iter().map(|(split, count)| (split, *count))
    }

    fn position(&self, split: &Bipartition) -> Option<usize> {
        self.index.get(&self.key(split)).copied()
    }

    pub fn contains(&self, split: &Bipartition) -> bool {
        self.position(split).is_some()
    }

    /// Occurrences of `split`; 0 when absent.
    pub fn count(&self, split: &Bipartition) -> usize {
        self.position(split).map_or(0, |i| self.entries[i].1)
    }

    fn costs(&self) -> &[usize] {
        self.costs.get_or_init(|| {
            self.entries
                .iter()
                .map(|(split, _)| {
                    self.entries
                        .iter()
                        .filter(|(other, _)| !split.is_supertree_compatible(other))
                        .map(|(_, count)| count)
                        .sum()
                })
                .collect()
        })
    }

    /// Sum of the counts of all splits incompatible with `split`.
    pub fn cost(&self, split: &Bipartition) -> usize {
        match self.position(split) {
            Some(i) => self.costs()[i],
            None => self
                .entries
                .iter()
                .filter(|(other, _)| !split.is_supertree_compatible(other))
                .map(|(_, count)| count)
                .sum(),
        }
    }

    /// `count / (count + conflicting count)`; 0 for a split never recorded.
    pub fn support(&self, split: &Bipartition) -> f64 {
        match self.position(split) {
            Some(i) => support_ratio(self.entries[i].1, self.costs()[i]),
            None => 0.0,
        }
    }

    /// Greedy extraction of a pairwise-compatible subset.
    ///
    /// 1. every split conflicting with a split of support above 0.5 is dropped;
    /// 2. while conflicts remain, the split with the lowest support among the
    ///    remaining splits is dropped (earliest inserted first on ties).
    ///
    /// This is a heuristic. It does not search for the maximum-weight
    /// compatible subset, and on equal supports the result depends on the
    /// order in which splits were added.
    pub fn find_compatible_subset(&self) -> BipartitionSet {
        let n = self.entries.len();
        let conflicts: Vec<Vec<usize>> = (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| j != i && !self.entries[i].0.is_supertree_compatible(&self.entries[j].0))
                    .collect()
            })
            .collect();
        let costs = self.costs();
        let mut alive = vec![true; n];

        for (i, (_, count)) in self.entries.iter().enumerate() {
            if support_ratio(*count, costs[i]) > 0.5 {
                for &j in &conflicts[i] {
                    alive[j] = false;
                }
            }
        }
        let dominated = alive.iter().filter(|a| !**a).count();

        let mut pruned = 0usize;
        loop {
            let mut weakest: Option<(usize, f64)> = None;
            for i in (0..n).filter(|&i| alive[i]) {
                let conflicting: usize = conflicts[i]
                    .iter()
                    .filter(|&&j| alive[j])
                    .map(|&j| self.entries[j].1)
                    .sum();
                if conflicting == 0 {
                    continue;
                }
                let support = support_ratio(self.entries[i].1, conflicting);
                if weakest.is_none_or(|(_, w)| support < w) {
                    weakest = Some((i, support));
                }
            }
            match weakest {
                Some((i, _)) => {
                    alive[i] = false;
                    pruned += 1;
                }
                None => break,
            }
        }
        debug!(
            total = n,
            dominated, pruned, "extracted compatible bipartition subset"
        );

        let mut subset = BipartitionSet {
            supertree: self.supertree,
            trees: self.trees,
            ..Self::default()
        };
        for (i, (split, count)) in self.entries.iter().enumerate() {
            if alive[i] {
                subset.add_count(split.clone(), *count);
            }
        }
        subset
    }

    /// True when no two splits conflict.
    pub fn is_compatible(&self) -> bool {
        self.costs().iter().all(|&c| c == 0)
    }
}

fn support_ratio(count: usize, conflicting: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    count as f64 / (count + conflicting) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;

    /// Split of a 6-taxon universe A..F, given by one side.
    fn split(ones: &[usize]) -> Bipartition {
        let mut side = Bitset::empty(6);
        for &i in ones {
            side.set(i);
        }
        Bipartition::new(side, 6)
    }

    #[test]
    fn test_counts_merge_equal_splits() {
        let mut set = BipartitionSet::new();
        set.add(split(&[0, 1]));
        set.add(split(&[2, 3, 4, 5]));
        set.add(split(&[3, 4]));
        assert_eq!(set.len(), 2);
        assert_eq!(set.count(&split(&[0, 1])), 2);
        assert_eq!(set.count(&split(&[1, 2])), 0);
    }

    #[test]
    fn test_cost_and_support() {
        let mut set = BipartitionSet::new();
        set.add_count(split(&[0, 1]), 3);
        set.add_count(split(&[1, 2]), 1);
        set.add_count(split(&[3, 4]), 2);

        assert_eq!(set.cost(&split(&[0, 1])), 1);
        assert_eq!(set.cost(&split(&[1, 2])), 3);
        assert!((set.support(&split(&[0, 1])) - 0.75).abs() < 1e-12);
        assert!((set.support(&split(&[1, 2])) - 0.25).abs() < 1e-12);
        assert_eq!(set.support(&split(&[3, 4])), 1.0);
        assert_eq!(set.support(&split(&[4, 5])), 0.0);
        assert!(!set.is_compatible());

        // costs are recomputed after a mutation
        set.add_count(split(&[1, 2]), 5);
        assert_eq!(set.cost(&split(&[0, 1])), 6);
    }

    #[test]
    fn test_majority_split_wins() {
        let mut set = BipartitionSet::new();
        set.add_count(split(&[0, 1]), 3);
        set.add_count(split(&[1, 2]), 1);
        set.add_count(split(&[3, 4]), 2);
        let subset = set.find_compatible_subset();
        assert_eq!(subset.len(), 2);
        assert!(subset.contains(&split(&[0, 1])));
        assert!(subset.contains(&split(&[3, 4])));
        assert!(subset.is_compatible());
    }

    #[test]
    fn test_chain_of_conflicts_drops_the_middle() {
        let mut set = BipartitionSet::new();
        set.add_count(split(&[0, 1]), 2);
        set.add_count(split(&[1, 2]), 2);
        set.add_count(split(&[2, 3]), 2);
        let subset = set.find_compatible_subset();
        assert_eq!(subset.len(), 2);
        assert!(!subset.contains(&split(&[1, 2])));
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let mut set = BipartitionSet::new();
        set.add(split(&[0, 1]));
        set.add(split(&[1, 2]));
        let subset = set.find_compatible_subset();
        assert_eq!(subset.len(), 1);
        assert!(subset.contains(&split(&[1, 2])));
    }

    #[test]
    fn test_supertree_mode_keeps_masks_apart() {
        let order: Vec<String> = ["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect();
        let t1 = newick::parse("((A,B),C,D);").unwrap();
        let t2 = newick::parse("((A,B),C,(D,E));").unwrap();

        let mut plain = BipartitionSet::new();
        plain.add_tree(&t1, &order);
        plain.add_tree(&t2, &order);
        let mut merged = BipartitionSet::supertree();
        merged.add_tree(&t1, &order);
        merged.add_tree(&t2, &order);

        assert_eq!(plain.tree_count(), 2);
        // {A,B}|{C,D} from t1 and {A,B}|{C,D,E} from t2 differ in their larger side
        assert_eq!(plain.len(), 3);
        assert_eq!(merged.len(), 3);
        assert!(merged.is_compatible());
    }
}
