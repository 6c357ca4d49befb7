use rust_python_tree_topology::consensus::{ConsensusConfig, decorate_support, majority_consensus};
use rust_python_tree_topology::distances::{Metric, pairwise_matrix, robinson_foulds, snapshots_for};
use rust_python_tree_topology::io::{read_matrix_tsv, read_newick_trees, write_matrix_tsv};
use rust_python_tree_topology::newick;
use rust_python_tree_topology::nj::{DistanceMatrix, NjConfig, neighbor_joining};
use rust_python_tree_topology::tree::Tree;
use std::collections::BTreeSet;
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tree-topology-scenarios-{}-{name}", std::process::id()))
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn parse_compare_and_reformat() {
    let text = "(A:1,(B:1,C:1):1);";
    let tree = Tree::from_newick(text).unwrap();
    let rf = tree.robinson_foulds(&tree);
    assert_eq!(rf.value, 0.0);
    assert!(rf.precondition.is_none());
    assert_eq!(tree.to_newick(true, false), text);
}

#[test]
fn nj_joins_the_closest_pair() {
    let matrix = DistanceMatrix::new(
        labels(&["A", "B", "C"]),
        vec![vec![0.0, 2.0, 4.0], vec![2.0, 0.0, 4.0], vec![4.0, 4.0, 0.0]],
    )
    .unwrap();
    let tree = Tree::new(neighbor_joining(&matrix, &NjConfig::default()));
    let a = tree.find_leaf("A").unwrap();
    let b = tree.find_leaf("B").unwrap();
    let c = tree.find_leaf("C").unwrap();
    assert_eq!(tree.topology().parent(a), tree.topology().parent(b));

    let ab = tree.path_length(a, b).unwrap();
    assert!((ab - 2.0).abs() < 1e-12);
    assert!(ab < tree.path_length(a, c).unwrap());
    assert!(ab < tree.path_length(b, c).unwrap());
}

#[test]
fn outgroup_roots_between_taxon_and_rest() {
    let mut tree = Tree::from_newick("((A,B),C,D);").unwrap();
    assert!(!tree.is_rooted());
    tree.set_outgroup(&["D"]).unwrap();
    assert!(tree.is_rooted());

    let topology = tree.topology();
    let sides: BTreeSet<BTreeSet<String>> = topology
        .children(topology.root())
        .iter()
        .map(|&child| {
            topology
                .subtree_preorder(child)
                .into_iter()
                .filter_map(|n| topology.node(n).label.clone())
                .collect()
        })
        .collect();
    let expected: BTreeSet<BTreeSet<String>> = [
        labels(&["D"]).into_iter().collect(),
        labels(&["A", "B", "C"]).into_iter().collect(),
    ]
    .into_iter()
    .collect();
    assert_eq!(sides, expected);

    // bipartitions are unchanged by rooting
    let before = Tree::from_newick("((A,B),C,D);").unwrap();
    assert_eq!(tree.robinson_foulds(&before).value, 0.0);
}

#[test]
fn files_to_consensus_distances_and_nj() {
    let trees_path = temp_path("replicates.nwk");
    std::fs::write(
        &trees_path,
        "((A:1,B:1):1,(C:1,D:1):1,E:2);\n((A:1,B:1):1,C:2,(D:1,E:1):1);\n((A:1,C:1):1,B:2,(D:1,E:1):1);\n",
    )
    .unwrap();
    let trees = read_newick_trees(&trees_path).unwrap();
    assert_eq!(trees.len(), 3);

    let consensus = majority_consensus(&trees, &ConsensusConfig::default()).unwrap();
    assert_eq!(newick::format(&consensus, false, true), "((A,B)67,C,(D,E)67);");

    let decorated = decorate_support(&trees[0], &trees);
    assert_eq!(newick::format(&decorated, false, true), "((A,B)67,(C,D)33,E);");

    let snaps = snapshots_for(&trees, Metric::RobinsonFoulds.snapshot_options());
    let matrix = pairwise_matrix(&snaps, Metric::RobinsonFoulds);
    assert_eq!(matrix[0][1], robinson_foulds(&trees[0], &trees[1]).value);
    assert_eq!(matrix[0][1], 1.0);
    assert_eq!(matrix[1][2], 1.0);
    assert_eq!(matrix[0][2], 2.0);

    let names = labels(&["t0", "t1", "t2"]);
    let matrix_path = temp_path("rf.tsv.gz");
    write_matrix_tsv(&matrix_path, &names, &matrix).unwrap();
    let read = read_matrix_tsv(&matrix_path).unwrap();
    assert_eq!(read.values(), matrix.as_slice());

    // t0 and t1 are closest; NJ over three items keeps them with the shortest path
    let tree = Tree::new(neighbor_joining(&read, &NjConfig::default()));
    let t0 = tree.find_leaf("t0").unwrap();
    let t1 = tree.find_leaf("t1").unwrap();
    let t2 = tree.find_leaf("t2").unwrap();
    assert!(tree.path_length(t0, t1).unwrap() < tree.path_length(t0, t2).unwrap());

    std::fs::remove_file(&trees_path).unwrap();
    std::fs::remove_file(&matrix_path).unwrap();
}

#[test]
fn undo_restores_every_edit() {
    let text = "((A:1,B:2):3,(C:1,D:1):1,E:4);";
    let mut tree = Tree::from_newick(text).unwrap();
    tree.set_outgroup(&["E"]).unwrap();
    tree.remove_taxon("A").unwrap();
    let cd = tree.mrca(&["C", "D"]).unwrap();
    tree.collapse(cd).unwrap();
    let tips = tree.tip_labels();
    assert_eq!(tips.len(), 3);
    assert!(tips.contains(&"C,D".to_string()));

    while tree.undo() {}
    assert_eq!(tree.to_newick(true, true), text);
    assert!(tree.can_redo());
    assert_eq!(tree.history_len(), 4);
}
