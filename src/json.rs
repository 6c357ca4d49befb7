//! Compact JSON dump of the visible tree, for plotting front ends.
//!
//! Every node becomes an object with short keys:
//! `x` distance from the root, `cx` depth in edges (cladogram layout),
//! `y` vertical position, `s` numeric support, `n` label and `c` children.
//! Tips are numbered 0, 1, 2, ... in visible preorder; an internal node sits at
//! the mean `y` of its children. Collapsed nodes are written as tips.

use crate::topology::NodeIndex;
use crate::tree::Tree;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonNode {
    pub x: f64,
    pub cx: usize,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub c: Vec<JsonNode>,
}

fn visible_children(tree: &Tree, idx: NodeIndex) -> &[NodeIndex] {
    if tree.is_collapsed(idx) { &[] } else { tree.topology().children(idx) }
}

/// Builds the nested node structure of the visible tree.
pub fn layout(tree: &Tree) -> JsonNode {
    let topology = tree.topology();
    let order = tree.preorder();
    let dist = tree.root_distances();

    let mut depth = vec![0usize; topology.len()];
    for &idx in order {
        for &child in visible_children(tree, idx) {
            depth[child.index()] = depth[idx.index()] + 1;
        }
    }

    let mut y = vec![0.0f64; topology.len()];
    let mut next_tip = 0usize;
    for &idx in order {
        if visible_children(tree, idx).is_empty() {
            y[idx.index()] = next_tip as f64;
            next_tip += 1;
        }
    }

    let mut built: Vec<Option<JsonNode>> = vec![None; topology.len()];
    for &idx in order.iter().rev() {
        let kids = visible_children(tree, idx);
        let c: Vec<JsonNode> = kids.iter().filter_map(|k| built[k.index()].take()).collect();
        if !c.is_empty() {
            y[idx.index()] = c.iter().map(|n| n.y).sum::<f64>() / c.len() as f64;
        }
        let node = topology.node(idx);
        built[idx.index()] = Some(JsonNode {
            x: dist[idx.index()],
            cx: depth[idx.index()],
            y: y[idx.index()],
            s: topology.support_value(idx),
            n: node.label.clone(),
            c,
        });
    }

    built[topology.root().index()].take().unwrap_or(JsonNode {
        x: 0.0,
        cx: 0,
        y: 0.0,
        s: None,
        n: None,
        c: Vec::new(),
    })
}

pub fn to_json_value(tree: &Tree) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(layout(tree))
}

pub fn to_json(tree: &Tree) -> Result<String, serde_json::Error> {
    serde_json::to_string(&layout(tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layout() {
        let tree = Tree::from_newick("((A:1,B:2)90:1,C:3);").unwrap();
        let value = to_json_value(&tree).unwrap();
        assert_eq!(
            value,
            json!({
                "x": 0.0, "cx": 0, "y": 1.25,
                "c": [
                    {
                        "x": 1.0, "cx": 1, "y": 0.5, "s": 90.0,
                        "c": [
                            { "x": 2.0, "cx": 2, "y": 0.0, "n": "A" },
                            { "x": 3.0, "cx": 2, "y": 1.0, "n": "B" }
                        ]
                    },
                    { "x": 3.0, "cx": 1, "y": 2.0, "n": "C" }
                ]
            })
        );
    }

    #[test]
    fn test_collapsed_node_is_a_tip() {
        let mut tree = Tree::from_newick("((A,B)ab,C);").unwrap();
        let ab = tree.mrca(&["A", "B"]).unwrap();
        tree.collapse(ab).unwrap();
        let root = layout(&tree);
        assert_eq!(root.c.len(), 2);
        assert!(root.c[0].c.is_empty());
        assert_eq!(root.c[0].n.as_deref(), Some("ab"));
        assert_eq!(root.c[1].y, 1.0);

        let text = tree.to_json().unwrap();
        assert!(text.starts_with('{'));
        assert!(!text.contains("\"A\""));
    }
}
