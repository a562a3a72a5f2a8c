//! Display-ready node-link view of a graph.
//!
//! Large graphs are cut down to the top nodes of the report (highest
//! weighted degree first) and the edges among them. Each node carries a
//! color per source field, a size growing with weighted degree and a
//! tooltip title.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::graph::models::{CooccurrenceGraph, MetricsReport, NodeMetricsRow};

/// Field colors, assigned in order of first appearance.
pub const FIELD_PALETTE: [&str; 14] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#800000", "#808000", "#00FFFF", "#008080",
];

/// Color for nodes whose field is unknown.
pub const UNKNOWN_COLOR: &str = "#888888";

/// Size of a node without metrics.
pub const BASE_NODE_SIZE: f64 = 8.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewNode {
    pub id: String,
    pub label: String,
    pub field: String,
    pub color: String,
    pub size: f64,
    /// Tooltip text
    pub title: String,
    pub degree_weighted: Option<f64>,
    pub community: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewLink {
    pub source: String,
    pub target: String,
    pub weight: u64,
    pub title: String,
}

/// Node-link graph ready for a force-directed renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphView {
    pub directed: bool,
    pub multigraph: bool,
    pub nodes: Vec<ViewNode>,
    pub links: Vec<ViewLink>,
    /// Node count before truncation
    pub total_nodes: usize,
}

impl GraphView {
    /// Build the view. `max_nodes == 0` keeps every node.
    pub fn from_report(graph: &CooccurrenceGraph, report: &MetricsReport, max_nodes: usize) -> Self {
        let total_nodes = graph.node_count();
        let keep: Option<HashSet<&str>> = if max_nodes > 0 && total_nodes > max_nodes {
            Some(
                report
                    .nodes
                    .iter()
                    .take(max_nodes)
                    .map(|r| r.node_id.as_str())
                    .collect(),
            )
        } else {
            None
        };
        let kept = |id: &str| keep.as_ref().map_or(true, |k| k.contains(id));

        let rows: HashMap<&str, &NodeMetricsRow> = report
            .nodes
            .iter()
            .map(|r| (r.node_id.as_str(), r))
            .collect();

        let mut colors: HashMap<&str, &str> = HashMap::new();
        let mut nodes = Vec::new();
        for node in graph.nodes().filter(|n| kept(&n.id)) {
            let color = if node.field.is_empty() {
                UNKNOWN_COLOR
            } else {
                let next = FIELD_PALETTE[colors.len() % FIELD_PALETTE.len()];
                *colors.entry(node.field.as_str()).or_insert(next)
            };

            let (size, title, degree_weighted, community) = match rows.get(node.id.as_str()) {
                Some(row) => (
                    BASE_NODE_SIZE + 4.0 * row.degree_weighted.max(0.0).sqrt(),
                    format!(
                        "{}\nField: {}\nDegree(w): {}\nCommunity: {}",
                        node.label, node.field, row.degree_weighted, row.community
                    ),
                    Some(row.degree_weighted),
                    Some(row.community),
                ),
                None => (
                    BASE_NODE_SIZE,
                    format!("{}\nField: {}", node.label, node.field),
                    None,
                    None,
                ),
            };

            nodes.push(ViewNode {
                id: node.id.clone(),
                label: node.label.clone(),
                field: node.field.clone(),
                color: color.to_string(),
                size,
                title,
                degree_weighted,
                community,
            });
        }

        let links = graph
            .edges()
            .filter(|(a, b, _)| kept(&a.id) && kept(&b.id))
            .map(|(a, b, w)| ViewLink {
                source: a.id.clone(),
                target: b.id.clone(),
                weight: w,
                title: format!("weight: {}", w),
            })
            .collect();

        Self {
            directed: false,
            multigraph: false,
            nodes,
            links,
            total_nodes,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.nodes.len() < self.total_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::compute;
    use crate::graph::models::{FieldValueNode, MetricsOptions};

    fn star() -> CooccurrenceGraph {
        let mut g = CooccurrenceGraph::new();
        g.add_node(FieldValueNode::new("A", "hub"));
        for leaf in ["x", "y", "z"] {
            g.add_node(FieldValueNode::new("B", leaf));
        }
        g.add_cooccurrence("A::hub", "B::x", 4);
        g.add_cooccurrence("A::hub", "B::y", 2);
        g.add_cooccurrence("A::hub", "B::z", 1);
        g
    }

    #[test]
    fn test_full_view() {
        let g = star();
        let report = compute(&g, &MetricsOptions::default()).unwrap();
        let view = GraphView::from_report(&g, &report, 0);

        assert_eq!(view.nodes.len(), 4);
        assert_eq!(view.links.len(), 3);
        assert!(!view.is_truncated());

        let hub = view.nodes.iter().find(|n| n.id == "A::hub").unwrap();
        assert_eq!(hub.color, FIELD_PALETTE[0]);
        // 8 + 4 * sqrt(7)
        assert!((hub.size - (8.0 + 4.0 * 7f64.sqrt())).abs() < 1e-12);
        assert!(hub.title.contains("Degree(w): 7"));

        let leaf = view.nodes.iter().find(|n| n.id == "B::x").unwrap();
        assert_eq!(leaf.color, FIELD_PALETTE[1]);
        assert_eq!(view.links[0].title, "weight: 4");
    }

    #[test]
    fn test_truncated_view_keeps_top_nodes() {
        let g = star();
        let report = compute(&g, &MetricsOptions::default()).unwrap();
        let view = GraphView::from_report(&g, &report, 2);

        let ids: Vec<&str> = view.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["A::hub", "B::x"]);
        assert_eq!(view.links.len(), 1);
        assert_eq!(view.total_nodes, 4);
        assert!(view.is_truncated());
    }

    #[test]
    fn test_nodes_without_metrics_use_defaults() {
        let g = star();
        let mut report = compute(&g, &MetricsOptions::default()).unwrap();
        report.nodes.retain(|r| r.node_id != "B::z");
        let view = GraphView::from_report(&g, &report, 0);
        let z = view.nodes.iter().find(|n| n.id == "B::z").unwrap();
        assert_eq!(z.size, BASE_NODE_SIZE);
        assert_eq!(z.community, None);
        assert_eq!(z.title, "z\nField: B");
    }

    #[test]
    fn test_palette_wraps_and_unknown_field() {
        let mut g = CooccurrenceGraph::new();
        for i in 0..15 {
            g.add_node(FieldValueNode::new(&format!("F{}", i), "v"));
        }
        g.add_node(FieldValueNode {
            id: "orphan".into(),
            label: "orphan".into(),
            field: String::new(),
        });
        let report = compute(&g, &MetricsOptions::default()).unwrap();
        let view = GraphView::from_report(&g, &report, 0);
        assert_eq!(view.nodes[14].color, FIELD_PALETTE[0]);
        assert_eq!(view.nodes[15].color, UNKNOWN_COLOR);
    }
}
