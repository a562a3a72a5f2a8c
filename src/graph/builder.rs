//! Table → co-occurrence graph construction.
//!
//! Nodes are the distinct `(field, value)` pairs of the selected fields.
//! Every record contributes one co-occurrence to each unordered pair of the
//! `(field, value)` entries it contains, so a record with `k` present values
//! touches exactly `k * (k - 1) / 2` edges.
//!
//! Edge weights are accumulated in an [`EdgeAccumulator`] keyed by the
//! unordered node pair before any petgraph edge exists; the graph edges are
//! materialized once, in first-occurrence order.

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use super::models::{node_id, CoEdge, CooccurrenceGraph, FieldValueNode};
use crate::error::{GraphError, Result};
use crate::table::Table;

/// Unordered node pair, stored as `(min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey(NodeIndex, NodeIndex);

impl EdgeKey {
    /// Returns `None` for a self-pair.
    pub fn new(a: NodeIndex, b: NodeIndex) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self(a, b)),
            std::cmp::Ordering::Greater => Some(Self(b, a)),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn endpoints(&self) -> (NodeIndex, NodeIndex) {
        (self.0, self.1)
    }
}

/// Pair-key → weight counter that remembers first-occurrence order.
#[derive(Debug, Default)]
pub struct EdgeAccumulator {
    slots: HashMap<EdgeKey, usize>,
    entries: Vec<(EdgeKey, u64)>,
}

impl EdgeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one co-occurrence for the pair, creating it with weight 1.
    pub fn bump(&mut self, key: EdgeKey) {
        match self.slots.entry(key) {
            Entry::Occupied(slot) => self.entries[*slot.get()].1 += 1,
            Entry::Vacant(slot) => {
                slot.insert(self.entries.len());
                self.entries.push((key, 1));
            }
        }
    }

    pub fn weight(&self, key: &EdgeKey) -> Option<u64> {
        self.slots.get(key).map(|&i| self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pairs and weights in first-occurrence order.
    pub fn into_entries(self) -> Vec<(EdgeKey, u64)> {
        self.entries
    }
}

/// Build the co-occurrence graph of `fields` over `table`.
///
/// `fields` must be non-empty and name existing columns; duplicates are
/// ignored. `min_weight` must be at least 1; above 1 the graph is passed
/// through [`prune_by_weight`].
pub fn build<S: AsRef<str>>(
    table: &Table,
    fields: &[S],
    min_weight: u64,
) -> Result<CooccurrenceGraph> {
    if fields.is_empty() {
        return Err(GraphError::invalid("at least one field must be selected"));
    }
    if min_weight == 0 {
        return Err(GraphError::invalid("min_weight must be a positive integer"));
    }

    let mut seen = HashSet::new();
    let mut selected: Vec<(&str, usize)> = Vec::with_capacity(fields.len());
    for f in fields {
        let name = f.as_ref();
        let col = table
            .column_index(name)
            .ok_or_else(|| GraphError::invalid(format!("unknown field '{}'", name)))?;
        if seen.insert(name) {
            selected.push((name, col));
        }
    }

    let mut graph = CooccurrenceGraph::new();

    // 1. Nodes: field order, then first appearance.
    for &(field, col) in &selected {
        for row in table.rows() {
            if let Some(value) = row[col].as_deref() {
                graph.add_node(FieldValueNode::new(field, value));
            }
        }
    }

    // 2. Co-occurrences per record.
    let mut acc = EdgeAccumulator::new();
    let mut skipped = 0usize;
    let mut items: Vec<NodeIndex> = Vec::with_capacity(selected.len());
    for row in table.rows() {
        items.clear();
        for &(field, col) in &selected {
            if let Some(value) = row[col].as_deref() {
                if let Some(idx) = graph.get_index(&node_id(field, value)) {
                    if !items.contains(&idx) {
                        items.push(idx);
                    }
                }
            }
        }
        if items.is_empty() {
            skipped += 1;
            continue;
        }
        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                if let Some(key) = EdgeKey::new(items[i], items[j]) {
                    acc.bump(key);
                }
            }
        }
    }

    // 3. Materialize edges.
    graph.graph.reserve_edges(acc.len());
    for (key, weight) in acc.into_entries() {
        let (a, b) = key.endpoints();
        graph.graph.add_edge(a, b, CoEdge { weight });
    }

    tracing::debug!(
        "Built co-occurrence graph over {:?}: {} nodes, {} edges ({} empty records skipped)",
        selected.iter().map(|(f, _)| *f).collect::<Vec<_>>(),
        graph.node_count(),
        graph.edge_count(),
        skipped
    );

    if min_weight > 1 {
        graph = prune_by_weight(&graph, min_weight);
    }
    Ok(graph)
}

/// Drop edges lighter than `min_weight`, then every node left without edges.
///
/// Node and edge order are preserved. A floor of 1 or less keeps the graph
/// unchanged (isolated nodes included). Applying the same floor twice is a
/// no-op.
pub fn prune_by_weight(graph: &CooccurrenceGraph, min_weight: u64) -> CooccurrenceGraph {
    if min_weight <= 1 {
        return graph.clone();
    }
    let g = &graph.graph;

    let mut keep_node = vec![false; g.node_count()];
    let kept_edges: Vec<_> = g
        .edge_references()
        .filter(|e| e.weight().weight >= min_weight)
        .inspect(|e| {
            keep_node[e.source().index()] = true;
            keep_node[e.target().index()] = true;
        })
        .collect();

    let mut pruned = CooccurrenceGraph::with_capacity(
        keep_node.iter().filter(|k| **k).count(),
        kept_edges.len(),
    );
    for idx in g.node_indices() {
        if keep_node[idx.index()] {
            pruned.add_node(g[idx].clone());
        }
    }
    for e in &kept_edges {
        pruned.add_cooccurrence(&g[e.source()].id, &g[e.target()].id, e.weight().weight);
    }

    tracing::debug!(
        "Pruned at min_weight={}: {} → {} nodes, {} → {} edges",
        min_weight,
        g.node_count(),
        pruned.node_count(),
        g.edge_count(),
        pruned.edge_count()
    );
    pruned
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    fn table(columns: &[&str], rows: Vec<Vec<Option<String>>>) -> Table {
        Table::from_rows(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    /// rows `[(a1,b1),(a1,b2),(a2,b1)]` over columns A, B
    fn three_rows() -> Table {
        table(
            &["A", "B"],
            vec![
                vec![cell("a1"), cell("b1")],
                vec![cell("a1"), cell("b2")],
                vec![cell("a2"), cell("b1")],
            ],
        )
    }

    #[test]
    fn test_three_row_scenario() {
        let g = build(&three_rows(), &["A", "B"], 1).unwrap();

        let ids: Vec<&str> = g.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["A::a1", "A::a2", "B::b1", "B::b2"]);

        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.edge_weight("A::a1", "B::b1"), Some(1));
        assert_eq!(g.edge_weight("A::a1", "B::b2"), Some(1));
        assert_eq!(g.edge_weight("A::a2", "B::b1"), Some(1));
        assert_eq!(g.edge_weight("A::a1", "A::a2"), None);
    }

    #[test]
    fn test_weights_accumulate_across_records() {
        let t = table(
            &["A", "B", "C"],
            vec![
                vec![cell("x"), cell("y"), cell("z")],
                vec![cell("x"), cell("y"), None],
                vec![cell("x"), cell("y"), cell("z")],
            ],
        );
        let g = build(&t, &["A", "B", "C"], 1).unwrap();
        assert_eq!(g.edge_weight("A::x", "B::y"), Some(3));
        assert_eq!(g.edge_weight("A::x", "C::z"), Some(2));
        assert_eq!(g.edge_weight("B::y", "C::z"), Some(2));
        // 3 + 1 + 3 pair increments
        assert_eq!(g.total_weight(), 7);
    }

    #[test]
    fn test_record_with_k_values_touches_k_choose_2_edges() {
        let t = table(
            &["A", "B", "C", "D"],
            vec![vec![cell("1"), cell("2"), cell("3"), cell("4")]],
        );
        let g = build(&t, &["A", "B", "C", "D"], 1).unwrap();
        assert_eq!(g.edge_count(), 6);
        assert_eq!(g.total_weight(), 6);
    }

    #[test]
    fn test_same_value_in_two_fields_is_two_nodes() {
        let t = table(&["A", "B"], vec![vec![cell("v"), cell("v")]]);
        let g = build(&t, &["A", "B"], 1).unwrap();
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_weight("A::v", "B::v"), Some(1));
    }

    #[test]
    fn test_separator_in_field_and_value_keeps_pairs_distinct() {
        let t = table(&["A", "A::b"], vec![vec![cell("b::c"), cell("c")]]);
        let g = build(&t, &["A", "A::b"], 1).unwrap();

        assert_eq!(g.node_count(), 2);
        let nodes: Vec<(&str, &str)> = g
            .nodes()
            .map(|n| (n.field.as_str(), n.label.as_str()))
            .collect();
        assert_eq!(nodes, vec![("A", "b::c"), ("A::b", "c")]);

        assert_eq!(g.edge_count(), 1);
        assert_eq!(
            g.edge_weight(&node_id("A", "b::c"), &node_id("A::b", "c")),
            Some(1)
        );
    }

    #[test]
    fn test_missing_values_skipped() {
        let t = table(
            &["A", "B"],
            vec![
                vec![None, None],
                vec![cell("a"), None],
                vec![None, cell("b")],
            ],
        );
        let g = build(&t, &["A", "B"], 1).unwrap();
        // single-value records create nodes but no edges
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_unselected_columns_ignored() {
        let g = build(&three_rows(), &["B"], 1).unwrap();
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_duplicate_fields_ignored() {
        let g = build(&three_rows(), &["A", "B", "A"], 1).unwrap();
        assert_eq!(g.node_count(), 4);
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn test_empty_fields_is_invalid() {
        let fields: [&str; 0] = [];
        let err = build(&three_rows(), &fields, 1);
        assert!(matches!(err, Err(GraphError::InvalidArgument(_))));
    }

    #[test]
    fn test_unknown_field_is_invalid() {
        let err = build(&three_rows(), &["A", "Z"], 1);
        assert!(matches!(err, Err(GraphError::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_min_weight_is_invalid() {
        let err = build(&three_rows(), &["A", "B"], 0);
        assert!(matches!(err, Err(GraphError::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_rows_yields_empty_graph() {
        let t = Table::new(vec!["A".into(), "B".into()]);
        let g = build(&t, &["A", "B"], 1).unwrap();
        assert_eq!(g.node_count(), 0);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_min_weight_prunes_everything_when_all_weight_one() {
        let g = build(&three_rows(), &["A", "B"], 2).unwrap();
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.node_count(), 0);
    }

    #[test]
    fn test_min_weight_keeps_heavy_edges_and_their_nodes() {
        let t = table(
            &["A", "B"],
            vec![
                vec![cell("x"), cell("y")],
                vec![cell("x"), cell("y")],
                vec![cell("x"), cell("z")],
                vec![cell("w"), None],
            ],
        );
        let g = build(&t, &["A", "B"], 2).unwrap();
        let ids: Vec<&str> = g.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["A::x", "B::y"]);
        assert_eq!(g.edge_weight("A::x", "B::y"), Some(2));
    }

    #[test]
    fn test_prune_is_idempotent() {
        let t = table(
            &["A", "B", "C"],
            vec![
                vec![cell("x"), cell("y"), cell("z")],
                vec![cell("x"), cell("y"), None],
                vec![cell("q"), cell("y"), cell("z")],
            ],
        );
        let g = build(&t, &["A", "B", "C"], 1).unwrap();
        let once = prune_by_weight(&g, 2);
        let twice = prune_by_weight(&once, 2);

        let ids = |g: &CooccurrenceGraph| g.nodes().map(|n| n.id.clone()).collect::<Vec<_>>();
        let edges = |g: &CooccurrenceGraph| {
            g.edges()
                .map(|(a, b, w)| (a.id.clone(), b.id.clone(), w))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&once), ids(&twice));
        assert_eq!(edges(&once), edges(&twice));
        assert!(once.edge_count() > 0);
    }

    #[test]
    fn test_prune_floor_one_keeps_isolated_nodes() {
        let t = table(&["A", "B"], vec![vec![cell("a"), None]]);
        let g = build(&t, &["A", "B"], 1).unwrap();
        assert_eq!(prune_by_weight(&g, 1).node_count(), 1);
    }

    #[test]
    fn test_handshake_invariant() {
        let t = table(
            &["A", "B", "C"],
            vec![
                vec![cell("1"), cell("2"), cell("3")],
                vec![cell("1"), cell("4"), cell("3")],
                vec![cell("5"), cell("2"), None],
                vec![cell("1"), cell("2"), cell("3")],
            ],
        );
        let g = build(&t, &["A", "B", "C"], 1).unwrap();
        let sum_degrees: u64 = g.nodes().map(|n| g.weighted_degree(&n.id).unwrap()).sum();
        assert_eq!(sum_degrees, 2 * g.total_weight());
    }

    #[test]
    fn test_edge_accumulator_single_upsert() {
        let a = NodeIndex::new(0);
        let b = NodeIndex::new(1);
        let mut acc = EdgeAccumulator::new();
        acc.bump(EdgeKey::new(a, b).unwrap());
        acc.bump(EdgeKey::new(b, a).unwrap());
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.weight(&EdgeKey::new(a, b).unwrap()), Some(2));
        assert!(EdgeKey::new(a, a).is_none());
    }
}
