//! Co-occurrence graph data models.
//!
//! Defines the complete type system for the pipeline:
//!
//! ## Graph structure (builder → engine)
//! - [`FieldValueNode`] — a `(field, value)` pair, keyed as `"field::value"`
//!   with `:` and `\` escaped in the field part
//! - [`CoEdge`] — co-occurrence count between two distinct nodes
//! - [`CooccurrenceGraph`] — petgraph wrapper with ID ↔ NodeIndex mapping
//!
//! ## Output types (metrics)
//! - [`NodeMetricsRow`] / [`EdgeMetricsRow`] — the two flat result tables
//! - [`MetricsSummary`] — graph-level figures and which solvers ran
//! - [`MetricsReport`] — aggregated result of a full metrics run
//!
//! ## Configuration
//! - [`MetricsOptions`] — sampling, solver and community tuning parameters

use chrono::{DateTime, Utc};
use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Separator between field name and value in node identifiers.
pub const NODE_ID_SEPARATOR: &str = "::";

/// Build the identifier of a `(field, value)` node.
///
/// `\` and `:` in the field name are backslash-escaped, so the first
/// unescaped `::` always ends the field and distinct pairs never share an
/// identifier. Fields without either character keep the plain
/// `"field::value"` form.
pub fn node_id(field: &str, value: &str) -> String {
    let mut id = String::with_capacity(field.len() + NODE_ID_SEPARATOR.len() + value.len());
    for ch in field.chars() {
        if ch == '\\' || ch == ':' {
            id.push('\\');
        }
        id.push(ch);
    }
    id.push_str(NODE_ID_SEPARATOR);
    id.push_str(value);
    id
}

// ============================================================================
// Graph structure
// ============================================================================

/// A distinct value observed in a selected field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldValueNode {
    /// Structural identity, see [`node_id`]
    pub id: String,
    /// Display label (the stringified value)
    pub label: String,
    /// Originating field (column) name
    pub field: String,
}

impl FieldValueNode {
    pub fn new(field: &str, value: &str) -> Self {
        Self {
            id: node_id(field, value),
            label: value.to_string(),
            field: field.to_string(),
        }
    }
}

/// Undirected co-occurrence edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoEdge {
    /// Number of records in which both endpoint values appear together
    pub weight: u64,
}

impl Default for CoEdge {
    fn default() -> Self {
        Self { weight: 1 }
    }
}

/// Wrapper around `petgraph::UnGraph` with ID ↔ NodeIndex mapping.
///
/// Node indices follow insertion order, which is the "input order" used to
/// break ties when sorting result rows and to canonicalize community ids.
#[derive(Debug, Clone, Default)]
pub struct CooccurrenceGraph {
    /// The underlying undirected graph
    pub graph: UnGraph<FieldValueNode, CoEdge>,
    /// Mapping from node ID to petgraph NodeIndex
    pub id_to_index: HashMap<String, NodeIndex>,
}

impl CooccurrenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            graph: UnGraph::with_capacity(nodes, edges),
            id_to_index: HashMap::with_capacity(nodes),
        }
    }

    /// Add a node. If a node with the same ID already exists, returns its index.
    pub fn add_node(&mut self, node: FieldValueNode) -> NodeIndex {
        if let Some(&idx) = self.id_to_index.get(&node.id) {
            return idx;
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.id_to_index.insert(id, idx);
        idx
    }

    /// Add `weight` co-occurrences between two nodes identified by ID.
    ///
    /// Accumulates onto an existing edge instead of adding a parallel one.
    /// Returns `None` if either node is missing or both IDs are the same.
    pub fn add_cooccurrence(&mut self, a: &str, b: &str, weight: u64) -> Option<EdgeIndex> {
        let ia = *self.id_to_index.get(a)?;
        let ib = *self.id_to_index.get(b)?;
        if ia == ib {
            return None;
        }
        match self.graph.find_edge(ia, ib) {
            Some(e) => {
                self.graph[e].weight += weight;
                Some(e)
            }
            None => Some(self.graph.add_edge(ia, ib, CoEdge { weight })),
        }
    }

    pub fn get_node(&self, id: &str) -> Option<&FieldValueNode> {
        let idx = self.id_to_index.get(id)?;
        self.graph.node_weight(*idx)
    }

    pub fn get_index(&self, id: &str) -> Option<NodeIndex> {
        self.id_to_index.get(id).copied()
    }

    /// Weight of the edge between two nodes, if any.
    pub fn edge_weight(&self, a: &str, b: &str) -> Option<u64> {
        let ia = self.get_index(a)?;
        let ib = self.get_index(b)?;
        self.graph.find_edge(ia, ib).map(|e| self.graph[e].weight)
    }

    /// Nodes in input order.
    pub fn nodes(&self) -> impl Iterator<Item = &FieldValueNode> {
        self.graph.node_indices().map(move |i| &self.graph[i])
    }

    /// Edges in input order as `(source, target, weight)`.
    pub fn edges(&self) -> impl Iterator<Item = (&FieldValueNode, &FieldValueNode, u64)> {
        self.graph
            .edge_references()
            .map(move |e| (&self.graph[e.source()], &self.graph[e.target()], e.weight().weight))
    }

    /// Sum of incident edge weights of a node.
    pub fn weighted_degree(&self, id: &str) -> Option<u64> {
        let idx = self.get_index(id)?;
        Some(self.graph.edges(idx).map(|e| e.weight().weight).sum())
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Sum of all edge weights.
    pub fn total_weight(&self) -> u64 {
        self.graph.edge_weights().map(|e| e.weight).sum()
    }
}

// ============================================================================
// Output types — metrics tables
// ============================================================================

/// Per-node metrics row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetricsRow {
    pub node_id: String,
    pub label: String,
    pub field: String,
    /// Number of incident edges
    pub degree: usize,
    /// Sum of incident edge weights
    pub degree_weighted: f64,
    /// degree / (n - 1), 0 when n <= 1
    pub degree_centrality: f64,
    /// Weighted shortest-path betweenness (0.0–1.0)
    pub betweenness: f64,
    /// Eigenvector centrality, L1-normalized across nodes
    pub eigenvector: f64,
    /// Community id, -1 when undetermined
    pub community: i64,
}

/// Per-edge metrics row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeMetricsRow {
    pub u: String,
    pub v: String,
    pub weight: u64,
}

/// How betweenness sources were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BetweennessMode {
    /// Every node used as a source
    Exact,
    /// `sources` nodes drawn with a seeded RNG
    Sampled { sources: usize },
}

/// Which eigenvector solver produced the scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EigenSolver {
    /// Zero or one node, no iteration needed
    Trivial,
    /// rustworkx-core shifted power iteration
    Rustworkx,
    /// In-crate power iteration with the fallback iteration cap
    PowerIteration,
    /// Both solvers failed; every score is 0.0
    Failed,
}

impl std::fmt::Display for EigenSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trivial => write!(f, "trivial"),
            Self::Rustworkx => write!(f, "rustworkx"),
            Self::PowerIteration => write!(f, "power_iteration"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Graph-level figures of a metrics run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub node_count: usize,
    pub edge_count: usize,
    /// Number of connected components
    pub component_count: usize,
    /// Number of distinct community ids (excluding -1)
    pub community_count: usize,
    /// Newman modularity of the final partition
    pub modularity: f64,
    /// Name of the community strategy that produced the partition
    pub community_strategy: String,
    pub eigenvector_solver: EigenSolver,
    pub betweenness_mode: BetweennessMode,
    /// Computation time in milliseconds
    pub computation_ms: u64,
    pub computed_at: DateTime<Utc>,
}

/// Complete result of a metrics computation.
///
/// `nodes` is sorted by weighted degree, `edges` by weight, both descending
/// with ties kept in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub nodes: Vec<NodeMetricsRow>,
    pub edges: Vec<EdgeMetricsRow>,
    pub summary: MetricsSummary,
}

impl MetricsReport {
    /// Look up a node row by ID.
    pub fn node(&self, id: &str) -> Option<&NodeMetricsRow> {
        self.nodes.iter().find(|n| n.node_id == id)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning parameters for the metrics engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsOptions {
    /// Sample betweenness sources when the graph exceeds `exact_threshold`
    pub approx_betweenness: bool,
    /// Explicit number of betweenness sources (overrides auto sampling)
    pub sample_size: Option<usize>,
    /// Largest node count computed exactly when `approx_betweenness` is on
    pub exact_threshold: usize,
    /// Seed for betweenness source sampling
    pub seed: u64,
    /// Iteration cap for the preferred eigenvector solver (default: 100)
    pub eigen_max_iterations: usize,
    /// Per-node convergence tolerance for eigenvector solvers (default: 1e-6)
    pub eigen_tolerance: f64,
    /// Iteration cap for the fallback power iteration (default: 200)
    pub eigen_fallback_iterations: usize,
    /// Louvain resolution parameter (default: 1.0)
    pub louvain_resolution: f64,
    /// Maximum local-moving passes per Louvain level (default: 100)
    pub louvain_max_passes: usize,
    /// Largest graph the greedy agglomerative strategy accepts (default: 5000)
    pub greedy_max_nodes: usize,
    /// Caller-side cancellation, checked inside the long-running loops
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            approx_betweenness: true,
            sample_size: None,
            exact_threshold: 2000,
            seed: 42,
            eigen_max_iterations: 100,
            eigen_tolerance: 1e-6,
            eigen_fallback_iterations: 200,
            louvain_resolution: 1.0,
            louvain_max_passes: 100,
            greedy_max_nodes: 5000,
            cancel: None,
        }
    }
}

impl MetricsOptions {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

// ============================================================================
// Tests
// ============================================================================
