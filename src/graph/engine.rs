//! Metrics engine — orchestrates the full pipeline.
//!
//! [`compute`] runs the four metric families over one immutable graph and
//! assembles a [`MetricsReport`]. The [`AnalyticsEngine`] trait is the async
//! entry point for consumers holding a [`Table`]:
//!
//! 1. **Filter**: keep rows matching the request's column filters
//! 2. **Build**: co-occurrence graph over the selected fields
//! 3. **Compute**: degree, betweenness, eigenvector, communities
//!
//! The work runs on a blocking worker; an optional timeout cancels it.

use async_trait::async_trait;
use chrono::Utc;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::algorithms::{
    betweenness_centrality, component_count, degree_family, eigenvector_centrality,
    WeightedAdjacency,
};
use super::builder::build;
use super::community::detect_communities;
use super::models::{
    CooccurrenceGraph, EdgeMetricsRow, MetricsOptions, MetricsReport, MetricsSummary,
    NodeMetricsRow,
};
use crate::error::{GraphError, Result};
use crate::table::{ColumnFilter, Table};

// ============================================================================
// compute
// ============================================================================

/// Reject options no algorithm can run with.
pub fn validate_options(options: &MetricsOptions) -> Result<()> {
    if options.sample_size == Some(0) {
        return Err(GraphError::invalid("sample_size must be at least 1"));
    }
    if !options.eigen_tolerance.is_finite() || options.eigen_tolerance <= 0.0 {
        return Err(GraphError::invalid(format!(
            "eigen_tolerance must be a positive number, got {}",
            options.eigen_tolerance
        )));
    }
    if !options.louvain_resolution.is_finite() || options.louvain_resolution <= 0.0 {
        return Err(GraphError::invalid(format!(
            "louvain_resolution must be a positive number, got {}",
            options.louvain_resolution
        )));
    }
    Ok(())
}

/// Compute every per-node metric and assemble the report.
///
/// Node rows are sorted by weighted degree descending, edge rows by weight
/// descending; ties keep input order. Degraded sub-algorithms are recorded in
/// the summary rather than failing the run. Errors are limited to invalid
/// options and cancellation.
pub fn compute(graph: &CooccurrenceGraph, options: &MetricsOptions) -> Result<MetricsReport> {
    validate_options(options)?;
    if options.is_cancelled() {
        return Err(GraphError::Cancelled);
    }
    let start = Instant::now();
    let g = &graph.graph;
    let adj = WeightedAdjacency::from_graph(graph);

    let ((degrees, betweenness), (eigen, communities)) = rayon::join(
        || {
            rayon::join(
                || degree_family(&adj),
                || betweenness_centrality(&adj, options),
            )
        },
        || {
            rayon::join(
                || eigenvector_centrality(graph, &adj, options),
                || detect_communities(&adj, options),
            )
        },
    );
    let (betweenness, betweenness_mode) = betweenness?;
    let (eigenvector, eigenvector_solver) = eigen?;
    let communities = communities?;

    let mut nodes: Vec<NodeMetricsRow> = g
        .node_indices()
        .map(|idx| {
            let i = idx.index();
            let node = &g[idx];
            NodeMetricsRow {
                node_id: node.id.clone(),
                label: node.label.clone(),
                field: node.field.clone(),
                degree: degrees.degree[i],
                degree_weighted: degrees.weighted[i],
                degree_centrality: degrees.centrality[i],
                betweenness: betweenness[i],
                eigenvector: eigenvector[i],
                community: communities.labels[i],
            }
        })
        .collect();
    nodes.sort_by(|a, b| b.degree_weighted.total_cmp(&a.degree_weighted));

    let mut edges: Vec<EdgeMetricsRow> = g
        .edge_references()
        .map(|e| EdgeMetricsRow {
            u: g[e.source()].id.clone(),
            v: g[e.target()].id.clone(),
            weight: e.weight().weight,
        })
        .collect();
    edges.sort_by(|a, b| b.weight.cmp(&a.weight));

    let summary = MetricsSummary {
        node_count: g.node_count(),
        edge_count: g.edge_count(),
        component_count: component_count(graph),
        community_count: communities.community_count,
        modularity: communities.modularity,
        community_strategy: communities.strategy,
        eigenvector_solver,
        betweenness_mode,
        computation_ms: start.elapsed().as_millis() as u64,
        computed_at: Utc::now(),
    };

    tracing::info!(
        "Metrics computed in {}ms: {} nodes, {} edges, {} communities (modularity={:.4}, strategy={}, eigen={})",
        summary.computation_ms,
        summary.node_count,
        summary.edge_count,
        summary.community_count,
        summary.modularity,
        summary.community_strategy,
        summary.eigenvector_solver,
    );

    Ok(MetricsReport {
        nodes,
        edges,
        summary,
    })
}

// ============================================================================
// Request / outcome
// ============================================================================

fn default_min_weight() -> u64 {
    1
}

/// One analysis over a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Columns whose values become nodes
    pub fields: Vec<String>,
    /// Row filters applied before building
    #[serde(default)]
    pub filters: Vec<ColumnFilter>,
    /// Edge weight floor (default: 1, no pruning)
    #[serde(default = "default_min_weight")]
    pub min_weight: u64,
    #[serde(default)]
    pub options: MetricsOptions,
    /// Wall-clock limit; overrides the engine default
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl AnalysisRequest {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            filters: Vec::new(),
            min_weight: default_min_weight(),
            options: MetricsOptions::default(),
            timeout_secs: None,
        }
    }
}

/// Graph and metrics produced by one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub graph: CooccurrenceGraph,
    pub report: MetricsReport,
}

/// Filter, build and compute synchronously.
pub fn run_analysis(table: &Table, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
    let filtered;
    let table = if request.filters.is_empty() {
        table
    } else {
        filtered = table.filter(&request.filters)?;
        &filtered
    };
    let graph = build(table, &request.fields, request.min_weight)?;
    let report = compute(&graph, &request.options)?;
    Ok(AnalysisOutcome { graph, report })
}

// ============================================================================
// Trait
// ============================================================================

/// Analytics engine trait — async entry point for co-occurrence analysis.
///
/// Consumers use `Arc<dyn AnalyticsEngine>` for dependency injection.
#[async_trait]
pub trait AnalyticsEngine: Send + Sync {
    /// Filter → build → compute for one request.
    async fn analyze(&self, table: Arc<Table>, request: AnalysisRequest)
        -> Result<AnalysisOutcome>;
}

// ============================================================================
// Concrete implementation
// ============================================================================

/// Runs analyses on tokio's blocking pool.
#[derive(Debug, Clone, Default)]
pub struct CooccurrenceEngine {
    default_timeout: Option<Duration>,
}

impl CooccurrenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `timeout` to requests that don't set their own.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl AnalyticsEngine for CooccurrenceEngine {
    async fn analyze(
        &self,
        table: Arc<Table>,
        mut request: AnalysisRequest,
    ) -> Result<AnalysisOutcome> {
        let token = match &request.options.cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        request.options.cancel = Some(token.clone());
        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.default_timeout);

        let handle = tokio::task::spawn_blocking(move || run_analysis(&table, &request));

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    token.cancel();
                    tracing::warn!("Analysis exceeded {:?}, cancelled", limit);
                    return Err(GraphError::Cancelled);
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(GraphError::Cancelled),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
