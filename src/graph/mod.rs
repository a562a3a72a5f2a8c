//! Co-occurrence graph analytics.
//!
//! Builds an undirected weighted graph from tabular records, one node per
//! distinct `(field, value)` pair and one edge per pair of values that appear
//! together in a record, then computes per-node metrics in-process using
//! petgraph, rustworkx-core and rayon.
//!
//! ## Architecture
//!
//! ```text
//! Table ──► filter ──► builder ──► petgraph::UnGraph
//!                                        │
//!                          ┌─────────────┼──────────────┐
//!                     algorithms     community      components
//!                          └─────────────┼──────────────┘
//!                                        │
//!                                  MetricsReport
//!                                        │
//!                          AnalyticsEngine (orchestrator)
//! ```
//!
//! ## Modules
//!
//! - [`models`] — Data structures (FieldValueNode, CooccurrenceGraph, MetricsReport, MetricsOptions)
//! - [`builder`] — Table → co-occurrence graph, weight-floor pruning
//! - [`algorithms`] — Degree family, weighted betweenness, eigenvector, components
//! - [`community`] — Community detection strategies and their fallback chain
//! - [`engine`] — `compute`, the `AnalyticsEngine` trait and `CooccurrenceEngine`

pub mod algorithms;
pub mod builder;
pub mod community;
pub mod engine;
pub mod models;

// Re-export primary types for convenience
pub use builder::{build, prune_by_weight};
pub use community::{CommunityAssignment, CommunityDetector, DetectionError};
pub use engine::{
    compute, run_analysis, AnalysisOutcome, AnalysisRequest, AnalyticsEngine, CooccurrenceEngine,
};
pub use models::{
    BetweennessMode, CoEdge, CooccurrenceGraph, EdgeMetricsRow, EigenSolver, FieldValueNode,
    MetricsOptions, MetricsReport, MetricsSummary, NodeMetricsRow,
};
