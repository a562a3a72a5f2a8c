//! Graph metric algorithms.
//!
//! Implements the per-node metric families on a [`CooccurrenceGraph`]:
//! - **Degree family** — degree, weighted degree, degree centrality
//! - **Betweenness centrality** — weighted Brandes (Dijkstra), exact or over
//!   a seeded sample of sources, parallelized across sources with rayon
//! - **Eigenvector centrality** — via
//!   `rustworkx_core::centrality::eigenvector_centrality`, with an in-crate
//!   power iteration as fallback
//! - **Connected components** — via petgraph
//!
//! Results are `Vec`s indexed by `NodeIndex::index()`. Community detection
//! lives in [`super::community`].
//!
//! Edge weights are co-occurrence counts. For shortest paths a weight `w` is
//! turned into the cost `1 / w`: values that co-occur more often are closer.

use petgraph::visit::EdgeRef;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::any::Any;
use std::convert::Infallible;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::models::{BetweennessMode, CooccurrenceGraph, EigenSolver, MetricsOptions};
use crate::error::{GraphError, Result};

/// Smallest number of sampled sources when sampling is derived automatically.
pub const MIN_AUTO_SAMPLE: usize = 50;
/// Largest number of sampled sources when sampling is derived automatically.
pub const MAX_AUTO_SAMPLE: usize = 500;

// ============================================================================
// Weighted adjacency
// ============================================================================

/// Undirected adjacency lists with `f64` weights, built once per run and
/// shared read-only by the algorithms.
#[derive(Debug, Clone)]
pub struct WeightedAdjacency {
    /// `neighbors[i]` = `(j, weight)` for every edge `i — j`
    pub neighbors: Vec<Vec<(usize, f64)>>,
    /// Weighted degree per node
    pub strength: Vec<f64>,
}

impl WeightedAdjacency {
    pub fn from_graph(graph: &CooccurrenceGraph) -> Self {
        let g = &graph.graph;
        let n = g.node_count();
        let mut neighbors: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        let mut strength = vec![0.0; n];
        for edge in g.edge_references() {
            let s = edge.source().index();
            let t = edge.target().index();
            let w = edge.weight().weight as f64;
            neighbors[s].push((t, w));
            neighbors[t].push((s, w));
            strength[s] += w;
            strength[t] += w;
        }
        Self {
            neighbors,
            strength,
        }
    }

    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Sum of edge weights (each undirected edge once).
    pub fn total_weight(&self) -> f64 {
        self.strength.iter().sum::<f64>() / 2.0
    }
}

// ============================================================================
// Degree family
// ============================================================================

/// Degree-based scores indexed by node.
#[derive(Debug, Clone, Default)]
pub struct DegreeScores {
    pub degree: Vec<usize>,
    pub weighted: Vec<f64>,
    pub centrality: Vec<f64>,
}

/// Degree, weighted degree and degree centrality (`degree / (n - 1)`,
/// 0 when `n <= 1`).
pub fn degree_family(adj: &WeightedAdjacency) -> DegreeScores {
    let n = adj.node_count();
    let degree: Vec<usize> = adj.neighbors.iter().map(|nb| nb.len()).collect();
    let centrality = if n > 1 {
        degree.iter().map(|&d| d as f64 / (n - 1) as f64).collect()
    } else {
        vec![0.0; n]
    };
    DegreeScores {
        degree,
        weighted: adj.strength.clone(),
        centrality,
    }
}

// ============================================================================
// Betweenness centrality (weighted Brandes)
// ============================================================================

/// Decide between exact and sampled betweenness for a graph of `n` nodes.
///
/// An explicit `sample_size` wins; otherwise graphs above `exact_threshold`
/// are sampled with `clamp(sqrt(n) * 10, 50, 500)` sources when
/// `approx_betweenness` is set. Sample sizes of at least `n` are exact.
pub fn betweenness_mode(n: usize, options: &MetricsOptions) -> BetweennessMode {
    let k = match options.sample_size {
        Some(k) => Some(k),
        None if options.approx_betweenness && n > options.exact_threshold => {
            let auto = ((n as f64).sqrt() * 10.0) as usize;
            Some(auto.clamp(MIN_AUTO_SAMPLE, MAX_AUTO_SAMPLE))
        }
        None => None,
    };
    match k {
        Some(k) if k < n => BetweennessMode::Sampled { sources: k },
        _ => BetweennessMode::Exact,
    }
}

/// Source nodes for a betweenness run. Sampling is deterministic in `seed`.
pub fn betweenness_sources(n: usize, mode: BetweennessMode, seed: u64) -> Vec<usize> {
    match mode {
        BetweennessMode::Exact => (0..n).collect(),
        BetweennessMode::Sampled { sources } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut picked = rand::seq::index::sample(&mut rng, n, sources.min(n)).into_vec();
            picked.sort_unstable();
            picked
        }
    }
}

/// Weighted betweenness centrality, normalized for undirected graphs and
/// clamped into `[0, 1]`.
///
/// Sampled runs rescale by `n / k` to estimate the full score. Graphs with
/// fewer than three nodes score 0 everywhere. Fails only on cancellation.
pub fn betweenness_centrality(
    adj: &WeightedAdjacency,
    options: &MetricsOptions,
) -> Result<(Vec<f64>, BetweennessMode)> {
    let n = adj.node_count();
    let mode = betweenness_mode(n, options);
    if n < 3 {
        return Ok((vec![0.0; n], mode));
    }

    let sources = betweenness_sources(n, mode, options.seed);
    let cost = path_costs(adj);

    let raw = sources
        .par_iter()
        .try_fold(
            || vec![0.0; n],
            |mut acc, &s| {
                if options.is_cancelled() {
                    return Err(GraphError::Cancelled);
                }
                accumulate_single_source(&cost, s, &mut acc);
                Ok(acc)
            },
        )
        .try_reduce(
            || vec![0.0; n],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                Ok(a)
            },
        )?;

    let mut scale = 1.0 / ((n - 1) as f64 * (n - 2) as f64);
    if let BetweennessMode::Sampled { sources: k } = mode {
        scale *= n as f64 / k as f64;
    }
    let scores = raw
        .into_iter()
        .map(|b| (b * scale).clamp(0.0, 1.0))
        .collect();

    tracing::debug!("Betweenness computed over {} sources ({:?})", sources.len(), mode);
    Ok((scores, mode))
}

/// Adjacency lists with `1 / weight` costs.
fn path_costs(adj: &WeightedAdjacency) -> Vec<Vec<(usize, f64)>> {
    adj.neighbors
        .iter()
        .map(|nb| nb.iter().map(|&(j, w)| (j, 1.0 / w)).collect())
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    dist: f64,
    node: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed for a min-heap.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.node.cmp(&self.node))
    }
}

fn same_distance(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-10 * a.abs().max(b.abs()).max(1.0)
}

/// One Brandes iteration: Dijkstra from `s`, then dependency accumulation
/// into `acc`.
fn accumulate_single_source(cost: &[Vec<(usize, f64)>], s: usize, acc: &mut [f64]) {
    let n = cost.len();
    let mut dist = vec![f64::INFINITY; n];
    let mut sigma = vec![0.0f64; n];
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut settled = vec![false; n];
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut heap = BinaryHeap::new();

    dist[s] = 0.0;
    sigma[s] = 1.0;
    heap.push(QueueEntry { dist: 0.0, node: s });

    while let Some(QueueEntry { dist: d, node: v }) = heap.pop() {
        if settled[v] {
            continue;
        }
        settled[v] = true;
        order.push(v);

        for &(w, c) in &cost[v] {
            if settled[w] {
                continue;
            }
            let nd = d + c;
            if dist[w].is_infinite() || (nd < dist[w] && !same_distance(nd, dist[w])) {
                dist[w] = nd;
                sigma[w] = sigma[v];
                preds[w].clear();
                preds[w].push(v);
                heap.push(QueueEntry { dist: nd, node: w });
            } else if same_distance(nd, dist[w]) {
                sigma[w] += sigma[v];
                preds[w].push(v);
            }
        }
    }

    let mut delta = vec![0.0f64; n];
    while let Some(w) = order.pop() {
        let coeff = (1.0 + delta[w]) / sigma[w];
        for &v in &preds[w] {
            delta[v] += sigma[v] * coeff;
        }
        if w != s {
            acc[w] += delta[w];
        }
    }
}

// ============================================================================
// Eigenvector centrality
// ============================================================================

/// Eigenvector centrality of the weighted adjacency matrix, as absolute
/// values normalized to sum 1.
///
/// Zero nodes give an empty vector and a single node gives `[1.0]`. The
/// rustworkx-core solver is tried first; if it does not converge or panics the
/// in-crate power iteration runs with `eigen_fallback_iterations`; if that
/// fails too every score is 0.0. Fails only on cancellation.
pub fn eigenvector_centrality(
    graph: &CooccurrenceGraph,
    adj: &WeightedAdjacency,
    options: &MetricsOptions,
) -> Result<(Vec<f64>, EigenSolver)> {
    let n = graph.node_count();
    match n {
        0 => return Ok((Vec::new(), EigenSolver::Trivial)),
        1 => return Ok((vec![1.0], EigenSolver::Trivial)),
        _ => {}
    }

    let preferred = || match rustworkx_core::centrality::eigenvector_centrality(
        &graph.graph,
        |edge| -> std::result::Result<f64, Infallible> { Ok(edge.weight().weight as f64) },
        Some(options.eigen_max_iterations),
        Some(options.eigen_tolerance),
    ) {
        Ok(v) => v,
        Err(never) => match never {},
    };
    eigenvector_with(preferred, adj, options)
}

/// Eigenvector scores from `preferred`, falling back to [`power_iteration`]
/// when it does not converge or panics, and to all zeros after that.
fn eigenvector_with<F>(
    preferred: F,
    adj: &WeightedAdjacency,
    options: &MetricsOptions,
) -> Result<(Vec<f64>, EigenSolver)>
where
    F: FnOnce() -> Option<Vec<f64>>,
{
    let n = adj.node_count();
    match catch_unwind(AssertUnwindSafe(preferred)) {
        Ok(scores) => {
            if let Some(scores) = scores.and_then(l1_normalized) {
                return Ok((scores, EigenSolver::Rustworkx));
            }
            tracing::warn!(
                "Eigenvector solver did not converge in {} iterations, falling back to power iteration",
                options.eigen_max_iterations
            );
        }
        Err(payload) => {
            tracing::warn!(
                "Eigenvector solver panicked: {}, falling back to power iteration",
                panic_message(payload.as_ref())
            );
        }
    }

    if options.is_cancelled() {
        return Err(GraphError::Cancelled);
    }
    let fallback = power_iteration(
        adj,
        options.eigen_fallback_iterations,
        options.eigen_tolerance,
        options,
    )?;
    match fallback.and_then(l1_normalized) {
        Some(scores) => Ok((scores, EigenSolver::PowerIteration)),
        None => {
            tracing::warn!(
                "Power iteration did not converge in {} iterations, eigenvector scores set to 0",
                options.eigen_fallback_iterations
            );
            Ok((vec![0.0; n], EigenSolver::Failed))
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Shifted power iteration `x ← (A + I) x`, L2-normalized each step.
///
/// Returns `None` if the vector vanishes or does not converge within
/// `max_iter` iterations.
pub fn power_iteration(
    adj: &WeightedAdjacency,
    max_iter: usize,
    tol: f64,
    options: &MetricsOptions,
) -> Result<Option<Vec<f64>>> {
    let n = adj.node_count();
    if n == 0 {
        return Ok(Some(Vec::new()));
    }
    let mut x = vec![1.0 / n as f64; n];

    for _ in 0..max_iter {
        if options.is_cancelled() {
            return Err(GraphError::Cancelled);
        }
        let mut next = x.clone();
        for (i, nb) in adj.neighbors.iter().enumerate() {
            for &(j, w) in nb {
                next[j] += x[i] * w;
            }
        }
        let norm = next.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Ok(None);
        }
        for v in next.iter_mut() {
            *v /= norm;
        }
        let diff: f64 = x.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
        x = next;
        if diff < n as f64 * tol {
            return Ok(Some(x));
        }
    }
    Ok(None)
}

/// Absolute values scaled to sum 1; `None` if the vector is zero or not finite.
fn l1_normalized(v: Vec<f64>) -> Option<Vec<f64>> {
    let abs: Vec<f64> = v.into_iter().map(f64::abs).collect();
    let total: f64 = abs.iter().sum();
    if total > 0.0 && total.is_finite() {
        Some(abs.into_iter().map(|x| x / total).collect())
    } else {
        None
    }
}

// ============================================================================
// Connected components
// ============================================================================

/// Number of connected components (isolated nodes count as components).
pub fn component_count(graph: &CooccurrenceGraph) -> usize {
    petgraph::algo::connected_components(&graph.graph)
}

// ============================================================================
// Tests
// ============================================================================
