//! Community detection.
//!
//! Strategies implement [`CommunityDetector`] and are tried in order by
//! [`detect_with`]. The first one that returns a valid labelling wins; a
//! strategy that errors or panics is logged and the next one runs. When every
//! strategy fails, all nodes are left unassigned (`-1`).
//!
//! The default chain, strongest first:
//!
//! 1. [`MultilevelLouvain`] — local moving plus aggregation
//! 2. [`LocalMovingLouvain`] — a single level of local moving
//! 3. [`GreedyModularity`] — agglomerative modularity merging, bounded in size
//!
//! Community ids are canonical: numbered from 0 in order of each community's
//! lowest node index.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

use super::algorithms::{panic_message, WeightedAdjacency};
use super::models::MetricsOptions;
use crate::error::{GraphError, Result};

/// Community id for nodes no strategy could place.
pub const UNASSIGNED: i64 = -1;

/// Strategy name reported when the whole chain fails.
pub const UNASSIGNED_STRATEGY: &str = "unassigned";

/// Why a single strategy gave up.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("graph has {nodes} nodes, above the limit of {limit}")]
    TooLarge { nodes: usize, limit: usize },

    #[error("detection failed: {0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}

/// A community detection strategy.
///
/// Returns one label per node (any `usize` values; the runner renumbers
/// them).
pub trait CommunityDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn partition(
        &self,
        adj: &WeightedAdjacency,
        options: &MetricsOptions,
    ) -> std::result::Result<Vec<usize>, DetectionError>;
}

/// Outcome of a detection run.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunityAssignment {
    /// Community per node index; [`UNASSIGNED`] when the chain failed
    pub labels: Vec<i64>,
    pub community_count: usize,
    pub modularity: f64,
    pub strategy: String,
}

/// The strategies tried by [`detect_communities`].
pub fn default_chain() -> Vec<Box<dyn CommunityDetector>> {
    vec![
        Box::new(MultilevelLouvain),
        Box::new(LocalMovingLouvain),
        Box::new(GreedyModularity),
    ]
}

/// Detect communities with the default chain.
pub fn detect_communities(
    adj: &WeightedAdjacency,
    options: &MetricsOptions,
) -> Result<CommunityAssignment> {
    detect_with(&default_chain(), adj, options)
}

/// Run `chain` in order and return the first valid labelling.
///
/// Fails only on cancellation.
pub fn detect_with(
    chain: &[Box<dyn CommunityDetector>],
    adj: &WeightedAdjacency,
    options: &MetricsOptions,
) -> Result<CommunityAssignment> {
    let n = adj.node_count();

    for detector in chain {
        let outcome = catch_unwind(AssertUnwindSafe(|| detector.partition(adj, options)));
        match outcome {
            Ok(Ok(labels)) if labels.len() == n => {
                let labels = canonical_labels(&labels);
                let community_count = labels.iter().max().map(|&m| m + 1).unwrap_or(0);
                let modularity = modularity(adj, &labels);
                tracing::debug!(
                    "Community detection via {}: {} communities, modularity {:.4}",
                    detector.name(),
                    community_count,
                    modularity
                );
                return Ok(CommunityAssignment {
                    labels: labels.into_iter().map(|c| c as i64).collect(),
                    community_count,
                    modularity,
                    strategy: detector.name().to_string(),
                });
            }
            Ok(Ok(labels)) => {
                tracing::warn!(
                    "Community strategy {} returned {} labels for {} nodes, trying next",
                    detector.name(),
                    labels.len(),
                    n
                );
            }
            Ok(Err(DetectionError::Cancelled)) => return Err(GraphError::Cancelled),
            Ok(Err(e)) => {
                tracing::warn!(
                    "Community strategy {} failed: {}, trying next",
                    detector.name(),
                    e
                );
            }
            Err(payload) => {
                tracing::warn!(
                    "Community strategy {} panicked: {}, trying next",
                    detector.name(),
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    tracing::warn!("All community strategies failed, nodes left unassigned");
    Ok(CommunityAssignment {
        labels: vec![UNASSIGNED; n],
        community_count: 0,
        modularity: 0.0,
        strategy: UNASSIGNED_STRATEGY.to_string(),
    })
}

/// Renumber labels from 0 in order of first appearance.
pub fn canonical_labels(labels: &[usize]) -> Vec<usize> {
    let mut remap: HashMap<usize, usize> = HashMap::new();
    labels
        .iter()
        .map(|&c| {
            let next = remap.len();
            *remap.entry(c).or_insert(next)
        })
        .collect()
}

/// Newman modularity of a labelling (resolution 1).
///
/// `Q = Σ_c [ L_c / m − (d_c / 2m)² ]` where `L_c` is the weight inside
/// community `c` and `d_c` the total strength of its nodes. 0 without edges.
pub fn modularity(adj: &WeightedAdjacency, labels: &[usize]) -> f64 {
    let total_weight = adj.total_weight();
    if total_weight == 0.0 {
        return 0.0;
    }
    let m2 = 2.0 * total_weight;
    let k = labels.iter().max().map(|&m| m + 1).unwrap_or(0);
    let mut internal = vec![0.0; k];
    let mut degree = vec![0.0; k];

    for (i, neighbors) in adj.neighbors.iter().enumerate() {
        degree[labels[i]] += adj.strength[i];
        for &(j, w) in neighbors {
            if labels[i] == labels[j] {
                // each internal edge is seen from both ends
                internal[labels[i]] += w;
            }
        }
    }

    internal
        .iter()
        .zip(&degree)
        .map(|(&l2, &d)| l2 / m2 - (d / m2) * (d / m2))
        .sum()
}

// ============================================================================
// Louvain
// ============================================================================

/// One level of the Louvain hierarchy. Internal weight of aggregated nodes is
/// carried only through `strength`.
struct Level {
    neighbors: Vec<Vec<(usize, f64)>>,
    strength: Vec<f64>,
    total_weight: f64,
}

impl Level {
    fn from_adjacency(adj: &WeightedAdjacency) -> Self {
        Self {
            neighbors: adj.neighbors.clone(),
            strength: adj.strength.clone(),
            total_weight: adj.total_weight(),
        }
    }

    fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Collapse each community into a single node.
    fn aggregate(&self, labels: &[usize], k: usize) -> Self {
        let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); k];
        let mut strength = vec![0.0; k];
        for (i, neighbors) in self.neighbors.iter().enumerate() {
            let ci = labels[i];
            strength[ci] += self.strength[i];
            for &(j, w) in neighbors {
                let cj = labels[j];
                if ci != cj {
                    *links[ci].entry(cj).or_default() += w;
                }
            }
        }
        Self {
            neighbors: links.into_iter().map(|m| m.into_iter().collect()).collect(),
            strength,
            total_weight: self.total_weight,
        }
    }
}

/// Repeatedly move single nodes to the neighbouring community with the best
/// modularity gain until no move improves.
///
/// Returns the labels and whether any node moved.
fn local_moving(
    level: &Level,
    resolution: f64,
    max_passes: usize,
    options: &MetricsOptions,
) -> std::result::Result<(Vec<usize>, bool), DetectionError> {
    let n = level.len();
    let mut community: Vec<usize> = (0..n).collect();
    if level.total_weight == 0.0 {
        return Ok((community, false));
    }
    let m2 = 2.0 * level.total_weight;

    let mut comm_total_strength: Vec<f64> = level.strength.clone();
    let mut improved = true;
    let mut moved_any = false;
    let mut passes = 0;

    while improved && passes < max_passes {
        if options.is_cancelled() {
            return Err(DetectionError::Cancelled);
        }
        improved = false;
        passes += 1;

        for node in 0..n {
            let current = community[node];

            let mut comm_weights: BTreeMap<usize, f64> = BTreeMap::new();
            for &(neighbor, w) in &level.neighbors[node] {
                *comm_weights.entry(community[neighbor]).or_default() += w;
            }

            let ki = level.strength[node];
            let w_in_current = comm_weights.get(&current).copied().unwrap_or(0.0);
            let remove_cost = w_in_current / m2
                - resolution * ki * (comm_total_strength[current] - ki) / (m2 * m2);

            let mut best_comm = current;
            let mut best_gain = 0.0;
            for (&target, &w_to_target) in &comm_weights {
                if target == current {
                    continue;
                }
                let insert_cost =
                    w_to_target / m2 - resolution * ki * comm_total_strength[target] / (m2 * m2);
                let gain = insert_cost - remove_cost;
                if gain > best_gain {
                    best_gain = gain;
                    best_comm = target;
                }
            }

            if best_comm != current {
                comm_total_strength[current] -= ki;
                comm_total_strength[best_comm] += ki;
                community[node] = best_comm;
                improved = true;
                moved_any = true;
            }
        }
    }

    if comm_total_strength.iter().any(|s| !s.is_finite()) {
        return Err(DetectionError::Failed(
            "community strengths are not finite".into(),
        ));
    }
    Ok((community, moved_any))
}

/// Full Louvain: local moving, then aggregation of the found communities
/// into super-nodes, repeated until a level brings no change.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultilevelLouvain;

impl CommunityDetector for MultilevelLouvain {
    fn name(&self) -> &'static str {
        "louvain"
    }

    fn partition(
        &self,
        adj: &WeightedAdjacency,
        options: &MetricsOptions,
    ) -> std::result::Result<Vec<usize>, DetectionError> {
        let mut membership: Vec<usize> = (0..adj.node_count()).collect();
        let mut level = Level::from_adjacency(adj);

        for _ in 0..options.louvain_max_passes.max(1) {
            let (labels, moved) = local_moving(
                &level,
                options.louvain_resolution,
                options.louvain_max_passes,
                options,
            )?;
            let labels = canonical_labels(&labels);
            let k = labels.iter().max().map(|&m| m + 1).unwrap_or(0);
            for m in membership.iter_mut() {
                *m = labels[*m];
            }
            if !moved || k == level.len() {
                break;
            }
            level = level.aggregate(&labels, k);
        }
        Ok(membership)
    }
}

/// Single-level Louvain without aggregation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalMovingLouvain;

impl CommunityDetector for LocalMovingLouvain {
    fn name(&self) -> &'static str {
        "louvain_local"
    }

    fn partition(
        &self,
        adj: &WeightedAdjacency,
        options: &MetricsOptions,
    ) -> std::result::Result<Vec<usize>, DetectionError> {
        let level = Level::from_adjacency(adj);
        let (labels, _) = local_moving(
            &level,
            options.louvain_resolution,
            options.louvain_max_passes,
            options,
        )?;
        Ok(labels)
    }
}

// ============================================================================
// Greedy modularity
// ============================================================================

/// Clauset–Newman–Moore style agglomeration: start from singletons and merge
/// the pair of adjacent communities with the largest modularity gain until no
/// merge helps. Refuses graphs above `greedy_max_nodes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyModularity;

impl CommunityDetector for GreedyModularity {
    fn name(&self) -> &'static str {
        "greedy_modularity"
    }

    fn partition(
        &self,
        adj: &WeightedAdjacency,
        options: &MetricsOptions,
    ) -> std::result::Result<Vec<usize>, DetectionError> {
        let n = adj.node_count();
        if n > options.greedy_max_nodes {
            return Err(DetectionError::TooLarge {
                nodes: n,
                limit: options.greedy_max_nodes,
            });
        }
        let mut labels: Vec<usize> = (0..n).collect();
        let total_weight = adj.total_weight();
        if total_weight == 0.0 {
            return Ok(labels);
        }
        let m2 = 2.0 * total_weight;

        // e[i][j]: fraction of edge ends from community i landing in j
        let mut e: Vec<HashMap<usize, f64>> = adj
            .neighbors
            .iter()
            .map(|nb| {
                let mut row = HashMap::new();
                for &(j, w) in nb {
                    *row.entry(j).or_default() += w / m2;
                }
                row
            })
            .collect();
        let mut a: Vec<f64> = adj.strength.iter().map(|s| s / m2).collect();
        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

        loop {
            if options.is_cancelled() {
                return Err(DetectionError::Cancelled);
            }

            let mut best: Option<(f64, usize, usize)> = None;
            for (i, row) in e.iter().enumerate() {
                for (&j, &eij) in row {
                    if i >= j {
                        continue;
                    }
                    let gain = 2.0 * (eij - a[i] * a[j]);
                    let better = match best {
                        None => true,
                        Some((g, bi, bj)) => gain > g || (gain == g && (i, j) < (bi, bj)),
                    };
                    if better {
                        best = Some((gain, i, j));
                    }
                }
            }

            let (i, j) = match best {
                Some((gain, i, j)) if gain > 0.0 => (i, j),
                _ => break,
            };

            // merge j into i
            let row_j = std::mem::take(&mut e[j]);
            for (k, ejk) in row_j {
                e[k].remove(&j);
                if k == i {
                    continue;
                }
                *e[i].entry(k).or_default() += ejk;
                *e[k].entry(i).or_default() += ejk;
            }
            a[i] += a[j];
            a[j] = 0.0;
            let moved = std::mem::take(&mut members[j]);
            members[i].extend(moved);
        }

        for (c, group) in members.iter().enumerate() {
            for &v in group {
                labels[v] = c;
            }
        }
        Ok(labels)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::models::{CooccurrenceGraph, FieldValueNode};

    fn make_graph(n: usize, edges: &[(usize, usize, u64)]) -> WeightedAdjacency {
        let mut g = CooccurrenceGraph::new();
        for i in 0..n {
            g.add_node(FieldValueNode::new("F", &i.to_string()));
        }
        for &(a, b, w) in edges {
            g.add_cooccurrence(&format!("F::{}", a), &format!("F::{}", b), w);
        }
        WeightedAdjacency::from_graph(&g)
    }

    /// Two `size`-cliques joined by a single bridge edge.
    fn make_two_cliques(size: usize) -> WeightedAdjacency {
        let mut edges = Vec::new();
        for offset in [0, size] {
            for i in 0..size {
                for j in (i + 1)..size {
                    edges.push((offset + i, offset + j, 1));
                }
            }
        }
        edges.push((size - 1, size, 1));
        make_graph(2 * size, &edges)
    }

    fn make_complete(n: usize) -> WeightedAdjacency {
        let mut edges = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                edges.push((i, j, 1));
            }
        }
        make_graph(n, &edges)
    }

    struct Failing;

    impl CommunityDetector for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn partition(
            &self,
            _: &WeightedAdjacency,
            _: &MetricsOptions,
        ) -> std::result::Result<Vec<usize>, DetectionError> {
            Err(DetectionError::Failed("boom".into()))
        }
    }

    struct Panicking;

    impl CommunityDetector for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }
        fn partition(
            &self,
            _: &WeightedAdjacency,
            _: &MetricsOptions,
        ) -> std::result::Result<Vec<usize>, DetectionError> {
            panic!("strategy blew up")
        }
    }

    struct WrongLength;

    impl CommunityDetector for WrongLength {
        fn name(&self) -> &'static str {
            "wrong_length"
        }
        fn partition(
            &self,
            _: &WeightedAdjacency,
            _: &MetricsOptions,
        ) -> std::result::Result<Vec<usize>, DetectionError> {
            Ok(vec![0])
        }
    }

    fn assert_two_cliques(labels: &[i64], size: usize) {
        for i in 1..size {
            assert_eq!(labels[i], labels[0], "first clique split: {:?}", labels);
            assert_eq!(labels[size + i], labels[size], "second clique split: {:?}", labels);
        }
        assert_ne!(labels[0], labels[size]);
    }

    #[test]
    fn test_louvain_two_cliques_detects_2_communities() {
        let adj = make_two_cliques(5);
        let result = detect_communities(&adj, &MetricsOptions::default()).unwrap();
        assert_eq!(result.strategy, "louvain");
        assert_eq!(result.community_count, 2);
        assert_two_cliques(&result.labels, 5);
        // 2 * (10/21 - (21/42)^2)
        let expected = 2.0 * (10.0 / 21.0 - 0.25);
        assert!((result.modularity - expected).abs() < 1e-9);
    }

    #[test]
    fn test_louvain_complete_graph_single_community() {
        let adj = make_complete(5);
        let result = detect_communities(&adj, &MetricsOptions::default()).unwrap();
        assert_eq!(result.community_count, 1);
        assert!(result.labels.iter().all(|&c| c == 0));
        assert!(result.modularity.abs() < 1e-12);
    }

    #[test]
    fn test_disconnected_components_never_share_a_community() {
        let adj = make_graph(5, &[(0, 1, 1), (1, 2, 1), (2, 0, 1), (3, 4, 1)]);
        for detector in default_chain() {
            let labels = detector.partition(&adj, &MetricsOptions::default()).unwrap();
            assert_ne!(labels[0], labels[3], "{} merged components", detector.name());
            assert_eq!(labels[3], labels[4]);
        }
    }

    #[test]
    fn test_no_edges_gives_singletons() {
        let adj = make_graph(3, &[]);
        let result = detect_communities(&adj, &MetricsOptions::default()).unwrap();
        assert_eq!(result.labels, vec![0, 1, 2]);
        assert_eq!(result.community_count, 3);
        assert_eq!(result.modularity, 0.0);
    }

    #[test]
    fn test_empty_graph() {
        let adj = make_graph(0, &[]);
        let result = detect_communities(&adj, &MetricsOptions::default()).unwrap();
        assert!(result.labels.is_empty());
        assert_eq!(result.community_count, 0);
    }

    #[test]
    fn test_local_moving_and_greedy_find_cliques() {
        let adj = make_two_cliques(4);
        let options = MetricsOptions::default();
        for detector in [
            Box::new(LocalMovingLouvain) as Box<dyn CommunityDetector>,
            Box::new(GreedyModularity),
        ] {
            let result = detect_with(&[detector], &adj, &options).unwrap();
            assert_two_cliques(&result.labels, 4);
        }
    }

    #[test]
    fn test_greedy_refuses_large_graphs() {
        let adj = make_complete(4);
        let options = MetricsOptions {
            greedy_max_nodes: 3,
            ..Default::default()
        };
        let err = GreedyModularity.partition(&adj, &options).unwrap_err();
        assert!(matches!(err, DetectionError::TooLarge { nodes: 4, limit: 3 }));
    }

    #[test]
    fn test_chain_falls_back_past_failure_and_panic() {
        let adj = make_two_cliques(4);
        let chain: Vec<Box<dyn CommunityDetector>> = vec![
            Box::new(Failing),
            Box::new(Panicking),
            Box::new(WrongLength),
            Box::new(GreedyModularity),
        ];
        let result = detect_with(&chain, &adj, &MetricsOptions::default()).unwrap();
        assert_eq!(result.strategy, "greedy_modularity");
        assert_eq!(result.community_count, 2);
    }

    #[test]
    fn test_chain_exhausted_leaves_nodes_unassigned() {
        let adj = make_complete(3);
        let chain: Vec<Box<dyn CommunityDetector>> = vec![Box::new(Failing), Box::new(Panicking)];
        let result = detect_with(&chain, &adj, &MetricsOptions::default()).unwrap();
        assert_eq!(result.labels, vec![UNASSIGNED; 3]);
        assert_eq!(result.community_count, 0);
        assert_eq!(result.strategy, UNASSIGNED_STRATEGY);
    }

    #[test]
    fn test_cancellation_stops_the_chain() {
        let adj = make_two_cliques(3);
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let options = MetricsOptions {
            cancel: Some(token),
            ..Default::default()
        };
        assert!(matches!(
            detect_communities(&adj, &options),
            Err(GraphError::Cancelled)
        ));
    }

    #[test]
    fn test_canonical_labels_follow_node_order() {
        assert_eq!(canonical_labels(&[7, 7, 3, 9, 3]), vec![0, 0, 1, 2, 1]);
    }

    #[test]
    fn test_modularity_singletons_negative() {
        let adj = make_complete(4);
        let q = modularity(&adj, &[0, 1, 2, 3]);
        // -4 * (3/12)^2
        assert!((q + 0.25).abs() < 1e-12);
    }
}
