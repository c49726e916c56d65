use std::collections::{BTreeMap, HashMap};

use crate::graph_export::GraphData;

const MAX_SWEEPS: usize = 100;
const MAX_LEVELS: usize = 20;

/// Symmetric weighted adjacency; a self-loop of weight w is stored as 2w so
/// that a node's degree is always the sum of its row.
#[derive(Debug, Clone)]
struct Weighted {
    adj: Vec<BTreeMap<usize, f64>>,
}

impl Weighted {
    fn from_graph(graph: &GraphData) -> Self {
        let mut adj = vec![BTreeMap::new(); graph.len()];
        for &(source, target) in &graph.edges {
            if source == target {
                *adj[source].entry(source).or_insert(0.0) += 2.0;
            } else {
                *adj[source].entry(target).or_insert(0.0) += 1.0;
                *adj[target].entry(source).or_insert(0.0) += 1.0;
            }
        }
        Self { adj }
    }

    fn len(&self) -> usize {
        self.adj.len()
    }

    fn degree(&self, node: usize) -> f64 {
        self.adj[node].values().sum()
    }

    /// Collapse every community into one node.
    fn aggregate(&self, community: &[usize], count: usize) -> Self {
        let mut adj = vec![BTreeMap::new(); count];
        for (node, neighbors) in self.adj.iter().enumerate() {
            for (&neighbor, &weight) in neighbors {
                *adj[community[node]]
                    .entry(community[neighbor])
                    .or_insert(0.0) += weight;
            }
        }
        Self { adj }
    }
}

/// Louvain modularity optimization over an undirected graph.
///
/// Deterministic: nodes are visited in index order and ties go to the
/// current community, then to the lowest community id.
pub struct LouvainDetector {
    graph: GraphData,
}

impl LouvainDetector {
    pub fn new(graph: GraphData) -> Self {
        Self { graph }
    }

    /// Run Louvain community detection
    /// Returns: entity name -> community id (contiguous from 0, in order of first member)
    pub fn detect_communities(&self) -> HashMap<String, usize> {
        let n = self.graph.len();
        if n == 0 {
            return HashMap::new();
        }

        let mut membership: Vec<usize> = (0..n).collect();
        let mut level = Weighted::from_graph(&self.graph);
        let mut levels = 0;

        while levels < MAX_LEVELS {
            levels += 1;
            let (local, moved) = local_moving(&level);
            if !moved {
                break;
            }
            let (local, count) = renumber(&local);
            for m in membership.iter_mut() {
                *m = local[*m];
            }
            if count == level.len() {
                break;
            }
            level = level.aggregate(&local, count);
        }

        let (membership, count) = renumber(&membership);
        tracing::debug!(
            entities = n,
            edges = self.graph.edges.len(),
            communities = count,
            levels,
            "louvain finished"
        );

        self.graph
            .entities
            .iter()
            .cloned()
            .zip(membership)
            .collect()
    }

    /// Newman modularity of an assignment, for diagnostics and tests.
    pub fn modularity(&self, assignment: &HashMap<String, usize>) -> f64 {
        let graph = Weighted::from_graph(&self.graph);
        let two_m: f64 = (0..graph.len()).map(|i| graph.degree(i)).sum();
        if two_m == 0.0 {
            return 0.0;
        }

        let community: Vec<Option<usize>> = self
            .graph
            .entities
            .iter()
            .map(|e| assignment.get(e).copied())
            .collect();

        let mut internal: HashMap<usize, f64> = HashMap::new();
        let mut totals: HashMap<usize, f64> = HashMap::new();
        for (node, neighbors) in graph.adj.iter().enumerate() {
            let Some(c) = community[node] else { continue };
            *totals.entry(c).or_insert(0.0) += graph.degree(node);
            for (&neighbor, &weight) in neighbors {
                if community[neighbor] == Some(c) {
                    *internal.entry(c).or_insert(0.0) += weight;
                }
            }
        }

        totals
            .iter()
            .map(|(c, total)| {
                internal.get(c).copied().unwrap_or(0.0) / two_m - (total / two_m).powi(2)
            })
            .sum()
    }
}

/// One level of greedy moves. Returns the community per node and whether
/// anything moved.
fn local_moving(graph: &Weighted) -> (Vec<usize>, bool) {
    let n = graph.len();
    let degrees: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();
    let two_m: f64 = degrees.iter().sum();
    let mut community: Vec<usize> = (0..n).collect();
    if two_m == 0.0 {
        return (community, false);
    }

    let mut sigma_tot = degrees.clone();
    let mut moved_any = false;

    for _ in 0..MAX_SWEEPS {
        let mut moved = false;

        for node in 0..n {
            let current = community[node];
            let k_i = degrees[node];

            // weight from node to each neighboring community, self-loop excluded
            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for (&neighbor, &weight) in &graph.adj[node] {
                if neighbor != node {
                    *links.entry(community[neighbor]).or_insert(0.0) += weight;
                }
            }

            sigma_tot[current] -= k_i;
            let gain = |c: usize, k_in: f64| k_in - sigma_tot[c] * k_i / two_m;

            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            for (&c, &k_in) in &links {
                let g = gain(c, k_in);
                if g > best_gain + 1e-12 {
                    best = c;
                    best_gain = g;
                }
            }

            sigma_tot[best] += k_i;
            if best != current {
                community[node] = best;
                moved = true;
                moved_any = true;
            }
        }

        if !moved {
            break;
        }
    }

    (community, moved_any)
}

/// Map ids to 0..k in order of first appearance.
fn renumber(ids: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let renumbered = ids
        .iter()
        .map(|id| {
            let next = mapping.len();
            *mapping.entry(*id).or_insert(next)
        })
        .collect();
    (renumbered, mapping.len())
}
