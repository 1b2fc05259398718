//! GraphAnalytics
//!
//! Every algorithm reads the live `relationships` snapshot fresh via
//! [`crate::storage::Store::all_live_relationships`] and builds a
//! `petgraph::graph::DiGraph` from it per call rather than maintaining a
//! standing graph — the Store, not an in-memory graph, is the source of
//! truth, so we rebuild. `petgraph` supplies the container and `UnionFind`;
//! PageRank, label propagation, Dijkstra-with-path, betweenness, HITS, and
//! bridge discovery are
//! hand-rolled on top.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tokio_util::sync::CancellationToken;

use crate::config::AnalyticsConfig;
use crate::error::{check_cancelled, Result};
use crate::model::{EntityCommunity, EntityRank};
use crate::storage::Store;

/// Label propagation over a weighted adjacency list: each node adopts the
/// label with the highest total incident edge weight among its neighbors,
/// ties broken by lexicographically smallest label. Shared by
/// `analytics::label_propagation_communities` and
/// `inference::clusters::analyze_clusters`.
pub fn label_propagation(
    adjacency: &HashMap<String, Vec<(String, f32)>>,
    max_iterations: usize,
) -> HashMap<String, String> {
    let mut labels: HashMap<String, String> =
        adjacency.keys().map(|id| (id.clone(), id.clone())).collect();

    for _ in 0..max_iterations.max(1) {
        let mut next = labels.clone();
        let mut changed = false;
        for (id, neighbors) in adjacency {
            if neighbors.is_empty() {
                continue;
            }
            let mut weights: HashMap<&str, f32> = HashMap::new();
            for (neighbor_id, weight) in neighbors {
                if let Some(label) = labels.get(neighbor_id) {
                    *weights.entry(label.as_str()).or_insert(0.0) += weight;
                }
            }
            let Some((&winner, _)) =
                weights.iter().max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal).then(b.0.cmp(a.0)))
            else {
                continue;
            };
            if labels.get(id).map(String::as_str) != Some(winner) {
                next.insert(id.clone(), winner.to_string());
                changed = true;
            }
        }
        labels = next;
        if !changed {
            break;
        }
    }
    labels
}

struct BuiltGraph {
    graph: DiGraph<String, f32>,
    index: HashMap<String, NodeIndex>,
}

/// Reconstructs a directed, strength-weighted graph from the live
/// relationship set.
pub struct GraphAnalytics {
    store: Arc<Store>,
    config: AnalyticsConfig,
}

impl GraphAnalytics {
    pub fn new(store: Arc<Store>, config: AnalyticsConfig) -> Self {
        Self { store, config }
    }

    fn build(&self) -> Result<BuiltGraph> {
        let relationships = self.store.all_live_relationships(None)?;
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        let mut node_of = |graph: &mut DiGraph<String, f32>, index: &mut HashMap<String, NodeIndex>, id: &str| -> NodeIndex {
            if let Some(&idx) = index.get(id) {
                idx
            } else {
                let idx = graph.add_node(id.to_string());
                index.insert(id.to_string(), idx);
                idx
            }
        };
        for rel in &relationships {
            let from = node_of(&mut graph, &mut index, &rel.from_id);
            let to = node_of(&mut graph, &mut index, &rel.to_id);
            graph.add_edge(from, to, rel.strength);
        }
        Ok(BuiltGraph { graph, index })
    }

    fn adjacency(graph: &DiGraph<String, f32>, directed: bool) -> HashMap<String, Vec<(String, f32)>> {
        let mut adjacency: HashMap<String, Vec<(String, f32)>> = HashMap::new();
        for node in graph.node_indices() {
            let id = &graph[node];
            let mut neighbors = Vec::new();
            for edge in graph.edges_directed(node, Direction::Outgoing) {
                neighbors.push((graph[edge.target()].clone(), *edge.weight()));
            }
            if !directed {
                for edge in graph.edges_directed(node, Direction::Incoming) {
                    neighbors.push((graph[edge.source()].clone(), *edge.weight()));
                }
            }
            adjacency.insert(id.clone(), neighbors);
        }
        adjacency
    }

    /// Weighted PageRank with `config.pagerank_damping`, persisted to
    /// `entity_rank` wholesale. Returns `[]` on an empty graph. Polls
    /// `cancel` between iterations and before the final persist.
    pub fn pagerank(&self, cancel: &CancellationToken) -> Result<Vec<EntityRank>> {
        check_cancelled(cancel, "pagerank")?;
        let built = self.build()?;
        let n = built.graph.node_count();
        if n == 0 {
            return Ok(vec![]);
        }

        let d = self.config.pagerank_damping;
        let ids: Vec<NodeIndex> = built.graph.node_indices().collect();
        let out_weight: HashMap<NodeIndex, f32> = ids
            .iter()
            .map(|&node| {
                let total: f32 = built
                    .graph
                    .edges_directed(node, Direction::Outgoing)
                    .map(|e| e.weight().max(0.0001))
                    .sum();
                (node, total)
            })
            .collect();

        let mut rank: HashMap<NodeIndex, f64> = ids.iter().map(|&node| (node, 1.0 / ids.len() as f64)).collect();

        for _ in 0..self.config.max_iterations {
            check_cancelled(cancel, "pagerank")?;
            let mut next: HashMap<NodeIndex, f64> = HashMap::new();
            let dangling_mass: f64 = ids
                .iter()
                .filter(|&&node| out_weight[&node] <= 0.0001)
                .map(|node| rank[node])
                .sum();
            let base = (1.0 - d) / n as f64 + d * dangling_mass / n as f64;

            for &node in &ids {
                next.insert(node, base);
            }
            for &node in &ids {
                let node_rank = rank[&node];
                let total_out = out_weight[&node];
                if total_out <= 0.0001 {
                    continue;
                }
                for edge in built.graph.edges_directed(node, Direction::Outgoing) {
                    let share = node_rank * (edge.weight().max(0.0001) as f64 / total_out as f64);
                    *next.entry(edge.target()).or_insert(0.0) += d * share;
                }
            }

            let delta: f64 = ids.iter().map(|n| (next[n] - rank[n]).abs()).sum();
            rank = next;
            if delta < self.config.tolerance {
                break;
            }
        }

        let ranks: Vec<(String, f64)> = ids.iter().map(|&n| (built.graph[n].clone(), rank[&n])).collect();
        check_cancelled(cancel, "pagerank")?;
        self.store.set_entity_ranks(&ranks)?;
        Ok(ranks
            .into_iter()
            .map(|(entity_id, pagerank)| EntityRank { entity_id, pagerank })
            .collect())
    }

    /// Label Propagation communities over the undirected view of the live
    /// graph, persisted to `entity_community`. Polls `cancel` before
    /// building the graph and before the final persist.
    pub fn communities(&self, cancel: &CancellationToken) -> Result<Vec<EntityCommunity>> {
        check_cancelled(cancel, "communities")?;
        let built = self.build()?;
        if built.graph.node_count() == 0 {
            return Ok(vec![]);
        }
        let adjacency = Self::adjacency(&built.graph, false);
        let labels = label_propagation(&adjacency, self.config.max_iterations);
        check_cancelled(cancel, "communities")?;

        let mut label_ids: HashMap<String, i64> = HashMap::new();
        let mut next_id = 0i64;
        let mut out = Vec::with_capacity(labels.len());
        let mut sorted_ids: Vec<&String> = labels.keys().collect();
        sorted_ids.sort();
        for entity_id in sorted_ids {
            let label = &labels[entity_id];
            let community_id = *label_ids.entry(label.clone()).or_insert_with(|| {
                let id = next_id;
                next_id += 1;
                id
            });
            out.push((entity_id.clone(), community_id));
        }
        check_cancelled(cancel, "communities")?;
        self.store.set_entity_communities(&out)?;
        Ok(out
            .into_iter()
            .map(|(entity_id, community_id)| EntityCommunity { entity_id, community_id })
            .collect())
    }

    /// Dijkstra shortest path between two entities over `strength`-weighted
    /// edges (distance `1 - strength`, so a stronger edge is "closer").
    /// Returns `None` if either id is absent from the graph or unreachable.
    pub fn shortest_path(
        &self,
        from_id: &str,
        to_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<(f64, Vec<String>)>> {
        check_cancelled(cancel, "shortest_path")?;
        let built = self.build()?;
        let (Some(&source), Some(&target)) = (built.index.get(from_id), built.index.get(to_id)) else {
            return Ok(None);
        };

        let mut dist: HashMap<NodeIndex, f64> = HashMap::new();
        let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut heap: BinaryHeap<std::cmp::Reverse<(ordered_f64::OrderedF64, NodeIndex)>> = BinaryHeap::new();
        dist.insert(source, 0.0);
        heap.push(std::cmp::Reverse((ordered_f64::OrderedF64(0.0), source)));

        while let Some(std::cmp::Reverse((d, node))) = heap.pop() {
            check_cancelled(cancel, "shortest_path")?;
            if node == target {
                break;
            }
            if d.0 > *dist.get(&node).unwrap_or(&f64::INFINITY) {
                continue;
            }
            for edge in built.graph.edges_directed(node, Direction::Outgoing) {
                let cost = 1.0 - (*edge.weight() as f64).clamp(0.0, 1.0) + 0.0001;
                let next_dist = d.0 + cost;
                let entry = dist.entry(edge.target()).or_insert(f64::INFINITY);
                if next_dist < *entry {
                    *entry = next_dist;
                    prev.insert(edge.target(), node);
                    heap.push(std::cmp::Reverse((ordered_f64::OrderedF64(next_dist), edge.target())));
                }
            }
        }

        let Some(&total) = dist.get(&target) else { return Ok(None) };
        if total.is_infinite() {
            return Ok(None);
        }

        let mut path = vec![target];
        let mut current = target;
        while current != source {
            let Some(&p) = prev.get(&current) else { return Ok(None) };
            path.push(p);
            current = p;
        }
        path.reverse();
        Ok(Some((total, path.into_iter().map(|n| built.graph[n].clone()).collect())))
    }

    /// Unweighted Brandes betweenness centrality (every live edge counts as
    /// one hop for shortest-path counting). Polls `cancel` once per source
    /// node, the outer loop of the algorithm.
    pub fn betweenness_centrality(&self, cancel: &CancellationToken) -> Result<Vec<(String, f64)>> {
        check_cancelled(cancel, "betweenness_centrality")?;
        let built = self.build()?;
        let n = built.graph.node_count();
        if n == 0 {
            return Ok(vec![]);
        }
        let mut centrality: HashMap<NodeIndex, f64> = built.graph.node_indices().map(|i| (i, 0.0)).collect();

        for source in built.graph.node_indices() {
            check_cancelled(cancel, "betweenness_centrality")?;
            let mut stack = Vec::new();
            let mut predecessors: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
            let mut sigma: HashMap<NodeIndex, f64> = built.graph.node_indices().map(|i| (i, 0.0)).collect();
            let mut distance: HashMap<NodeIndex, i64> = HashMap::new();
            sigma.insert(source, 1.0);
            distance.insert(source, 0);

            // A plain queue, not `petgraph::visit::Bfs`, since sigma/predecessor
            // bookkeeping needs the BFS frontier structure exposed directly.
            let mut queue = std::collections::VecDeque::new();
            queue.push_back(source);
            let mut visited: std::collections::HashSet<NodeIndex> = [source].into_iter().collect();
            while let Some(v) = queue.pop_front() {
                stack.push(v);
                for edge in built.graph.edges_directed(v, Direction::Outgoing) {
                    let w = edge.target();
                    if !visited.contains(&w) {
                        visited.insert(w);
                        distance.insert(w, distance[&v] + 1);
                        queue.push_back(w);
                    }
                    if distance.get(&w) == Some(&(distance[&v] + 1)) {
                        *sigma.entry(w).or_insert(0.0) += sigma[&v];
                        predecessors.entry(w).or_default().push(v);
                    }
                }
            }

            let mut delta: HashMap<NodeIndex, f64> = built.graph.node_indices().map(|i| (i, 0.0)).collect();
            while let Some(w) = stack.pop() {
                if let Some(preds) = predecessors.get(&w) {
                    for &v in preds {
                        let contribution = (sigma[&v] / sigma[&w]) * (1.0 + delta[&w]);
                        *delta.entry(v).or_insert(0.0) += contribution;
                    }
                }
                if w != source {
                    *centrality.entry(w).or_insert(0.0) += delta[&w];
                }
            }
        }

        let mut out: Vec<(String, f64)> = centrality
            .into_iter()
            .map(|(n, c)| (built.graph[n].clone(), c / 2.0))
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    /// HITS hub/authority scores via mutual-recurrence fixed point,
    /// L2-normalized each iteration.
    pub fn hits(&self, cancel: &CancellationToken) -> Result<Vec<(String, f64, f64)>> {
        check_cancelled(cancel, "hits")?;
        let built = self.build()?;
        if built.graph.node_count() == 0 {
            return Ok(vec![]);
        }
        let ids: Vec<NodeIndex> = built.graph.node_indices().collect();
        let mut hub: HashMap<NodeIndex, f64> = ids.iter().map(|&n| (n, 1.0)).collect();
        let mut auth: HashMap<NodeIndex, f64> = ids.iter().map(|&n| (n, 1.0)).collect();

        for _ in 0..self.config.max_iterations {
            check_cancelled(cancel, "hits")?;
            let mut next_auth: HashMap<NodeIndex, f64> = HashMap::new();
            for &node in &ids {
                let sum: f64 = built
                    .graph
                    .edges_directed(node, Direction::Incoming)
                    .map(|e| hub[&e.source()])
                    .sum();
                next_auth.insert(node, sum);
            }
            let mut next_hub: HashMap<NodeIndex, f64> = HashMap::new();
            for &node in &ids {
                let sum: f64 = built
                    .graph
                    .edges_directed(node, Direction::Outgoing)
                    .map(|e| next_auth[&e.target()])
                    .sum();
                next_hub.insert(node, sum);
            }
            normalize(&mut next_auth);
            normalize(&mut next_hub);

            let delta: f64 = ids.iter().map(|n| (next_hub[n] - hub[n]).abs() + (next_auth[n] - auth[n]).abs()).sum();
            hub = next_hub;
            auth = next_auth;
            if delta < self.config.tolerance {
                break;
            }
        }

        Ok(ids
            .into_iter()
            .map(|n| (built.graph[n].clone(), hub[&n], auth[&n]))
            .collect())
    }

    /// Connected components over the undirected view of the live graph, via
    /// `petgraph::unionfind::UnionFind`.
    pub fn connected_components(&self, cancel: &CancellationToken) -> Result<Vec<Vec<String>>> {
        check_cancelled(cancel, "connected_components")?;
        let built = self.build()?;
        if built.graph.node_count() == 0 {
            return Ok(vec![]);
        }
        let mut uf = UnionFind::new(built.graph.node_count());
        for edge in built.graph.edge_indices() {
            let (a, b) = built.graph.edge_endpoints(edge).expect("edge index from this graph");
            uf.union(a.index(), b.index());
        }
        let mut groups: HashMap<usize, Vec<String>> = HashMap::new();
        for node in built.graph.node_indices() {
            groups.entry(uf.find(node.index())).or_default().push(built.graph[node].clone());
        }
        let mut components: Vec<Vec<String>> = groups.into_values().collect();
        components.sort_by(|a, b| b.len().cmp(&a.len()));
        Ok(components)
    }

    /// An entity is a bridge if its incident live edges touch entities in
    /// `>= 2` distinct persisted communities. Sorted by community count
    /// descending.
    pub fn bridges(&self, cancel: &CancellationToken) -> Result<Vec<(String, usize)>> {
        check_cancelled(cancel, "bridges")?;
        let communities: HashMap<String, i64> = self.store.all_communities()?.into_iter().collect();
        if communities.is_empty() {
            return Ok(vec![]);
        }
        let built = self.build()?;
        let mut out = Vec::new();
        for node in built.graph.node_indices() {
            check_cancelled(cancel, "bridges")?;
            let id = &built.graph[node];
            let mut touched: std::collections::HashSet<i64> = std::collections::HashSet::new();
            for edge in built.graph.edges_directed(node, Direction::Outgoing) {
                if let Some(c) = communities.get(&built.graph[edge.target()]) {
                    touched.insert(*c);
                }
            }
            for edge in built.graph.edges_directed(node, Direction::Incoming) {
                if let Some(c) = communities.get(&built.graph[edge.source()]) {
                    touched.insert(*c);
                }
            }
            if touched.len() >= 2 {
                out.push((id.clone(), touched.len()));
            }
        }
        out.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(out)
    }
}

fn normalize(values: &mut HashMap<NodeIndex, f64>) {
    let norm = values.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in values.values_mut() {
            *v /= norm;
        }
    }
}

/// A minimal total-ordering wrapper for `f64` so it can sit inside a
/// `BinaryHeap` (Dijkstra's priority queue); `f64` only implements
/// `PartialOrd`, and costs here are never `NaN`.
mod ordered_f64 {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct OrderedF64(pub f64);

    impl Eq for OrderedF64 {}

    impl PartialOrd for OrderedF64 {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for OrderedF64 {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Entity, Relationship};

    fn analytics() -> (GraphAnalytics, Arc<Store>) {
        let config = Config::with_dimensions(8);
        let store = Arc::new(Store::open(None, config.clone()).unwrap());
        (GraphAnalytics::new(Arc::clone(&store), config.analytics), store)
    }

    #[test]
    fn empty_graph_yields_empty_results() {
        let (a, _store) = analytics();
        let token = CancellationToken::new();
        assert!(a.pagerank(&token).unwrap().is_empty());
        assert!(a.communities(&token).unwrap().is_empty());
        assert!(a.betweenness_centrality(&token).unwrap().is_empty());
        assert!(a.connected_components(&token).unwrap().is_empty());
    }

    #[test]
    fn cancelled_token_stops_pagerank_before_it_runs() {
        let (a, store) = analytics();
        let x = Entity::new("X", "Project");
        let y = Entity::new("Y", "Project");
        store.insert_entity(&x).unwrap();
        store.insert_entity(&y).unwrap();
        store.insert_relationship(&Relationship::new(&x.id, &y.id, "knows")).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(a.pagerank(&token).unwrap_err(), crate::error::CoreError::Cancelled(_)));
    }

    #[test]
    fn pagerank_favors_the_more_referenced_node() {
        let (a, store) = analytics();
        let hub = Entity::new("Hub", "Project");
        let leaf_a = Entity::new("LeafA", "Project");
        let leaf_b = Entity::new("LeafB", "Project");
        store.insert_entity(&hub).unwrap();
        store.insert_entity(&leaf_a).unwrap();
        store.insert_entity(&leaf_b).unwrap();
        store.insert_relationship(&Relationship::new(&leaf_a.id, &hub.id, "refs")).unwrap();
        store.insert_relationship(&Relationship::new(&leaf_b.id, &hub.id, "refs")).unwrap();

        let ranks = a.pagerank(&CancellationToken::new()).unwrap();
        let hub_rank = ranks.iter().find(|r| r.entity_id == hub.id).unwrap().pagerank;
        let leaf_rank = ranks.iter().find(|r| r.entity_id == leaf_a.id).unwrap().pagerank;
        assert!(hub_rank > leaf_rank);
    }

    #[test]
    fn shortest_path_finds_direct_edge() {
        let (a, store) = analytics();
        let x = Entity::new("X", "Project");
        let y = Entity::new("Y", "Project");
        store.insert_entity(&x).unwrap();
        store.insert_entity(&y).unwrap();
        store.insert_relationship(&Relationship::new(&x.id, &y.id, "depends_on")).unwrap();

        let (_, path) = a.shortest_path(&x.id, &y.id, &CancellationToken::new()).unwrap().unwrap();
        assert_eq!(path, vec![x.id.clone(), y.id.clone()]);
    }

    #[test]
    fn shortest_path_is_none_for_unreachable_pair() {
        let (a, store) = analytics();
        let x = Entity::new("X", "Project");
        let y = Entity::new("Y", "Project");
        store.insert_entity(&x).unwrap();
        store.insert_entity(&y).unwrap();
        assert!(a.shortest_path(&x.id, &y.id, &CancellationToken::new()).unwrap().is_none());
    }

    #[test]
    fn connected_components_separates_disjoint_subgraphs() {
        let (a, store) = analytics();
        let x = Entity::new("X", "Project");
        let y = Entity::new("Y", "Project");
        let z = Entity::new("Z", "Project");
        store.insert_entity(&x).unwrap();
        store.insert_entity(&y).unwrap();
        store.insert_entity(&z).unwrap();
        store.insert_relationship(&Relationship::new(&x.id, &y.id, "knows")).unwrap();

        let components = a.connected_components(&CancellationToken::new()).unwrap();
        assert_eq!(components.len(), 2);
    }

    #[test]
    fn bridge_requires_two_distinct_communities() {
        let (a, store) = analytics();
        let x = Entity::new("X", "Project");
        let y = Entity::new("Y", "Project");
        let z = Entity::new("Z", "Project");
        store.insert_entity(&x).unwrap();
        store.insert_entity(&y).unwrap();
        store.insert_entity(&z).unwrap();
        store.insert_relationship(&Relationship::new(&x.id, &y.id, "knows")).unwrap();
        store.insert_relationship(&Relationship::new(&x.id, &z.id, "knows")).unwrap();
        store
            .set_entity_communities(&[(x.id.clone(), 0), (y.id.clone(), 1), (z.id.clone(), 2)])
            .unwrap();

        let bridges = a.bridges(&CancellationToken::new()).unwrap();
        assert!(bridges.iter().any(|(id, count)| id == &x.id && *count == 2));
    }
}
