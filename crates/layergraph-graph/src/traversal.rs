//! Read-only traversals over a [`GraphData`] borrow.
//!
//! Every traversal visits neighbors in ascending id order (then relation), so
//! results are a pure function of graph content.

use crate::store::GraphData;
use layergraph_core::{Edge, Node, NodeId, NodeKind, Relation};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub relation: Relation,
    pub confidence: f64,
}

impl From<&Edge> for PathEdge {
    fn from(edge: &Edge) -> Self {
        Self {
            source: edge.source.clone(),
            target: edge.target.clone(),
            relation: edge.relation,
            confidence: edge.confidence,
        }
    }
}

/// A simple directed path. Parallel edges between two nodes are collapsed to
/// the strongest one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainPath {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<PathEdge>,
    /// Product of the edge confidences along the path.
    pub confidence: f64,
}

impl ChainPath {
    fn new(nodes: Vec<NodeId>, edges: Vec<PathEdge>) -> Self {
        let confidence = edges.iter().map(|e| e.confidence).product();
        Self {
            nodes,
            edges,
            confidence,
        }
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainResult {
    pub paths: Vec<ChainPath>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReachedNode {
    pub node: Node,
    pub hops: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImpactResult {
    pub direct: Vec<ReachedNode>,
    pub indirect: Vec<ReachedNode>,
    /// Every reached View, whatever its hop distance.
    pub ui: Vec<ReachedNode>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DependencyResult {
    pub nodes: Vec<ReachedNode>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "outgoing" | "out" => Ok(Direction::Outgoing),
            "incoming" | "in" => Ok(Direction::Incoming),
            "both" | "all" => Ok(Direction::Both),
            _ => Err(format!("unknown direction: {}", s)),
        }
    }
}

/// Induced subgraph over a set of nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Requested ids that are not in the graph.
    pub missing: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub node: Node,
    pub relation: Relation,
    pub direction: Direction,
    pub confidence: f64,
}

/// Strongest edge from `source` to `target`; ties go to the smallest relation.
fn strongest_edge<'a>(graph: &'a GraphData, source: &str, target: &str) -> Option<&'a Edge> {
    graph
        .outgoing(source)
        .filter(|e| e.target == target)
        .fold(None, |best: Option<&Edge>, edge| match best {
            Some(b) if b.confidence >= edge.confidence => Some(b),
            _ => Some(edge),
        })
}

struct ChainSearch<'a> {
    graph: &'a GraphData,
    end: &'a str,
    max_depth: usize,
    max_paths: usize,
    nodes: Vec<&'a NodeId>,
    edges: Vec<PathEdge>,
    on_path: HashSet<&'a str>,
    result: ChainResult,
    stopped: bool,
}

impl<'a> ChainSearch<'a> {
    fn visit(&mut self, current: &'a str) {
        if self.edges.len() >= self.max_depth {
            return;
        }
        let graph = self.graph;
        for next in graph.successors(current) {
            if self.stopped {
                return;
            }
            if self.on_path.contains(next.as_str()) {
                continue;
            }
            let Some(edge) = strongest_edge(graph, current, next) else {
                continue;
            };

            if next == self.end {
                if self.result.paths.len() == self.max_paths {
                    self.result.truncated = true;
                    self.stopped = true;
                    return;
                }
                let mut nodes: Vec<NodeId> = self.nodes.iter().map(|n| (*n).clone()).collect();
                nodes.push(next.clone());
                let mut edges = self.edges.clone();
                edges.push(edge.into());
                self.result.paths.push(ChainPath::new(nodes, edges));
                continue;
            }

            self.nodes.push(next);
            self.edges.push(edge.into());
            self.on_path.insert(next.as_str());
            self.visit(next);
            self.on_path.remove(next.as_str());
            self.edges.pop();
            self.nodes.pop();
        }
    }
}

/// Enumerates simple directed paths from `start` to `end` with at most
/// `max_depth` edges, depth first. Stops after `max_paths` paths and flags
/// `truncated` if a further path exists.
pub fn find_chains(
    graph: &GraphData,
    start: &str,
    end: &str,
    max_depth: usize,
    max_paths: usize,
) -> ChainResult {
    let (Some(start_node), Some(end_node)) = (graph.node(start), graph.node(end)) else {
        return ChainResult::default();
    };
    if start == end || max_depth == 0 {
        return ChainResult::default();
    }

    let mut search = ChainSearch {
        graph,
        end: &end_node.id,
        max_depth,
        max_paths,
        nodes: vec![&start_node.id],
        edges: Vec::new(),
        on_path: HashSet::from([start_node.id.as_str()]),
        result: ChainResult::default(),
        stopped: false,
    };
    search.visit(&start_node.id);
    search.result
}

/// Breadth-first closure from `start`, one layer per hop. Returns reached ids
/// with their hop distance, and whether unvisited nodes lie past `max_depth`.
fn layered_closure<'a>(
    graph: &'a GraphData,
    start: &'a str,
    max_depth: usize,
    reverse: bool,
) -> (Vec<(&'a NodeId, usize)>, bool) {
    let step = |id: &str| -> Vec<&'a NodeId> {
        if reverse {
            graph.predecessors(id)
        } else {
            graph.successors(id)
        }
    };

    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut frontier: Vec<&str> = vec![start];
    let mut reached = Vec::new();

    for hop in 1..=max_depth {
        let mut layer: BTreeSet<&'a NodeId> = BTreeSet::new();
        for &id in &frontier {
            for next in step(id) {
                if visited.insert(next.as_str()) {
                    layer.insert(next);
                }
            }
        }
        if layer.is_empty() {
            return (reached, false);
        }
        frontier = layer.iter().map(|id| id.as_str()).collect();
        reached.extend(layer.into_iter().map(|id| (id, hop)));
    }

    let truncated = frontier
        .iter()
        .any(|&id| step(id).iter().any(|next| !visited.contains(next.as_str())));
    (reached, truncated)
}

fn reached_nodes(graph: &GraphData, reached: Vec<(&NodeId, usize)>) -> Vec<ReachedNode> {
    reached
        .into_iter()
        .filter_map(|(id, hops)| {
            graph.node(id).map(|node| ReachedNode {
                node: node.clone(),
                hops,
            })
        })
        .collect()
}

/// Everything that transitively depends on `node`, split by hop distance.
pub fn find_impact(graph: &GraphData, node: &str, max_depth: usize) -> ImpactResult {
    let Some(start) = graph.node(node) else {
        return ImpactResult::default();
    };
    let (reached, truncated) = layered_closure(graph, &start.id, max_depth, true);
    let reached = reached_nodes(graph, reached);

    let mut ui: Vec<ReachedNode> = reached
        .iter()
        .filter(|r| r.node.kind == NodeKind::View)
        .cloned()
        .collect();
    ui.sort_by(|a, b| a.node.id.cmp(&b.node.id));

    let (direct, indirect) = reached.into_iter().partition(|r| r.hops == 1);
    ImpactResult {
        direct,
        indirect,
        ui,
        truncated,
    }
}

/// Forward closure of `node`, ordered by hop distance then id.
pub fn find_dependencies(graph: &GraphData, node: &str, max_depth: usize) -> DependencyResult {
    let Some(start) = graph.node(node) else {
        return DependencyResult::default();
    };
    let (reached, truncated) = layered_closure(graph, &start.id, max_depth, false);
    DependencyResult {
        nodes: reached_nodes(graph, reached),
        truncated,
    }
}

/// Nodes of `kind` that nothing points at.
pub fn find_orphans(graph: &GraphData, kind: NodeKind) -> Vec<Node> {
    graph
        .nodes_of_kind(kind)
        .filter(|n| graph.in_degree(&n.id) == 0)
        .cloned()
        .collect()
}

pub fn neighbors(
    graph: &GraphData,
    node: &str,
    direction: Direction,
    relation: Option<Relation>,
) -> Vec<Neighbor> {
    let keep = |edge: &&Edge| relation.map_or(true, |r| edge.relation == r);
    let mut result = Vec::new();

    if matches!(direction, Direction::Outgoing | Direction::Both) {
        for edge in graph.outgoing(node).filter(keep) {
            if let Some(target) = graph.node(&edge.target) {
                result.push(Neighbor {
                    node: target.clone(),
                    relation: edge.relation,
                    direction: Direction::Outgoing,
                    confidence: edge.confidence,
                });
            }
        }
    }
    if matches!(direction, Direction::Incoming | Direction::Both) {
        for edge in graph.incoming(node).filter(keep) {
            if let Some(source) = graph.node(&edge.source) {
                result.push(Neighbor {
                    node: source.clone(),
                    relation: edge.relation,
                    direction: Direction::Incoming,
                    confidence: edge.confidence,
                });
            }
        }
    }
    result
}

/// Fewest-edge path from `start` to `end`, following outgoing edges.
pub fn shortest_path(graph: &GraphData, start: &str, end: &str) -> Option<ChainPath> {
    let start = &graph.node(start)?.id;
    let end = &graph.node(end)?.id;
    if start == end {
        return Some(ChainPath::new(vec![start.clone()], Vec::new()));
    }

    let mut parent: HashMap<&NodeId, &NodeId> = HashMap::new();
    let mut visited: HashSet<&NodeId> = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        for next in graph.successors(current) {
            if !visited.insert(next) {
                continue;
            }
            parent.insert(next, current);
            if next == end {
                let mut nodes = vec![next];
                let mut cursor = next;
                while let Some(&prev) = parent.get(cursor) {
                    nodes.push(prev);
                    cursor = prev;
                }
                nodes.reverse();
                let edges = nodes
                    .windows(2)
                    .filter_map(|pair| strongest_edge(graph, pair[0], pair[1]).map(PathEdge::from))
                    .collect();
                return Some(ChainPath::new(nodes.into_iter().cloned().collect(), edges));
            }
            queue.push_back(next);
        }
    }
    None
}

/// The requested nodes, plus their direct predecessors and successors when
/// `include_neighbors` is set, with every edge running between two of them.
pub fn subgraph(graph: &GraphData, ids: &[String], include_neighbors: bool) -> Subgraph {
    let mut selected: BTreeSet<&NodeId> = BTreeSet::new();
    let mut missing = BTreeSet::new();
    for id in ids {
        match graph.node(id) {
            Some(node) => {
                selected.insert(&node.id);
                if include_neighbors {
                    selected.extend(graph.successors(id));
                    selected.extend(graph.predecessors(id));
                }
            }
            None => {
                missing.insert(id.clone());
            }
        }
    }

    let nodes = selected
        .iter()
        .filter_map(|id| graph.node(id).cloned())
        .collect();
    let edges = selected
        .iter()
        .flat_map(|id| graph.outgoing(id))
        .filter(|edge| selected.contains(&edge.target))
        .cloned()
        .collect();
    Subgraph {
        nodes,
        edges,
        missing: missing.into_iter().collect(),
    }
}

pub fn nodes_by_type(graph: &GraphData, kind: NodeKind, limit: Option<usize>) -> Vec<Node> {
    graph
        .nodes_of_kind(kind)
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

pub fn node_by_source_path(graph: &GraphData, path: &str) -> Vec<Node> {
    graph
        .lookup_source_path(path.trim())
        .iter()
        .filter_map(|id| graph.node(id).cloned())
        .collect()
}

/// Nodes whose property `key` equals `value`, or is an array containing it.
pub fn nodes_by_property(graph: &GraphData, key: &str, value: &JsonValue) -> Vec<Node> {
    graph
        .nodes()
        .filter(|node| match node.properties.get(key) {
            Some(JsonValue::Array(items)) if !value.is_array() => items.contains(value),
            Some(found) => found == value,
            None => false,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain_graph(edges: &[(&str, &str)]) -> GraphData {
        let mut graph = GraphData::new();
        for (a, b) in edges {
            for name in [a, b] {
                graph.upsert_node(Node::new(NodeKind::BusinessService, *name));
            }
        }
        for (a, b) in edges {
            graph
                .upsert_edge(Edge::new(format!("service:{}", a), format!("service:{}", b), Relation::Calls))
                .unwrap();
        }
        graph
    }

    fn ids(reached: &[ReachedNode]) -> Vec<&str> {
        reached.iter().map(|r| r.node.id.as_str()).collect()
    }

    #[test]
    fn chains_enumerate_in_stable_order() {
        let graph = chain_graph(&[("a", "c"), ("a", "b"), ("b", "d"), ("c", "d")]);
        let result = find_chains(&graph, "service:a", "service:d", 5, 10);
        assert!(!result.truncated);
        let paths: Vec<Vec<&str>> = result
            .paths
            .iter()
            .map(|p| p.nodes.iter().map(String::as_str).collect())
            .collect();
        assert_eq!(
            paths,
            vec![
                vec!["service:a", "service:b", "service:d"],
                vec!["service:a", "service:c", "service:d"],
            ]
        );
    }

    #[test]
    fn chains_respect_bounds() {
        let graph = chain_graph(&[("a", "b"), ("b", "c"), ("a", "c")]);
        assert_eq!(find_chains(&graph, "service:a", "service:c", 1, 10).paths.len(), 1);
        let capped = find_chains(&graph, "service:a", "service:c", 5, 1);
        assert_eq!(capped.paths.len(), 1);
        assert!(capped.truncated);
        assert!(find_chains(&graph, "service:a", "service:c", 0, 10).paths.is_empty());
        assert!(find_chains(&graph, "service:a", "service:a", 5, 10).paths.is_empty());
        assert!(find_chains(&graph, "service:a", "service:zzz", 5, 10).paths.is_empty());
    }

    #[test]
    fn chains_terminate_on_cycles() {
        let graph = chain_graph(&[("a", "b"), ("b", "a"), ("b", "c"), ("c", "a")]);
        let result = find_chains(&graph, "service:a", "service:c", 10, 100);
        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0].len(), 2);
    }

    #[test]
    fn impact_partitions_by_hop() {
        let graph = chain_graph(&[("a", "b"), ("b", "c"), ("x", "c")]);
        let impact = find_impact(&graph, "service:c", 5);
        assert_eq!(ids(&impact.direct), vec!["service:b", "service:x"]);
        assert_eq!(ids(&impact.indirect), vec!["service:a"]);
        assert!(!impact.truncated);

        let shallow = find_impact(&graph, "service:c", 1);
        assert!(shallow.indirect.is_empty());
        assert!(shallow.truncated);
    }

    #[test]
    fn dependencies_are_ordered_by_hop_then_id() {
        let graph = chain_graph(&[("a", "c"), ("a", "b"), ("b", "d"), ("c", "d")]);
        let deps = find_dependencies(&graph, "service:a", 5);
        assert_eq!(ids(&deps.nodes), vec!["service:b", "service:c", "service:d"]);
        assert_eq!(deps.nodes[2].hops, 2);
        assert!(find_dependencies(&graph, "service:a", 0).nodes.is_empty());
    }

    #[test]
    fn shortest_path_prefers_fewest_edges() {
        let graph = chain_graph(&[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")]);
        let path = shortest_path(&graph, "service:a", "service:d").unwrap();
        assert_eq!(path.nodes, vec!["service:a", "service:d"]);
        assert!(shortest_path(&graph, "service:d", "service:a").is_none());
    }

    #[test]
    fn neighbors_filter_by_direction_and_relation() {
        let graph = chain_graph(&[("a", "b"), ("c", "a")]);
        let out = neighbors(&graph, "service:a", Direction::Outgoing, None);
        assert_eq!(out.len(), 1);
        let both = neighbors(&graph, "service:a", Direction::Both, None);
        assert_eq!(both.len(), 2);
        assert!(neighbors(&graph, "service:a", Direction::Both, Some(Relation::Queries)).is_empty());
    }

    #[test]
    fn property_lookup_matches_arrays() {
        let mut graph = GraphData::new();
        graph.upsert_node(
            Node::new(NodeKind::Endpoint, "c.Ctl.get").with_property("method", json!(["GET", "HEAD"])),
        );
        assert_eq!(nodes_by_property(&graph, "method", &json!("GET")).len(), 1);
        assert!(nodes_by_property(&graph, "method", &json!("POST")).is_empty());
    }

    #[test]
    fn subgraph_keeps_only_induced_edges() {
        let graph = chain_graph(&[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")]);
        let ids = vec!["service:b".to_string(), "service:d".to_string()];

        let plain = subgraph(&graph, &ids, false);
        let node_ids: Vec<_> = plain.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(node_ids, vec!["service:b", "service:d"]);
        assert!(plain.edges.is_empty());

        let wide = subgraph(&graph, &ids, true);
        let node_ids: Vec<_> = wide.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(node_ids, vec!["service:a", "service:b", "service:c", "service:d"]);
        assert_eq!(wide.edges.len(), 4);
        assert!(wide.missing.is_empty());
    }

    #[test]
    fn subgraph_reports_unknown_ids() {
        let graph = chain_graph(&[("a", "b")]);
        let ids = vec!["service:zzz".to_string(), "service:a".to_string()];
        let result = subgraph(&graph, &ids, true);
        assert_eq!(result.nodes.len(), 2);
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.missing, vec!["service:zzz".to_string()]);
    }
}
