use crate::cycles::{cyclic_components, project};
use crate::store::GraphData;
use layergraph_core::{NodeKind, Relation};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_type: BTreeMap<NodeKind, usize>,
    pub edges_by_relation: BTreeMap<Relation, usize>,
    /// Nodes with no edges at all.
    pub isolated_nodes: usize,
    pub average_degree: f64,
    pub density: f64,
    pub weakly_connected_components: usize,
    pub largest_component_size: usize,
    pub cyclic_components: usize,
    pub unresolved_references: usize,
    /// Edges with confidence below 1.0.
    pub low_confidence_edges: usize,
    pub placeholder_tables: usize,
    pub generation: u64,
}

pub fn compute_stats(graph: &GraphData) -> GraphStats {
    let node_count = graph.node_count();
    let edge_count = graph.edge_count();

    let mut nodes_by_type = BTreeMap::new();
    let mut isolated_nodes = 0;
    let mut placeholder_tables = 0;
    for node in graph.nodes() {
        *nodes_by_type.entry(node.kind).or_insert(0) += 1;
        if graph.in_degree(&node.id) == 0 && graph.out_degree(&node.id) == 0 {
            isolated_nodes += 1;
        }
        if node.kind == NodeKind::Table && node.is_placeholder() {
            placeholder_tables += 1;
        }
    }

    let mut edges_by_relation = BTreeMap::new();
    let mut low_confidence_edges = 0;
    for edge in graph.edges() {
        *edges_by_relation.entry(edge.relation).or_insert(0) += 1;
        if edge.confidence < 1.0 {
            low_confidence_edges += 1;
        }
    }

    let (average_degree, density) = if node_count == 0 {
        (0.0, 0.0)
    } else {
        let n = node_count as f64;
        let density = if node_count > 1 {
            edge_count as f64 / (n * (n - 1.0))
        } else {
            0.0
        };
        (2.0 * edge_count as f64 / n, density)
    };

    let (g, _) = project(graph);
    let mut components = UnionFind::<usize>::new(g.node_count());
    for edge in g.edge_references() {
        components.union(edge.source().index(), edge.target().index());
    }
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for idx in 0..g.node_count() {
        *sizes.entry(components.find(idx)).or_insert(0) += 1;
    }

    GraphStats {
        node_count,
        edge_count,
        nodes_by_type,
        edges_by_relation,
        isolated_nodes,
        average_degree,
        density,
        weakly_connected_components: sizes.len(),
        largest_component_size: sizes.values().copied().max().unwrap_or(0),
        cyclic_components: cyclic_components(graph).len(),
        unresolved_references: graph.unresolved_count(),
        low_confidence_edges,
        placeholder_tables,
        generation: graph.generation(),
    }
}
