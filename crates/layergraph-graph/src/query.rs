use crate::cycles::{self, CycleResult};
use crate::diff::GraphDiff;
use crate::snapshot::GraphSnapshot;
use crate::stats::{compute_stats, GraphStats};
use crate::store::{GraphStore, UnresolvedReference};
use crate::traversal::{
    self, ChainPath, ChainResult, DependencyResult, Direction, ImpactResult, Neighbor, Subgraph,
};
use layergraph_core::{Node, NodeKind, QueryConfig, Relation};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

/// Read-only queries. Each call holds the store's read lock for its duration,
/// so it observes the graph either before or after any concurrent batch.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<GraphStore>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(store: Arc<GraphStore>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.store.node(id)
    }

    pub fn find_chains(
        &self,
        start: &str,
        end: &str,
        max_depth: usize,
        max_paths: usize,
    ) -> ChainResult {
        let graph = self.store.read();
        let result = traversal::find_chains(&graph, start, end, max_depth, max_paths);
        debug!(start, end, max_depth, max_paths, paths = result.paths.len(), truncated = result.truncated, "find_chains");
        result
    }

    pub fn find_impact(&self, node: &str, max_depth: usize) -> ImpactResult {
        let graph = self.store.read();
        traversal::find_impact(&graph, node, max_depth)
    }

    pub fn find_dependencies(&self, node: &str, max_depth: usize) -> DependencyResult {
        let graph = self.store.read();
        traversal::find_dependencies(&graph, node, max_depth)
    }

    pub fn find_orphans(&self, kind: NodeKind) -> Vec<Node> {
        let graph = self.store.read();
        traversal::find_orphans(&graph, kind)
    }

    /// Cycles, capped at the configured `max_cycles`.
    pub fn find_cycles(&self) -> CycleResult {
        self.find_cycles_capped(self.config.max_cycles)
    }

    pub fn find_cycles_capped(&self, max_cycles: usize) -> CycleResult {
        let graph = self.store.read();
        let result = cycles::find_cycles(&graph, max_cycles);
        debug!(cycles = result.cycles.len(), truncated = result.truncated, "find_cycles");
        result
    }

    pub fn neighbors(
        &self,
        node: &str,
        direction: Direction,
        relation: Option<Relation>,
    ) -> Vec<Neighbor> {
        let graph = self.store.read();
        traversal::neighbors(&graph, node, direction, relation)
    }

    pub fn shortest_path(&self, start: &str, end: &str) -> Option<ChainPath> {
        let graph = self.store.read();
        traversal::shortest_path(&graph, start, end)
    }

    pub fn subgraph(&self, ids: &[String], include_neighbors: bool) -> Subgraph {
        let graph = self.store.read();
        let result = traversal::subgraph(&graph, ids, include_neighbors);
        debug!(
            requested = ids.len(),
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            "subgraph"
        );
        result
    }

    pub fn nodes_by_type(&self, kind: NodeKind, limit: Option<usize>) -> Vec<Node> {
        let graph = self.store.read();
        traversal::nodes_by_type(&graph, kind, limit)
    }

    pub fn node_by_source_path(&self, path: &str) -> Vec<Node> {
        let graph = self.store.read();
        traversal::node_by_source_path(&graph, path)
    }

    pub fn nodes_by_property(&self, key: &str, value: &JsonValue) -> Vec<Node> {
        let graph = self.store.read();
        traversal::nodes_by_property(&graph, key, value)
    }

    /// Unresolved references, optionally only those of one node.
    pub fn unresolved_references(&self, node: Option<&str>) -> Vec<UnresolvedReference> {
        let graph = self.store.read();
        match node {
            Some(id) => graph.unresolved_for(id).to_vec(),
            None => graph.unresolved().cloned().collect(),
        }
    }

    pub fn stats(&self) -> GraphStats {
        let graph = self.store.read();
        compute_stats(&graph)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.store.snapshot()
    }

    /// Changes needed to go from `other` to the current graph.
    pub fn diff(&self, other: &GraphSnapshot) -> GraphDiff {
        GraphDiff::between(other, &self.snapshot())
    }
}
