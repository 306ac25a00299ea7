use crate::store::GraphData;
use layergraph_core::NodeId;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Upper bound on DFS expansions per reported cycle before giving up.
const EXPANSIONS_PER_CYCLE: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleResult {
    /// Each cycle starts at its smallest id; cycles are sorted.
    pub cycles: Vec<Vec<NodeId>>,
    pub truncated: bool,
}

/// Projects the graph onto a petgraph `DiGraph` with parallel edges collapsed.
/// Nodes are added in id order so indices are stable across runs.
pub(crate) fn project(graph: &GraphData) -> (DiGraph<&NodeId, ()>, HashMap<&str, NodeIndex>) {
    let mut g = DiGraph::with_capacity(graph.node_count(), graph.edge_count());
    let mut index = HashMap::with_capacity(graph.node_count());
    for node in graph.nodes() {
        index.insert(node.id.as_str(), g.add_node(&node.id));
    }
    for node in graph.nodes() {
        for target in graph.successors(&node.id) {
            if let (Some(&a), Some(&b)) = (index.get(node.id.as_str()), index.get(target.as_str())) {
                g.add_edge(a, b, ());
            }
        }
    }
    (g, index)
}

/// Strongly connected components that contain at least one cycle, each sorted
/// by id, ordered by their smallest member.
pub fn cyclic_components(graph: &GraphData) -> Vec<Vec<&NodeId>> {
    let (g, _) = project(graph);
    let mut components: Vec<Vec<&NodeId>> = tarjan_scc(&g)
        .into_iter()
        .filter(|scc| scc.len() > 1 || g.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut ids: Vec<&NodeId> = scc.into_iter().map(|idx| g[idx]).collect();
            ids.sort();
            ids
        })
        .collect();
    components.sort();
    components
}

struct CycleSearch<'a> {
    graph: &'a GraphData,
    start: &'a NodeId,
    allowed: HashSet<&'a NodeId>,
    path: Vec<&'a NodeId>,
    on_path: HashSet<&'a NodeId>,
    found: Vec<Vec<NodeId>>,
    limit: usize,
    budget: usize,
    exhausted: bool,
}

impl<'a> CycleSearch<'a> {
    fn visit(&mut self, current: &'a NodeId) {
        let graph = self.graph;
        for next in graph.successors(current) {
            if self.exhausted {
                return;
            }
            if self.budget == 0 {
                self.exhausted = true;
                return;
            }
            self.budget -= 1;

            if next == self.start {
                if self.found.len() == self.limit {
                    self.exhausted = true;
                    return;
                }
                self.found.push(self.path.iter().map(|id| (*id).clone()).collect());
                continue;
            }
            if !self.allowed.contains(next) || self.on_path.contains(next) {
                continue;
            }
            self.path.push(next);
            self.on_path.insert(next);
            self.visit(next);
            self.on_path.remove(next);
            self.path.pop();
        }
    }
}

/// Enumerates elementary cycles, at most `max_cycles` of them.
///
/// Components come from Tarjan's algorithm; inside each, cycles are searched
/// from every member in id order, only ever stepping to larger ids, so each
/// cycle is found exactly once and already rotated to its smallest id.
pub fn find_cycles(graph: &GraphData, max_cycles: usize) -> CycleResult {
    let mut result = CycleResult::default();
    let budget = max_cycles.saturating_add(1).saturating_mul(EXPANSIONS_PER_CYCLE);
    let mut remaining_budget = budget;

    'components: for component in cyclic_components(graph) {
        for (position, &start) in component.iter().enumerate() {
            let allowed: HashSet<&NodeId> = component[position..].iter().copied().collect();
            let mut search = CycleSearch {
                graph,
                start,
                allowed,
                path: vec![start],
                on_path: HashSet::from([start]),
                found: Vec::new(),
                limit: max_cycles - result.cycles.len(),
                budget: remaining_budget,
                exhausted: false,
            };
            search.visit(start);
            remaining_budget = search.budget;
            result.cycles.extend(search.found);
            if search.exhausted {
                result.truncated = true;
                break 'components;
            }
        }
    }

    result.cycles.sort();
    result
}
