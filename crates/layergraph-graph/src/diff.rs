use crate::snapshot::GraphSnapshot;
use layergraph_core::{Edge, EdgeKey, Node, NodeId, Relation};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeChange {
    pub id: NodeId,
    /// Property keys whose value differs, with `[before, after]`.
    pub properties: BTreeMap<String, (Option<JsonValue>, Option<JsonValue>)>,
    pub name_changed: bool,
    pub source_path_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRef {
    pub source: NodeId,
    pub target: NodeId,
    pub relation: Relation,
}

impl From<&Edge> for EdgeRef {
    fn from(edge: &Edge) -> Self {
        Self {
            source: edge.source.clone(),
            target: edge.target.clone(),
            relation: edge.relation,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub nodes_added: usize,
    pub nodes_removed: usize,
    pub nodes_modified: usize,
    pub edges_added: usize,
    pub edges_removed: usize,
    pub edges_reweighted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDiff {
    pub nodes_added: Vec<NodeId>,
    pub nodes_removed: Vec<NodeId>,
    pub nodes_modified: Vec<NodeChange>,
    pub edges_added: Vec<EdgeRef>,
    pub edges_removed: Vec<EdgeRef>,
    /// Edges present on both sides whose confidence changed.
    pub edges_reweighted: Vec<EdgeRef>,
    pub summary: DiffSummary,
}

impl GraphDiff {
    pub fn between(before: &GraphSnapshot, after: &GraphSnapshot) -> Self {
        let old_nodes: BTreeMap<&str, &Node> =
            before.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let new_nodes: BTreeMap<&str, &Node> =
            after.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut diff = GraphDiff::default();
        for (id, node) in &new_nodes {
            match old_nodes.get(id) {
                None => diff.nodes_added.push(id.to_string()),
                Some(old) => {
                    if let Some(change) = node_change(old, node) {
                        diff.nodes_modified.push(change);
                    }
                }
            }
        }
        diff.nodes_removed = old_nodes
            .keys()
            .filter(|id| !new_nodes.contains_key(*id))
            .map(|id| id.to_string())
            .collect();

        let old_edges: BTreeMap<EdgeKey, &Edge> = before.edges.iter().map(|e| (e.key(), e)).collect();
        let new_edges: BTreeMap<EdgeKey, &Edge> = after.edges.iter().map(|e| (e.key(), e)).collect();
        for (key, edge) in &new_edges {
            match old_edges.get(key) {
                None => diff.edges_added.push(EdgeRef::from(*edge)),
                Some(old) if (old.confidence - edge.confidence).abs() > f64::EPSILON => {
                    diff.edges_reweighted.push(EdgeRef::from(*edge))
                }
                Some(_) => {}
            }
        }
        diff.edges_removed = old_edges
            .iter()
            .filter(|(key, _)| !new_edges.contains_key(*key))
            .map(|(_, edge)| EdgeRef::from(*edge))
            .collect();

        diff.summary = DiffSummary {
            nodes_added: diff.nodes_added.len(),
            nodes_removed: diff.nodes_removed.len(),
            nodes_modified: diff.nodes_modified.len(),
            edges_added: diff.edges_added.len(),
            edges_removed: diff.edges_removed.len(),
            edges_reweighted: diff.edges_reweighted.len(),
        };
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.summary == DiffSummary::default()
    }
}

fn node_change(before: &Node, after: &Node) -> Option<NodeChange> {
    let keys: BTreeSet<&String> = before
        .properties
        .keys()
        .chain(after.properties.keys())
        .collect();
    let properties: BTreeMap<_, _> = keys
        .into_iter()
        .filter_map(|key| {
            let old = before.properties.get(key);
            let new = after.properties.get(key);
            (old != new).then(|| (key.clone(), (old.cloned(), new.cloned())))
        })
        .collect();

    let name_changed = before.name != after.name;
    let source_path_changed = before.source_path != after.source_path;
    if properties.is_empty() && !name_changed && !source_path_changed {
        return None;
    }
    Some(NodeChange {
        id: after.id.clone(),
        properties,
        name_changed,
        source_path_changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GraphData;
    use layergraph_core::NodeKind;
    use serde_json::json;

    #[test]
    fn identical_snapshots_have_empty_diff() {
        let mut data = GraphData::new();
        data.upsert_node(Node::new(NodeKind::Table, "users"));
        let snapshot = data.snapshot();
        assert!(GraphDiff::between(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn diff_reports_node_and_edge_changes() {
        let mut before = GraphData::new();
        before.upsert_node(Node::new(NodeKind::DataMapper, "m.A"));
        before.upsert_node(Node::new(NodeKind::Table, "users").with_property("placeholder", json!(true)));
        before.upsert_node(Node::new(NodeKind::Table, "legacy"));
        before
            .upsert_edge(Edge::new("mapper:m.A", "table:legacy", Relation::Queries))
            .unwrap();

        let mut after = GraphData::new();
        after.upsert_node(Node::new(NodeKind::DataMapper, "m.A"));
        after.upsert_node(Node::new(NodeKind::Table, "users").with_property("placeholder", json!(false)));
        after.upsert_node(Node::new(NodeKind::Table, "orders"));
        after
            .upsert_edge(Edge::new("mapper:m.A", "table:users", Relation::Queries))
            .unwrap();

        let diff = GraphDiff::between(&before.snapshot(), &after.snapshot());
        assert_eq!(diff.nodes_added, vec!["table:orders"]);
        assert_eq!(diff.nodes_removed, vec!["table:legacy"]);
        assert_eq!(diff.nodes_modified.len(), 1);
        assert_eq!(diff.nodes_modified[0].id, "table:users");
        assert_eq!(diff.summary.edges_added, 1);
        assert_eq!(diff.summary.edges_removed, 1);
    }
}
