use crate::merge::{merge_edge, merge_node};
use crate::url_pattern::EndpointRoute;
use layergraph_core::{
    Edge, EdgeKey, LayerGraphError, Node, NodeId, NodeKind, ReferenceHint, Relation, Result,
    PLACEHOLDER_PROPERTY,
};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, error};

/// Outcome of inserting a node or an edge into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Merged,
    Unchanged,
}

/// A reference hint that could not be resolved to any node yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedReference {
    pub source: NodeId,
    pub hint: ReferenceHint,
    pub source_path: String,
    pub reason: String,
}

/// A table reference currently bound to a placeholder table. It is re-resolved
/// whenever later batches add or change nodes, so a declared table that matches
/// takes the edge over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderReference {
    pub source: NodeId,
    pub placeholder: NodeId,
    pub relation: Relation,
    pub hint: ReferenceHint,
    pub source_path: String,
}

/// In-memory graph: nodes, edges and the lookup indexes resolution needs.
///
/// All maps are ordered so that iteration, and everything derived from it, is
/// deterministic.
#[derive(Debug, Default)]
pub struct GraphData {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeKey, Edge>,
    outgoing: HashMap<NodeId, BTreeSet<(NodeId, Relation)>>,
    incoming: HashMap<NodeId, BTreeSet<(NodeId, Relation)>>,
    by_kind: BTreeMap<NodeKind, BTreeSet<NodeId>>,
    primary_index: HashMap<String, BTreeSet<NodeId>>,
    alternate_index: HashMap<String, BTreeSet<NodeId>>,
    file_index: HashMap<String, BTreeSet<NodeId>>,
    endpoint_routes: BTreeMap<NodeId, EndpointRoute>,
    unresolved: BTreeMap<NodeId, Vec<UnresolvedReference>>,
    placeholder_refs: BTreeMap<(NodeId, NodeId), Vec<PlaceholderReference>>,
    generation: u64,
}

impl GraphData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edge(&self, source: &str, target: &str, relation: Relation) -> Option<&Edge> {
        self.edges
            .get(&(source.to_string(), target.to_string(), relation))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Incremented once per committed batch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Outgoing edges of `id`, ordered by `(target id, relation)`.
    pub fn outgoing<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        let owned = id.to_string();
        self.outgoing
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(move |(target, relation)| {
                self.edges.get(&(owned.clone(), target.clone(), *relation))
            })
    }

    /// Incoming edges of `id`, ordered by `(source id, relation)`.
    pub fn incoming<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        let owned = id.to_string();
        self.incoming
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(move |(source, relation)| {
                self.edges.get(&(source.clone(), owned.clone(), *relation))
            })
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.incoming.get(id).map_or(0, |set| set.len())
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.outgoing.get(id).map_or(0, |set| set.len())
    }

    /// Distinct successor ids of `id`, in ascending order.
    pub fn successors(&self, id: &str) -> Vec<&NodeId> {
        let mut ids: Vec<&NodeId> = self
            .outgoing
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(|(target, _)| target))
            .collect();
        ids.dedup();
        ids
    }

    /// Distinct predecessor ids of `id`, in ascending order.
    pub fn predecessors(&self, id: &str) -> Vec<&NodeId> {
        let mut ids: Vec<&NodeId> = self
            .incoming
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(|(source, _)| source))
            .collect();
        ids.dedup();
        ids
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(move |id| self.nodes.get(id))
    }

    /// Nodes whose id or qualified name equals `key`.
    pub fn lookup_primary(&self, key: &str) -> BTreeSet<NodeId> {
        self.primary_index.get(key).cloned().unwrap_or_default()
    }

    /// Nodes indexed under `key` as a short name, alias or view stem.
    pub fn lookup_alternate(&self, key: &str) -> BTreeSet<NodeId> {
        self.alternate_index.get(key).cloned().unwrap_or_default()
    }

    /// Nodes whose source path equals `path`.
    pub fn lookup_source_path(&self, path: &str) -> BTreeSet<NodeId> {
        self.file_index.get(path).cloned().unwrap_or_default()
    }

    /// Parsed routes of every Endpoint node, ordered by id.
    pub fn endpoint_routes(&self) -> impl Iterator<Item = (&NodeId, &EndpointRoute)> {
        self.endpoint_routes.iter()
    }

    /// Inserts `node`, or merges it into the node already stored under its id.
    /// A placeholder flag only survives while every draft of the node carries it.
    pub fn upsert_node(&mut self, mut node: Node) -> Upsert {
        let id = node.id.clone();
        let outcome = match self.nodes.get_mut(&id) {
            Some(existing) => {
                let before_keys = existing.alternate_keys();
                let before_path = existing.source_path.clone();
                let declares_placeholder = existing.is_placeholder() && !node.is_placeholder();
                if node.is_placeholder() && !existing.is_placeholder() {
                    node.properties.remove(PLACEHOLDER_PROPERTY);
                    node.property_confidence.remove(PLACEHOLDER_PROPERTY);
                }
                let mut changed = merge_node(existing, node);
                if declares_placeholder {
                    existing.properties.remove(PLACEHOLDER_PROPERTY);
                    existing.property_confidence.remove(PLACEHOLDER_PROPERTY);
                    changed = true;
                }
                if !changed {
                    return Upsert::Unchanged;
                }
                let after_keys = existing.alternate_keys();
                let after_path = existing.source_path.clone();

                for key in before_keys.difference(&after_keys) {
                    remove_from_index(&mut self.alternate_index, key, &id);
                }
                for key in after_keys.difference(&before_keys) {
                    self.alternate_index
                        .entry(key.clone())
                        .or_default()
                        .insert(id.clone());
                }
                if before_path != after_path {
                    if let Some(path) = before_path {
                        remove_from_index(&mut self.file_index, &path, &id);
                    }
                    if let Some(path) = after_path {
                        self.file_index.entry(path).or_default().insert(id.clone());
                    }
                }
                Upsert::Merged
            }
            None => {
                for key in node.primary_keys() {
                    self.primary_index.entry(key).or_default().insert(id.clone());
                }
                for key in node.alternate_keys() {
                    self.alternate_index.entry(key).or_default().insert(id.clone());
                }
                if let Some(path) = &node.source_path {
                    self.file_index
                        .entry(path.clone())
                        .or_default()
                        .insert(id.clone());
                }
                self.by_kind.entry(node.kind).or_default().insert(id.clone());
                self.nodes.insert(id.clone(), node);
                Upsert::Created
            }
        };

        if let Some(node) = self.nodes.get(&id) {
            if node.kind == NodeKind::Endpoint {
                let route = EndpointRoute::from_node(node);
                self.endpoint_routes.insert(id, route);
            }
        }
        outcome
    }

    /// Inserts `edge`, or merges it into the edge with the same
    /// `(source, target, relation)`. Both endpoints must already exist.
    pub fn upsert_edge(&mut self, edge: Edge) -> Result<Upsert> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                error!(
                    source = %edge.source,
                    target = %edge.target,
                    relation = %edge.relation,
                    "refusing to commit edge with a missing endpoint"
                );
                return Err(LayerGraphError::InvariantViolation(format!(
                    "edge {} -[{}]-> {} references missing node {}",
                    edge.source, edge.relation, edge.target, endpoint
                )));
            }
        }

        let key = edge.key();
        if let Some(existing) = self.edges.get_mut(&key) {
            return Ok(if merge_edge(existing, edge) {
                Upsert::Merged
            } else {
                Upsert::Unchanged
            });
        }

        self.outgoing
            .entry(key.0.clone())
            .or_default()
            .insert((key.1.clone(), key.2));
        self.incoming
            .entry(key.1.clone())
            .or_default()
            .insert((key.0.clone(), key.2));
        debug!(source = %key.0, target = %key.1, relation = %key.2, "edge created");
        self.edges.insert(key, edge);
        Ok(Upsert::Created)
    }

    /// Removes one edge and its adjacency entries.
    pub fn remove_edge(&mut self, source: &str, target: &str, relation: Relation) -> Option<Edge> {
        let edge = self
            .edges
            .remove(&(source.to_string(), target.to_string(), relation))?;
        if let Some(set) = self.outgoing.get_mut(source) {
            set.remove(&(target.to_string(), relation));
            if set.is_empty() {
                self.outgoing.remove(source);
            }
        }
        if let Some(set) = self.incoming.get_mut(target) {
            set.remove(&(source.to_string(), relation));
            if set.is_empty() {
                self.incoming.remove(target);
            }
        }
        debug!(source, target, relation = %relation, "edge removed");
        Some(edge)
    }

    /// Removes a node together with its edges, index entries and pending
    /// references.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        let incident: Vec<EdgeKey> = self
            .outgoing(id)
            .chain(self.incoming(id))
            .map(Edge::key)
            .collect();
        for (source, target, relation) in incident {
            self.remove_edge(&source, &target, relation);
        }

        for key in node.primary_keys() {
            remove_from_index(&mut self.primary_index, &key, id);
        }
        for key in node.alternate_keys() {
            remove_from_index(&mut self.alternate_index, &key, id);
        }
        if let Some(path) = &node.source_path {
            remove_from_index(&mut self.file_index, path, id);
        }
        if let Some(ids) = self.by_kind.get_mut(&node.kind) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_kind.remove(&node.kind);
            }
        }
        self.endpoint_routes.remove(id);
        self.unresolved.remove(id);
        self.placeholder_refs
            .retain(|(source, placeholder), _| source != id && placeholder != id);
        debug!(node = id, "node removed");
        Some(node)
    }

    /// Records an unresolved hint. Returns `false` when an identical entry is
    /// already present.
    pub fn record_unresolved(&mut self, entry: UnresolvedReference) -> bool {
        let entries = self.unresolved.entry(entry.source.clone()).or_default();
        if entries
            .iter()
            .any(|e| e.hint == entry.hint && e.source_path == entry.source_path)
        {
            return false;
        }
        entries.push(entry);
        true
    }

    /// Removes a previously recorded unresolved hint once it resolves.
    pub fn clear_unresolved(&mut self, source: &str, hint: &ReferenceHint) {
        if let Some(entries) = self.unresolved.get_mut(source) {
            entries.retain(|e| &e.hint != hint);
            if entries.is_empty() {
                self.unresolved.remove(source);
            }
        }
    }

    pub(crate) fn take_unresolved(&mut self) -> Vec<UnresolvedReference> {
        std::mem::take(&mut self.unresolved)
            .into_values()
            .flatten()
            .collect()
    }

    /// Records a reference bound to a placeholder table. Returns `false` when
    /// the same hint is already recorded for that pair.
    pub fn record_placeholder_ref(&mut self, entry: PlaceholderReference) -> bool {
        let entries = self
            .placeholder_refs
            .entry((entry.source.clone(), entry.placeholder.clone()))
            .or_default();
        if entries
            .iter()
            .any(|e| e.hint == entry.hint && e.relation == entry.relation)
        {
            return false;
        }
        entries.push(entry);
        true
    }

    pub(crate) fn take_placeholder_refs(&mut self) -> Vec<PlaceholderReference> {
        std::mem::take(&mut self.placeholder_refs)
            .into_values()
            .flatten()
            .collect()
    }

    pub fn placeholder_refs(&self) -> impl Iterator<Item = &PlaceholderReference> {
        self.placeholder_refs.values().flatten()
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &UnresolvedReference> {
        self.unresolved.values().flatten()
    }

    pub fn unresolved_for(&self, source: &str) -> &[UnresolvedReference] {
        self.unresolved.get(source).map_or(&[], |v| v.as_slice())
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.values().map(Vec::len).sum()
    }

    /// Checks that every edge connects stored nodes and that the adjacency
    /// indexes agree with the edge map.
    pub fn verify_integrity(&self) -> Result<()> {
        for (source, target, relation) in self.edges.keys() {
            if !self.nodes.contains_key(source) || !self.nodes.contains_key(target) {
                return Err(LayerGraphError::InvariantViolation(format!(
                    "dangling edge {} -[{}]-> {}",
                    source, relation, target
                )));
            }
            let indexed = self
                .outgoing
                .get(source)
                .is_some_and(|set| set.contains(&(target.clone(), *relation)))
                && self
                    .incoming
                    .get(target)
                    .is_some_and(|set| set.contains(&(source.clone(), *relation)));
            if !indexed {
                return Err(LayerGraphError::InvariantViolation(format!(
                    "edge {} -[{}]-> {} missing from adjacency index",
                    source, relation, target
                )));
            }
        }

        let adjacency_total: usize = self.outgoing.values().map(BTreeSet::len).sum();
        if adjacency_total != self.edges.len() {
            return Err(LayerGraphError::InvariantViolation(format!(
                "adjacency index holds {} entries for {} edges",
                adjacency_total,
                self.edges.len()
            )));
        }

        for source in self.unresolved.keys() {
            if !self.nodes.contains_key(source) {
                return Err(LayerGraphError::InvariantViolation(format!(
                    "unresolved reference attached to missing node {}",
                    source
                )));
            }
        }

        for (source, placeholder) in self.placeholder_refs.keys() {
            if !self.nodes.contains_key(source) || !self.nodes.contains_key(placeholder) {
                return Err(LayerGraphError::InvariantViolation(format!(
                    "placeholder reference {} -> {} names a missing node",
                    source, placeholder
                )));
            }
        }
        Ok(())
    }
}

fn remove_from_index(index: &mut HashMap<String, BTreeSet<NodeId>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// Shared handle to the graph. Batches take the write lock for their whole
/// commit; queries take the read lock and see either all or none of a batch.
#[derive(Debug, Default)]
pub struct GraphStore {
    inner: RwLock<GraphData>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: GraphData) -> Self {
        Self {
            inner: RwLock::new(data),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, GraphData> {
        self.inner.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, GraphData> {
        self.inner.write()
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation()
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.inner.read().node(id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edge_count()
    }

    pub fn verify_integrity(&self) -> Result<()> {
        self.inner.read().verify_integrity()
    }
}
