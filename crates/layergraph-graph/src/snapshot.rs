use crate::store::{GraphData, GraphStore, PlaceholderReference, UnresolvedReference};
use chrono::{DateTime, Utc};
use layergraph_core::{Edge, LayerGraphError, Node, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the whole graph. Nodes are sorted by id and edges by
/// `(source, target, relation)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub unresolved: Vec<UnresolvedReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placeholder_references: Vec<PlaceholderReference>,
}

impl GraphData {
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: Utc::now(),
            nodes: self.nodes().cloned().collect(),
            edges: self.edges().cloned().collect(),
            unresolved: self.unresolved().cloned().collect(),
            placeholder_references: self.placeholder_refs().cloned().collect(),
        }
    }

    /// Rebuilds graph data from a snapshot, re-checking that no edge dangles.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(LayerGraphError::Snapshot(format!(
                "unsupported snapshot version {} (expected <= {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        let mut data = GraphData::new();
        for node in snapshot.nodes {
            data.upsert_node(node);
        }
        for edge in snapshot.edges {
            data.upsert_edge(edge)?;
        }
        for entry in snapshot.unresolved {
            if !data.contains_node(&entry.source) {
                return Err(LayerGraphError::Snapshot(format!(
                    "unresolved reference attached to unknown node {}",
                    entry.source
                )));
            }
            data.record_unresolved(entry);
        }
        for entry in snapshot.placeholder_references {
            data.record_placeholder_ref(entry);
        }
        data.verify_integrity()?;
        Ok(data)
    }
}

impl GraphSnapshot {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_pretty()?)?;
        info!(
            path = %path.display(),
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "snapshot written"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let snapshot: GraphSnapshot = serde_json::from_str(&raw)?;
        Ok(snapshot)
    }
}

impl GraphStore {
    pub fn snapshot(&self) -> GraphSnapshot {
        self.read().snapshot()
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        Ok(GraphStore::from_data(GraphData::from_snapshot(snapshot)?))
    }

    pub fn load_snapshot(path: &Path) -> Result<Self> {
        Self::from_snapshot(GraphSnapshot::load(path)?)
    }
}
