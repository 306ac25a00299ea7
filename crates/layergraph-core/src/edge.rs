use crate::{NodeId, Relation, Resolution};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// `(source, target, relation)` triple identifying an edge.
pub type EdgeKey = (NodeId, NodeId, Relation);

/// Edge represents a directed, typed relationship between two nodes. At most one
/// edge exists per `(source, target, relation)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub relation: Relation,
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    pub confidence: f64,
}

impl Edge {
    pub fn new<S: Into<NodeId>, T: Into<NodeId>>(source: S, target: T, relation: Relation) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation,
            attributes: BTreeMap::new(),
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_attribute<K: Into<String>>(mut self, key: K, value: JsonValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_resolution(self, resolution: Resolution) -> Self {
        self.with_attribute("resolution", JsonValue::String(resolution.as_str().to_string()))
    }

    pub fn key(&self) -> EdgeKey {
        (self.source.clone(), self.target.clone(), self.relation)
    }

    pub fn resolution(&self) -> Option<&str> {
        self.attributes.get("resolution").and_then(|v| v.as_str())
    }
}
