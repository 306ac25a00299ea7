use crate::{HintKind, Node, NodeId, NodeKind, Relation};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// One extractor's output for one analyzed artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    #[serde(default)]
    pub source_path: String,
    #[serde(default, alias = "producedNodes")]
    pub nodes: Vec<NodeDraft>,
    #[serde(default)]
    pub reference_hints: Vec<ReferenceHint>,
}

impl AnalysisRecord {
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            nodes: Vec::new(),
            reference_hints: Vec::new(),
        }
    }

    pub fn with_node(mut self, draft: NodeDraft) -> Self {
        self.nodes.push(draft);
        self
    }

    pub fn with_hint(mut self, hint: ReferenceHint) -> Self {
        self.reference_hints.push(hint);
        self
    }

    /// Checks the identity fields the construction engine relies on.
    /// Returns the reason the record cannot be ingested.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_path.trim().is_empty() {
            return Err("sourcePath is empty".to_string());
        }
        if self.nodes.is_empty() {
            return Err("record produces no nodes".to_string());
        }
        for (idx, draft) in self.nodes.iter().enumerate() {
            if draft.qualified_name.trim().is_empty() {
                return Err(format!("node draft #{} has an empty qualifiedName", idx));
            }
            if let Some(confidence) = draft.confidence {
                if !(0.0..=1.0).contains(&confidence) {
                    return Err(format!(
                        "node draft '{}' has confidence {} outside [0, 1]",
                        draft.qualified_name, confidence
                    ));
                }
            }
        }
        for hint in &self.reference_hints {
            if let Some(source) = hint.source.as_deref() {
                if self.draft_for_source(source).is_none() {
                    return Err(format!(
                        "reference hint '{}' names unknown source node '{}'",
                        hint.raw_value, source
                    ));
                }
            }
        }
        Ok(())
    }

    /// Finds the draft a hint's `source` refers to, by qualified name or id.
    pub fn draft_for_source(&self, source: &str) -> Option<&NodeDraft> {
        let source = source.trim();
        self.nodes
            .iter()
            .find(|d| d.qualified_name.trim() == source || d.node_id() == source)
    }
}

/// A node as proposed by an extractor, before merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDraft {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub qualified_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl NodeDraft {
    pub fn new(kind: NodeKind, qualified_name: impl Into<String>) -> Self {
        Self {
            kind,
            qualified_name: qualified_name.into(),
            name: None,
            source_path: None,
            properties: BTreeMap::new(),
            aliases: Vec::new(),
            confidence: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_property<K: Into<String>>(mut self, key: K, value: JsonValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.kind.node_id(&self.qualified_name)
    }

    /// Materializes the draft as a fresh node. `fallback_path` is the owning
    /// record's source path, used when the draft does not carry its own.
    pub fn to_node(&self, fallback_path: &str) -> Node {
        let mut node = Node::new(self.kind, self.qualified_name.as_str());
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            node.name = name.trim().to_string();
        }
        node.source_path = self
            .source_path
            .clone()
            .or_else(|| Some(fallback_path.to_string()))
            .filter(|p| !p.trim().is_empty());
        node.aliases = self
            .aliases
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        node.confidence = self.confidence;
        for (key, value) in &self.properties {
            node.properties.insert(key.clone(), value.clone());
            if let Some(confidence) = self.confidence {
                node.property_confidence.insert(key.clone(), confidence);
            }
        }
        node
    }
}

/// An unresolved mention of another entity, to be turned into an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceHint {
    pub kind: HintKind,
    #[serde(default)]
    pub raw_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_target_type: Option<NodeKind>,
    /// HTTP verb for URL hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Qualified name or id of the draft this hint belongs to. When absent the
    /// hint applies to every node of the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, JsonValue>,
}

impl ReferenceHint {
    pub fn new(kind: HintKind, raw_value: impl Into<String>) -> Self {
        Self {
            kind,
            raw_value: raw_value.into(),
            expected_target_type: None,
            method: None,
            source: None,
            relation: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn expecting(mut self, kind: NodeKind) -> Self {
        self.expected_target_type = Some(kind);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn with_attribute<K: Into<String>>(mut self, key: K, value: JsonValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Target type to restrict candidates to: the declared one, else the one
    /// implied by the hint kind.
    pub fn target_kind(&self) -> Option<NodeKind> {
        self.expected_target_type.or_else(|| self.kind.implied_target())
    }

    /// Upper-cased HTTP verb, if any was supplied.
    pub fn verb(&self) -> Option<String> {
        self.method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_uppercase)
    }
}
