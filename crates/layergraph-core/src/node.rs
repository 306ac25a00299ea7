use crate::{NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// Property marking a Table created only because something referenced it.
pub const PLACEHOLDER_PROPERTY: &str = "placeholder";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: String,
    pub qualified_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aliases: BTreeSet<String>,
    /// Confidence of the draft that last supplied `name` and `source_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Confidence each property value was supplied with.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub property_confidence: BTreeMap<String, f64>,
}

impl Node {
    pub fn new(kind: NodeKind, qualified_name: impl Into<String>) -> Self {
        let qualified_name = qualified_name.into().trim().to_string();
        let name = simple_name(&qualified_name).to_string();
        Self {
            id: kind.node_id(&qualified_name),
            kind,
            name,
            qualified_name,
            source_path: None,
            properties: BTreeMap::new(),
            aliases: BTreeSet::new(),
            confidence: None,
            property_confidence: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
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
        self.aliases.insert(alias.into());
        self
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    pub fn is_placeholder(&self) -> bool {
        self.properties
            .get(PLACEHOLDER_PROPERTY)
            .and_then(|v| v.as_bool())
            == Some(true)
    }

    /// Keys that identify this node unambiguously: its id and qualified name.
    pub fn primary_keys(&self) -> Vec<String> {
        let mut keys = vec![self.id.clone(), self.qualified_name.clone()];
        keys.dedup();
        keys
    }

    /// Secondary lookup keys: short names, view stems and extractor aliases.
    /// Table and procedure keys are also indexed lower-cased since SQL names
    /// are case-insensitive.
    pub fn alternate_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        keys.insert(self.name.clone());
        keys.insert(simple_name(&self.qualified_name).to_string());
        keys.extend(self.aliases.iter().cloned());

        if self.kind == NodeKind::View {
            let file = last_path_segment(&self.qualified_name);
            keys.insert(file.to_string());
            keys.insert(file_stem(file).to_string());
        }

        if matches!(self.kind, NodeKind::Table | NodeKind::StoredProcedure) {
            let lowered: Vec<String> = keys.iter().map(|k| k.to_lowercase()).collect();
            keys.extend(lowered);
            keys.insert(self.qualified_name.to_lowercase());
        }

        keys.retain(|k| !k.is_empty() && *k != self.qualified_name && *k != self.id);
        keys
    }
}

/// Last `.`-separated segment of a dotted name (`com.acme.UserService` → `UserService`).
/// Path-like names keep their last `/` segment.
pub fn simple_name(qualified: &str) -> &str {
    let segment = last_path_segment(qualified);
    if segment.contains('.') && !looks_like_file(segment) {
        segment.rsplit('.').next().unwrap_or(segment)
    } else {
        segment
    }
}

fn last_path_segment(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
}

fn file_stem(file: &str) -> &str {
    match file.rfind('.') {
        Some(idx) if idx > 0 => &file[..idx],
        _ => file,
    }
}

fn looks_like_file(segment: &str) -> bool {
    const VIEW_EXTENSIONS: [&str; 6] = [".jsp", ".jspf", ".jspx", ".html", ".htm", ".ftl"];
    let lower = segment.to_lowercase();
    VIEW_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn simple_name_handles_dotted_and_file_names() {
        assert_eq!(simple_name("com.acme.UserService"), "UserService");
        assert_eq!(simple_name("WEB-INF/views/users.jsp"), "users.jsp");
        assert_eq!(simple_name("app.users"), "users");
        assert_eq!(simple_name("plain"), "plain");
    }

    #[test]
    fn view_alternate_keys_include_stem() {
        let node = Node::new(NodeKind::View, "WEB-INF/views/users.jsp");
        let keys = node.alternate_keys();
        assert!(keys.contains("users.jsp"));
        assert!(keys.contains("users"));
        assert!(!keys.contains("WEB-INF/views/users.jsp"));
    }

    #[test]
    fn table_alternate_keys_are_case_folded() {
        let node = Node::new(NodeKind::Table, "APP.USERS");
        let keys = node.alternate_keys();
        assert!(keys.contains("USERS"));
        assert!(keys.contains("users"));
        assert!(keys.contains("app.users"));
    }

    #[test]
    fn node_serializes_with_camel_case_fields() {
        let node = Node::new(NodeKind::Endpoint, "com.acme.UserController.get")
            .with_source_path("src/UserController.java")
            .with_property("path", json!("/users/{id}"));
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "Endpoint");
        assert_eq!(value["sourcePath"], "src/UserController.java");
        assert_eq!(value["qualifiedName"], "com.acme.UserController.get");
        assert!(value.get("propertyConfidence").is_none());
    }
}
