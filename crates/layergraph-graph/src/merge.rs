//! Merge rules applied when a node or edge arrives for an id that already exists.
//!
//! A value backed by a confidence is only replaced by a value whose confidence is
//! at least as high; a value without one is replaced by anything newer. Edge
//! confidence only ever grows.

use layergraph_core::{node::simple_name, Edge, Node, Resolution};

/// Edge attribute holding how many nodes a fuzzy reference matched.
pub const CANDIDATES_ATTRIBUTE: &str = "candidates";

/// Whether a value supplied with `incoming` confidence replaces one held with
/// `existing` confidence. Ties go to the newer value.
pub fn takes_precedence(existing: Option<f64>, incoming: Option<f64>) -> bool {
    match (existing, incoming) {
        (Some(held), Some(new)) => new >= held,
        (Some(_), None) => false,
        (None, _) => true,
    }
}

/// Merges `incoming` into `existing` (same id). Returns whether anything changed.
pub fn merge_node(existing: &mut Node, incoming: Node) -> bool {
    debug_assert_eq!(existing.id, incoming.id);
    let before = existing.clone();

    if takes_precedence(existing.confidence, incoming.confidence) {
        let derived_name = simple_name(&incoming.qualified_name);
        if !incoming.name.is_empty() && incoming.name != derived_name {
            existing.name = incoming.name;
        }
        if incoming.source_path.is_some() {
            existing.source_path = incoming.source_path;
        }
        existing.confidence = incoming.confidence.or(existing.confidence);
    } else if existing.source_path.is_none() {
        existing.source_path = incoming.source_path;
    }

    for (key, value) in incoming.properties {
        let incoming_conf = incoming.property_confidence.get(&key).copied();
        let held_conf = existing.property_confidence.get(&key).copied();
        let replace = !existing.properties.contains_key(&key)
            || takes_precedence(held_conf, incoming_conf);
        if replace {
            if let Some(conf) = incoming_conf {
                existing.property_confidence.insert(key.clone(), conf);
            }
            existing.properties.insert(key, value);
        }
    }

    existing.aliases.extend(incoming.aliases);
    *existing != before
}

/// Merges `incoming` into `existing` (same key). Confidence becomes the max of
/// the two; attributes from the stronger side win on conflict. A candidate
/// count only stays on an edge that is still fuzzy.
pub fn merge_edge(existing: &mut Edge, incoming: Edge) -> bool {
    let before = existing.clone();
    let incoming_wins = incoming.confidence >= existing.confidence;

    for (key, value) in incoming.attributes {
        if incoming_wins || !existing.attributes.contains_key(&key) {
            existing.attributes.insert(key, value);
        }
    }
    existing.confidence = existing.confidence.max(incoming.confidence);
    if existing.resolution() != Some(Resolution::Fuzzy.as_str()) {
        existing.attributes.remove(CANDIDATES_ATTRIBUTE);
    }
    *existing != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use layergraph_core::{NodeKind, Relation, Resolution};
    use serde_json::json;

    fn with_conf(mut node: Node, key: &str, value: serde_json::Value, conf: Option<f64>) -> Node {
        node.properties.insert(key.to_string(), value);
        if let Some(c) = conf {
            node.property_confidence.insert(key.to_string(), c);
        }
        node.confidence = conf;
        node
    }

    #[test]
    fn precedence_table() {
        assert!(takes_precedence(Some(0.5), Some(0.5)));
        assert!(takes_precedence(Some(0.5), Some(0.9)));
        assert!(!takes_precedence(Some(0.9), Some(0.5)));
        assert!(takes_precedence(None, Some(0.1)));
        assert!(!takes_precedence(Some(0.1), None));
        assert!(takes_precedence(None, None));
    }

    #[test]
    fn lower_confidence_property_does_not_overwrite() {
        let base = Node::new(NodeKind::Endpoint, "c.Ctl.get");
        let mut existing = with_conf(base.clone(), "path", json!("/users/{id}"), Some(0.9));
        let incoming = with_conf(base, "path", json!("/user/*"), Some(0.4));
        merge_node(&mut existing, incoming);
        assert_eq!(existing.properties["path"], json!("/users/{id}"));
        assert_eq!(existing.property_confidence["path"], 0.9);
    }

    #[test]
    fn new_keys_are_always_added_and_aliases_union() {
        let base = Node::new(NodeKind::BusinessService, "a.UserService");
        let mut existing = with_conf(base.clone(), "tx", json!(true), Some(0.9));
        let incoming = with_conf(base, "cache", json!("users"), Some(0.2)).with_alias("userSvc");
        assert!(merge_node(&mut existing, incoming));
        assert_eq!(existing.properties["cache"], json!("users"));
        assert_eq!(existing.properties["tx"], json!(true));
        assert!(existing.aliases.contains("userSvc"));
    }

    #[test]
    fn derived_name_does_not_replace_explicit_name() {
        let mut existing = Node::new(NodeKind::View, "web/users.jsp").with_name("User list");
        let incoming = Node::new(NodeKind::View, "web/users.jsp");
        merge_node(&mut existing, incoming);
        assert_eq!(existing.name, "User list");
    }

    #[test]
    fn edge_confidence_only_grows() {
        let mut existing = Edge::new("a", "b", Relation::Calls)
            .with_confidence(0.9)
            .with_resolution(Resolution::Pattern);
        let weaker = Edge::new("a", "b", Relation::Calls)
            .with_confidence(0.5)
            .with_resolution(Resolution::Fuzzy)
            .with_attribute("candidates", json!(2));
        assert!(!merge_edge(&mut existing, weaker));
        assert_eq!(existing.confidence, 0.9);
        assert_eq!(existing.resolution(), Some("pattern"));
        assert!(!existing.attributes.contains_key("candidates"));

        let stronger = Edge::new("a", "b", Relation::Calls).with_resolution(Resolution::Exact);
        merge_edge(&mut existing, stronger);
        assert_eq!(existing.confidence, 1.0);
        assert_eq!(existing.resolution(), Some("exact"));
    }

    #[test]
    fn candidate_count_leaves_with_fuzzy_resolution() {
        let mut existing = Edge::new("a", "b", Relation::Calls)
            .with_confidence(0.5)
            .with_resolution(Resolution::Fuzzy)
            .with_attribute("candidates", json!(2));
        let fuzzier = Edge::new("a", "b", Relation::Calls)
            .with_confidence(0.25)
            .with_resolution(Resolution::Fuzzy)
            .with_attribute("candidates", json!(4));
        merge_edge(&mut existing, fuzzier);
        assert_eq!(existing.attributes["candidates"], json!(2));

        let exact = Edge::new("a", "b", Relation::Calls).with_resolution(Resolution::Exact);
        assert!(merge_edge(&mut existing, exact));
        assert_eq!(existing.resolution(), Some("exact"));
        assert!(!existing.attributes.contains_key("candidates"));
    }

    #[test]
    fn identical_edge_is_unchanged() {
        let mut existing = Edge::new("a", "b", Relation::Queries);
        assert!(!merge_edge(&mut existing, Edge::new("a", "b", Relation::Queries)));
    }
}
