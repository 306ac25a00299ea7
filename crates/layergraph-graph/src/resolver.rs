//! Turns reference hints into candidate edges.
//!
//! Strategies run strongest first: primary keys, URL patterns (URL hints only),
//! alternate keys, then the simple name of a qualified reference. The first
//! strategy that yields a schema-compatible candidate decides the outcome.
//! Placeholder tables are never candidates, so a hint binds to the same node
//! whether or not a placeholder was created for it earlier.

use crate::merge::CANDIDATES_ATTRIBUTE;
use crate::schema::{GraphSchema, SchemaViolation};
use crate::store::GraphData;
use crate::url_pattern::normalize_url;
use layergraph_core::{
    node::simple_name, HintKind, Node, NodeId, NodeKind, ReferenceHint, Relation, Resolution,
};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};

/// Confidence of a URL match whose verb was checked against the endpoint.
pub const VERB_MATCH_CONFIDENCE: f64 = 0.9;
/// Confidence of a URL match where either side's verb is unknown.
pub const VERB_UNKNOWN_CONFIDENCE: f64 = 0.7;

/// Confidence each of `n` ambiguous candidates receives.
pub fn fuzzy_confidence(candidates: usize) -> f64 {
    if candidates == 0 {
        return 0.0;
    }
    (1.0 / candidates as f64).min(0.5)
}

/// Relation implied by a hint between nodes of the given types. An explicit
/// relation on the hint always wins.
pub fn infer_relation(hint: &ReferenceHint, source: NodeKind, target: NodeKind) -> Relation {
    if let Some(relation) = hint.relation {
        return relation;
    }
    match hint.kind {
        HintKind::Include => Relation::Includes,
        HintKind::AjaxCall | HintKind::FormSubmit => Relation::AjaxCall,
        HintKind::TableRef => Relation::Queries,
        HintKind::ProcedureCall => Relation::Executes,
        HintKind::ScheduledTarget => Relation::Scheduled,
        HintKind::Dependency | HintKind::MethodCall => match (source, target) {
            (NodeKind::ScheduledJob, _) => Relation::Scheduled,
            (_, NodeKind::Table) => Relation::Queries,
            (_, NodeKind::StoredProcedure) => Relation::Executes,
            (NodeKind::Endpoint, NodeKind::BusinessService | NodeKind::DataMapper) => {
                Relation::Invokes
            }
            _ => Relation::Calls,
        },
    }
}

/// One edge a hint resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub target: NodeId,
    pub relation: Relation,
    pub confidence: f64,
    pub resolution: Resolution,
    pub attributes: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(Vec<Candidate>),
    /// Nodes matched, but every resulting edge broke the schema.
    Rejected(Vec<SchemaViolation>),
    Unresolved(String),
}

struct Admitted {
    target: NodeId,
    relation: Relation,
    attributes: BTreeMap<String, JsonValue>,
}

pub struct ReferenceResolver<'a> {
    graph: &'a GraphData,
    enforce_schema: bool,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(graph: &'a GraphData, enforce_schema: bool) -> Self {
        Self {
            graph,
            enforce_schema,
        }
    }

    pub fn resolve(&self, source: &Node, hint: &ReferenceHint) -> ResolveOutcome {
        let raw = hint.raw_value.trim();
        if raw.is_empty() {
            return ResolveOutcome::Unresolved("empty reference".to_string());
        }
        let target_kind = hint.target_kind();
        let mut rejected = Vec::new();

        let primary = self.filter_kind(self.graph.lookup_primary(raw), target_kind);
        let admitted = self.admit(source, hint, primary, &mut rejected, BTreeMap::new());
        if !admitted.is_empty() {
            return self.finish(hint, admitted, Resolution::Exact, 1.0);
        }

        if hint.kind.is_url() {
            if let Some(outcome) = self.resolve_url(source, hint, raw, &mut rejected) {
                return outcome;
            }
        }

        let mut alternate = self.graph.lookup_alternate(raw);
        if matches!(
            target_kind,
            Some(NodeKind::Table | NodeKind::StoredProcedure)
        ) {
            let lowered = raw.to_lowercase();
            alternate.extend(self.graph.lookup_primary(&lowered));
            alternate.extend(self.graph.lookup_alternate(&lowered));
        }
        let alternate = self.filter_kind(alternate, target_kind);
        let admitted = self.admit(source, hint, alternate, &mut rejected, BTreeMap::new());
        if !admitted.is_empty() {
            return self.finish(hint, admitted, Resolution::Exact, 1.0);
        }

        // `com.other.UserService` may still name `com.acme.UserService`, but
        // only by its short name, so never with full confidence.
        let short = simple_name(raw);
        if short != raw && !short.is_empty() {
            let mut by_name = self.graph.lookup_alternate(short);
            by_name.extend(self.graph.lookup_primary(short));
            let by_name = self.filter_kind(by_name, target_kind);
            let admitted = self.admit(source, hint, by_name, &mut rejected, BTreeMap::new());
            if !admitted.is_empty() {
                let n = admitted.len();
                return self.finish(hint, admitted, Resolution::Fuzzy, fuzzy_confidence(n.max(2)));
            }
        }

        if rejected.is_empty() {
            ResolveOutcome::Unresolved(match target_kind {
                Some(kind) => format!("no {} matches '{}'", kind, raw),
                None => format!("no node matches '{}'", raw),
            })
        } else {
            rejected.sort_by(|a, b| (&a.target, a.relation).cmp(&(&b.target, b.relation)));
            rejected.dedup_by(|a, b| a.target == b.target && a.relation == b.relation);
            ResolveOutcome::Rejected(rejected)
        }
    }

    fn resolve_url(
        &self,
        source: &Node,
        hint: &ReferenceHint,
        raw: &str,
        rejected: &mut Vec<SchemaViolation>,
    ) -> Option<ResolveOutcome> {
        let url = normalize_url(raw);
        if url.is_empty() {
            return None;
        }
        let verb = hint.verb();

        let mut best_key = None;
        let mut best: Vec<(NodeId, String)> = Vec::new();
        for (id, route) in self.graph.endpoint_routes() {
            if let Some(v) = verb.as_deref() {
                if !route.accepts_verb(v) {
                    continue;
                }
            }
            let Some((template, literals)) = route.best_match(&url) else {
                continue;
            };
            let verified = verb.is_some() && !route.accepts_any_verb();
            let key = (literals, verified);
            match best_key {
                Some(current) if key < current => continue,
                Some(current) if key == current => {}
                _ => {
                    best_key = Some(key);
                    best.clear();
                }
            }
            best.push((id.clone(), template.as_str().to_string()));
        }

        let (_, verified) = best_key?;
        let mut admitted = Vec::new();
        for (id, template) in best {
            let mut attributes = BTreeMap::new();
            attributes.insert("url".to_string(), json!(raw));
            attributes.insert("pathTemplate".to_string(), json!(template));
            if let Some(v) = &verb {
                attributes.insert("method".to_string(), json!(v));
            }
            admitted.extend(self.admit(source, hint, BTreeSet::from([id]), rejected, attributes));
        }
        if admitted.is_empty() {
            return None;
        }

        let confidence = if verified {
            VERB_MATCH_CONFIDENCE
        } else {
            VERB_UNKNOWN_CONFIDENCE
        };
        Some(self.finish(hint, admitted, Resolution::Pattern, confidence))
    }

    fn filter_kind(&self, ids: BTreeSet<NodeId>, kind: Option<NodeKind>) -> BTreeSet<NodeId> {
        match kind {
            None => ids,
            Some(kind) => ids
                .into_iter()
                .filter(|id| self.graph.node(id).is_some_and(|n| n.kind == kind))
                .collect(),
        }
    }

    /// Keeps the candidates that form a schema-valid edge from `source`.
    fn admit(
        &self,
        source: &Node,
        hint: &ReferenceHint,
        ids: BTreeSet<NodeId>,
        rejected: &mut Vec<SchemaViolation>,
        attributes: BTreeMap<String, JsonValue>,
    ) -> Vec<Admitted> {
        let mut admitted = Vec::new();
        for id in ids {
            if id == source.id {
                continue;
            }
            let Some(target) = self.graph.node(&id).filter(|n| !n.is_placeholder()) else {
                continue;
            };
            let relation = infer_relation(hint, source.kind, target.kind);
            if self.enforce_schema {
                if let Err(violation) =
                    GraphSchema::check(&source.id, source.kind, relation, &id, target.kind)
                {
                    rejected.push(violation);
                    continue;
                }
            }
            admitted.push(Admitted {
                target: id,
                relation,
                attributes: attributes.clone(),
            });
        }
        admitted
    }

    /// Single survivors keep the strategy's confidence; several become fuzzy.
    fn finish(
        &self,
        hint: &ReferenceHint,
        admitted: Vec<Admitted>,
        resolution: Resolution,
        single_confidence: f64,
    ) -> ResolveOutcome {
        let n = admitted.len();
        let (resolution, confidence) = if n == 1 {
            (resolution, single_confidence)
        } else {
            (Resolution::Fuzzy, fuzzy_confidence(n))
        };

        let candidates = admitted
            .into_iter()
            .map(|a| {
                let mut attributes = hint.attributes.clone();
                attributes.extend(a.attributes);
                attributes.insert("resolution".to_string(), json!(resolution.as_str()));
                if hint.kind == HintKind::FormSubmit {
                    attributes.insert("via".to_string(), json!("form"));
                }
                if resolution == Resolution::Fuzzy {
                    attributes.insert(CANDIDATES_ATTRIBUTE.to_string(), json!(n));
                }
                Candidate {
                    target: a.target,
                    relation: a.relation,
                    confidence,
                    resolution,
                    attributes,
                }
            })
            .collect();
        ResolveOutcome::Resolved(candidates)
    }
}
