use layergraph_core::{NodeKind, Relation};
use serde::Serialize;

use layergraph_core::NodeKind::*;
use layergraph_core::Relation::*;

/// `(source type, relation, target type)` triples the graph accepts.
pub const ALLOWED_PATTERNS: &[(NodeKind, Relation, NodeKind)] = &[
    (View, Includes, View),
    (View, Relation::AjaxCall, Endpoint),
    (Endpoint, Invokes, BusinessService),
    (Endpoint, Invokes, DataMapper),
    (Endpoint, Calls, Endpoint),
    (BusinessService, Calls, BusinessService),
    (BusinessService, Calls, DataMapper),
    (BusinessService, Executes, StoredProcedure),
    (BusinessService, Queries, Table),
    (DataMapper, Queries, Table),
    (DataMapper, Executes, StoredProcedure),
    (StoredProcedure, Queries, Table),
    (StoredProcedure, Executes, StoredProcedure),
    (ScheduledJob, Scheduled, BusinessService),
    (ScheduledJob, Scheduled, Endpoint),
    (ScheduledJob, Scheduled, StoredProcedure),
];

/// An edge the schema refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaViolation {
    pub source: String,
    pub target: String,
    pub source_type: NodeKind,
    pub relation: Relation,
    pub target_type: NodeKind,
    pub reason: String,
}

pub struct GraphSchema;

impl GraphSchema {
    pub fn allows(source: NodeKind, relation: Relation, target: NodeKind) -> bool {
        ALLOWED_PATTERNS.contains(&(source, relation, target))
    }

    /// Checks one candidate edge. Self-loops are never allowed.
    pub fn check(
        source_id: &str,
        source: NodeKind,
        relation: Relation,
        target_id: &str,
        target: NodeKind,
    ) -> Result<(), SchemaViolation> {
        let reason = if source_id == target_id {
            "self-loop"
        } else if !Self::allows(source, relation, target) {
            "pattern not allowed"
        } else {
            return Ok(());
        };
        Err(SchemaViolation {
            source: source_id.to_string(),
            target: target_id.to_string(),
            source_type: source,
            relation,
            target_type: target,
            reason: reason.to_string(),
        })
    }

    /// Target types reachable from `source` over `relation`.
    pub fn allowed_targets(source: NodeKind, relation: Relation) -> Vec<NodeKind> {
        ALLOWED_PATTERNS
            .iter()
            .filter(|(s, r, _)| *s == source && *r == relation)
            .map(|(_, _, t)| *t)
            .collect()
    }
}
