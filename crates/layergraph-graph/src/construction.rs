use crate::resolver::{infer_relation, ReferenceResolver, ResolveOutcome};
use crate::schema::{GraphSchema, SchemaViolation};
use crate::resolver::Candidate;
use crate::store::{GraphData, GraphStore, PlaceholderReference, UnresolvedReference, Upsert};
use layergraph_core::{
    AnalysisRecord, Edge, HintKind, IngestConfig, LayerGraphError, Node, NodeId, NodeKind,
    ReferenceHint, Resolution, Result, PLACEHOLDER_PROPERTY,
};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A record that could not be ingested. The rest of its batch still commits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub index: usize,
    pub source_path: String,
    pub reason: String,
}

impl From<RecordError> for LayerGraphError {
    fn from(err: RecordError) -> Self {
        LayerGraphError::MalformedRecord {
            index: err.index,
            source_path: err.source_path,
            reason: err.reason,
        }
    }
}

/// Summary of one committed batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub records_received: usize,
    pub records_ingested: usize,
    pub nodes_created: usize,
    pub nodes_merged: usize,
    pub nodes_unchanged: usize,
    pub edges_created: usize,
    pub edges_merged: usize,
    pub hints_resolved: usize,
    /// Hints that resolved to more than one candidate.
    pub ambiguous_hints: usize,
    /// Hints newly added to the unresolved side-list.
    pub unresolved: usize,
    pub materialized: usize,
    /// Placeholder tables dropped after their references moved to a declared table.
    pub placeholders_removed: usize,
    pub deferred_resolved: usize,
    pub rejected_hints: usize,
    pub schema_violations: Vec<SchemaViolation>,
    pub errors: Vec<RecordError>,
    pub generation: u64,
}

/// Result of ingesting a single record.
pub type IngestResult = BatchReport;

/// A validated record with its drafts turned into nodes and each hint bound
/// to the node it originates from.
#[derive(Debug)]
struct PreparedRecord {
    source_path: String,
    nodes: Vec<Node>,
    hints: Vec<(NodeId, ReferenceHint)>,
    rejected_hints: usize,
}

fn prepare(index: usize, record: AnalysisRecord) -> std::result::Result<PreparedRecord, RecordError> {
    record.validate().map_err(|reason| RecordError {
        index,
        source_path: record.source_path.clone(),
        reason,
    })?;

    let source_path = record.source_path.trim().to_string();
    let nodes: Vec<Node> = record
        .nodes
        .iter()
        .map(|draft| draft.to_node(&source_path))
        .collect();
    let all_ids: BTreeSet<NodeId> = nodes.iter().map(|n| n.id.clone()).collect();

    let mut hints = Vec::new();
    let mut rejected_hints = 0;
    for hint in &record.reference_hints {
        if hint.raw_value.trim().is_empty() {
            warn!(source_path = %source_path, kind = %hint.kind, "dropping hint with empty rawValue");
            rejected_hints += 1;
            continue;
        }
        match hint.source.as_deref() {
            Some(source) => {
                if let Some(draft) = record.draft_for_source(source) {
                    hints.push((draft.node_id(), hint.clone()));
                }
            }
            None => hints.extend(all_ids.iter().map(|id| (id.clone(), hint.clone()))),
        }
    }

    Ok(PreparedRecord {
        source_path,
        nodes,
        hints,
        rejected_hints,
    })
}

/// Turns analysis records into nodes and edges of a shared [`GraphStore`].
///
/// Each batch runs in two passes under one write lock: every node of the
/// batch is upserted first, then every hint is resolved, so edge resolution
/// never depends on record order within a batch.
pub struct ConstructionEngine {
    store: Arc<GraphStore>,
    config: IngestConfig,
}

impl ConstructionEngine {
    pub fn new(store: Arc<GraphStore>, config: IngestConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn ingest(&self, record: AnalysisRecord) -> Result<IngestResult> {
        self.ingest_batch(vec![record])
    }

    pub fn ingest_batch(&self, records: Vec<AnalysisRecord>) -> Result<BatchReport> {
        let prepared: Vec<_> = records
            .into_par_iter()
            .enumerate()
            .map(|(index, record)| prepare(index, record))
            .collect();
        self.commit(prepared)
    }

    /// Decodes each value separately, so one undecodable element becomes a
    /// record error instead of failing the batch.
    pub fn ingest_values(&self, values: Vec<JsonValue>) -> Result<BatchReport> {
        let prepared: Vec<_> = values
            .into_par_iter()
            .enumerate()
            .map(|(index, value)| {
                let source_path = value
                    .get("sourcePath")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let record: AnalysisRecord =
                    serde_json::from_value(value).map_err(|e| RecordError {
                        index,
                        source_path,
                        reason: e.to_string(),
                    })?;
                prepare(index, record)
            })
            .collect();
        self.commit(prepared)
    }

    fn commit(
        &self,
        prepared: Vec<std::result::Result<PreparedRecord, RecordError>>,
    ) -> Result<BatchReport> {
        let mut report = BatchReport {
            records_received: prepared.len(),
            ..Default::default()
        };

        let mut records = Vec::with_capacity(prepared.len());
        for item in prepared {
            match item {
                Ok(record) => {
                    report.rejected_hints += record.rejected_hints;
                    records.push(record);
                }
                Err(err) => {
                    warn!(index = err.index, source_path = %err.source_path, reason = %err.reason, "malformed record");
                    report.errors.push(err);
                }
            }
        }
        report.records_ingested = records.len();

        let mut graph = self.store.write();
        let applied = self.apply(&mut graph, &mut records, &mut report);
        // Whatever part of the batch landed is visible, so readers must see a
        // new generation even when the batch failed halfway.
        report.generation = graph.bump_generation();
        let (node_count, edge_count) = (graph.node_count(), graph.edge_count());
        drop(graph);

        if let Err(err) = applied {
            error!(
                generation = report.generation,
                nodes_created = report.nodes_created,
                edges_created = report.edges_created,
                error = %err,
                "batch aborted after a partial commit"
            );
            return Err(err);
        }

        info!(
            generation = report.generation,
            records = report.records_ingested,
            malformed = report.errors.len(),
            nodes_created = report.nodes_created,
            nodes_merged = report.nodes_merged,
            edges_created = report.edges_created,
            edges_merged = report.edges_merged,
            unresolved = report.unresolved,
            deferred_resolved = report.deferred_resolved,
            schema_violations = report.schema_violations.len(),
            node_count,
            edge_count,
            "batch committed"
        );
        Ok(report)
    }

    fn apply(
        &self,
        graph: &mut GraphData,
        records: &mut [PreparedRecord],
        report: &mut BatchReport,
    ) -> Result<()> {
        for record in records.iter_mut() {
            for node in record.nodes.drain(..) {
                match graph.upsert_node(node) {
                    Upsert::Created => report.nodes_created += 1,
                    Upsert::Merged => report.nodes_merged += 1,
                    Upsert::Unchanged => report.nodes_unchanged += 1,
                }
            }
        }

        for record in records.iter() {
            for (source, hint) in &record.hints {
                self.resolve_hint(graph, source, hint, &record.source_path, report, false)?;
            }
        }

        if self.config.deferred_resolution && report.nodes_created + report.nodes_merged > 0 {
            self.rebind_placeholders(graph, report)?;
            self.retry_unresolved(graph, report)?;
        }

        if self.config.verify_integrity {
            graph.verify_integrity()?;
        }
        Ok(())
    }

    fn retry_unresolved(&self, graph: &mut GraphData, report: &mut BatchReport) -> Result<()> {
        let pending = graph.take_unresolved();
        if pending.is_empty() {
            return Ok(());
        }
        debug!(pending = pending.len(), "retrying unresolved references");
        let mut pending = pending.into_iter();
        while let Some(entry) = pending.next() {
            match self.resolve_hint(graph, &entry.source, &entry.hint, &entry.source_path, report, true) {
                Ok(true) => report.deferred_resolved += 1,
                Ok(false) => {}
                Err(err) => {
                    // The failed entry and every untried one stay pending.
                    for entry in std::iter::once(entry).chain(pending) {
                        if graph.contains_node(&entry.source) {
                            graph.record_unresolved(entry);
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Re-resolves every placeholder-bound table reference without the
    /// placeholders. References a declared table now matches move to it, and
    /// placeholders left without edges are removed.
    fn rebind_placeholders(&self, graph: &mut GraphData, report: &mut BatchReport) -> Result<()> {
        let pending = graph.take_placeholder_refs();
        if pending.is_empty() {
            return Ok(());
        }
        debug!(pending = pending.len(), "re-resolving placeholder table references");
        let mut vacated = BTreeSet::new();
        let mut pending = pending.into_iter();
        while let Some(entry) = pending.next() {
            match self.rebind(graph, &entry, report) {
                Ok(true) => {
                    vacated.insert(entry.placeholder);
                }
                Ok(false) => {}
                Err(err) => {
                    for entry in std::iter::once(entry).chain(pending) {
                        if graph.contains_node(&entry.source) && graph.contains_node(&entry.placeholder) {
                            graph.record_placeholder_ref(entry);
                        }
                    }
                    return Err(err);
                }
            }
        }

        for id in vacated {
            let unused = graph.node(&id).is_some_and(Node::is_placeholder)
                && graph.in_degree(&id) == 0
                && graph.out_degree(&id) == 0;
            if unused && graph.remove_node(&id).is_some() {
                report.placeholders_removed += 1;
                debug!(table = %id, "removed placeholder table");
            }
        }
        Ok(())
    }

    /// Returns whether the reference left its placeholder.
    fn rebind(
        &self,
        graph: &mut GraphData,
        entry: &PlaceholderReference,
        report: &mut BatchReport,
    ) -> Result<bool> {
        let Some(source) = graph.node(&entry.source).cloned() else {
            return Ok(false);
        };
        let outcome =
            ReferenceResolver::new(graph, self.config.enforce_schema).resolve(&source, &entry.hint);
        let candidates = match outcome {
            ResolveOutcome::Resolved(candidates) => candidates,
            ResolveOutcome::Rejected(_) | ResolveOutcome::Unresolved(_) => {
                graph.record_placeholder_ref(entry.clone());
                return Ok(false);
            }
        };
        // The placeholder itself has since been declared; its edge already
        // matches what the lookup produces.
        if candidates.iter().any(|c| c.target == entry.placeholder) {
            return Ok(false);
        }

        graph.remove_edge(&entry.source, &entry.placeholder, entry.relation);
        if candidates.len() > 1 {
            report.ambiguous_hints += 1;
        }
        for candidate in candidates {
            debug!(
                source = %source.id,
                from = %entry.placeholder,
                target = %candidate.target,
                "placeholder reference rebound"
            );
            self.commit_edge(graph, candidate_edge(&source.id, candidate), report)?;
        }
        report.deferred_resolved += 1;
        Ok(true)
    }

    /// Resolves one hint and commits the resulting edges. Returns whether any
    /// edge was produced.
    fn resolve_hint(
        &self,
        graph: &mut GraphData,
        source_id: &str,
        hint: &ReferenceHint,
        source_path: &str,
        report: &mut BatchReport,
        deferred: bool,
    ) -> Result<bool> {
        let source = graph.node(source_id).cloned().ok_or_else(|| {
            LayerGraphError::InvariantViolation(format!(
                "reference hint bound to missing node {}",
                source_id
            ))
        })?;

        let outcome = ReferenceResolver::new(graph, self.config.enforce_schema).resolve(&source, hint);
        match outcome {
            ResolveOutcome::Resolved(candidates) => {
                if candidates.len() > 1 {
                    report.ambiguous_hints += 1;
                }
                for candidate in candidates {
                    debug!(
                        source = %source.id,
                        target = %candidate.target,
                        relation = %candidate.relation,
                        confidence = candidate.confidence,
                        resolution = candidate.resolution.as_str(),
                        "reference resolved"
                    );
                    self.commit_edge(graph, candidate_edge(&source.id, candidate), report)?;
                }
                graph.clear_unresolved(&source.id, hint);
                report.hints_resolved += 1;
                Ok(true)
            }
            ResolveOutcome::Rejected(violations) => {
                for violation in &violations {
                    warn!(
                        source = %violation.source,
                        target = %violation.target,
                        relation = %violation.relation,
                        reason = %violation.reason,
                        "edge rejected by schema"
                    );
                }
                graph.clear_unresolved(&source.id, hint);
                report.schema_violations.extend(violations);
                Ok(false)
            }
            ResolveOutcome::Unresolved(reason) => {
                if hint.kind == HintKind::TableRef && self.config.materialize_tables {
                    return self.materialize_table(graph, &source, hint, source_path, report);
                }
                debug!(source = %source.id, raw = %hint.raw_value, reason = %reason, "reference unresolved");
                let added = graph.record_unresolved(UnresolvedReference {
                    source: source.id.clone(),
                    hint: hint.clone(),
                    source_path: source_path.to_string(),
                    reason,
                });
                if added && !deferred {
                    report.unresolved += 1;
                }
                Ok(false)
            }
        }
    }

    /// Creates a placeholder table for a table name nobody declared and
    /// remembers the reference so a later declaration can take it over.
    fn materialize_table(
        &self,
        graph: &mut GraphData,
        source: &Node,
        hint: &ReferenceHint,
        source_path: &str,
        report: &mut BatchReport,
    ) -> Result<bool> {
        let placeholder = Node::new(NodeKind::Table, hint.raw_value.trim())
            .with_property(PLACEHOLDER_PROPERTY, json!(true));
        let relation = infer_relation(hint, source.kind, NodeKind::Table);
        if self.config.enforce_schema {
            if let Err(violation) =
                GraphSchema::check(&source.id, source.kind, relation, &placeholder.id, NodeKind::Table)
            {
                warn!(source = %source.id, reason = %violation.reason, "placeholder table rejected by schema");
                report.schema_violations.push(violation);
                return Ok(false);
            }
        }

        let target = placeholder.id.clone();
        if graph.upsert_node(placeholder) == Upsert::Created {
            report.materialized += 1;
            debug!(table = %target, "materialized placeholder table");
        }
        if graph.node(&target).is_some_and(Node::is_placeholder) {
            graph.record_placeholder_ref(PlaceholderReference {
                source: source.id.clone(),
                placeholder: target.clone(),
                relation,
                hint: hint.clone(),
                source_path: source_path.to_string(),
            });
        }
        // Same edge a later exact lookup of the placeholder would produce.
        let mut edge = Edge::new(source.id.clone(), target, relation);
        edge.attributes.extend(hint.attributes.clone());
        edge = edge.with_resolution(Resolution::Exact);
        self.commit_edge(graph, edge, report)?;
        graph.clear_unresolved(&source.id, hint);
        report.hints_resolved += 1;
        Ok(true)
    }

    fn commit_edge(&self, graph: &mut GraphData, edge: Edge, report: &mut BatchReport) -> Result<()> {
        match graph.upsert_edge(edge)? {
            Upsert::Created => report.edges_created += 1,
            Upsert::Merged => report.edges_merged += 1,
            Upsert::Unchanged => {}
        }
        Ok(())
    }
}

fn candidate_edge(source: &str, candidate: Candidate) -> Edge {
    let mut edge = Edge::new(source.to_string(), candidate.target, candidate.relation)
        .with_confidence(candidate.confidence);
    edge.attributes = candidate.attributes;
    edge
}

#[cfg(test)]
mod tests {
    use super::*;
    use layergraph_core::{NodeDraft, Relation};

    fn engine() -> ConstructionEngine {
        ConstructionEngine::new(Arc::new(GraphStore::new()), IngestConfig::default())
    }

    fn mapper_record() -> AnalysisRecord {
        AnalysisRecord::new("mappers/UserMapper.xml")
            .with_node(NodeDraft::new(NodeKind::DataMapper, "com.acme.UserMapper"))
            .with_hint(ReferenceHint::new(HintKind::TableRef, "users"))
    }

    #[test]
    fn malformed_records_do_not_abort_the_batch() {
        let engine = engine();
        let report = engine
            .ingest_batch(vec![AnalysisRecord::new(""), mapper_record()])
            .unwrap();
        assert_eq!(report.records_received, 2);
        assert_eq!(report.records_ingested, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].index, 0);
        assert_eq!(engine.store().node_count(), 2);
        let err: LayerGraphError = report.errors[0].clone().into();
        assert!(matches!(err, LayerGraphError::MalformedRecord { index: 0, .. }));
    }

    #[test]
    fn undeclared_tables_are_materialized() {
        let engine = engine();
        let report = engine.ingest(mapper_record()).unwrap();
        assert_eq!(report.materialized, 1);
        let graph = engine.store().read();
        let table = graph.node("table:users").unwrap();
        assert_eq!(table.properties["placeholder"], json!(true));
        let edge = graph
            .edge("mapper:com.acme.UserMapper", "table:users", Relation::Queries)
            .unwrap();
        assert_eq!(edge.resolution(), Some("exact"));
        assert_eq!(engine.store().read().node_count(), 2);
    }

    #[test]
    fn materialization_can_be_disabled() {
        let config = IngestConfig {
            materialize_tables: false,
            ..Default::default()
        };
        let engine = ConstructionEngine::new(Arc::new(GraphStore::new()), config);
        let report = engine.ingest(mapper_record()).unwrap();
        assert_eq!(report.unresolved, 1);
        assert_eq!(engine.store().read().unresolved_count(), 1);
    }

    #[test]
    fn later_batches_resolve_earlier_references() {
        let engine = engine();
        let first = engine
            .ingest(
                AnalysisRecord::new("UserService.java")
                    .with_node(NodeDraft::new(NodeKind::BusinessService, "com.acme.UserService"))
                    .with_hint(ReferenceHint::new(HintKind::Dependency, "com.acme.UserMapper")),
            )
            .unwrap();
        assert_eq!(first.unresolved, 1);

        let second = engine.ingest(mapper_record()).unwrap();
        assert_eq!(second.deferred_resolved, 1);
        let graph = engine.store().read();
        assert_eq!(graph.unresolved_count(), 0);
        assert!(graph
            .edge("service:com.acme.UserService", "mapper:com.acme.UserMapper", Relation::Calls)
            .is_some());
    }

    #[test]
    fn generation_advances_per_batch() {
        let engine = engine();
        assert_eq!(engine.ingest(mapper_record()).unwrap().generation, 1);
        assert_eq!(engine.ingest(mapper_record()).unwrap().generation, 2);
    }

    #[test]
    fn undecodable_values_become_record_errors() {
        let engine = engine();
        let report = engine
            .ingest_values(vec![
                json!({ "sourcePath": "broken.xml", "nodes": [{ "type": "Widget" }] }),
                serde_json::to_value(mapper_record()).unwrap(),
            ])
            .unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].source_path, "broken.xml");
        assert_eq!(report.records_ingested, 1);
    }

    #[test]
    fn empty_hints_are_rejected_individually() {
        let engine = engine();
        let report = engine
            .ingest(mapper_record().with_hint(ReferenceHint::new(HintKind::TableRef, "  ")))
            .unwrap();
        assert_eq!(report.rejected_hints, 1);
        assert_eq!(report.errors.len(), 0);
    }

    fn pending(source: &str, raw: &str) -> UnresolvedReference {
        UnresolvedReference {
            source: source.to_string(),
            hint: ReferenceHint::new(HintKind::Dependency, raw),
            source_path: "A.java".to_string(),
            reason: "no node matches".to_string(),
        }
    }

    #[test]
    fn failed_batches_still_advance_the_generation() {
        let engine = engine();
        {
            let mut graph = engine.store().write();
            graph.upsert_node(Node::new(NodeKind::BusinessService, "com.acme.A"));
            // Sorts before the valid entry and points at a node that is gone.
            graph.record_unresolved(pending("mapper:com.acme.Ghost", "com.acme.Missing"));
            graph.record_unresolved(pending("service:com.acme.A", "com.acme.Missing"));
        }

        let err = engine.ingest(mapper_record()).unwrap_err();
        assert!(matches!(err, LayerGraphError::InvariantViolation(_)));
        assert_eq!(engine.store().generation(), 1);

        let graph = engine.store().read();
        assert!(graph.node("mapper:com.acme.UserMapper").is_some());
        assert_eq!(graph.unresolved_for("service:com.acme.A").len(), 1);
        assert!(graph.unresolved_for("mapper:com.acme.Ghost").is_empty());
    }

    #[test]
    fn failed_retry_keeps_untried_references_pending() {
        let engine = engine();
        let mut graph = engine.store().write();
        graph.upsert_node(Node::new(NodeKind::BusinessService, "com.acme.A"));
        graph.upsert_node(Node::new(NodeKind::BusinessService, "com.acme.B"));
        graph.record_unresolved(pending("mapper:com.acme.Ghost", "com.acme.Missing"));
        graph.record_unresolved(pending("service:com.acme.A", "com.acme.Missing"));
        graph.record_unresolved(pending("service:com.acme.B", "com.acme.Other"));

        let mut report = BatchReport::default();
        assert!(engine.retry_unresolved(&mut graph, &mut report).is_err());
        assert_eq!(graph.unresolved_count(), 2);
        graph.verify_integrity().unwrap();
    }

    #[test]
    fn rebinding_follows_the_declared_table() {
        let engine = engine();
        engine.ingest(mapper_record()).unwrap();
        {
            let graph = engine.store().read();
            let refs: Vec<_> = graph.placeholder_refs().collect();
            assert_eq!(refs.len(), 1);
            assert_eq!(refs[0].placeholder, "table:users");
            assert_eq!(refs[0].relation, Relation::Queries);
        }

        // An unrelated node alone does not move the reference.
        engine
            .ingest(
                AnalysisRecord::new("db/orders.sql")
                    .with_node(NodeDraft::new(NodeKind::Table, "app.orders")),
            )
            .unwrap();
        assert_eq!(engine.store().read().placeholder_refs().count(), 1);

        let report = engine
            .ingest(
                AnalysisRecord::new("db/users.sql")
                    .with_node(NodeDraft::new(NodeKind::Table, "app.users")),
            )
            .unwrap();
        assert_eq!(report.placeholders_removed, 1);
        let graph = engine.store().read();
        assert_eq!(graph.placeholder_refs().count(), 0);
        let edge = graph
            .edge("mapper:com.acme.UserMapper", "table:app.users", Relation::Queries)
            .unwrap();
        assert_eq!(edge.resolution(), Some("exact"));
        assert!(graph
            .edge("mapper:com.acme.UserMapper", "table:users", Relation::Queries)
            .is_none());
    }
}
