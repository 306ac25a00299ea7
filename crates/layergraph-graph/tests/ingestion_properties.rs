// ABOUTME: Property-style checks of the construction engine under re-ingestion and concurrency.
// ABOUTME: Covers idempotency, dangling edges, confidence monotonicity and deterministic output.

use layergraph_core::{
    AnalysisRecord, HintKind, IngestConfig, NodeDraft, NodeKind, QueryConfig, ReferenceHint,
    Relation,
};
use layergraph_graph::{ConstructionEngine, GraphSnapshot, GraphStore, QueryEngine};
use serde_json::json;
use std::sync::Arc;
use std::thread;

fn records() -> Vec<AnalysisRecord> {
    vec![
        AnalysisRecord::new("jobs/NightlyJob.java")
            .with_node(NodeDraft::new(NodeKind::ScheduledJob, "com.acme.jobs.NightlyJob"))
            .with_hint(ReferenceHint::new(HintKind::ScheduledTarget, "com.acme.OrderService")),
        AnalysisRecord::new("OrderService.java")
            .with_node(NodeDraft::new(NodeKind::BusinessService, "com.acme.OrderService"))
            .with_hint(ReferenceHint::new(HintKind::Dependency, "OrderMapper"))
            .with_hint(ReferenceHint::new(HintKind::ProcedureCall, "sp_close_orders")),
        AnalysisRecord::new("mappers/OrderMapper.xml")
            .with_node(
                NodeDraft::new(NodeKind::DataMapper, "com.acme.OrderMapper")
                    .with_alias("findOpenOrders")
                    .with_confidence(0.8),
            )
            .with_hint(
                ReferenceHint::new(HintKind::TableRef, "orders")
                    .with_attribute("operation", json!("SELECT")),
            ),
        AnalysisRecord::new("db/sp_close_orders.sql")
            .with_node(NodeDraft::new(NodeKind::StoredProcedure, "sp_close_orders"))
            .with_hint(ReferenceHint::new(HintKind::TableRef, "orders"))
            .with_hint(ReferenceHint::new(HintKind::ProcedureCall, "sp_audit")),
        AnalysisRecord::new("db/sp_audit.sql")
            .with_node(NodeDraft::new(NodeKind::StoredProcedure, "sp_audit"))
            .with_hint(ReferenceHint::new(HintKind::ProcedureCall, "sp_close_orders")),
    ]
}

fn engine_with_store() -> (ConstructionEngine, Arc<GraphStore>) {
    let store = Arc::new(GraphStore::new());
    (
        ConstructionEngine::new(store.clone(), IngestConfig::default()),
        store,
    )
}

fn snapshot_json(store: &GraphStore) -> serde_json::Value {
    let mut value = serde_json::to_value(store.snapshot()).unwrap();
    value
        .as_object_mut()
        .unwrap()
        .remove("exportedAt");
    value
}

#[test]
fn reingesting_unchanged_records_is_idempotent() {
    let (engine, store) = engine_with_store();
    engine.ingest_batch(records()).unwrap();
    let first = snapshot_json(&store);

    let report = engine.ingest_batch(records()).unwrap();
    assert_eq!(report.nodes_created, 0);
    assert_eq!(report.edges_created, 0);
    assert_eq!(report.edges_merged, 0);
    assert_eq!(snapshot_json(&store), first);
}

#[test]
fn out_of_order_batches_never_leave_dangling_edges() {
    let (engine, store) = engine_with_store();
    for record in records().into_iter().rev() {
        engine.ingest(record).unwrap();
        store.verify_integrity().unwrap();
    }

    let graph = store.read();
    assert_eq!(graph.unresolved_count(), 0);
    assert!(graph
        .edge("job:com.acme.jobs.NightlyJob", "service:com.acme.OrderService", Relation::Scheduled)
        .is_some());
    assert!(graph
        .edge("service:com.acme.OrderService", "mapper:com.acme.OrderMapper", Relation::Calls)
        .is_some());
    assert!(graph
        .edge("procedure:sp_close_orders", "table:orders", Relation::Queries)
        .is_some());
}

#[test]
fn batch_and_sequential_ingestion_agree() {
    let (batch_engine, batch_store) = engine_with_store();
    batch_engine.ingest_batch(records()).unwrap();

    let (seq_engine, seq_store) = engine_with_store();
    for record in records() {
        seq_engine.ingest(record).unwrap();
    }

    assert_eq!(snapshot_json(&batch_store), snapshot_json(&seq_store));
}

#[test]
fn edge_confidence_never_decreases() {
    let (engine, store) = engine_with_store();
    let view = || {
        AnalysisRecord::new("web/orders.jsp").with_node(NodeDraft::new(NodeKind::View, "web/orders.jsp"))
    };
    let endpoint = AnalysisRecord::new("OrderController.java").with_node(
        NodeDraft::new(NodeKind::Endpoint, "com.acme.OrderController.list")
            .with_property("path", json!("/orders"))
            .with_property("method", json!("GET")),
    );
    engine.ingest(endpoint).unwrap();

    engine
        .ingest(view().with_hint(ReferenceHint::new(HintKind::AjaxCall, "/orders").with_method("GET")))
        .unwrap();
    let key = ("view:web/orders.jsp", "endpoint:com.acme.OrderController.list");
    let strong = store.read().edge(key.0, key.1, Relation::AjaxCall).unwrap().confidence;

    engine
        .ingest(view().with_hint(ReferenceHint::new(HintKind::AjaxCall, "/orders")))
        .unwrap();
    let after = store.read().edge(key.0, key.1, Relation::AjaxCall).unwrap().confidence;
    assert!(after >= strong);
    assert_eq!(after, 0.9);
}

#[test]
fn cycles_between_procedures_are_reported_once() {
    let (engine, store) = engine_with_store();
    engine.ingest_batch(records()).unwrap();
    let query = QueryEngine::new(store, QueryConfig::default());

    let first = query.find_cycles();
    assert_eq!(
        first.cycles,
        vec![vec!["procedure:sp_audit".to_string(), "procedure:sp_close_orders".to_string()]]
    );
    assert_eq!(query.find_cycles(), first);

    let chains = query.find_chains("procedure:sp_audit", "table:orders", 10, 10);
    assert_eq!(chains.paths.len(), 1);
}

#[test]
fn concurrent_producers_build_the_same_graph() {
    let (engine, store) = engine_with_store();
    let engine = Arc::new(engine);

    thread::scope(|scope| {
        for record in records() {
            let engine = Arc::clone(&engine);
            scope.spawn(move || engine.ingest(record).unwrap());
        }
    });

    let (reference_engine, reference_store) = engine_with_store();
    reference_engine.ingest_batch(records()).unwrap();

    store.verify_integrity().unwrap();
    let concurrent: GraphSnapshot = store.snapshot();
    let reference: GraphSnapshot = reference_store.snapshot();
    assert_eq!(concurrent.nodes, reference.nodes);
    assert_eq!(concurrent.edges, reference.edges);
    assert_eq!(store.generation(), 5);
}

fn user_mapper() -> AnalysisRecord {
    AnalysisRecord::new("mappers/UserMapper.xml")
        .with_node(NodeDraft::new(NodeKind::DataMapper, "com.acme.UserMapper"))
        .with_hint(
            ReferenceHint::new(HintKind::TableRef, "users").with_attribute("operation", json!("SELECT")),
        )
}

fn declared_table(qualified_name: &str) -> AnalysisRecord {
    AnalysisRecord::new("db/schema.sql").with_node(NodeDraft::new(NodeKind::Table, qualified_name))
}

#[test]
fn schema_qualified_table_declared_late_takes_over_the_placeholder() {
    let (table_first, table_first_store) = engine_with_store();
    table_first.ingest(declared_table("app.users")).unwrap();
    table_first.ingest(user_mapper()).unwrap();

    let (mapper_first, mapper_first_store) = engine_with_store();
    mapper_first.ingest(user_mapper()).unwrap();
    assert!(mapper_first_store.read().node("table:users").unwrap().is_placeholder());
    let report = mapper_first.ingest(declared_table("app.users")).unwrap();
    assert_eq!(report.deferred_resolved, 1);
    assert_eq!(report.placeholders_removed, 1);

    assert_eq!(snapshot_json(&table_first_store), snapshot_json(&mapper_first_store));
    let graph = mapper_first_store.read();
    assert_eq!(graph.node_count(), 2);
    assert!(graph.node("table:users").is_none());
    assert!(graph
        .edge("mapper:com.acme.UserMapper", "table:app.users", Relation::Queries)
        .is_some());
    assert_eq!(graph.placeholder_refs().count(), 0);
    graph.verify_integrity().unwrap();
}

#[test]
fn declaring_a_materialized_table_clears_its_placeholder_flag() {
    let (table_first, table_first_store) = engine_with_store();
    table_first.ingest(declared_table("users")).unwrap();
    table_first.ingest(user_mapper()).unwrap();

    let (mapper_first, mapper_first_store) = engine_with_store();
    mapper_first.ingest(user_mapper()).unwrap();
    let report = mapper_first.ingest(declared_table("users")).unwrap();
    assert_eq!(report.nodes_merged, 1);
    assert_eq!(report.placeholders_removed, 0);

    assert_eq!(snapshot_json(&table_first_store), snapshot_json(&mapper_first_store));
    let query = QueryEngine::new(mapper_first_store.clone(), QueryConfig::default());
    assert_eq!(query.stats().placeholder_tables, 0);
    let table = query.get_node("table:users").unwrap();
    assert!(!table.is_placeholder());
    assert_eq!(table.source_path.as_deref(), Some("db/schema.sql"));
}

#[test]
fn placeholder_references_survive_a_snapshot_reload() {
    let (engine, store) = engine_with_store();
    engine.ingest(user_mapper()).unwrap();

    let reloaded = Arc::new(GraphStore::from_snapshot(store.snapshot()).unwrap());
    assert_eq!(reloaded.read().placeholder_refs().count(), 1);
    let engine = ConstructionEngine::new(reloaded.clone(), IngestConfig::default());
    engine.ingest(declared_table("app.users")).unwrap();

    let graph = reloaded.read();
    assert!(graph.node("table:users").is_none());
    assert!(graph
        .edge("mapper:com.acme.UserMapper", "table:app.users", Relation::Queries)
        .is_some());
}
