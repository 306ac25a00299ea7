// ABOUTME: Drives a view -> endpoint -> service scenario through ingestion and every query.
// ABOUTME: Guards the resolution confidences and query partitions clients rely on.

use approx::assert_relative_eq;
use layergraph_core::{
    AnalysisRecord, HintKind, IngestConfig, NodeDraft, NodeKind, QueryConfig, ReferenceHint,
    Relation,
};
use layergraph_graph::{ConstructionEngine, Direction, GraphStore, QueryEngine};
use serde_json::json;
use std::sync::Arc;

const VIEW: &str = "view:WEB-INF/views/users.jsp";
const ENDPOINT: &str = "endpoint:com.acme.web.UserController.getUser";
const SERVICE: &str = "service:com.acme.service.UserService";

fn view_record() -> AnalysisRecord {
    AnalysisRecord::new("WEB-INF/views/users.jsp")
        .with_node(NodeDraft::new(NodeKind::View, "WEB-INF/views/users.jsp"))
        .with_hint(ReferenceHint::new(HintKind::AjaxCall, "/users/42").with_method("GET"))
}

fn controller_record() -> AnalysisRecord {
    AnalysisRecord::new("src/main/java/com/acme/web/UserController.java")
        .with_node(
            NodeDraft::new(NodeKind::Endpoint, "com.acme.web.UserController.getUser")
                .with_property("path", json!("/users/{id}"))
                .with_property("method", json!("GET")),
        )
        .with_hint(ReferenceHint::new(HintKind::Dependency, "com.acme.service.UserService"))
}

fn service_record() -> AnalysisRecord {
    AnalysisRecord::new("src/main/java/com/acme/service/UserService.java")
        .with_node(NodeDraft::new(NodeKind::BusinessService, "com.acme.service.UserService"))
}

fn engines() -> (ConstructionEngine, QueryEngine) {
    let store = Arc::new(GraphStore::new());
    (
        ConstructionEngine::new(store.clone(), IngestConfig::default()),
        QueryEngine::new(store, QueryConfig::default()),
    )
}

#[test]
fn view_to_service_scenario() {
    let (engine, query) = engines();
    let report = engine
        .ingest_batch(vec![view_record(), controller_record(), service_record()])
        .unwrap();
    assert_eq!(report.nodes_created, 3);
    assert_eq!(report.edges_created, 2);
    assert_eq!(report.unresolved, 0);

    let graph = engine.store().read();
    let ajax = graph.edge(VIEW, ENDPOINT, Relation::AjaxCall).unwrap();
    assert_relative_eq!(ajax.confidence, 0.9);
    assert_eq!(ajax.attributes["url"], json!("/users/42"));
    assert_eq!(ajax.attributes["method"], json!("GET"));
    assert_eq!(ajax.resolution(), Some("pattern"));

    let invokes = graph.edge(ENDPOINT, SERVICE, Relation::Invokes).unwrap();
    assert_relative_eq!(invokes.confidence, 1.0);
    assert_eq!(invokes.resolution(), Some("exact"));
    drop(graph);

    let chains = query.find_chains(VIEW, SERVICE, 2, 10);
    assert!(!chains.truncated);
    assert_eq!(chains.paths.len(), 1);
    assert_eq!(chains.paths[0].len(), 2);
    assert_eq!(chains.paths[0].nodes, vec![VIEW, ENDPOINT, SERVICE]);

    assert!(query.find_orphans(NodeKind::BusinessService).is_empty());
    let orphan_views: Vec<_> = query
        .find_orphans(NodeKind::View)
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(orphan_views, vec![VIEW]);

    let impact = query.find_impact(SERVICE, 2);
    assert_eq!(impact.direct.len(), 1);
    assert_eq!(impact.direct[0].node.id, ENDPOINT);
    assert_eq!(impact.indirect.len(), 1);
    assert_eq!(impact.indirect[0].node.id, VIEW);
    assert_eq!(impact.ui.len(), 1);
    assert_eq!(impact.ui[0].node.id, VIEW);

    let deps = query.find_dependencies(VIEW, 5);
    let dep_ids: Vec<_> = deps.nodes.iter().map(|r| r.node.id.as_str()).collect();
    assert_eq!(dep_ids, vec![ENDPOINT, SERVICE]);

    assert!(query.find_cycles().cycles.is_empty());
}

#[test]
fn scenario_is_order_independent_across_batches() {
    let (engine, query) = engines();
    engine.ingest(view_record()).unwrap();
    engine.ingest(controller_record()).unwrap();
    assert_eq!(query.unresolved_references(None).len(), 1);
    engine.ingest(service_record()).unwrap();

    assert!(query.unresolved_references(None).is_empty());
    assert_eq!(query.find_chains(VIEW, SERVICE, 2, 10).paths.len(), 1);
    engine.store().verify_integrity().unwrap();
}

#[test]
fn secondary_queries_cover_the_scenario() {
    let (engine, query) = engines();
    engine
        .ingest_batch(vec![service_record(), controller_record(), view_record()])
        .unwrap();

    let path = query.shortest_path(VIEW, SERVICE).unwrap();
    assert_eq!(path.len(), 2);
    assert_relative_eq!(path.confidence, 0.9);

    let incoming = query.neighbors(ENDPOINT, Direction::Incoming, None);
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].relation, Relation::AjaxCall);

    let by_path = query.node_by_source_path("src/main/java/com/acme/web/UserController.java");
    assert_eq!(by_path.len(), 1);
    assert_eq!(by_path[0].id, ENDPOINT);

    assert_eq!(query.nodes_by_property("method", &json!("GET")).len(), 1);
    assert_eq!(query.nodes_by_type(NodeKind::View, None).len(), 1);

    let stats = query.stats();
    assert_eq!(stats.node_count, 3);
    assert_eq!(stats.edge_count, 2);
    assert_eq!(stats.low_confidence_edges, 1);
    assert_eq!(stats.weakly_connected_components, 1);
    assert_eq!(stats.generation, 1);

    assert!(query.get_node("view:missing.jsp").is_none());
    assert!(query.find_impact("view:missing.jsp", 3).direct.is_empty());
}
