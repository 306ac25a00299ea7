pub mod construction;
pub mod cycles;
pub mod diff;
pub mod merge;
pub mod query;
pub mod resolver;
pub mod schema;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod traversal;
pub mod url_pattern;

pub use construction::{BatchReport, ConstructionEngine, IngestResult, RecordError};
pub use cycles::CycleResult;
pub use diff::{DiffSummary, GraphDiff};
pub use query::QueryEngine;
pub use resolver::{ReferenceResolver, ResolveOutcome};
pub use schema::{GraphSchema, SchemaViolation};
pub use snapshot::{GraphSnapshot, SNAPSHOT_VERSION};
pub use stats::GraphStats;
pub use store::{GraphData, GraphStore, PlaceholderReference, UnresolvedReference, Upsert};
pub use traversal::{
    ChainPath, ChainResult, DependencyResult, Direction, ImpactResult, Neighbor, PathEdge,
    ReachedNode, Subgraph,
};
