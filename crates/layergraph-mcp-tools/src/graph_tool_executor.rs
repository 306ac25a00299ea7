// ABOUTME: Tool executor dispatching method + JSON argument calls to the layer graph engines
// ABOUTME: Validates arguments, caches read-only results per graph generation and bounds result size

use layergraph_core::{LayerGraphError, NodeKind, Relation, Settings, ToolConfig};
use layergraph_graph::{ConstructionEngine, Direction, GraphStore, QueryEngine};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::graph_tool_schemas::GraphToolSchemas;

const TOOL_PROGRESS_LOG_TARGET: &str = "layergraph::tools";

/// Default max result bytes when no tool configuration is given (~200KB)
const DEFAULT_MAX_RESULT_BYTES: usize = 200_000;

const MAX_DEPTH_LIMIT: u64 = 64;

/// Methods whose result depends on more than the graph contents.
const UNCACHED_TOOLS: [&str; 3] = ["ingest_records", "export_snapshot", "list_tools"];

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown method: {0}")]
    UnknownTool(String),

    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error(transparent)]
    Graph(#[from] LayerGraphError),
}

impl ToolError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ToolError::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_method",
            ToolError::InvalidArgument { .. } => "invalid_argument",
            ToolError::Graph(LayerGraphError::InvariantViolation(_)) => "invariant_violation",
            ToolError::Graph(_) => "graph_error",
        }
    }

    /// Structured error response returned to callers instead of failing the call.
    pub fn to_response(&self) -> JsonValue {
        json!({
            "error": {
                "code": self.code(),
                "message": self.to_string()
            }
        })
    }
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Statistics about LRU cache performance
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Number of cache hits (successful lookups)
    pub hits: u64,
    /// Number of cache misses (lookups that required a graph query)
    pub misses: u64,
    /// Number of entries evicted due to LRU policy
    pub evictions: u64,
    /// Current number of entries in cache
    pub current_size: usize,
    /// Maximum cache size (capacity)
    pub max_size: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Executor for layer graph tools.
///
/// Every call returns a JSON value: `{"tool", "parameters", "result"}` on
/// success and `{"error": {"code", "message"}}` otherwise. Unknown node ids
/// are not errors; they produce empty results.
pub struct GraphToolExecutor {
    engine: Arc<ConstructionEngine>,
    query: QueryEngine,
    /// LRU cache for read-only results (generation + method + params -> response)
    cache: Arc<Mutex<LruCache<String, JsonValue>>>,
    cache_stats: Arc<Mutex<CacheStats>>,
    cache_enabled: bool,
    /// Responses serialized larger than this are truncated
    max_result_bytes: usize,
}

impl GraphToolExecutor {
    /// Create an executor over an existing store using the given settings.
    pub fn from_settings(store: Arc<GraphStore>, settings: &Settings) -> Self {
        let engine = Arc::new(ConstructionEngine::new(
            store.clone(),
            settings.ingest.clone(),
        ));
        let query = QueryEngine::new(store, settings.query.clone());
        Self::new(engine, query, &settings.tools)
    }

    pub fn new(engine: Arc<ConstructionEngine>, query: QueryEngine, config: &ToolConfig) -> Self {
        Self::with_limits(
            engine,
            query,
            config.cache_enabled,
            config.cache_size,
            config.max_result_bytes,
        )
    }

    /// Create a new tool executor with custom cache and result size configuration
    pub fn with_limits(
        engine: Arc<ConstructionEngine>,
        query: QueryEngine,
        cache_enabled: bool,
        cache_size: usize,
        max_result_bytes: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        let cache = Arc::new(Mutex::new(LruCache::new(capacity)));
        let cache_stats = Arc::new(Mutex::new(CacheStats {
            max_size: capacity.get(),
            ..CacheStats::default()
        }));
        let max_result_bytes = if max_result_bytes == 0 {
            DEFAULT_MAX_RESULT_BYTES
        } else {
            max_result_bytes
        };

        info!(
            cache_enabled,
            cache_size = capacity.get(),
            max_result_bytes,
            "GraphToolExecutor initialized"
        );

        Self {
            engine,
            query,
            cache,
            cache_stats,
            cache_enabled,
            max_result_bytes,
        }
    }

    pub fn query_engine(&self) -> &QueryEngine {
        &self.query
    }

    pub fn construction_engine(&self) -> &Arc<ConstructionEngine> {
        &self.engine
    }

    /// Get current cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache_stats.lock().clone()
    }

    /// Clear the cache and reset statistics
    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock();
        cache.clear();
        let mut stats = self.cache_stats.lock();
        stats.hits = 0;
        stats.misses = 0;
        stats.evictions = 0;
        stats.current_size = 0;
    }

    /// Truncate the largest array in the result if the response exceeds `max_result_bytes`.
    fn truncate_if_oversized(&self, tool_name: &str, mut response: JsonValue) -> JsonValue {
        let result_bytes = response.to_string().len();
        if result_bytes <= self.max_result_bytes {
            return response;
        }

        warn!(
            target: TOOL_PROGRESS_LOG_TARGET,
            tool = tool_name,
            result_bytes,
            max_bytes = self.max_result_bytes,
            overflow_ratio = format!("{:.1}x", result_bytes as f64 / self.max_result_bytes as f64),
            "Tool result exceeds max_result_bytes limit, truncating"
        );

        let truncation = {
            let items = match response.get_mut("result") {
                Some(JsonValue::Array(items)) => Some(items),
                Some(JsonValue::Object(fields)) => fields
                    .values_mut()
                    .filter_map(JsonValue::as_array_mut)
                    .max_by_key(|items| items.len()),
                _ => None,
            };
            match items {
                Some(items) if !items.is_empty() => {
                    let item_count = items.len();
                    let bytes_per_item = result_bytes / item_count;
                    let max_items = self.max_result_bytes / bytes_per_item.max(1);
                    let keep_items = max_items.min(item_count).max(1);
                    items.truncate(keep_items);
                    Some((item_count, keep_items))
                }
                _ => None,
            }
        };

        match (truncation, response.as_object_mut()) {
            (Some((item_count, keep_items)), Some(obj)) => {
                info!(
                    target: TOOL_PROGRESS_LOG_TARGET,
                    tool = tool_name,
                    original_items = item_count,
                    kept_items = keep_items,
                    "Truncated result array"
                );
                obj.insert(
                    "_truncated".to_string(),
                    json!({
                        "original_items": item_count,
                        "kept_items": keep_items,
                        "truncated_items": item_count - keep_items,
                        "reason": "Result exceeded max_result_bytes",
                        "max_bytes": self.max_result_bytes
                    }),
                );
            }
            _ => {
                warn!(
                    target: TOOL_PROGRESS_LOG_TARGET,
                    tool = tool_name,
                    result_bytes,
                    "Cannot truncate result without an array, returning as-is"
                );
            }
        }
        response
    }

    /// Cache key from graph generation, tool name, and parameters
    fn cache_key(generation: u64, tool_name: &str, parameters: &JsonValue) -> String {
        format!("{}:{}:{}", generation, tool_name, parameters)
    }

    /// Execute a tool call. Failures come back as `{"error": {...}}` responses.
    pub fn execute(&self, tool_name: &str, parameters: JsonValue) -> JsonValue {
        log_tool_call_start(tool_name, &parameters);
        match self.try_execute(tool_name, parameters) {
            Ok(response) => {
                log_tool_call_finish(tool_name, &response);
                response
            }
            Err(err) => {
                warn!(
                    target: TOOL_PROGRESS_LOG_TARGET,
                    tool = tool_name,
                    code = err.code(),
                    "Tool call failed: {}",
                    err
                );
                err.to_response()
            }
        }
    }

    /// Execute a tool call, surfacing failures as [`ToolError`].
    pub fn try_execute(&self, tool_name: &str, parameters: JsonValue) -> ToolResult<JsonValue> {
        if GraphToolSchemas::get_by_name(tool_name).is_none() {
            return Err(ToolError::UnknownTool(tool_name.to_string()));
        }
        let parameters = match parameters {
            JsonValue::Null => json!({}),
            JsonValue::Object(_) => parameters,
            other => {
                return Err(ToolError::invalid(
                    "parameters",
                    format!("expected an object, got {}", other),
                ))
            }
        };

        let cacheable = self.cache_enabled && !UNCACHED_TOOLS.contains(&tool_name);
        let cache_key = Self::cache_key(self.query.store().generation(), tool_name, &parameters);

        if cacheable {
            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(&cache_key) {
                self.cache_stats.lock().hits += 1;
                debug!(target: TOOL_PROGRESS_LOG_TARGET, "Cache hit for {}", cache_key);
                return Ok(cached.clone());
            }
            drop(cache);
            self.cache_stats.lock().misses += 1;
            debug!(target: TOOL_PROGRESS_LOG_TARGET, "Cache miss for {}", cache_key);
        }

        let result = match tool_name {
            "find_chains" => self.execute_find_chains(&parameters)?,
            "find_impact" => self.execute_find_impact(&parameters)?,
            "find_dependencies" => self.execute_find_dependencies(&parameters)?,
            "find_orphans" => self.execute_find_orphans(&parameters)?,
            "find_cycles" => self.execute_find_cycles(&parameters)?,
            "get_node" => {
                let node_id = required_str(&parameters, "node_id")?;
                to_json(self.query.get_node(node_id))?
            }
            "neighbors" => self.execute_neighbors(&parameters)?,
            "shortest_path" => {
                let start = required_str(&parameters, "start")?;
                let end = required_str(&parameters, "end")?;
                to_json(self.query.shortest_path(start, end))?
            }
            "extract_subgraph" => self.execute_extract_subgraph(&parameters)?,
            "graph_stats" => to_json(self.query.stats())?,
            "unresolved_references" => {
                let node_id = optional_str(&parameters, "node_id")?;
                to_json(self.query.unresolved_references(node_id))?
            }
            "export_snapshot" => to_json(self.query.snapshot())?,
            "ingest_records" => self.execute_ingest_records(&parameters)?,
            "list_tools" => to_json(GraphToolSchemas::all())?,
            _ => return Err(ToolError::UnknownTool(tool_name.to_string())),
        };

        let response = json!({
            "tool": tool_name,
            "parameters": parameters,
            "result": result
        });
        let response = self.truncate_if_oversized(tool_name, response);

        if cacheable {
            let mut cache = self.cache.lock();
            let evicts = !cache.contains(&cache_key) && cache.len() >= cache.cap().get();
            cache.put(cache_key, response.clone());

            let mut stats = self.cache_stats.lock();
            if evicts {
                stats.evictions += 1;
            }
            stats.current_size = cache.len();
        }

        Ok(response)
    }

    fn execute_find_chains(&self, params: &JsonValue) -> ToolResult<JsonValue> {
        let start = required_str(params, "start")?;
        let end = required_str(params, "end")?;
        let defaults = self.query.config();
        let max_depth = depth(params, defaults.default_max_depth)?;
        let max_paths = positive(params, "max_paths", defaults.default_max_paths)?;
        to_json(self.query.find_chains(start, end, max_depth, max_paths))
    }

    fn execute_find_impact(&self, params: &JsonValue) -> ToolResult<JsonValue> {
        let node_id = required_str(params, "node_id")?;
        let max_depth = depth(params, self.query.config().default_max_depth)?;
        to_json(self.query.find_impact(node_id, max_depth))
    }

    fn execute_find_dependencies(&self, params: &JsonValue) -> ToolResult<JsonValue> {
        let node_id = required_str(params, "node_id")?;
        let max_depth = depth(params, self.query.config().default_max_depth)?;
        to_json(self.query.find_dependencies(node_id, max_depth))
    }

    fn execute_find_orphans(&self, params: &JsonValue) -> ToolResult<JsonValue> {
        let kind: NodeKind = required_str(params, "node_type")?
            .parse()
            .map_err(|e: String| ToolError::invalid("node_type", e))?;
        to_json(self.query.find_orphans(kind))
    }

    fn execute_find_cycles(&self, params: &JsonValue) -> ToolResult<JsonValue> {
        let max_cycles = positive(params, "max_cycles", self.query.config().max_cycles)?;
        to_json(self.query.find_cycles_capped(max_cycles))
    }

    fn execute_neighbors(&self, params: &JsonValue) -> ToolResult<JsonValue> {
        let node_id = required_str(params, "node_id")?;
        let direction = match optional_str(params, "direction")? {
            Some(raw) => raw
                .parse::<Direction>()
                .map_err(|e| ToolError::invalid("direction", e))?,
            None => Direction::default(),
        };
        let relation = optional_str(params, "relation")?
            .map(|raw| {
                raw.parse::<Relation>()
                    .map_err(|e| ToolError::invalid("relation", e))
            })
            .transpose()?;
        to_json(self.query.neighbors(node_id, direction, relation))
    }

    fn execute_extract_subgraph(&self, params: &JsonValue) -> ToolResult<JsonValue> {
        let node_ids = required_str_list(params, "node_ids")?;
        let include_neighbors = optional_bool(params, "include_neighbors")?.unwrap_or(false);
        to_json(self.query.subgraph(&node_ids, include_neighbors))
    }

    fn execute_ingest_records(&self, params: &JsonValue) -> ToolResult<JsonValue> {
        let records = params
            .get("records")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| ToolError::invalid("records", "expected an array of records"))?;
        let report = self.engine.ingest_values(records.clone())?;
        info!(
            target: TOOL_PROGRESS_LOG_TARGET,
            records = report.records_received,
            errors = report.errors.len(),
            generation = report.generation,
            "Records ingested through tool call"
        );
        to_json(report)
    }
}

fn to_json<T: Serialize>(value: T) -> ToolResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| ToolError::Graph(e.into()))
}

fn required_str<'a>(params: &'a JsonValue, name: &str) -> ToolResult<&'a str> {
    match params.get(name) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(JsonValue::String(_)) => Err(ToolError::invalid(name, "must not be empty")),
        Some(other) => Err(ToolError::invalid(name, format!("expected a string, got {}", other))),
        None => Err(ToolError::invalid(name, "missing required argument")),
    }
}

fn optional_str<'a>(params: &'a JsonValue, name: &str) -> ToolResult<Option<&'a str>> {
    match params.get(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(_) => required_str(params, name).map(Some),
    }
}

fn required_str_list(params: &JsonValue, name: &str) -> ToolResult<Vec<String>> {
    let items = match params.get(name) {
        Some(JsonValue::Array(items)) if !items.is_empty() => items,
        Some(JsonValue::Array(_)) => return Err(ToolError::invalid(name, "must not be empty")),
        Some(other) => {
            return Err(ToolError::invalid(name, format!("expected an array of strings, got {}", other)))
        }
        None => return Err(ToolError::invalid(name, "missing required argument")),
    };
    items
        .iter()
        .map(|item| match item.as_str().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(ToolError::invalid(name, format!("expected a non-empty string, got {}", item))),
        })
        .collect()
}

fn optional_bool(params: &JsonValue, name: &str) -> ToolResult<Option<bool>> {
    match params.get(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Bool(value)) => Ok(Some(*value)),
        Some(other) => Err(ToolError::invalid(name, format!("expected a boolean, got {}", other))),
    }
}

fn optional_u64(params: &JsonValue, name: &str) -> ToolResult<Option<u64>> {
    match params.get(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| ToolError::invalid(name, format!("expected a non-negative integer, got {}", value))),
    }
}

fn positive(params: &JsonValue, name: &str, default: usize) -> ToolResult<usize> {
    match optional_u64(params, name)? {
        None => Ok(default),
        Some(0) => Err(ToolError::invalid(name, "must be at least 1")),
        Some(n) => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
    }
}

fn depth(params: &JsonValue, default: usize) -> ToolResult<usize> {
    match optional_u64(params, "max_depth")? {
        None => Ok(default),
        Some(n) if (1..=MAX_DEPTH_LIMIT).contains(&n) => Ok(n as usize),
        Some(n) => Err(ToolError::invalid(
            "max_depth",
            format!("{} is outside 1..={}", n, MAX_DEPTH_LIMIT),
        )),
    }
}

fn log_tool_call_start(tool_name: &str, parameters: &JsonValue) {
    info!(
        target: TOOL_PROGRESS_LOG_TARGET,
        tool = tool_name,
        "Tool call started"
    );
    debug!(
        target: TOOL_PROGRESS_LOG_TARGET,
        tool = tool_name,
        "Tool input payload: {}",
        parameters
    );
}

fn log_tool_call_finish(tool_name: &str, result: &JsonValue) {
    info!(
        target: TOOL_PROGRESS_LOG_TARGET,
        tool = tool_name,
        "Tool call completed"
    );
    debug!(
        target: TOOL_PROGRESS_LOG_TARGET,
        tool = tool_name,
        "Tool output payload: {}",
        result
    );
}
