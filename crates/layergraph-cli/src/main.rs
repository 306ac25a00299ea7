use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use layergraph_core::{ConfigManager, Settings};
use layergraph_graph::{ConstructionEngine, GraphDiff, GraphSnapshot, GraphStore};
use layergraph_mcp_tools::GraphToolExecutor;
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{builder::Builder, settings::Style};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "layergraph")]
#[command(about = "LayerGraph CLI - Cross-layer dependency graph of web applications", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty, table)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration directory (defaults to ~/.layergraph, then ./config)
    #[arg(long, global = true, env = "LAYERGRAPH_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Configuration environment (selects <env>.toml)
    #[arg(long, global = true)]
    env: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
    Table,
}

/// Where the graph a command works on comes from.
#[derive(Args, Clone)]
struct GraphSource {
    /// Snapshot to start from
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Record file or directory to ingest (JSON object, array, or JSON lines); repeatable
    #[arg(long)]
    records: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest analysis records and print the batch report
    Ingest {
        /// Record files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Snapshot to ingest into
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Write the resulting snapshot here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Query the graph
    Query {
        #[command(flatten)]
        source: GraphSource,

        #[command(subcommand)]
        query: QueryCommands,
    },

    /// Export the graph as a snapshot
    Export {
        #[command(flatten)]
        source: GraphSource,

        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Compare two snapshots
    Diff {
        /// Snapshot before the change
        before: PathBuf,

        /// Snapshot after the change
        after: PathBuf,
    },

    /// Answer JSON-lines tool requests on stdin, one response per line on stdout
    Serve {
        #[command(flatten)]
        source: GraphSource,
    },
}

#[derive(Subcommand)]
enum QueryCommands {
    /// Paths from one node to another
    Chains {
        start: String,
        end: String,
        #[arg(long)]
        max_depth: Option<usize>,
        #[arg(long)]
        max_paths: Option<usize>,
    },

    /// Everything that depends on a node
    Impact {
        node: String,
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Everything a node depends on
    Dependencies {
        node: String,
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Nodes of a type without incoming edges
    Orphans {
        /// Node type (View, Endpoint, BusinessService, DataMapper, Table, StoredProcedure, ScheduledJob)
        node_type: String,
    },

    /// Elementary cycles
    Cycles {
        #[arg(long)]
        max_cycles: Option<usize>,
    },

    /// Adjacent nodes
    Neighbors {
        node: String,
        #[arg(long, default_value = "outgoing")]
        direction: String,
        #[arg(long)]
        relation: Option<String>,
    },

    /// Fewest-hop path between two nodes
    ShortestPath { start: String, end: String },

    /// The given nodes and the edges between them
    Subgraph {
        #[arg(required = true)]
        nodes: Vec<String>,
        /// Also include direct neighbours
        #[arg(long)]
        neighbors: bool,
    },

    /// Graph statistics
    Stats,
}

impl QueryCommands {
    /// Tool method and arguments answering this query.
    fn to_tool_call(&self) -> (&'static str, JsonValue) {
        match self {
            QueryCommands::Chains {
                start,
                end,
                max_depth,
                max_paths,
            } => (
                "find_chains",
                json!({"start": start, "end": end, "max_depth": max_depth, "max_paths": max_paths}),
            ),
            QueryCommands::Impact { node, max_depth } => (
                "find_impact",
                json!({"node_id": node, "max_depth": max_depth}),
            ),
            QueryCommands::Dependencies { node, max_depth } => (
                "find_dependencies",
                json!({"node_id": node, "max_depth": max_depth}),
            ),
            QueryCommands::Orphans { node_type } => {
                ("find_orphans", json!({ "node_type": node_type }))
            }
            QueryCommands::Cycles { max_cycles } => {
                ("find_cycles", json!({ "max_cycles": max_cycles }))
            }
            QueryCommands::Neighbors {
                node,
                direction,
                relation,
            } => (
                "neighbors",
                json!({"node_id": node, "direction": direction, "relation": relation}),
            ),
            QueryCommands::ShortestPath { start, end } => {
                ("shortest_path", json!({"start": start, "end": end}))
            }
            QueryCommands::Subgraph { nodes, neighbors } => (
                "extract_subgraph",
                json!({"node_ids": nodes, "include_neighbors": neighbors}),
            ),
            QueryCommands::Stats => ("graph_stats", json!({})),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigManager::new(cli.config_dir.clone(), cli.env.clone())
        .context("Failed to load configuration")?;
    init_tracing(&config.settings().logging.level, cli.verbose);
    log_config_source(&config);
    let settings = config.into_settings();

    match execute_command(&cli, &settings).await {
        Ok(Some(output)) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr so stdout carries only command output.
/// Only called once the subscriber is installed; earlier events are lost.
fn log_config_source(config: &ConfigManager) {
    info!(config_dir = ?config.config_dir(), env = config.env(), "Using config directory");
}

fn init_tracing(level: &str, verbose: bool) {
    let fallback = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

async fn execute_command(cli: &Cli, settings: &Settings) -> Result<Option<JsonValue>> {
    match &cli.command {
        Commands::Ingest {
            paths,
            snapshot,
            out,
        } => {
            let store = open_store(snapshot.as_deref())?;
            let engine = ConstructionEngine::new(store.clone(), settings.ingest.clone());
            let report = engine
                .ingest_values(load_record_values(paths)?)
                .context("Failed to ingest records")?;
            if let Some(out) = out {
                store
                    .snapshot()
                    .save(out)
                    .with_context(|| format!("Failed to write snapshot to {}", out.display()))?;
                info!(path = %out.display(), "snapshot written");
            }
            Ok(Some(serde_json::to_value(report)?))
        }

        Commands::Query { source, query } => {
            let executor = build_executor(source, settings)?;
            let (tool, params) = query.to_tool_call();
            let response = executor.execute(tool, params);
            if let Some(error) = response.get("error") {
                bail!(
                    "{} ({})",
                    error["message"].as_str().unwrap_or("query failed"),
                    error["code"].as_str().unwrap_or("error")
                );
            }
            Ok(Some(response["result"].clone()))
        }

        Commands::Export { source, out } => {
            let executor = build_executor(source, settings)?;
            let snapshot = executor.query_engine().snapshot();
            match out {
                Some(out) => {
                    snapshot
                        .save(out)
                        .with_context(|| format!("Failed to write snapshot to {}", out.display()))?;
                    Ok(Some(json!({
                        "path": out.display().to_string(),
                        "nodes": snapshot.nodes.len(),
                        "edges": snapshot.edges.len(),
                        "unresolved": snapshot.unresolved.len(),
                    })))
                }
                None => {
                    println!("{}", snapshot.to_json_pretty()?);
                    Ok(None)
                }
            }
        }

        Commands::Diff { before, after } => {
            let before = GraphSnapshot::load(before)
                .with_context(|| format!("Failed to read snapshot {}", before.display()))?;
            let after = GraphSnapshot::load(after)
                .with_context(|| format!("Failed to read snapshot {}", after.display()))?;
            Ok(Some(serde_json::to_value(GraphDiff::between(&before, &after))?))
        }

        Commands::Serve { source } => {
            let executor = Arc::new(build_executor(source, settings)?);
            serve_stdio(executor).await?;
            Ok(None)
        }
    }
}

fn open_store(snapshot: Option<&Path>) -> Result<Arc<GraphStore>> {
    let store = match snapshot {
        Some(path) => GraphStore::load_snapshot(path)
            .with_context(|| format!("Failed to load snapshot {}", path.display()))?,
        None => GraphStore::new(),
    };
    Ok(Arc::new(store))
}

fn build_executor(source: &GraphSource, settings: &Settings) -> Result<GraphToolExecutor> {
    let store = open_store(source.snapshot.as_deref())?;
    let executor = GraphToolExecutor::from_settings(store, settings);
    if !source.records.is_empty() {
        let report = executor
            .construction_engine()
            .ingest_values(load_record_values(&source.records)?)
            .context("Failed to ingest records")?;
        for error in &report.errors {
            eprintln!(
                "{} record #{} ({}): {}",
                "Skipped".yellow().bold(),
                error.index,
                error.source_path,
                error.reason
            );
        }
    }
    Ok(executor)
}

/// Record values from files and directories, in path order.
///
/// A file holds one record, an array of records, or one record per line.
/// Lines that are not JSON are passed on as strings so ingestion reports them
/// as malformed records.
fn load_record_values(paths: &[PathBuf]) -> Result<Vec<JsonValue>> {
    let mut values = Vec::new();
    for path in expand_paths(paths)? {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let before = values.len();
        parse_records(&content, &mut values);
        debug!(path = %path.display(), records = values.len() - before, "record file loaded");
    }
    Ok(values)
}

fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("Failed to list {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && matches!(
                            p.extension().and_then(|e| e.to_str()),
                            Some("json") | Some("jsonl")
                        )
                })
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn parse_records(content: &str, values: &mut Vec<JsonValue>) {
    match serde_json::from_str::<JsonValue>(content) {
        Ok(JsonValue::Array(items)) => values.extend(items),
        Ok(value) => values.push(value),
        Err(_) => values.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| {
                    serde_json::from_str(line).unwrap_or_else(|_| JsonValue::String(line.to_string()))
                }),
        ),
    }
}

/// JSON-lines request loop: `{"id", "method", "params"}` in, `{"id", ...}` out.
async fn serve_stdio(executor: Arc<GraphToolExecutor>) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut buf = String::new();
    info!("serving tool requests on stdin");
    loop {
        buf.clear();
        let n = reader
            .read_line(&mut buf)
            .await
            .context("Failed to read request")?;
        if n == 0 {
            break;
        }
        if buf.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<JsonValue>(&buf) {
            Ok(request) => {
                let executor = executor.clone();
                tokio::task::spawn_blocking(move || handle_request(&executor, request))
                    .await
                    .context("Request handler panicked")?
            }
            Err(e) => json!({
                "id": null,
                "error": {"code": "parse_error", "message": format!("parse error: {}", e)}
            }),
        };
        let line = serde_json::to_string(&response)?;
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    info!(cache = ?executor.cache_stats(), "stdin closed, shutting down");
    Ok(())
}

fn handle_request(executor: &GraphToolExecutor, request: JsonValue) -> JsonValue {
    let id = request.get("id").cloned().unwrap_or(JsonValue::Null);
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or(JsonValue::Null);
    let mut response = executor.execute(method, params);
    if let Some(obj) = response.as_object_mut() {
        obj.insert("id".to_string(), id);
    }
    response
}

fn print_output(format: &OutputFormat, value: &JsonValue) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value, 0);
        }
        OutputFormat::Table => {
            print_table(value);
        }
    }
    Ok(())
}

fn print_pretty(value: &JsonValue, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        JsonValue::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    JsonValue::String(s) => println!("{}{}: {}", pad, key_colored, s.green()),
                    JsonValue::Number(n) => {
                        println!("{}{}: {}", pad, key_colored, n.to_string().yellow())
                    }
                    JsonValue::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}{}: {}", pad, key_colored, val_colored);
                    }
                    JsonValue::Null => println!("{}{}: {}", pad, key_colored, "-".dimmed()),
                    JsonValue::Array(items) if items.is_empty() => {
                        println!("{}{}: {}", pad, key_colored, "[]".dimmed())
                    }
                    _ => {
                        println!("{}{}:", pad, key_colored);
                        print_pretty(val, indent + 1);
                    }
                }
            }
        }
        JsonValue::Array(arr) => {
            if arr.is_empty() {
                println!("{}{}", pad, "(none)".dimmed());
            }
            for (i, item) in arr.iter().enumerate() {
                match item {
                    JsonValue::Object(_) | JsonValue::Array(_) => {
                        println!("{}{}{}:", pad, "Item ".cyan(), (i + 1).to_string().yellow());
                        print_pretty(item, indent + 1);
                    }
                    _ => println!("{}- {}", pad, scalar_text(item)),
                }
            }
        }
        _ => println!("{}{}", pad, scalar_text(value)),
    }
}

fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Rows for arrays of objects, key/value pairs otherwise. The largest array
/// of an object result is tabulated on its own below the summary.
fn print_table(value: &JsonValue) {
    match value {
        JsonValue::Array(items) => println!("{}", rows_table(items)),
        JsonValue::Object(map) => {
            let mut builder = Builder::default();
            builder.push_record(["key".to_string(), "value".to_string()]);
            let largest = map
                .iter()
                .filter_map(|(k, v)| v.as_array().map(|items| (k, items)))
                .filter(|(_, items)| items.iter().all(JsonValue::is_object))
                .max_by_key(|(_, items)| items.len());
            for (key, val) in map {
                if largest.is_some_and(|(k, _)| k == key) {
                    continue;
                }
                builder.push_record([key.clone(), cell_text(val)]);
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            println!("{}", table);
            if let Some((key, items)) = largest {
                println!("{}", key.cyan().bold());
                println!("{}", rows_table(items));
            }
        }
        other => println!("{}", scalar_text(other)),
    }
}

fn rows_table(items: &[JsonValue]) -> String {
    let mut columns: Vec<String> = Vec::new();
    for item in items {
        if let Some(obj) = item.as_object() {
            for key in obj.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let mut builder = Builder::default();
    if columns.is_empty() {
        builder.push_record(["value".to_string()]);
        for item in items {
            builder.push_record([scalar_text(item)]);
        }
    } else {
        builder.push_record(columns.clone());
        for item in items {
            builder.push_record(columns.iter().map(|c| cell_text(&item[c.as_str()])));
        }
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

fn cell_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(_) | JsonValue::Array(_) => {
            let text = value.to_string();
            if text.chars().count() > 80 {
                let head: String = text.chars().take(77).collect();
                format!("{}...", head)
            } else {
                text
            }
        }
        other => scalar_text(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn config_source_is_logged_after_tracing_starts() {
        let captured = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(captured.clone())
            .finish();
        let dir = TempDir::new().unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let config =
                ConfigManager::new(Some(dir.path().to_path_buf()), Some("test".to_string())).unwrap();
            ConfigManager::default_config_dir();
            assert_eq!(captured.text(), "");

            log_config_source(&config);
        });
        let logs = captured.text();
        assert!(logs.contains("Using config directory"), "{}", logs);
        assert!(logs.contains("env=\"test\"") || logs.contains("env=test"), "{}", logs);
    }

    #[test]
    fn record_files_accept_object_array_and_json_lines() {
        let mut values = Vec::new();
        parse_records(r#"{"sourcePath": "a.jsp"}"#, &mut values);
        parse_records(r#"[{"sourcePath": "b.jsp"}, {"sourcePath": "c.jsp"}]"#, &mut values);
        parse_records(
            "{\"sourcePath\": \"d.jsp\"}\n\n{\"sourcePath\": \"e.jsp\"}\nnot json\n",
            &mut values,
        );

        let paths: Vec<_> = values
            .iter()
            .map(|v| v["sourcePath"].as_str().unwrap_or("?"))
            .collect();
        assert_eq!(paths, vec!["a.jsp", "b.jsp", "c.jsp", "d.jsp", "e.jsp", "?"]);
        assert_eq!(values[5], JsonValue::String("not json".to_string()));
    }

    #[test]
    fn directories_expand_to_sorted_record_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        fs::write(dir.path().join("a.jsonl"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = expand_paths(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jsonl", "b.json"]);
    }

    #[test]
    fn query_commands_map_to_tool_calls() {
        let (tool, params) = QueryCommands::Chains {
            start: "view:a".into(),
            end: "table:b".into(),
            max_depth: Some(3),
            max_paths: None,
        }
        .to_tool_call();
        assert_eq!(tool, "find_chains");
        assert_eq!(params["max_depth"], 3);
        assert!(params["max_paths"].is_null());

        assert_eq!(QueryCommands::Stats.to_tool_call().0, "graph_stats");

        let (method, args) = QueryCommands::Subgraph {
            nodes: vec!["table:orders".to_string()],
            neighbors: true,
        }
        .to_tool_call();
        assert_eq!(method, "extract_subgraph");
        assert_eq!(args, json!({"node_ids": ["table:orders"], "include_neighbors": true}));
    }

    #[test]
    fn serve_requests_echo_their_id() {
        let executor =
            GraphToolExecutor::from_settings(Arc::new(GraphStore::new()), &Settings::default());
        let response = handle_request(
            &executor,
            json!({"id": 7, "method": "find_orphans", "params": {"node_type": "View"}}),
        );
        assert_eq!(response["id"], 7);
        assert_eq!(response["result"], json!([]));

        let response = handle_request(&executor, json!({"id": "x", "method": "nope"}));
        assert_eq!(response["id"], "x");
        assert_eq!(response["error"]["code"], "unknown_method");
    }
}
