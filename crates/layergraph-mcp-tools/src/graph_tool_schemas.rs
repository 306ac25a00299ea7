// ABOUTME: Tool schemas for the layer graph query and ingestion methods
// ABOUTME: JSON schemas describing parameters of every method the executor accepts

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

const NODE_TYPES: [&str; 7] = [
    "View",
    "Endpoint",
    "BusinessService",
    "DataMapper",
    "Table",
    "StoredProcedure",
    "ScheduledJob",
];

const RELATIONS: [&str; 7] = [
    "Includes",
    "AjaxCall",
    "Invokes",
    "Calls",
    "Queries",
    "Executes",
    "Scheduled",
];

/// Tool schema for method discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

/// Collection of all layer graph tool schemas
pub struct GraphToolSchemas;

impl GraphToolSchemas {
    /// Get all tool schemas
    pub fn all() -> Vec<ToolSchema> {
        vec![
            Self::find_chains(),
            Self::find_impact(),
            Self::find_dependencies(),
            Self::find_orphans(),
            Self::find_cycles(),
            Self::get_node(),
            Self::neighbors(),
            Self::shortest_path(),
            Self::extract_subgraph(),
            Self::graph_stats(),
            Self::unresolved_references(),
            Self::export_snapshot(),
            Self::ingest_records(),
            Self::list_tools(),
        ]
    }

    fn depth_parameter(description: &str) -> JsonValue {
        json!({
            "type": "integer",
            "description": description,
            "minimum": 1,
            "maximum": 64
        })
    }

    pub fn find_chains() -> ToolSchema {
        ToolSchema {
            name: "find_chains".to_string(),
            description: "Enumerate simple directed paths from one node to another, e.g. from a view \
                through its endpoint and services down to the tables it touches. Paths are ordered by \
                length, then by descending confidence."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "start": {
                        "type": "string",
                        "description": "Id of the first node (e.g. 'view:WEB-INF/views/users.jsp')"
                    },
                    "end": {
                        "type": "string",
                        "description": "Id of the last node (e.g. 'table:users')"
                    },
                    "max_depth": Self::depth_parameter("Maximum number of edges per path (defaults to the configured depth)"),
                    "max_paths": {
                        "type": "integer",
                        "description": "Stop after this many paths and report truncated=true",
                        "minimum": 1
                    }
                },
                "required": ["start", "end"]
            }),
        }
    }

    pub fn find_impact() -> ToolSchema {
        ToolSchema {
            name: "find_impact".to_string(),
            description: "Everything that transitively depends on a node, following edges backwards. \
                Returns direct dependents, indirect dependents, and the views (UI) affected."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "node_id": {
                        "type": "string",
                        "description": "Id of the node whose change is being assessed (e.g. 'table:orders')"
                    },
                    "max_depth": Self::depth_parameter("Maximum number of hops to follow")
                },
                "required": ["node_id"]
            }),
        }
    }

    pub fn find_dependencies() -> ToolSchema {
        ToolSchema {
            name: "find_dependencies".to_string(),
            description: "Everything a node transitively depends on, following edges forwards. \
                Each reached node carries its hop distance."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "node_id": {
                        "type": "string",
                        "description": "Id of the node to start from"
                    },
                    "max_depth": Self::depth_parameter("Maximum number of hops to follow")
                },
                "required": ["node_id"]
            }),
        }
    }

    pub fn find_orphans() -> ToolSchema {
        ToolSchema {
            name: "find_orphans".to_string(),
            description: "Nodes of a type nothing points at (in-degree zero). Useful for spotting \
                dead services, unused mappers or pages no menu links to."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "node_type": {
                        "type": "string",
                        "description": "Node type to inspect",
                        "enum": NODE_TYPES
                    }
                },
                "required": ["node_type"]
            }),
        }
    }

    pub fn find_cycles() -> ToolSchema {
        ToolSchema {
            name: "find_cycles".to_string(),
            description: "Elementary cycles of the graph, each reported once starting from its \
                smallest node id. Typical finds are procedures calling each other."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "max_cycles": {
                        "type": "integer",
                        "description": "Stop after this many cycles (defaults to the configured cap)",
                        "minimum": 1
                    }
                }
            }),
        }
    }

    pub fn get_node() -> ToolSchema {
        ToolSchema {
            name: "get_node".to_string(),
            description: "Fetch one node with its properties and aliases. Returns null for an unknown id."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "node_id": {
                        "type": "string",
                        "description": "Id of the node"
                    }
                },
                "required": ["node_id"]
            }),
        }
    }

    pub fn neighbors() -> ToolSchema {
        ToolSchema {
            name: "neighbors".to_string(),
            description: "Adjacent nodes of a node with the relation and confidence of each edge."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "node_id": {
                        "type": "string",
                        "description": "Id of the node"
                    },
                    "direction": {
                        "type": "string",
                        "description": "Which edges to follow (defaults to outgoing)",
                        "enum": ["outgoing", "incoming", "both"]
                    },
                    "relation": {
                        "type": "string",
                        "description": "Only follow edges of this relation",
                        "enum": RELATIONS
                    }
                },
                "required": ["node_id"]
            }),
        }
    }

    pub fn shortest_path() -> ToolSchema {
        ToolSchema {
            name: "shortest_path".to_string(),
            description: "Fewest-hop directed path between two nodes, or null when none exists."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "start": {
                        "type": "string",
                        "description": "Id of the first node"
                    },
                    "end": {
                        "type": "string",
                        "description": "Id of the last node"
                    }
                },
                "required": ["start", "end"]
            }),
        }
    }

    pub fn extract_subgraph() -> ToolSchema {
        ToolSchema {
            name: "extract_subgraph".to_string(),
            description: "The given nodes and every edge between them, optionally widened by their \
                direct predecessors and successors. Unknown ids are listed under `missing`."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "node_ids": {
                        "type": "array",
                        "description": "Ids of the nodes to include",
                        "items": { "type": "string" },
                        "minItems": 1
                    },
                    "include_neighbors": {
                        "type": "boolean",
                        "description": "Also include direct neighbours of every given node (defaults to false)"
                    }
                },
                "required": ["node_ids"]
            }),
        }
    }

    pub fn graph_stats() -> ToolSchema {
        ToolSchema {
            name: "graph_stats".to_string(),
            description: "Counts per node type and relation, connectivity, density, unresolved \
                references and the current ingestion generation."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    pub fn unresolved_references() -> ToolSchema {
        ToolSchema {
            name: "unresolved_references".to_string(),
            description: "References the resolver could not bind to a node yet, with the reason."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "node_id": {
                        "type": "string",
                        "description": "Only list references made by this node"
                    }
                }
            }),
        }
    }

    pub fn export_snapshot() -> ToolSchema {
        ToolSchema {
            name: "export_snapshot".to_string(),
            description: "Deterministic JSON export of every node, edge and unresolved reference."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    pub fn ingest_records() -> ToolSchema {
        ToolSchema {
            name: "ingest_records".to_string(),
            description: "Ingest analysis records as one batch and return the batch report. \
                Malformed records are reported individually; the rest of the batch commits."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "records": {
                        "type": "array",
                        "description": "Analysis records (sourcePath, nodes, hints)",
                        "items": { "type": "object" }
                    }
                },
                "required": ["records"]
            }),
        }
    }

    pub fn list_tools() -> ToolSchema {
        ToolSchema {
            name: "list_tools".to_string(),
            description: "List every available method with its parameter schema.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    /// Get schema by tool name
    pub fn get_by_name(name: &str) -> Option<ToolSchema> {
        Self::all().into_iter().find(|s| s.name == name)
    }

    /// Get all tool names
    pub fn tool_names() -> Vec<String> {
        Self::all().into_iter().map(|s| s.name).collect()
    }
}
