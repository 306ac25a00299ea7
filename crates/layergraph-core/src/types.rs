use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable node key, `"<kind-prefix>:<qualified name>"`.
pub type NodeId = String;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum NodeKind {
    View,
    Endpoint,
    BusinessService,
    DataMapper,
    Table,
    StoredProcedure,
    ScheduledJob,
}

impl NodeKind {
    pub const ALL: [NodeKind; 7] = [
        NodeKind::View,
        NodeKind::Endpoint,
        NodeKind::BusinessService,
        NodeKind::DataMapper,
        NodeKind::Table,
        NodeKind::StoredProcedure,
        NodeKind::ScheduledJob,
    ];

    /// Prefix used when deriving node ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            NodeKind::View => "view",
            NodeKind::Endpoint => "endpoint",
            NodeKind::BusinessService => "service",
            NodeKind::DataMapper => "mapper",
            NodeKind::Table => "table",
            NodeKind::StoredProcedure => "procedure",
            NodeKind::ScheduledJob => "job",
        }
    }

    /// Deterministic id for a `(kind, qualified name)` pair.
    pub fn node_id(self, qualified_name: &str) -> NodeId {
        format!("{}:{}", self.id_prefix(), qualified_name.trim())
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::View => "View",
            NodeKind::Endpoint => "Endpoint",
            NodeKind::BusinessService => "BusinessService",
            NodeKind::DataMapper => "DataMapper",
            NodeKind::Table => "Table",
            NodeKind::StoredProcedure => "StoredProcedure",
            NodeKind::ScheduledJob => "ScheduledJob",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "view" | "jsp" => Ok(NodeKind::View),
            "endpoint" => Ok(NodeKind::Endpoint),
            "businessservice" | "service" => Ok(NodeKind::BusinessService),
            "datamapper" | "mapper" => Ok(NodeKind::DataMapper),
            "table" => Ok(NodeKind::Table),
            "storedprocedure" | "procedure" => Ok(NodeKind::StoredProcedure),
            "scheduledjob" | "job" => Ok(NodeKind::ScheduledJob),
            _ => Err(format!("unknown node type: {}", s)),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum Relation {
    Includes,
    AjaxCall,
    Invokes,
    Calls,
    Queries,
    Executes,
    Scheduled,
}

impl Relation {
    pub const ALL: [Relation; 7] = [
        Relation::Includes,
        Relation::AjaxCall,
        Relation::Invokes,
        Relation::Calls,
        Relation::Queries,
        Relation::Executes,
        Relation::Scheduled,
    ];
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relation::Includes => "Includes",
            Relation::AjaxCall => "AjaxCall",
            Relation::Invokes => "Invokes",
            Relation::Calls => "Calls",
            Relation::Queries => "Queries",
            Relation::Executes => "Executes",
            Relation::Scheduled => "Scheduled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "includes" => Ok(Relation::Includes),
            "ajaxcall" => Ok(Relation::AjaxCall),
            "invokes" => Ok(Relation::Invokes),
            "calls" => Ok(Relation::Calls),
            "queries" => Ok(Relation::Queries),
            "executes" => Ok(Relation::Executes),
            "scheduled" => Ok(Relation::Scheduled),
            _ => Err(format!("unknown relation: {}", s)),
        }
    }
}

/// What kind of mention a reference hint is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum HintKind {
    /// Declared type of an injected dependency field.
    Dependency,
    /// Literal URL of an asynchronous request issued by a view.
    AjaxCall,
    /// Literal URL of a form action.
    FormSubmit,
    /// Static or dynamic include of another view.
    Include,
    /// Data-access or service method name.
    MethodCall,
    /// Table name found in SQL.
    TableRef,
    /// Stored procedure name found in a call statement.
    ProcedureCall,
    /// Target of a scheduler trigger.
    ScheduledTarget,
}

impl HintKind {
    pub fn is_url(self) -> bool {
        matches!(self, HintKind::AjaxCall | HintKind::FormSubmit)
    }

    /// Target type implied by the hint when the extractor did not state one.
    pub fn implied_target(self) -> Option<NodeKind> {
        match self {
            HintKind::AjaxCall | HintKind::FormSubmit => Some(NodeKind::Endpoint),
            HintKind::Include => Some(NodeKind::View),
            HintKind::TableRef => Some(NodeKind::Table),
            HintKind::ProcedureCall => Some(NodeKind::StoredProcedure),
            HintKind::Dependency | HintKind::MethodCall | HintKind::ScheduledTarget => None,
        }
    }
}

impl fmt::Display for HintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// How a reference hint was turned into an edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Exact,
    Pattern,
    Fuzzy,
    /// Edge loaded from a snapshot or declared directly.
    Declared,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Exact => "exact",
            Resolution::Pattern => "pattern",
            Resolution::Fuzzy => "fuzzy",
            Resolution::Declared => "declared",
        }
    }
}
