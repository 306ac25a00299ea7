pub mod config;
pub mod edge;
pub mod error;
pub mod node;
pub mod record;
pub mod types;

pub use config::{
    ConfigManager, IngestConfig, LoggingConfig, QueryConfig, Settings, ToolConfig,
};
pub use edge::*;
pub use error::*;
pub use node::*;
pub use record::*;
pub use types::*;
