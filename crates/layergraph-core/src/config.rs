use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config as cfg;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IngestConfig {
    /// Create placeholder `Table` nodes for table references nobody declared.
    #[serde(default = "IngestConfig::default_true")]
    pub materialize_tables: bool,
    /// Drop edges whose `(source type, relation, target type)` is not allowed.
    #[serde(default = "IngestConfig::default_true")]
    pub enforce_schema: bool,
    /// Re-verify the whole store after every batch.
    #[serde(default)]
    pub verify_integrity: bool,
    /// Retry unresolved references at the end of later batches.
    #[serde(default = "IngestConfig::default_true")]
    pub deferred_resolution: bool,
}

impl IngestConfig {
    fn default_true() -> bool {
        true
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            materialize_tables: true,
            enforce_schema: true,
            verify_integrity: false,
            deferred_resolution: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryConfig {
    #[serde(default = "QueryConfig::default_max_depth")]
    pub default_max_depth: usize,
    #[serde(default = "QueryConfig::default_max_paths")]
    pub default_max_paths: usize,
    /// Upper bound on elementary cycles reported by cycle detection.
    #[serde(default = "QueryConfig::default_max_cycles")]
    pub max_cycles: usize,
}

impl QueryConfig {
    fn default_max_depth() -> usize {
        5
    }

    fn default_max_paths() -> usize {
        100
    }

    fn default_max_cycles() -> usize {
        1000
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_max_depth: Self::default_max_depth(),
            default_max_paths: Self::default_max_paths(),
            max_cycles: Self::default_max_cycles(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolConfig {
    #[serde(default = "ToolConfig::default_cache_enabled")]
    pub cache_enabled: bool,
    #[serde(default = "ToolConfig::default_cache_size")]
    pub cache_size: usize,
    /// Results larger than this (serialized) are truncated.
    #[serde(default = "ToolConfig::default_max_result_bytes")]
    pub max_result_bytes: usize,
}

impl ToolConfig {
    fn default_cache_enabled() -> bool {
        true
    }

    fn default_cache_size() -> usize {
        100
    }

    fn default_max_result_bytes() -> usize {
        200_000
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            cache_enabled: Self::default_cache_enabled(),
            cache_size: Self::default_cache_size(),
            max_result_bytes: Self::default_max_result_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub tools: ToolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            ingest: IngestConfig::default(),
            query: QueryConfig::default(),
            tools: ToolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("LAYERGRAPH_ENV")
            .ok()
            .or_else(|| env::var("APP_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=64).contains(&self.query.default_max_depth),
            "query.default_max_depth must be 1..=64"
        );
        anyhow::ensure!(
            self.query.default_max_paths > 0,
            "query.default_max_paths must be > 0"
        );
        anyhow::ensure!(self.query.max_cycles > 0, "query.max_cycles must be > 0");
        anyhow::ensure!(self.tools.cache_size > 0, "tools.cache_size must be > 0");
        anyhow::ensure!(
            self.tools.max_result_bytes >= 1024,
            "tools.max_result_bytes must be >= 1024"
        );
        anyhow::ensure!(
            !self.logging.level.trim().is_empty(),
            "logging.level cannot be empty"
        );
        Ok(())
    }
}

/// Loads layered [`Settings`] from a configuration directory and the environment.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    settings: Settings,
    config_dir: PathBuf,
    env: String,
}

impl ConfigManager {
    pub fn new(config_dir: Option<PathBuf>, env_override: Option<String>) -> Result<Self> {
        let env_name = env_override.unwrap_or_else(Settings::default_env);
        let config_dir = Self::get_config_dir(config_dir);
        let settings = Self::load_from_sources(&config_dir, &env_name)?;
        settings.validate()?;
        Ok(Self {
            settings,
            config_dir,
            env: env_name,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn into_settings(self) -> Settings {
        self.settings
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Get the default configuration directory.
    ///
    /// Priority order:
    /// 1. ~/.layergraph/ (user-level config)
    /// 2. ./config/ (project-level config)
    /// 3. Current directory (fallback)
    pub fn default_config_dir() -> PathBuf {
        if let Some(home_dir) = dirs::home_dir() {
            let user_dir = home_dir.join(".layergraph");
            if user_dir.exists() {
                debug!("Using config directory: {:?}", user_dir);
                return user_dir;
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            debug!("Using config directory: {:?}", project_config);
            return project_config;
        }

        debug!("Using config directory: {:?}", cwd);
        cwd
    }

    pub fn get_config_dir(custom_path: Option<PathBuf>) -> PathBuf {
        custom_path.unwrap_or_else(Self::default_config_dir)
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let settings: Settings = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.yaml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.json")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("LAYERGRAPH").separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert!(settings.ingest.materialize_tables);
        assert!(settings.ingest.enforce_schema);
        assert_eq!(settings.query.default_max_depth, 5);
        assert_eq!(settings.tools.cache_size, 100);
    }

    #[test]
    fn files_are_layered_with_env_overrides_last() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[query]\ndefault_max_depth = 7\nmax_cycles = 10\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            "[query]\nmax_cycles = 20\n[ingest]\nmaterialize_tables = false\n",
        )
        .unwrap();

        let settings = ConfigManager::load_from_sources(dir.path(), "staging").unwrap();
        assert_eq!(settings.query.default_max_depth, 7);
        assert_eq!(settings.query.max_cycles, 20);
        assert!(!settings.ingest.materialize_tables);
        assert!(settings.ingest.enforce_schema);
    }

    #[test]
    fn validation_rejects_zero_bounds() {
        let mut settings = Settings::default();
        settings.query.default_max_paths = 0;
        assert!(settings.validate().is_err());
    }
}
