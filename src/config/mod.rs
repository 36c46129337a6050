//! Configuration management for matchstats
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::models::{EntityKind, EntityRef};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Request budget and retry policy
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Entities the walker starts from
    #[serde(default)]
    pub roots: Vec<RootEntity>,

    /// Raw document and table locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Transformation settings
    #[serde(default)]
    pub transform: TransformConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Upstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL substituted for `{base}` in endpoint templates
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Environment variable name holding the API key
    #[serde(default = "default_api_key_env")]
    pub key_env: String,

    /// Query parameter the key is sent in
    #[serde(default = "default_api_key_param")]
    pub key_param: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,

    /// User agent string
    #[serde(default = "default_api_user_agent")]
    pub user_agent: String,

    /// Endpoint templates per entity kind
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

/// URL templates. `{base}` is the API base URL, `{id}` the entity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Index of a competition (lists its seasons)
    #[serde(default = "default_competition_endpoint")]
    pub competition: Option<String>,

    /// Index of a season (lists stages, rounds or matches)
    #[serde(default = "default_season_endpoint")]
    pub season: Option<String>,

    /// Index of a stage
    #[serde(default)]
    pub stage: Option<String>,

    /// Index of a round
    #[serde(default)]
    pub round: Option<String>,

    /// Match document
    #[serde(rename = "match", default = "default_match_endpoint")]
    pub match_document: String,
}

impl EndpointConfig {
    /// Template used to fetch an entity of the given kind, if any
    pub fn template_for(&self, kind: EntityKind) -> Option<&str> {
        match kind {
            EntityKind::Competition => self.competition.as_deref(),
            EntityKind::Season => self.season.as_deref(),
            EntityKind::Stage => self.stage.as_deref(),
            EntityKind::Round => self.round.as_deref(),
            EntityKind::Match => Some(self.match_document.as_str()),
        }
    }
}

/// Request budget and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Retries after a throttled or transient failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff interval in milliseconds (doubles per attempt)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// A configured walk root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntity {
    pub kind: EntityKind,
    pub id: String,
}

impl RootEntity {
    pub fn to_entity(&self) -> EntityRef {
        EntityRef::root(self.kind, self.id.clone())
    }
}

/// Raw document and table locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Raw match documents (relative paths resolve against the config directory)
    #[serde(default = "default_documents_dir")]
    pub documents_dir: String,

    /// Output tables (relative paths resolve against the config directory)
    #[serde(default = "default_tables_dir")]
    pub tables_dir: String,
}

/// Transformation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Documents parsed concurrently
    #[serde(default = "default_transform_workers")]
    pub workers: usize,

    /// Also write CSV copies next to the Parquet tables
    #[serde(default = "default_write_csv")]
    pub write_csv: bool,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for matchstats data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            rate_limit: RateLimitConfig::default(),
            roots: Vec::new(),
            storage: StorageConfig::default(),
            transform: TransformConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            key_env: default_api_key_env(),
            key_param: default_api_key_param(),
            timeout_secs: default_api_timeout(),
            user_agent: default_api_user_agent(),
            endpoints: EndpointConfig::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            competition: default_competition_endpoint(),
            season: default_season_endpoint(),
            stage: None,
            round: None,
            match_document: default_match_endpoint(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            tables_dir: default_tables_dir(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            workers: default_transform_workers(),
            write_csv: default_write_csv(),
        }
    }
}

impl Config {
    /// Get the default base directory for matchstats (~/.matchstats)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".matchstats")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub(crate) fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("metadata.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Set up paths based on config file location
        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("metadata.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Directory holding raw match documents
    pub fn documents_dir(&self) -> PathBuf {
        self.resolve(&self.storage.documents_dir)
    }

    /// Directory receiving the output tables
    pub fn tables_dir(&self) -> PathBuf {
        self.resolve(&self.storage.tables_dir)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.paths.base_dir.join(p)
        }
    }

    /// Configured roots as walkable entity references
    pub fn root_entities(&self) -> Vec<EntityRef> {
        self.roots.iter().map(RootEntity::to_entity).collect()
    }

    /// Read the API key from the environment.
    ///
    /// Fails before any request is issued so bad setups never spend quota.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api.key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(Error::MissingCredentials(self.api.key_env.clone())),
        }
    }

    /// Check if matchstats is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.requests_per_window == 0 {
            return Err(Error::Config(
                "rate_limit.requests_per_window must be positive".to_string(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(Error::Config(
                "rate_limit.window_secs must be positive".to_string(),
            ));
        }

        if self.rate_limit.backoff_base_ms > self.rate_limit.backoff_max_ms {
            return Err(Error::Config(
                "rate_limit.backoff_base_ms must be <= rate_limit.backoff_max_ms".to_string(),
            ));
        }

        if self.api.timeout_secs == 0 {
            return Err(Error::Config("api.timeout_secs must be positive".to_string()));
        }

        if self.transform.workers == 0 {
            return Err(Error::Config("transform.workers must be positive".to_string()));
        }

        url::Url::parse(&self.api.base_url)
            .map_err(|e| Error::Config(format!("api.base_url is not a valid URL: {}", e)))?;

        for kind in EntityKind::ALL {
            if let Some(template) = self.api.endpoints.template_for(kind) {
                if !template.contains("{id}") {
                    return Err(Error::Config(format!(
                        "api.endpoints.{} must contain {{id}}",
                        kind
                    )));
                }
            }
        }

        for root in &self.roots {
            if root.id.trim().is_empty() {
                return Err(Error::Config(format!("roots: empty id for {} root", root.kind)));
            }
        }

        Ok(())
    }
}
