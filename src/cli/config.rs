//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./backlog-sync.toml or ./.backlog-sync/config.toml
//! 2. User config: ~/.backlog-sync/config.toml
//! 3. System config: /etc/backlog-sync/config.toml
//! 4. Built-in defaults
//!
//! Environment variables (`BACKLOG_SYNC_TOKEN`, `BACKLOG_SYNC_COLLECTION`,
//! `BACKLOG_SYNC_BASE_URL`) override whatever file was found.

use crate::client::{AuthScheme, ClientConfig, ClientError, RateLimitedClient, ReqwestTransport, TransportError};
use crate::desired::DuplicateSet;
use crate::env;
use crate::executor::ExecutorOptions;
use crate::reconcile::ReconcileOptions;
use crate::remote::{BacklogApi, FetchOptions};
use crate::sync::SyncOptions;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("No API token configured; set {} or api.token", env::vars::TOKEN)]
    MissingToken,
    #[error("No collection configured; pass --collection, set {} or api.collection_id", env::vars::COLLECTION)]
    MissingCollection,
    #[error("Invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Could not determine home directory")]
    NoHomeDir,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Connection settings of the `[api]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    /// Prefer the environment variable over storing the token on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub auth_scheme: AuthScheme,
}

fn default_base_url() -> String {
    env::api::DEFAULT_BASE_URL.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            collection_id: None,
            token: None,
            auth_scheme: AuthScheme::default(),
        }
    }
}

/// Everything a run needs that does not come from the desired-state file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: ClientConfig,
    #[serde(default)]
    pub pacing: ExecutorOptions,
    #[serde(default)]
    pub fetch: FetchOptions,
    #[serde(default)]
    pub reconcile: ReconcileOptions,
    /// Remote id → reason, merged with the desired-state file's list
    #[serde(default, skip_serializing_if = "DuplicateSet::is_empty")]
    pub duplicates: DuplicateSet,
}

impl SyncConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `BACKLOG_SYNC_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(token) = non_empty_var(env::vars::TOKEN) {
            debug!("API token taken from {}", env::vars::TOKEN);
            self.api.token = Some(token);
        }
        if let Some(collection) = non_empty_var(env::vars::COLLECTION) {
            self.api.collection_id = Some(collection);
        }
        if let Some(base_url) = non_empty_var(env::vars::BASE_URL) {
            self.api.base_url = base_url;
        }
        self
    }

    /// A command line `--collection` wins over file and environment
    pub fn with_collection(mut self, collection: Option<String>) -> Self {
        if let Some(collection) = collection {
            self.api.collection_id = Some(collection);
        }
        self
    }

    pub fn token(&self) -> Result<&str, ConfigError> {
        self.api
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)
    }

    pub fn collection_id(&self) -> Result<&str, ConfigError> {
        self.api
            .collection_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(ConfigError::MissingCollection)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.api.base_url).map_err(|source| ConfigError::InvalidBaseUrl {
            url: self.api.base_url.clone(),
            source,
        })
    }

    /// Build the production API handle backed by `reqwest`
    pub fn build_api(&self) -> Result<BacklogApi, ConfigError> {
        let transport = ReqwestTransport::new(
            self.token()?,
            self.api.auth_scheme,
            self.retry.request_timeout,
        )?;
        let client = RateLimitedClient::new(Arc::new(transport), self.retry.clone());
        Ok(BacklogApi::new(
            client,
            self.base_url()?,
            self.collection_id()?,
        )?)
    }

    pub fn sync_options(&self, dry_run: bool, verify: bool) -> SyncOptions {
        SyncOptions {
            fetch: self.fetch.clone(),
            reconcile: self.reconcile.clone(),
            executor: self.pacing.clone(),
            duplicates: self.duplicates.clone(),
            dry_run,
            verify,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std_env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load an explicit path, or discover one; env overrides apply either way
    pub fn load(config_override: Option<&Path>) -> Result<SyncConfig, ConfigError> {
        let config = match config_override {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                SyncConfig::from_toml_file(path)?
            }
            None => Self::discover_config()?,
        };
        Ok(config.with_env_overrides())
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<SyncConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return SyncConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(SyncConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::flat_config_file_path(&current_dir));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(env::SYSTEM_CONFIG_PATH));

        #[cfg(windows)]
        if let Ok(program_data) = std_env::var("PROGRAMDATA") {
            candidates.push(
                PathBuf::from(program_data)
                    .join("backlog-sync")
                    .join(env::CONFIG_FILE_NAME),
            );
        }

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Create a default config file in the user's home directory
    pub fn create_default_user_config() -> Result<PathBuf, ConfigError> {
        let home_dir = Self::get_home_dir().ok_or(ConfigError::NoHomeDir)?;

        let config_dir = env::app_dir_path(&home_dir);
        let config_path = env::user_config_file_path(&home_dir);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|source| ConfigError::Io {
                path: config_dir.clone(),
                source,
            })?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if !config_path.exists() {
            SyncConfig::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        } else {
            warn!("Configuration file already exists: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }

        println!();
        println!("Environment overrides:");
        for name in [env::vars::TOKEN, env::vars::COLLECTION, env::vars::BASE_URL] {
            let state = if non_empty_var(name).is_some() {
                "set"
            } else {
                "unset"
            };
            println!("  {} - {}", name, state);
        }
    }
}
