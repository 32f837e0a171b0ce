//! Environment constants and path utilities for backlog-sync.
//!
//! This module centralizes the environment variable names, configuration file
//! names and default endpoints used throughout the application.

use std::path::{Path, PathBuf};

/// Hidden application directory name (like .git, .vscode)
pub const APP_DIR_NAME: &str = ".backlog-sync";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up directly in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "backlog-sync.toml";

/// System-wide configuration path (Unix-like systems)
pub const SYSTEM_CONFIG_PATH: &str = "/etc/backlog-sync/config.toml";

/// Environment variable names read at startup
pub mod vars {
    /// API token, overrides the value in the config file
    pub const TOKEN: &str = "BACKLOG_SYNC_TOKEN";

    /// Target collection id, overrides the value in the config file
    pub const COLLECTION: &str = "BACKLOG_SYNC_COLLECTION";

    /// API base URL, overrides the value in the config file
    pub const BASE_URL: &str = "BACKLOG_SYNC_BASE_URL";
}

/// Remote API defaults
pub mod api {
    /// Default REST base URL
    pub const DEFAULT_BASE_URL: &str = "https://api.clickup.com/api/v2";

    /// Path segment for collection endpoints
    pub const COLLECTION_SEGMENT: &str = "list";

    /// Path segment for item endpoints
    pub const ITEM_SEGMENT: &str = "task";
}

/// Build the application directory path from a root directory
pub fn app_dir_path(root: &Path) -> PathBuf {
    root.join(APP_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    app_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in the application directory of `current_dir`
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    app_dir_path(current_dir).join(CONFIG_FILE_NAME)
}

/// Build the flat config file path in `current_dir`
pub fn flat_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}
