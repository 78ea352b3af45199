//! Configuration system for the invoicer
//!
//! Settings are read from TOML, layered over defaults, and can be overridden
//! from the environment.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::query::{DEFAULT_PAGE_SIZE, ValueRendering};

pub const BACKEND_URL_ENV: &str = "INVOICER_BACKEND_URL";

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}")]
    #[diagnostic(code(invoicer::config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}")]
    #[diagnostic(
        code(invoicer::config::parse),
        help("Compare the file against `invoicer config show`")
    )]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config")]
    #[diagnostic(code(invoicer::config::serialize))]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoicerConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub list: ListConfig,

    #[serde(default)]
    pub routes: RouteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base address of the backend service
    pub url: String,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// Auth collection used for password login
    pub auth_collection: String,

    /// How filter values are written into queries
    pub filter_values: ValueRendering,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8090".to_string(),
            timeout_secs: 30,
            auth_collection: crate::schema::USERS.to_string(),
            filter_values: ValueRendering::Legacy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListConfig {
    pub default_page_size: u32,

    /// Page size used when the dashboard loads whole collections
    pub dashboard_page_size: u32,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            dashboard_page_size: 1000,
        }
    }
}

/// Redirect targets signalled by the auth provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub after_login: String,
    pub login: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            after_login: "/".to_string(),
            login: "/login".to_string(),
        }
    }
}

impl InvoicerConfig {
    /// Apply `INVOICER_BACKEND_URL` if set
    pub fn with_env_overrides(self) -> Self {
        self.with_backend_url_override(std::env::var(BACKEND_URL_ENV).ok())
    }

    fn with_backend_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            debug!("backend url overridden from environment");
            self.backend.url = url;
        }
        self
    }
}

/// Load configuration from a file
pub async fn load_config(path: &Path) -> Result<InvoicerConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save configuration to a file, creating parent directories
pub async fn save_config(config: &InvoicerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let content = toml::to_string_pretty(config)?;
    tokio::fs::write(path, content)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Standard config file locations, most specific first
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("invoicer.toml")];

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("invoicer").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".invoicer").join("config.toml"));
    }

    paths
}

/// Where `config save` writes when no path is given
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("invoicer").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("invoicer.toml"))
}

/// Load configuration from standard locations, falling back to defaults
pub async fn load_config_from_standard_locations() -> Result<InvoicerConfig, ConfigError> {
    for path in config_paths() {
        if path.exists() {
            debug!("loading config from {}", path.display());
            return load_config(&path).await;
        }
    }
    Ok(InvoicerConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = InvoicerConfig::default();
        assert_eq!(config.backend.url, "http://127.0.0.1:8090");
        assert_eq!(config.backend.filter_values, ValueRendering::Legacy);
        assert_eq!(config.list.default_page_size, 10);
        assert_eq!(config.routes.login, "/login");
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let config: InvoicerConfig = toml::from_str(
            r#"
            [backend]
            url = "https://pb.example.com"
            filter_values = "typed"

            [list]
            dashboard_page_size = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.url, "https://pb.example.com");
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.backend.filter_values, ValueRendering::Typed);
        assert_eq!(config.list.dashboard_page_size, 500);
        assert_eq!(config.list.default_page_size, 10);
        assert_eq!(config.routes, RouteConfig::default());
    }

    #[test]
    fn blank_override_is_ignored() {
        let config = InvoicerConfig::default().with_backend_url_override(Some("  ".to_string()));
        assert_eq!(config.backend.url, "http://127.0.0.1:8090");
        let config = config.with_backend_url_override(Some("http://10.0.0.2:8090".to_string()));
        assert_eq!(config.backend.url, "http://10.0.0.2:8090");
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("invoicer-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");

        let mut config = InvoicerConfig::default();
        config.backend.url = "https://pb.example.com".to_string();
        config.routes.after_login = "/dashboard".to_string();

        save_config(&config, &path).await.unwrap();
        let loaded = load_config(&path).await.unwrap();
        assert_eq!(loaded, config);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
