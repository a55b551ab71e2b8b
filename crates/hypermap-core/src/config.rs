//! Configuration of the dispatch and description engine.
//!
//! This module defines the `Config` struct: the base URI that anchors every
//! description identifier, where the description is served, how paths are
//! matched and which media types responses fall back to. The configuration
//! can be created programmatically or loaded from a YAML or TOML file.
//!
//! # Examples
//!
//! ```no_run
//! use hypermap_core::config::Config;
//!
//! # async fn example() -> hypermap_core::Result<()> {
//! // Create a new config programmatically
//! let mut config = Config::new("https://api.example.com/".parse()?);
//! config.case_sensitive_paths = true;
//!
//! // Or load from a config file
//! let config = Config::from_file("hypermap.yaml").await?;
//! # Ok(())
//! # }
//! ```

// Internal imports (std, crate)
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::template::normalize_path;
use crate::Error;

// External imports (alphabetized)
use serde::{Deserialize, Serialize};
use tokio::fs;
use url::Url;

/// Configuration for request handling and API description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the stable identifiers in the description document
    #[serde(default = "default_base_uri")]
    pub base_uri: Url,

    /// Relative path serving the description document
    #[serde(default = "default_documentation_path")]
    pub documentation_path: String,

    /// Whether route matching distinguishes letter case
    #[serde(default)]
    pub case_sensitive_paths: bool,

    /// Response media type used when the request sends no `Accept` header
    #[serde(default = "default_media_type")]
    pub default_media_type: String,

    /// Media types per operation id, replacing the negotiated defaults
    #[serde(default)]
    pub media_type_overrides: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_base_uri())
    }
}

impl Config {
    /// Create a new Config with default values
    pub fn new(base_uri: Url) -> Self {
        Self {
            base_uri,
            documentation_path: default_documentation_path(),
            case_sensitive_paths: false,
            default_media_type: default_media_type(),
            media_type_overrides: BTreeMap::new(),
        }
    }

    /// `<config dir>/hypermap/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hypermap").join("config.yaml"))
    }

    /// Load configuration from a YAML or TOML file, chosen by extension
    pub async fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        let config: Self = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();
        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> crate::Result<()> {
        let path = self.documentation_path.trim();
        if Url::parse(path).is_ok() || path.starts_with("//") {
            return Err(Error::config(format!(
                "documentation_path '{path}' must be relative"
            )));
        }
        if self.default_media_type.split_once('/').is_none() {
            return Err(Error::config(format!(
                "default_media_type '{}' is not a media type",
                self.default_media_type
            )));
        }
        Ok(())
    }

    /// Normalized documentation path, e.g. `/api/documentation`
    pub fn documentation_route(&self) -> String {
        match normalize_path(&self.documentation_path) {
            path if path.is_empty() => "/".to_string(),
            path => path,
        }
    }

    /// Absolute identifier of the description document, resolved below
    /// the full base path
    pub fn documentation_uri(&self) -> crate::Result<Url> {
        let mut base = self.base_uri.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(self.documentation_route().trim_start_matches('/'))?)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"))
}

fn default_base_uri() -> Url {
    Url::parse("http://localhost/").expect("static base URI is valid")
}

fn default_documentation_path() -> String {
    "/api/documentation".to_string()
}

fn default_media_type() -> String {
    "application/json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_roundtrip() -> crate::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("config.yaml");

        let mut config = Config::new(Url::parse("https://api.example.com/")?);
        config
            .media_type_overrides
            .insert("PersonController.Get".into(), vec!["application/yaml".into()]);
        config.save(&file_path).await?;

        let loaded = Config::from_file(&file_path).await?;
        assert_eq!(loaded, config);
        assert_eq!(loaded.documentation_path, "/api/documentation");
        assert!(!loaded.case_sensitive_paths);
        assert_eq!(loaded.default_media_type, "application/json");

        Ok(())
    }

    #[tokio::test]
    async fn test_toml_by_extension() -> crate::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.case_sensitive_paths = true;
        config.save(&file_path).await?;

        let content = fs::read_to_string(&file_path).await?;
        assert!(content.contains("case_sensitive_paths = true"));
        assert_eq!(Config::from_file(&file_path).await?, config);
        Ok(())
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() -> crate::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("config.yaml");
        fs::write(&file_path, "documentation_path: docs\n").await?;

        let config = Config::from_file(&file_path).await?;
        assert_eq!(config.documentation_route(), "/docs");
        assert_eq!(config.documentation_uri()?.as_str(), "http://localhost/docs");
        Ok(())
    }

    #[test]
    fn test_documentation_uri_keeps_base_path() -> crate::Result<()> {
        let mut config = Config::new(Url::parse("https://api.example.com/v1")?);
        config.documentation_path = "/docs".to_string();
        assert_eq!(
            config.documentation_uri()?.as_str(),
            "https://api.example.com/v1/docs"
        );

        config.base_uri = Url::parse("https://api.example.com/v1/")?;
        assert_eq!(
            config.documentation_uri()?.as_str(),
            "https://api.example.com/v1/docs"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_absolute_documentation_path_is_rejected() -> crate::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("config.yaml");
        fs::write(&file_path, "documentation_path: http://elsewhere/docs\n").await?;

        let result = Config::from_file(&file_path).await;
        assert!(matches!(result, Err(Error::Config(_))));
        Ok(())
    }
}
