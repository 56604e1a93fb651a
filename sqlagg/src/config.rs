//! Configuration management for sqlagg
//!
//! Default config location: ~/.sqlagg/config.toml

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::compiler::{CompilerOptions, DEFAULT_BUCKET_SIZE, DEFAULT_SEARCH_SIZE};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL of the search cluster
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Extra attempts for retryable failures
    #[serde(default = "default_retries")]
    pub retries: usize,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> usize {
    2
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_ms: default_timeout_ms(),
            username: None,
            password: None,
            retries: default_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CompilerConfig {
    #[serde(default = "default_bucket_size")]
    pub default_bucket_size: usize,
    #[serde(default = "default_search_size")]
    pub default_search_size: usize,
}

fn default_bucket_size() -> usize {
    DEFAULT_BUCKET_SIZE
}

fn default_search_size() -> usize {
    DEFAULT_SEARCH_SIZE
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_bucket_size: default_bucket_size(),
            default_search_size: default_search_size(),
        }
    }
}

impl From<&CompilerConfig> for CompilerOptions {
    fn from(config: &CompilerConfig) -> Self {
        CompilerOptions {
            default_bucket_size: config.default_bucket_size,
            default_search_size: config.default_search_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_level")]
    pub level: String,
    /// Log output format: "pretty" or "json"
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "warn,sqlagg=info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

/// ~/.sqlagg/config.toml
pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sqlagg")
        .join("config.toml")
}

impl Config {
    /// Load config from a file
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_tilde(path)?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Load config from file path, or defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let expanded = expand_tilde(path)?;
        if expanded.exists() {
            Self::load(&expanded)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let path = expand_tilde(path)?;
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override backend settings from SQLAGG_URL, SQLAGG_USERNAME and SQLAGG_PASSWORD
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SQLAGG_URL") {
            self.backend.url = url;
        }
        if let Some(username) = lookup("SQLAGG_USERNAME") {
            self.backend.username = Some(username);
        }
        if let Some(password) = lookup("SQLAGG_PASSWORD") {
            self.backend.password = Some(password);
        }
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions::from(&self.compiler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend.url, "http://localhost:9200");
        assert_eq!(config.backend.timeout_ms, 30_000);
        assert_eq!(config.compiler.default_bucket_size, 10_000);
        assert_eq!(config.compiler.default_search_size, 200);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [backend]
            url = "http://search:9200"

            [compiler]
            default_bucket_size = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.url, "http://search:9200");
        assert_eq!(config.backend.retries, 2);
        assert_eq!(config.compiler.default_bucket_size, 500);
        assert_eq!(config.compiler.default_search_size, 200);
        assert_eq!(config.compiler_options().default_bucket_size, 500);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [("SQLAGG_URL", "http://other:9200"), ("SQLAGG_USERNAME", "elastic")]
            .into_iter()
            .collect();
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.backend.url, "http://other:9200");
        assert_eq!(config.backend.username.as_deref(), Some("elastic"));
        assert_eq!(config.backend.password, None);
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/etc/sqlagg.toml");
        assert_eq!(expand_tilde(plain).unwrap(), plain);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/x.toml")).unwrap(), home.join("x.toml"));
        }
    }
}
