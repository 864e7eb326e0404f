use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::merge::FetchMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token. Omit for a backend that doesn't require one.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub fetch_mode: FetchMode,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load from `path`, or from the user config dir when none is given,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// An explicit path must exist. Only the default location may be absent,
    /// in which case defaults are used.
    pub fn load_with(path: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "jobdash")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// `JOBDASH_API_URL`, `JOBDASH_TOKEN` and `JOBDASH_FETCH_MODE` win over the file.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("JOBDASH_API_URL") {
            self.api.base_url = url;
        }
        if let Some(token) = lookup("JOBDASH_TOKEN") {
            self.api.token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(mode) = lookup("JOBDASH_FETCH_MODE") {
            self.sync.fetch_mode = mode.parse().map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.api.token, None);
        assert_eq!(config.sync.fetch_mode, FetchMode::Merge);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nbase_url = \"https://jobs.example.com\"\n\n[sync]\nfetch_mode = \"replace\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.api.base_url, "https://jobs.example.com");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.sync.fetch_mode, FetchMode::Replace);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[api\nbase_url = ").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse"));
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = Config::load_with(Some(&path), |_| None).unwrap_err();
        assert!(err.to_string().starts_with("Failed to read"));
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_env_overrides_win_over_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nbase_url = \"https://jobs.example.com\"\ntoken = \"from-file\"").unwrap();

        let config = Config::load_with(Some(file.path()), |key| {
            (key == "JOBDASH_TOKEN").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(config.api.base_url, "https://jobs.example.com");
        assert_eq!(config.api.token.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("JOBDASH_API_URL", "http://10.0.0.2:3000"),
            ("JOBDASH_TOKEN", "secret"),
            ("JOBDASH_FETCH_MODE", "replace"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api.base_url, "http://10.0.0.2:3000");
        assert_eq!(config.api.token.as_deref(), Some("secret"));
        assert_eq!(config.sync.fetch_mode, FetchMode::Replace);
    }

    #[test]
    fn test_bad_fetch_mode_override_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "JOBDASH_FETCH_MODE").then(|| "eventually".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("Unknown fetch mode"));
    }
}
