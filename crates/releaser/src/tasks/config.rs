//! Releaser Controller Configuration
//!
//! Loaded from a mounted YAML file. Every section is optional and falls back to
//! its defaults.

use scm::ApiEndpoints;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "RELEASER_CONFIG_PATH";

/// Default location of the mounted config file
pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub controller: ReconcileConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Git working copies and identity
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    /// Root directory of the working-copy cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Identity used when the credentials carry no username
    #[serde(default)]
    pub author: AuthorConfig,

    /// git executable
    #[serde(default = "default_git_binary")]
    pub binary: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AuthorConfig {
    #[serde(default = "default_author_name")]
    pub name: String,
    #[serde(default = "default_author_email")]
    pub email: String,
}

/// Reconcile loop behaviour
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileConfig {
    /// Delay before a failed pass is retried, in seconds
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    /// Maximum number of requests reconciled in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: u16,

    /// Keep pre-release identifiers when bumping the next request
    #[serde(default = "default_retain_pre_release")]
    pub retain_pre_release: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusConfig {
    /// Upper bound on the retained condition history
    #[serde(default = "default_max_conditions")]
    pub max_conditions: usize,
}

/// API base URL overrides, for GitHub Enterprise or self-managed GitLab
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    #[serde(default = "default_github_api")]
    pub github_api: String,
    #[serde(default = "default_gitlab_api")]
    pub gitlab_api: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("ks-releaser")
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_author_name() -> String {
    "ks-releaser".to_string()
}

fn default_author_email() -> String {
    "ks-releaser@users.noreply.github.com".to_string()
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_concurrency() -> u16 {
    4
}

fn default_retain_pre_release() -> bool {
    true
}

fn default_max_conditions() -> usize {
    100
}

fn default_github_api() -> String {
    ApiEndpoints::default().github_api
}

fn default_gitlab_api() -> String {
    ApiEndpoints::default().gitlab_api
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        GitConfig {
            cache_dir: default_cache_dir(),
            author: AuthorConfig::default(),
            binary: default_git_binary(),
        }
    }
}

impl Default for AuthorConfig {
    fn default() -> Self {
        AuthorConfig {
            name: default_author_name(),
            email: default_author_email(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            retry_delay_seconds: default_retry_delay_seconds(),
            concurrency: default_concurrency(),
            retain_pre_release: default_retain_pre_release(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        StatusConfig {
            max_conditions: default_max_conditions(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            github_api: default_github_api(),
            gitlab_api: default_gitlab_api(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: default_bind_address(),
        }
    }
}

impl ControllerConfig {
    /// Validate that the configuration can drive the controller
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.controller.retry_delay_seconds == 0 {
            return Err(anyhow::anyhow!(
                "controller.retryDelaySeconds must be greater than zero"
            ));
        }
        if self.controller.concurrency == 0 {
            return Err(anyhow::anyhow!(
                "controller.concurrency must be greater than zero"
            ));
        }
        if self.git.cache_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("git.cacheDir must not be empty"));
        }
        if self.git.binary.trim().is_empty() {
            return Err(anyhow::anyhow!("git.binary must not be empty"));
        }
        if self.status.max_conditions == 0 {
            return Err(anyhow::anyhow!(
                "status.maxConditions must be greater than zero"
            ));
        }
        Ok(())
    }

    /// Load configuration from mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: ControllerConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;

        Ok(config)
    }

    /// Load from `explicit_path`, then `RELEASER_CONFIG_PATH`, then the default
    /// mount, falling back to defaults when no file can be read.
    pub fn load(explicit_path: Option<&str>) -> Self {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok();
        let config_path = explicit_path
            .or(env_path.as_deref())
            .filter(|path| Path::new(path).exists())
            .unwrap_or(DEFAULT_CONFIG_PATH);

        match Self::from_mounted_file(config_path) {
            Ok(cfg) => {
                info!("Loaded controller configuration from {}", config_path);
                cfg
            }
            Err(err) => {
                warn!(
                    "Failed to load configuration from {}: {}. Using defaults.",
                    config_path, err
                );
                ControllerConfig::default()
            }
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.controller.retry_delay_seconds)
    }

    pub fn api_endpoints(&self) -> ApiEndpoints {
        ApiEndpoints {
            github_api: self.providers.github_api.clone(),
            gitlab_api: self.providers.gitlab_api.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert!(config.controller.retain_pre_release);
        assert_eq!(config.status.max_conditions, 100);
        assert_eq!(config.api_endpoints(), ApiEndpoints::default());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: ControllerConfig = serde_yaml::from_str(
            r"
git:
  cacheDir: /var/cache/releaser
  author:
    name: release-bot
controller:
  retryDelaySeconds: 30
providers:
  githubApi: https://github.example.com/api/v3
",
        )
        .unwrap();

        assert_eq!(config.git.cache_dir, PathBuf::from("/var/cache/releaser"));
        assert_eq!(config.git.author.name, "release-bot");
        assert_eq!(config.git.author.email, default_author_email());
        assert_eq!(config.controller.retry_delay_seconds, 30);
        assert_eq!(config.controller.concurrency, 4);
        assert_eq!(config.providers.github_api, "https://github.example.com/api/v3");
        assert_eq!(config.providers.gitlab_api, default_gitlab_api());
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = ControllerConfig::default();
        config.controller.retry_delay_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.controller.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.git.cache_dir = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.status.max_conditions = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("status.maxConditions"));
    }

    #[test]
    #[serial]
    fn test_load_prefers_env_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "status:\n  maxConditions: 7").unwrap();

        std::env::set_var(CONFIG_PATH_ENV, file.path());
        let config = ControllerConfig::load(None);
        std::env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(config.status.max_conditions, 7);
    }

    #[test]
    #[serial]
    fn test_load_falls_back_to_defaults() {
        std::env::set_var(CONFIG_PATH_ENV, "/nonexistent/releaser.yaml");
        let config = ControllerConfig::load(None);
        std::env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(config.controller, ReconcileConfig::default());
    }
}
