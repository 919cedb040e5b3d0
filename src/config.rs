use crate::pattern::{LegacyLabelMap, MatchOptions};
use crate::templates::UnmatchedTemplates;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "configs.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub reddit: RedditConfig,
    pub subreddit: SubredditConfig,
    pub link_flair_map: LegacyLabelMap,
    #[serde(default)]
    pub pushshift: PushshiftConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
}

#[derive(Clone, Deserialize)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

// Keep secrets out of logs.
impl fmt::Debug for RedditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("username", &self.username)
            .field("password", &"***")
            .field("user_agent", &self.user_agent)
            .field("auth_url", &self.auth_url)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubredditConfig {
    pub name: String,
    /// Lower bound for the submission search, seconds since the epoch.
    /// Defaults to the subreddit's creation time.
    #[serde(default)]
    pub earliest: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushshiftConfig {
    #[serde(default = "default_pushshift_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for PushshiftConfig {
    fn default() -> Self {
        Self {
            base_url: default_pushshift_url(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    #[serde(default)]
    pub unmatched_templates: UnmatchedTemplates,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            case_insensitive: true,
            unmatched_templates: UnmatchedTemplates::default(),
            dry_run: false,
        }
    }
}

impl MigrationConfig {
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            case_insensitive: self.case_insensitive,
        }
    }
}

fn default_auth_url() -> String {
    "https://www.reddit.com".to_string()
}

fn default_api_url() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_pushshift_url() -> String {
    "https://api.pushshift.io".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_concurrency() -> usize {
    32
}

fn default_true() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration value {0}: {1}")]
    Invalid(String, String),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("reddit.client_id", &self.reddit.client_id),
            ("reddit.client_secret", &self.reddit.client_secret),
            ("reddit.username", &self.reddit.username),
            ("reddit.password", &self.reddit.password),
            ("reddit.user_agent", &self.reddit.user_agent),
            ("subreddit.name", &self.subreddit.name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(name.to_string(), "cannot be empty".to_string()));
            }
        }

        if self.link_flair_map.is_empty() {
            return Err(ConfigError::Invalid(
                "link_flair_map".to_string(),
                "needs at least one legacy label".to_string(),
            ));
        }

        if self.migration.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "migration.concurrency".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        if self.pushshift.page_size == 0 {
            return Err(ConfigError::Invalid(
                "pushshift.page_size".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
