//! Configuration loader and validator for the blog index pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub http: Http,
    pub storage: Storage,
    pub tables: Tables,
    pub queue: Queue,
    pub sources: Sources,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default)]
    pub notify: Notify,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Outbound HTTP settings shared by every fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Http {
    pub user_agent: String,
    /// Minimum gap between two consecutive requests on one client.
    pub min_interval_ms: u64,
}

/// Object store layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storage {
    pub root: String,
    pub bucket: String,
    pub archive_prefix: String,
    pub sitemap_prefix: String,
    pub index_extension: String,
}

/// Logical key-value table names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tables {
    pub sitemaps: String,
    pub slug_mapping: String,
    pub post_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Queue {
    pub post_urls: String,
}

/// Upstream blog endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sources {
    pub root_sitemap_url: String,
    pub target_prefix: String,
    pub feed_url: String,
    pub posts_api_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dispatch {
    /// Give up after this many submission rounds. Unset means retry forever.
    #[serde(default)]
    pub max_rounds: Option<u32>,
}

/// Error notification sinks. At most one is used; Slack wins when both are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notify {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub telegram: Option<TelegramSink>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelegramSink {
    pub bot_token: String,
    pub chat_id: i64,
}

fn default_region() -> String {
    "ap-northeast-1".to_string()
}

impl Default for Notify {
    fn default() -> Self {
        Self {
            region: default_region(),
            slack_webhook_url: None,
            telegram: None,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and the object store root).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [&self.app.data_dir, &self.storage.root] {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/devio-index.db", self.app.data_dir))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.http.min_interval_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn require(value: &str, key: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(key));
    }
    Ok(())
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    require(&cfg.app.data_dir, "app.data_dir must be non-empty")?;

    require(&cfg.http.user_agent, "http.user_agent must be non-empty")?;
    // min_interval_ms is u64; zero disables throttling

    require(&cfg.storage.root, "storage.root must be non-empty")?;
    require(&cfg.storage.bucket, "storage.bucket must be non-empty")?;
    require(&cfg.storage.archive_prefix, "storage.archive_prefix must be non-empty")?;
    require(&cfg.storage.sitemap_prefix, "storage.sitemap_prefix must be non-empty")?;
    require(&cfg.storage.index_extension, "storage.index_extension must be non-empty")?;

    require(&cfg.tables.sitemaps, "tables.sitemaps must be non-empty")?;
    require(&cfg.tables.slug_mapping, "tables.slug_mapping must be non-empty")?;
    require(&cfg.tables.post_id, "tables.post_id must be non-empty")?;

    require(&cfg.queue.post_urls, "queue.post_urls must be non-empty")?;

    require(&cfg.sources.root_sitemap_url, "sources.root_sitemap_url must be non-empty")?;
    require(&cfg.sources.target_prefix, "sources.target_prefix must be non-empty")?;
    require(&cfg.sources.feed_url, "sources.feed_url must be non-empty")?;
    require(&cfg.sources.posts_api_url, "sources.posts_api_url must be non-empty")?;

    if cfg.dispatch.max_rounds == Some(0) {
        return Err(ConfigError::Invalid("dispatch.max_rounds must be > 0 when set"));
    }

    require(&cfg.notify.region, "notify.region must be non-empty")?;
    if let Some(url) = &cfg.notify.slack_webhook_url {
        require(url, "notify.slack_webhook_url must be non-empty when set")?;
    }
    if let Some(tg) = &cfg.notify.telegram {
        require(&tg.bot_token, "notify.telegram.bot_token must be non-empty")?;
    }

    Ok(())
}

/// Returns the canonical example YAML.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

http:
  user_agent: "devio-index/0.1"
  min_interval_ms: 3000

storage:
  root: "./data/objects"
  bucket: "devio-data"
  archive_prefix: "posts"
  sitemap_prefix: "sitemaps"
  index_extension: ".json.gz"

tables:
  sitemaps: "sitemaps"
  slug_mapping: "slug_mapping"
  post_id: "post_id"

queue:
  post_urls: "post-urls"

sources:
  root_sitemap_url: "https://blog.example.com/sitemap.xml"
  target_prefix: "sitemap-posts"
  feed_url: "https://blog.example.com/feed/"
  posts_api_url: "https://blog.example.com/wp-json/wp/v2/posts"

dispatch:
  max_rounds: null

notify:
  region: "ap-northeast-1"
  slack_webhook_url: "https://hooks.slack.com/services/XXX/YYY/ZZZ"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.dispatch.max_rounds, None);
        assert_eq!(cfg.min_interval(), Duration::from_secs(3));
    }

    #[test]
    fn missing_sections_fail_to_parse() {
        let err = serde_yaml::from_str::<Config>("app:\n  data_dir: x\n").unwrap_err();
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn invalid_sources() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sources.posts_api_url = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("sources.posts_api_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sources.target_prefix = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_table_names() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.tables.slug_mapping = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("tables.slug_mapping")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.tables.post_id = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_max_rounds_rejected() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.dispatch.max_rounds = Some(0);
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
        cfg.dispatch.max_rounds = Some(5);
        validate(&cfg).unwrap();
    }

    #[test]
    fn notify_section_is_optional() {
        let yaml = example().split("\nnotify:").next().unwrap().to_string();
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.notify.slack_webhook_url, None);
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let objects = td.path().join("objects");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.storage.root = objects.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert!(objects.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.queue.post_urls, "post-urls");
    }
}
