use anyhow::Context;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://yonotv-api.pages.dev";
pub const DEFAULT_COMMIT_MESSAGE: &str = "sync(api): refresh match jsons";

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Host serving `api.json` and the per-item `<id>.json` documents.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Git remote that receives the sync commit.
    #[serde(default = "default_remote_name")]
    pub remote_name: String,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Largest response body accepted per document.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
    #[serde(default)]
    pub on_item_error: ItemErrorPolicy,
    #[serde(default)]
    pub rewrite: RewriteRules,
}

/// What happens when a single item document cannot be fetched.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemErrorPolicy {
    /// Fail the whole run.
    #[default]
    Abort,
    /// Keep the previously persisted document and carry on.
    Skip,
}

/// Substitutions applied to fetched documents before they are persisted.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RewriteRules {
    pub vendor_token: String,
    pub vendor_replacement: String,
    pub links_key: String,
    pub renamed_links_key: String,
    pub link_label_field: String,
    /// Scheme, host, path and first query key of the old viewer page.
    pub legacy_viewer_prefix: String,
    pub frame_viewer_prefix: String,
}

impl Default for RewriteRules {
    fn default() -> Self {
        Self {
            vendor_token: "newsecrettips".to_string(),
            vendor_replacement: "yonotvs".to_string(),
            links_key: "telecast_links".to_string(),
            renamed_links_key: "info_sources".to_string(),
            link_label_field: "name".to_string(),
            legacy_viewer_prefix: "https://yonotv.pages.dev/page.html?src".to_string(),
            frame_viewer_prefix: "https://ytvs-frame.pages.dev/frame?ref".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            remote_name: default_remote_name(),
            commit_message: default_commit_message(),
            timeout_secs: default_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            on_item_error: ItemErrorPolicy::default(),
            rewrite: RewriteRules::default(),
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let config = toml::to_string_pretty(self).context("cannot serialize config")?;
        std::fs::write(path, config).context("cannot write config")?;
        Ok(())
    }
}

fn default_base_url() -> String {
    String::from(DEFAULT_BASE_URL)
}

fn default_remote_name() -> String {
    String::from("origin")
}

fn default_commit_message() -> String {
    String::from(DEFAULT_COMMIT_MESSAGE)
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> u64 {
    64 * 1024 * 1024
}

pub fn load_config(path: &Path) -> anyhow::Result<SyncConfig> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot load config file from {}", path.display()))?;
    let config: SyncConfig = toml::from_str(&data).context("cannot load config as TOML")?;
    Ok(config)
}

/// Credentials and remote selection injected at process start.
#[derive(Clone, Debug, Default)]
pub struct RemoteConfig {
    pub remote_name: String,
    pub remote_token: Option<String>,
}
