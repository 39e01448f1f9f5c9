use crate::error::{FetchFailure, SyncError};
use crate::id::ItemId;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const INDEX_NAME: &str = "api";

/// Where the index and item documents come from.
pub trait DocumentSource {
    fn fetch_index(&self) -> Result<Value, SyncError>;
    fn fetch_item(&self, id: &ItemId) -> Result<Value, SyncError>;
}

/// Fetches documents over HTTP from `<base>/<name>.json`.
pub struct HttpSource {
    base_url: String,
    agent: ureq::Agent,
    max_body_bytes: u64,
}

impl HttpSource {
    /// Bodies larger than `max_body_bytes` fail the fetch.
    pub fn new(base_url: &str, timeout: Duration, max_body_bytes: u64) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
            max_body_bytes,
        }
    }

    pub fn document_url(&self, name: &str) -> String {
        format!("{}/{name}.json", self.base_url)
    }

    fn fetch_json(&self, url: String) -> Result<Value, SyncError> {
        debug!("GET {url}");
        match self.get(&url) {
            Ok(value) => Ok(value),
            Err(source) => Err(SyncError::Fetch { url, source }),
        }
    }

    fn get(&self, url: &str) -> Result<Value, FetchFailure> {
        // Non-2xx statuses surface as `ureq::Error::StatusCode`.
        let response = self.agent.get(url).call()?;
        let body = response
            .into_body()
            .with_config()
            .limit(self.max_body_bytes)
            .read_to_string()?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl DocumentSource for HttpSource {
    fn fetch_index(&self) -> Result<Value, SyncError> {
        self.fetch_json(self.document_url(INDEX_NAME))
    }

    fn fetch_item(&self, id: &ItemId) -> Result<Value, SyncError> {
        self.fetch_json(self.document_url(id.as_str()))
    }
}
