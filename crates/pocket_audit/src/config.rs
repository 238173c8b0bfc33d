//! Audit configuration: JSON file plus per-field command-line overrides.
//!
//! Load from: env `POCKET_AUDIT_CONFIG`, or `./config/config.json`.

use crate::chain::{ClientConfig, RetryPolicy};
use crate::run::AuditPlan;
use crate::timeline::{ByBlock, Params, Selection, Timeline, TimelineError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "POCKET_AUDIT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

const DEFAULT_HTTP_RETRY: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error("endpoint is required")]
    MissingEndpoint,
    #[error("selector {0} requires a {0} section")]
    MissingSelection(&'static str),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    #[default]
    Timeline,
    ByBlock,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_http_retry")]
    pub http_retry: u32,
    #[serde(default)]
    pub selector: SelectorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Timeline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_block: Option<ByBlock>,
    #[serde(default)]
    pub params: Params,
    /// Directory for the response cache; no caching when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

fn default_http_retry() -> u32 {
    DEFAULT_HTTP_RETRY
}

/// Command-line overrides; `None` keeps the file's value.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub timeline_start: Option<i64>,
    pub timeline_end: Option<i64>,
    pub timeline_unit: Option<String>,
    pub by_block_start: Option<u64>,
    pub by_block_end: Option<u64>,
    pub endpoint: Option<String>,
    pub http_retry: Option<u32>,
    pub blocks_per_session: Option<i64>,
    pub block_time_in_min: Option<i64>,
    pub cache_dir: Option<PathBuf>,
}

impl AuditConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Config path: `explicit` if given, else env `POCKET_AUDIT_CONFIG`, else the default.
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Apply overrides. Timeline and block bounds are re-validated as a whole, and
    /// overriding either one switches the selector to it.
    pub fn apply(mut self, o: &Overrides) -> Result<Self, ConfigError> {
        if let Some(endpoint) = &o.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(n) = o.http_retry {
            self.http_retry = n;
        }
        if let Some(n) = o.blocks_per_session {
            self.params.blocks_per_session = n;
        }
        if let Some(n) = o.block_time_in_min {
            self.params.approx_block_time_minutes = n;
        }
        if let Some(dir) = &o.cache_dir {
            self.cache_dir = Some(dir.clone());
        }

        if o.timeline_start.is_some() || o.timeline_end.is_some() || o.timeline_unit.is_some() {
            let current = self.timeline;
            let start = o
                .timeline_start
                .or(current.map(|t| t.start()))
                .unwrap_or(0);
            let end = o.timeline_end.or(current.map(|t| t.end())).unwrap_or(0);
            let unit = match (&o.timeline_unit, current) {
                (Some(u), _) => u.clone(),
                (None, Some(t)) => t.unit().to_string(),
                (None, None) => return Err(ConfigError::MissingSelection("timeline")),
            };
            self.timeline = Some(Timeline::new(start, end, &unit)?);
            self.selector = SelectorKind::Timeline;
        }

        if o.by_block_start.is_some() || o.by_block_end.is_some() {
            let current = self.by_block.unwrap_or_default();
            let start = o.by_block_start.unwrap_or(current.start());
            let end = o.by_block_end.unwrap_or(current.end());
            self.by_block = Some(ByBlock::new(start, end)?);
            self.selector = SelectorKind::ByBlock;
        }
        Ok(self)
    }

    pub fn selection(&self) -> Result<Selection, ConfigError> {
        match self.selector {
            SelectorKind::Timeline => self
                .timeline
                .map(Selection::Timeline)
                .ok_or(ConfigError::MissingSelection("timeline")),
            SelectorKind::ByBlock => self
                .by_block
                .map(Selection::ByBlock)
                .ok_or(ConfigError::MissingSelection("by_block")),
        }
    }

    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        Ok(ClientConfig {
            endpoint: self.endpoint.trim().to_string(),
            ..Default::default()
        })
    }

    /// Everything a run needs besides the client.
    pub fn plan(&self) -> Result<AuditPlan, ConfigError> {
        Ok(AuditPlan {
            selection: self.selection()?,
            params: self.params,
            retry: RetryPolicy::with_budget(self.http_retry),
        })
    }
}
