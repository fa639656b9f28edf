use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use chrono::TimeDelta;
use clanstats_core::status::StatusConfig;
use serde::Deserialize;

use crate::client::ApiConfig;

/// Runtime configuration, read from a TOML file and overridden by
/// `CLANSTATS_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  #[serde(default = "default_api_base_url")]
  pub api_base_url:         String,
  #[serde(default)]
  pub api_token:            String,
  #[serde(default = "default_store_path")]
  pub store_path:           PathBuf,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  #[serde(default = "default_staleness_hours")]
  pub staleness_hours:      i64,
  #[serde(default = "default_top_k")]
  pub top_k:                usize,
  /// Maximum number of refreshes in flight at once.
  #[serde(default = "default_concurrency")]
  pub concurrency:          usize,
}

fn default_api_base_url() -> String { "https://api.clashofclans.com/v1".into() }
fn default_store_path() -> PathBuf { PathBuf::from("clanstats.db") }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_staleness_hours() -> i64 { 12 }
fn default_top_k() -> usize { 10 }
fn default_concurrency() -> usize { 4 }

impl Settings {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("CLANSTATS"))
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise settings")
  }

  pub fn api(&self) -> ApiConfig {
    ApiConfig {
      base_url: self.api_base_url.clone(),
      token:    self.api_token.clone(),
      timeout:  Duration::from_secs(self.request_timeout_secs),
    }
  }

  pub fn status(&self) -> anyhow::Result<StatusConfig> {
    let staleness = TimeDelta::try_hours(self.staleness_hours)
      .ok_or_else(|| anyhow::anyhow!("staleness_hours {} is out of range", self.staleness_hours))?;
    Ok(StatusConfig { staleness, top_k: self.top_k, ..StatusConfig::default() })
  }

  /// Store path with a leading `~` expanded to the home directory.
  pub fn store_path(&self) -> PathBuf {
    let s = self.store_path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/")
      && let Ok(home) = std::env::var("HOME")
    {
      return PathBuf::from(home).join(rest);
    }
    self.store_path.clone()
  }
}
