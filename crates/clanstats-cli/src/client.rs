//! Async HTTP client for the upstream game API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clanstats_core::{
  record::RawRecord,
  upstream::{FetchError, Upstream},
};
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, info};

/// Connection settings for the upstream API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
  pub token:    String,
  pub timeout:  Duration,
}

/// Upstream client over the public REST API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  base:   Url,
  token:  String,
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    let base = Url::parse(&config.base_url)
      .with_context(|| format!("invalid api_base_url {:?}", config.base_url))?;
    if base.cannot_be_a_base() {
      return Err(anyhow!("api_base_url {base} cannot carry a path"));
    }
    let client = Client::builder()
      .timeout(config.timeout)
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, base, token: config.token })
  }

  /// `{base}/{collection}/{tag}` with the tag percent-encoded (`#` → `%23`).
  fn url(&self, collection: &str, tag: &str) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
      segments.pop_if_empty().push(collection).push(tag);
    }
    url
  }

  /// A 404 means the tag does not exist; every other failure is transient.
  async fn get_record(&self, collection: &str, tag: &str) -> Result<RawRecord, FetchError> {
    let url = self.url(collection, tag);
    debug!(%url, "GET");

    let resp = self
      .client
      .get(url)
      .bearer_auth(&self.token)
      .send()
      .await
      .map_err(|e| FetchError::Transient(format!("GET {collection}/{tag}: {e}")))?;

    match resp.status() {
      StatusCode::NOT_FOUND => Err(FetchError::NotFound(tag.to_owned())),
      status if status.is_success() => resp
        .json()
        .await
        .map_err(|e| FetchError::Transient(format!("decoding {collection}/{tag}: {e}"))),
      status => Err(FetchError::Transient(format!("GET {collection}/{tag} → {status}"))),
    }
  }
}

impl Upstream for ApiClient {
  async fn fetch_clan(&self, tag: &str) -> Result<RawRecord, FetchError> {
    info!(%tag, "fetching clan from API");
    self.get_record("clans", tag).await
  }

  async fn fetch_player(&self, tag: &str) -> Result<RawRecord, FetchError> {
    self.get_record("players", tag).await
  }
}
