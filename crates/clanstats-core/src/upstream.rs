//! The contract required from the upstream game API client.

use std::future::Future;

use thiserror::Error;

use crate::record::RawRecord;

/// Failure modes of an upstream fetch. A missing entity must be
/// distinguishable from a temporary outage so that a transient error never
/// looks like "this tag does not exist".
#[derive(Debug, Clone, Error)]
pub enum FetchError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("transient failure: {0}")]
  Transient(String),
}

impl From<FetchError> for crate::Error {
  fn from(e: FetchError) -> Self {
    match e {
      FetchError::NotFound(tag) => Self::EntityNotFound(tag),
      FetchError::Transient(msg) => Self::TransientFetch(msg),
    }
  }
}

/// Source of raw clan and player records. Implementations own their timeout
/// and retry policy.
pub trait Upstream: Send + Sync {
  /// The clan record, including its `memberList`.
  fn fetch_clan<'a>(
    &'a self,
    tag: &'a str,
  ) -> impl Future<Output = Result<RawRecord, FetchError>> + Send + 'a;

  /// The full player record.
  fn fetch_player<'a>(
    &'a self,
    tag: &'a str,
  ) -> impl Future<Output = Result<RawRecord, FetchError>> + Send + 'a;
}
