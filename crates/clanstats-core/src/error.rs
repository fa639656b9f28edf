//! Error types for `clanstats-core`.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
  /// The upstream source has no record for the tag.
  #[error("entity not found: {0}")]
  EntityNotFound(String),

  /// A compact payload did not inflate to a valid serialised structure.
  #[error("corrupt payload: {0}")]
  CorruptPayload(String),

  /// The upstream source or the store is temporarily unavailable.
  #[error("transient fetch failure: {0}")]
  TransientFetch(String),

  #[error("store error: {source}")]
  Store {
    #[source]
    source:    Box<dyn std::error::Error + Send + Sync>,
    /// Whether the backend expects a retry to succeed.
    transient: bool,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box a backend error so it can cross the core boundary.
  pub fn store<E: StoreError>(e: E) -> Self {
    Self::Store { transient: e.is_transient(), source: Box::new(e) }
  }

  /// Whether the external scheduler may retry the failed operation.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::TransientFetch(_) => true,
      Self::Store { transient, .. } => *transient,
      _ => false,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
