//! Error type for `clanstats-store-sqlite`.

use chrono::{DateTime, Utc};
use clanstats_core::store::StoreError;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A snapshot was appended with a timestamp not after the latest one.
  #[error("snapshot for {tag} at {taken_at} is not after latest snapshot at {latest}")]
  OutOfOrder {
    tag:      String,
    taken_at: DateTime<Utc>,
    latest:   DateTime<Utc>,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl StoreError for Error {
  /// Only a busy or locked database, or a closed connection, is worth
  /// retrying. Everything else fails the same way again.
  fn is_transient(&self) -> bool {
    match self {
      Self::Database(tokio_rusqlite::Error::ConnectionClosed) => true,
      Self::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) => {
        matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
      }
      _ => false,
    }
  }
}
