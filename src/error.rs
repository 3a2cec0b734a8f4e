//! Error types for the sync layer.

use thiserror::Error;

use crate::api::ApiError;
use crate::cache::CacheNamespace;
use crate::credentials::CredentialError;

/// Failures of the local cache store.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("failed to create cache directory: {0}")]
  Io(#[from] std::io::Error),

  #[error("cache lock poisoned")]
  LockPoisoned,

  #[error("could not determine data directory")]
  NoDataDir,

  #[error("date/time parse error: {0}")]
  DateParse(String),
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Api(#[from] ApiError),

  #[error("cache error: {0}")]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Credentials(#[from] CredentialError),

  #[error("mastery level must be a finite number, got {0}")]
  InvalidMastery(f64),

  #[error("invalid knowledge point reference: {0:?}")]
  InvalidReference(String),

  #[error("configuration error: {0}")]
  Config(String),

  /// The identity switched while a call for `started` was in flight; its
  /// results were not written to either namespace.
  #[error("identity changed from {started} to {current} during the call")]
  IdentityChanged {
    started: CacheNamespace,
    current: CacheNamespace,
  },
}

impl Error {
  /// The gateway error behind this failure, if any.
  pub fn as_api(&self) -> Option<&ApiError> {
    match self {
      Error::Api(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
