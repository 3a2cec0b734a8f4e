//! Cache layer that orchestrates caching logic with network fetching.

use std::future::Future;
use std::sync::Arc;

use crate::api::ApiError;
use crate::error::{CacheError, Error, Result};
use crate::session::Session;

use super::storage::{CacheStorage, CachedSnapshot};
use super::traits::{CacheKind, CacheNamespace, CacheResult, Cacheable};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the repository and the network client. It is
/// network-first: the server is always asked, and a persisted snapshot is only
/// served when the server cannot be reached.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Fetch a record set for `namespace`, writing through on success.
  ///
  /// 1. Ask the network
  /// 2. On success, persist and return the fresh data
  /// 3. On failure, return the persisted snapshot (offline mode)
  /// 4. With no snapshot, propagate the network error
  ///
  /// Malformed requests are never papered over with cached data. If the
  /// session moved to another identity while the request was out, nothing is
  /// written or served and the call fails with [`Error::IdentityChanged`].
  pub async fn fetch_list<T, F, Fut>(
    &self,
    session: &Session,
    namespace: &CacheNamespace,
    kind: CacheKind,
    fetcher: F,
  ) -> Result<CacheResult<Vec<T>>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, ApiError>>,
  {
    let identity_changed = || Error::IdentityChanged {
      started: *namespace,
      current: session.namespace(),
    };

    match fetcher().await {
      Ok(data) => {
        let saved = session
          .while_current(namespace, || self.storage.save(namespace, kind, &data))
          .ok_or_else(identity_changed)?;
        if let Err(e) = saved {
          tracing::warn!(%namespace, %kind, error = %e, "failed to write through fresh data");
        }
        Ok(CacheResult::from_network(data))
      }
      Err(network_err) if network_err.is_defect() => Err(Error::Api(network_err)),
      Err(network_err) => {
        let cached = session
          .while_current(namespace, || self.storage.load::<T>(namespace, kind))
          .ok_or_else(identity_changed)?;
        let cached = match cached {
          Ok(cached) => cached,
          Err(e) => {
            tracing::warn!(%namespace, %kind, error = %e, "cache unreadable during fallback");
            None
          }
        };
        match cached {
          Some(snapshot) => {
            tracing::debug!(
              %namespace,
              %kind,
              cached_at = %snapshot.cached_at,
              error = %network_err,
              "serving cached snapshot"
            );
            Ok(CacheResult::offline(snapshot.records, snapshot.cached_at))
          }
          None => Err(Error::Api(network_err)),
        }
      }
    }
  }

  pub fn load<T: Cacheable>(
    &self,
    namespace: &CacheNamespace,
    kind: CacheKind,
  ) -> Result<Option<CachedSnapshot<T>>, CacheError> {
    self.storage.load(namespace, kind)
  }

  pub fn store<T: Cacheable>(
    &self,
    namespace: &CacheNamespace,
    kind: CacheKind,
    records: &[T],
  ) -> Result<(), CacheError> {
    self.storage.save(namespace, kind, records)
  }

  /// Overwrite both record sets in one transaction.
  pub fn store_pair<T: Cacheable>(
    &self,
    namespace: &CacheNamespace,
    active: &[T],
    archived: &[T],
  ) -> Result<(), CacheError> {
    self.storage.save_pair(namespace, active, archived)
  }

  pub fn clear(&self, namespace: &CacheNamespace) -> Result<(), CacheError> {
    self.storage.clear(namespace)
  }

  pub fn clear_all(&self) -> Result<usize, CacheError> {
    self.storage.clear_all()
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
