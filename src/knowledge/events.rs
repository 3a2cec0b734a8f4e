//! Structured sync events and the sink they are routed through.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::cache::{CacheKind, CacheNamespace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Archive,
  Unarchive,
  Delete,
  UpdateMastery,
  Batch,
  FinalizeSession,
}

impl fmt::Display for MutationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      MutationKind::Archive => "archive",
      MutationKind::Unarchive => "unarchive",
      MutationKind::Delete => "delete",
      MutationKind::UpdateMastery => "update_mastery",
      MutationKind::Batch => "batch",
      MutationKind::FinalizeSession => "finalize_session",
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
  /// A read could not reach the server and returned the persisted snapshot.
  ServedFromCache {
    namespace: CacheNamespace,
    kind: CacheKind,
    cached_at: DateTime<Utc>,
  },
  /// The cached sets were changed ahead of the remote call.
  OptimisticApplied {
    operation: MutationKind,
    namespace: CacheNamespace,
  },
  /// The optimistic step could not read or write the cache; the mutation
  /// went remote-only.
  OptimisticSkipped {
    operation: MutationKind,
    namespace: CacheNamespace,
    reason: String,
  },
  /// The authoritative refetch overwrote the cache.
  Reconciled {
    operation: MutationKind,
    namespace: CacheNamespace,
    active: usize,
    archived: usize,
  },
  /// The authoritative refetch failed; the cache keeps whatever it held.
  ReconcileFailed {
    operation: MutationKind,
    namespace: CacheNamespace,
    after_remote_failure: bool,
    error: String,
  },
}

/// Destination for sync events.
pub trait EventSink: Send + Sync {
  fn record(&self, event: SyncEvent);
}

/// Default sink: emits each event as a leveled `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
  fn record(&self, event: SyncEvent) {
    match event {
      SyncEvent::ServedFromCache {
        namespace,
        kind,
        cached_at,
      } => {
        tracing::info!(%namespace, %kind, %cached_at, "server unreachable, served cached snapshot");
      }
      SyncEvent::OptimisticApplied {
        operation,
        namespace,
      } => {
        tracing::debug!(%operation, %namespace, "applied optimistic change");
      }
      SyncEvent::OptimisticSkipped {
        operation,
        namespace,
        reason,
      } => {
        tracing::warn!(%operation, %namespace, %reason, "skipped optimistic change");
      }
      SyncEvent::Reconciled {
        operation,
        namespace,
        active,
        archived,
      } => {
        tracing::debug!(%operation, %namespace, active, archived, "reconciled cache with server");
      }
      SyncEvent::ReconcileFailed {
        operation,
        namespace,
        after_remote_failure,
        error,
      } => {
        tracing::warn!(
          %operation,
          %namespace,
          after_remote_failure,
          %error,
          "reconciling refetch failed, cache may be stale"
        );
      }
    }
  }
}
