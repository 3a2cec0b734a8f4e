//! Knowledge point repository: cached reads and optimistic mutations.
//!
//! Reads go to the server first and write through to the cache; the cache is
//! only served when the server cannot be reached.
//!
//! Every mutation runs the same five steps, strictly in order:
//!
//! 1. Load the cached active and archived sets (skip 2 if either is missing)
//! 2. Apply the change locally and persist it
//! 3. Make the remote call
//! 4. On success, refetch both sets and overwrite the cache
//! 5. On failure, refetch the same way if step 2 changed anything
//!
//! Exactly one refetch is attempted per call and the mutation itself is never
//! retried. A failed refetch is reported to the [`EventSink`]; the caller
//! always sees the error from step 3. Concurrent calls on the same record are
//! not serialized against each other.

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::api::types::{
  AiReviewResponse, BatchAction, BatchActionRequest, BatchActionResponse, CalendarHeatmap,
  DailySummary, Dashboard, GuestAnswer, GuestFeedback, SampleQuestion, SampleQuestionsResponse,
  StartSessionRequest, StartSessionResponse,
};
use crate::api::{ApiClient, ApiError, Endpoint};
use crate::cache::{
  CacheKind, CacheLayer, CacheNamespace, CacheResult, CacheSource, CacheStorage, CachedSnapshot,
  SqliteStorage,
};
use crate::error::{Error, Result};
use crate::session::Session;

use super::events::{EventSink, MutationKind, SyncEvent};
use super::ident::KnowledgePointRef;
use super::mutation::Mutation;
use super::types::KnowledgePoint;

pub struct KnowledgePointRepository<S: CacheStorage = SqliteStorage> {
  api: ApiClient,
  cache: CacheLayer<S>,
  session: Arc<Session>,
  events: Arc<dyn EventSink>,
}

impl<S: CacheStorage> Clone for KnowledgePointRepository<S> {
  fn clone(&self) -> Self {
    Self {
      api: self.api.clone(),
      cache: self.cache.clone(),
      session: Arc::clone(&self.session),
      events: Arc::clone(&self.events),
    }
  }
}

fn list_endpoint(kind: CacheKind) -> Endpoint {
  match kind {
    CacheKind::Active => Endpoint::active_points(),
    CacheKind::Archived => Endpoint::archived_points(),
  }
}

impl<S: CacheStorage> KnowledgePointRepository<S> {
  pub fn new(
    api: ApiClient,
    cache: CacheLayer<S>,
    session: Arc<Session>,
    events: Arc<dyn EventSink>,
  ) -> Self {
    Self {
      api,
      cache,
      session,
      events,
    }
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn fetch_active(&self) -> Result<CacheResult<Vec<KnowledgePoint>>> {
    self.fetch_kind(CacheKind::Active).await
  }

  pub async fn fetch_archived(&self) -> Result<CacheResult<Vec<KnowledgePoint>>> {
    self.fetch_kind(CacheKind::Archived).await
  }

  async fn fetch_kind(&self, kind: CacheKind) -> Result<CacheResult<Vec<KnowledgePoint>>> {
    let namespace = self.session.namespace();
    let endpoint = list_endpoint(kind);

    let result = self
      .cache
      .fetch_list(&self.session, &namespace, kind, || {
        self.api.send::<Vec<KnowledgePoint>>(&endpoint)
      })
      .await?;

    if let (CacheSource::Offline, Some(cached_at)) = (result.source, result.cached_at) {
      self.events.record(SyncEvent::ServedFromCache {
        namespace,
        kind,
        cached_at,
      });
    }
    Ok(result)
  }

  /// Fetch one point straight from the server. Not cached.
  pub async fn fetch_point(&self, target: KnowledgePointRef) -> Result<KnowledgePoint> {
    Ok(self.api.send(&Endpoint::point(&target)).await?)
  }

  /// The persisted snapshot for the current identity, without touching the
  /// network.
  pub fn cached(&self, kind: CacheKind) -> Result<Option<CachedSnapshot<KnowledgePoint>>> {
    Ok(self.cache.load(&self.session.namespace(), kind)?)
  }

  // ── Mutations ─────────────────────────────────────────────────────────────

  pub async fn archive(&self, target: KnowledgePointRef) -> Result<()> {
    let endpoint = Endpoint::archive(&target);
    self
      .mutate(Mutation::Archive(target), || self.api.send_no_body(&endpoint))
      .await
  }

  pub async fn unarchive(&self, target: KnowledgePointRef) -> Result<()> {
    let endpoint = Endpoint::unarchive(&target);
    self
      .mutate(Mutation::Unarchive(target), || self.api.send_no_body(&endpoint))
      .await
  }

  pub async fn delete(&self, target: KnowledgePointRef) -> Result<()> {
    let endpoint = Endpoint::delete_point(&target);
    self
      .mutate(Mutation::Delete(target), || self.api.send_no_body(&endpoint))
      .await
  }

  /// Set the mastery level. Out-of-range values are clamped into `0.0..=1.0`.
  pub async fn update_mastery(&self, target: KnowledgePointRef, level: f64) -> Result<()> {
    if !level.is_finite() {
      return Err(Error::InvalidMastery(level));
    }
    let level = level.clamp(0.0, 1.0);
    let endpoint = Endpoint::update_point(&target, json!({ "mastery_level": level }));
    self
      .mutate(Mutation::SetMastery(target, level), || {
        self.api.send_no_body(&endpoint)
      })
      .await
  }

  /// Apply one action to many points in a single request. Invalid references
  /// are dropped; an empty batch does nothing.
  pub async fn batch_action(
    &self,
    action: BatchAction,
    targets: &[KnowledgePointRef],
  ) -> Result<BatchActionResponse> {
    let request = BatchActionRequest::new(action, targets);
    if request.is_empty() {
      tracing::debug!(?action, "batch has no addressable points, skipping");
      return Ok(BatchActionResponse::default());
    }

    let valid: Vec<KnowledgePointRef> = targets.iter().copied().filter(|t| t.is_valid()).collect();
    let endpoint = Endpoint::batch_action(&request);
    self
      .mutate(Mutation::Batch(action, valid), || self.api.send(&endpoint))
      .await
  }

  /// Submit practice results. Mastery changes happen server-side, so the
  /// cache is reconciled afterwards.
  pub async fn finalize_session(&self, results: Value) -> Result<Value> {
    let endpoint = Endpoint::finalize_session(results);
    self
      .mutate(Mutation::FinalizeSession, || self.api.send(&endpoint))
      .await
  }

  async fn mutate<T, F, Fut>(&self, mutation: Mutation, remote: F) -> Result<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    // Every cache write below targets this namespace, and is dropped if the
    // session has moved on by the time it lands.
    let namespace = self.session.namespace();
    let operation = mutation.kind();

    let applied = self.apply_optimistic(&namespace, &mutation);

    match remote().await {
      Ok(value) => {
        self.reconcile(&namespace, operation, false).await;
        Ok(value)
      }
      Err(remote_err) => {
        tracing::warn!(%operation, %namespace, error = %remote_err, "remote mutation failed");
        if applied {
          self.reconcile(&namespace, operation, true).await;
        }
        Err(remote_err.into())
      }
    }
  }

  /// Steps 1 and 2. Returns whether the persisted cache changed.
  fn apply_optimistic(&self, namespace: &CacheNamespace, mutation: &Mutation) -> bool {
    let operation = mutation.kind();
    let skip = |reason: String| {
      self.events.record(SyncEvent::OptimisticSkipped {
        operation,
        namespace: *namespace,
        reason,
      });
      false
    };

    let active = self.cache.load::<KnowledgePoint>(namespace, CacheKind::Active);
    let archived = self.cache.load::<KnowledgePoint>(namespace, CacheKind::Archived);

    let (mut active, mut archived) = match (active, archived) {
      (Ok(Some(active)), Ok(Some(archived))) => (active.records, archived.records),
      (Err(e), _) | (_, Err(e)) => return skip(format!("cache unreadable: {}", e)),
      // Nothing cached yet, the mutation goes remote-only.
      _ => return false,
    };

    if !mutation.apply(&mut active, &mut archived) {
      return false;
    }

    match self.cache.store_pair(namespace, &active, &archived) {
      Ok(()) => {
        self.events.record(SyncEvent::OptimisticApplied {
          operation,
          namespace: *namespace,
        });
        true
      }
      Err(e) => skip(format!("cache not writable: {}", e)),
    }
  }

  /// Steps 4 and 5: one authoritative refetch of both sets.
  async fn reconcile(
    &self,
    namespace: &CacheNamespace,
    operation: MutationKind,
    after_remote_failure: bool,
  ) {
    match self.refetch(namespace).await {
      Ok((active, archived)) => self.events.record(SyncEvent::Reconciled {
        operation,
        namespace: *namespace,
        active,
        archived,
      }),
      Err(e) => self.events.record(SyncEvent::ReconcileFailed {
        operation,
        namespace: *namespace,
        after_remote_failure,
        error: e.to_string(),
      }),
    }
  }

  async fn refetch(&self, namespace: &CacheNamespace) -> Result<(usize, usize)> {
    let active_endpoint = Endpoint::active_points();
    let archived_endpoint = Endpoint::archived_points();

    let (active, archived) = futures::try_join!(
      self.api.send::<Vec<KnowledgePoint>>(&active_endpoint),
      self.api.send::<Vec<KnowledgePoint>>(&archived_endpoint),
    )?;

    // The lists were fetched with whatever credentials were current; only
    // keep them if they still belong to this namespace.
    self
      .session
      .while_current(namespace, || {
        self.cache.store_pair(namespace, &active, &archived)
      })
      .ok_or_else(|| Error::IdentityChanged {
        started: *namespace,
        current: self.session.namespace(),
      })??;
    Ok((active.len(), archived.len()))
  }

  // ── Cache maintenance ─────────────────────────────────────────────────────

  /// Drop the current identity's snapshots.
  pub fn clear_cache(&self) -> Result<()> {
    Ok(self.cache.clear(&self.session.namespace())?)
  }

  /// Drop every identity's snapshots. Returns how many were removed.
  pub fn clear_all_caches(&self) -> Result<usize> {
    Ok(self.cache.clear_all()?)
  }

  // ── Pass-through (not cached) ─────────────────────────────────────────────

  pub async fn request_ai_review(&self, target: KnowledgePointRef) -> Result<AiReviewResponse> {
    Ok(self.api.send(&Endpoint::ai_review(&target)).await?)
  }

  pub async fn dashboard(&self) -> Result<Dashboard> {
    Ok(self.api.send(&Endpoint::dashboard()).await?)
  }

  pub async fn calendar_heatmap(&self, year: i32, month: u32) -> Result<CalendarHeatmap> {
    Ok(self.api.send(&Endpoint::calendar_heatmap(year, month)).await?)
  }

  pub async fn daily_summary(&self, date: chrono::NaiveDate) -> Result<DailySummary> {
    Ok(self.api.send(&Endpoint::daily_summary(date)).await?)
  }

  pub async fn start_session(&self, req: &StartSessionRequest) -> Result<StartSessionResponse> {
    Ok(self.api.send(&Endpoint::start_session(req)).await?)
  }

  pub async fn sample_questions(&self, count: u32) -> Result<Vec<SampleQuestion>> {
    let resp: SampleQuestionsResponse = self.api.send(&Endpoint::sample_questions(count)).await?;
    Ok(resp.questions)
  }

  pub async fn submit_guest_answer(&self, answer: &GuestAnswer) -> Result<GuestFeedback> {
    Ok(self.api.send(&Endpoint::submit_guest_answer(answer)).await?)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::Ordering;
  use std::sync::Mutex;
  use std::time::Duration;

  use super::*;
  use crate::api::Timeouts;
  use crate::cache::testing::FlakyStorage;
  use crate::credentials::{CredentialSlot, CredentialStore, MemoryCredentialStore};
  use crate::knowledge::{CompositeId, LEGACY_OWNER_ID};
  use crate::session::Identity;
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[derive(Default)]
  struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
  }

  impl RecordingSink {
    fn events(&self) -> Vec<SyncEvent> {
      self.events.lock().unwrap().clone()
    }

    fn reconcile_failures(&self) -> usize {
      self
        .events()
        .iter()
        .filter(|e| matches!(e, SyncEvent::ReconcileFailed { .. }))
        .count()
    }
  }

  impl EventSink for RecordingSink {
    fn record(&self, event: SyncEvent) {
      self.events.lock().unwrap().push(event);
    }
  }

  struct Harness<S: CacheStorage = SqliteStorage> {
    server: MockServer,
    repo: KnowledgePointRepository<S>,
    creds: Arc<MemoryCredentialStore>,
    sink: Arc<RecordingSink>,
  }

  async fn harness(identity: Identity) -> Harness {
    harness_with(identity, SqliteStorage::open_in_memory().unwrap()).await
  }

  async fn harness_with<S: CacheStorage>(identity: Identity, storage: S) -> Harness<S> {
    let server = MockServer::builder().start().await;
    let creds = Arc::new(MemoryCredentialStore::new());
    creds.save(CredentialSlot::AccessToken, "tok").unwrap();
    let api = ApiClient::new(&server.uri(), creds.clone(), Timeouts::default()).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let repo = KnowledgePointRepository::new(
      api,
      CacheLayer::new(storage),
      Arc::new(Session::new(identity)),
      sink.clone(),
    );
    Harness {
      server,
      repo,
      creds,
      sink,
    }
  }

  fn legacy(id: i64) -> KnowledgePoint {
    KnowledgePoint {
      id,
      legacy_id: Some(id),
      correct_phrase: format!("phrase {}", id),
      ..Default::default()
    }
  }

  fn archived(id: i64) -> KnowledgePoint {
    KnowledgePoint {
      is_archived: true,
      ..legacy(id)
    }
  }

  fn ids(points: &[KnowledgePoint]) -> Vec<i64> {
    points.iter().map(|p| p.id).collect()
  }

  async fn mount_list(server: &MockServer, kind: CacheKind, points: &[KnowledgePoint], times: u64) {
    Mock::given(method("GET"))
      .and(path(list_endpoint(kind).path))
      .respond_with(ResponseTemplate::new(200).set_body_json(points))
      .expect(times)
      .mount(server)
      .await;
  }

  async fn mount_lists(
    server: &MockServer,
    active: &[KnowledgePoint],
    archived: &[KnowledgePoint],
    times: u64,
  ) {
    mount_list(server, CacheKind::Active, active, times).await;
    mount_list(server, CacheKind::Archived, archived, times).await;
  }

  async fn mount_lists_failing(server: &MockServer, times: u64) {
    for list in ["/api/data/knowledge_points", "/api/data/archived_knowledge_points"] {
      Mock::given(method("GET"))
        .and(path(list))
        .respond_with(ResponseTemplate::new(503))
        .expect(0..=times)
        .mount(server)
        .await;
    }
  }

  fn seed<S: CacheStorage>(h: &Harness<S>, active: &[KnowledgePoint], archived: &[KnowledgePoint]) {
    let ns = h.repo.session().namespace();
    h.repo.cache.store(&ns, CacheKind::Active, active).unwrap();
    h.repo.cache.store(&ns, CacheKind::Archived, archived).unwrap();
  }

  fn cached_ids<S: CacheStorage>(h: &Harness<S>, kind: CacheKind) -> Vec<i64> {
    ids(&h.repo.cached(kind).unwrap().unwrap().records)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn test_read_writes_through() {
    let h = harness(Identity::User(1)).await;
    mount_list(&h.server, CacheKind::Active, &[legacy(1), legacy(2)], 1).await;

    let result = h.repo.fetch_active().await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(ids(&result.data), vec![1, 2]);
    assert_eq!(cached_ids(&h, CacheKind::Active), vec![1, 2]);
  }

  #[tokio::test]
  async fn test_read_falls_back_when_offline() {
    let h = harness(Identity::User(1)).await;
    mount_list(&h.server, CacheKind::Archived, &[archived(2)], 1).await;
    let online = h.repo.fetch_archived().await.unwrap();

    let Harness {
      server, repo, sink, ..
    } = h;
    drop(server);

    let offline = repo.fetch_archived().await.unwrap();
    assert!(offline.is_offline());
    assert_eq!(offline.data, online.data);
    assert!(sink
      .events()
      .iter()
      .any(|e| matches!(e, SyncEvent::ServedFromCache { kind: CacheKind::Archived, .. })));
  }

  #[tokio::test]
  async fn test_read_without_snapshot_propagates_error() {
    let h = harness(Identity::Guest).await;
    let Harness { server, repo, .. } = h;
    drop(server);

    let err = repo.fetch_active().await.unwrap_err();
    assert!(err.as_api().is_some_and(|e| e.is_transport()), "got {err:?}");
  }

  #[tokio::test]
  async fn test_read_prefers_server_over_snapshot() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(1)], &[]);
    mount_list(&h.server, CacheKind::Active, &[legacy(2)], 1).await;

    let result = h.repo.fetch_active().await.unwrap();
    assert_eq!(ids(&result.data), vec![2]);
  }

  #[tokio::test]
  async fn test_namespaces_are_isolated() {
    let h = harness(Identity::User(1)).await;
    mount_list(&h.server, CacheKind::Active, &[legacy(1), legacy(2)], 1).await;
    h.repo.fetch_active().await.unwrap();

    let Harness { server, repo, .. } = h;
    drop(server);

    for other in [Identity::User(2), Identity::Guest] {
      repo.session().switch_to(other);
      assert!(repo.cached(CacheKind::Active).unwrap().is_none());
      assert!(repo.fetch_active().await.is_err());
    }

    // The first identity's snapshot is still there for it.
    repo.session().switch_to(Identity::User(1));
    let result = repo.fetch_active().await.unwrap();
    assert!(result.is_offline());
    assert_eq!(ids(&result.data), vec![1, 2]);
  }

  #[tokio::test]
  async fn test_clear_then_read_matches_fresh_read() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(8), legacy(9)], &[archived(7)]);
    mount_list(&h.server, CacheKind::Active, &[legacy(1)], 1).await;

    h.repo.clear_cache().unwrap();
    assert!(h.repo.cached(CacheKind::Active).unwrap().is_none());
    let after_clear = h.repo.fetch_active().await.unwrap();

    let fresh = harness(Identity::User(1)).await;
    mount_list(&fresh.server, CacheKind::Active, &[legacy(1)], 1).await;
    let fresh_read = fresh.repo.fetch_active().await.unwrap();

    assert_eq!(after_clear.data, fresh_read.data);
    assert_eq!(after_clear.source, fresh_read.source);
  }

  #[tokio::test]
  async fn test_dual_address_fetch_returns_same_record() {
    let h = harness(Identity::User(1)).await;
    let mut point = legacy(42);
    point.user_id = Some(LEGACY_OWNER_ID);
    point.sequence_id = Some(42);
    for route in [
      "/api/data/knowledge_point/42",
      "/api/v2/data/knowledge_point/1/42",
    ] {
      Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(&point))
        .expect(1)
        .mount(&h.server)
        .await;
    }

    let by_legacy = h.repo.fetch_point(KnowledgePointRef::Legacy(42)).await.unwrap();
    let by_composite = h
      .repo
      .fetch_point(KnowledgePointRef::Composite(CompositeId::from_legacy(42)))
      .await
      .unwrap();
    assert_eq!(by_legacy, by_composite);
  }

  // ── Mutations ─────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn test_archive_applies_optimistically_then_reconciles() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(1), legacy(2), legacy(42), legacy(4), legacy(5)], &[]);

    Mock::given(method("POST"))
      .and(path("/api/data/knowledge_point/42/archive"))
      .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
      .expect(1)
      .mount(&h.server)
      .await;
    let server_active = [legacy(1), legacy(2), legacy(4), legacy(5)];
    let server_archived = [archived(42)];
    mount_lists(&h.server, &server_active, &server_archived, 1).await;

    let observe = async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      (
        cached_ids(&h, CacheKind::Active),
        cached_ids(&h, CacheKind::Archived),
      )
    };
    let (result, (mid_active, mid_archived)) =
      tokio::join!(h.repo.archive(KnowledgePointRef::Legacy(42)), observe);

    result.unwrap();
    assert_eq!(mid_active, vec![1, 2, 4, 5]);
    assert_eq!(mid_archived, vec![42]);

    let active = h.repo.cached(CacheKind::Active).unwrap().unwrap().records;
    let archived_set = h.repo.cached(CacheKind::Archived).unwrap().unwrap().records;
    assert_eq!(active, server_active);
    assert_eq!(archived_set, server_archived);
    assert!(h.sink.events().iter().any(|e| matches!(
      e,
      SyncEvent::Reconciled {
        operation: MutationKind::Archive,
        active: 4,
        archived: 1,
        ..
      }
    )));
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_failed_archive_rolls_back_via_refetch() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(1), legacy(42)], &[]);

    Mock::given(method("POST"))
      .and(path("/api/data/knowledge_point/42/archive"))
      .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "archive failed"})))
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists(&h.server, &[legacy(1), legacy(42)], &[], 1).await;

    let err = h
      .repo
      .archive(KnowledgePointRef::Legacy(42))
      .await
      .unwrap_err();

    assert_eq!(err.as_api().and_then(|e| e.status()), Some(500));
    assert_eq!(cached_ids(&h, CacheKind::Active), vec![1, 42]);
    assert!(cached_ids(&h, CacheKind::Archived).is_empty());
    assert_eq!(h.sink.reconcile_failures(), 0);
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_failed_refetch_keeps_optimistic_state_and_remote_error() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(1), legacy(42)], &[]);

    Mock::given(method("POST"))
      .and(path("/api/data/knowledge_point/42/archive"))
      .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "archive failed"})))
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists_failing(&h.server, 1).await;

    let err = h
      .repo
      .archive(KnowledgePointRef::Legacy(42))
      .await
      .unwrap_err();

    match err.as_api() {
      Some(ApiError::ServerError { status, message }) => {
        assert_eq!(*status, 500);
        assert_eq!(message.as_deref(), Some("archive failed"));
      }
      other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(cached_ids(&h, CacheKind::Active), vec![1]);
    assert_eq!(cached_ids(&h, CacheKind::Archived), vec![42]);
    assert!(h.sink.events().iter().any(|e| matches!(
      e,
      SyncEvent::ReconcileFailed {
        after_remote_failure: true,
        ..
      }
    )));
    assert_eq!(h.sink.reconcile_failures(), 1);
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_failure_without_local_change_skips_refetch() {
    let h = harness(Identity::User(1)).await;
    // Nothing cached: the mutation is remote-only.
    Mock::given(method("DELETE"))
      .and(path("/api/data/knowledge_point/42"))
      .respond_with(ResponseTemplate::new(404))
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists(&h.server, &[], &[], 0).await;

    let err = h.repo.delete(KnowledgePointRef::Legacy(42)).await.unwrap_err();
    assert_eq!(err.as_api().and_then(|e| e.status()), Some(404));
    assert!(h.repo.cached(CacheKind::Active).unwrap().is_none());
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_success_without_snapshot_still_reconciles() {
    let h = harness(Identity::User(3)).await;
    Mock::given(method("POST"))
      .and(path("/api/v2/data/knowledge_point/3/9/unarchive"))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists(&h.server, &[legacy(9)], &[], 1).await;

    h.repo
      .unarchive(KnowledgePointRef::Composite(CompositeId::new(3, 9)))
      .await
      .unwrap();

    assert_eq!(cached_ids(&h, CacheKind::Active), vec![9]);
    assert!(cached_ids(&h, CacheKind::Archived).is_empty());
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_reconcile_failure_after_success_is_secondary() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(1)], &[archived(2)]);
    Mock::given(method("POST"))
      .and(path("/api/data/knowledge_point/2/unarchive"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&h.server)
      .await;
    mount_lists_failing(&h.server, 1).await;

    h.repo.unarchive(KnowledgePointRef::Legacy(2)).await.unwrap();

    assert_eq!(cached_ids(&h, CacheKind::Active), vec![1, 2]);
    assert!(h.sink.events().iter().any(|e| matches!(
      e,
      SyncEvent::ReconcileFailed {
        after_remote_failure: false,
        ..
      }
    )));
  }

  #[tokio::test]
  async fn test_invalid_reference_surfaces_server_rejection() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(1)], &[]);
    Mock::given(method("POST"))
      .and(path("/api/data/knowledge_point/invalid/archive"))
      .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not Found"})))
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists(&h.server, &[], &[], 0).await;

    let err = h.repo.archive(KnowledgePointRef::Invalid).await.unwrap_err();
    assert_eq!(err.as_api().and_then(|e| e.status()), Some(404));
    assert_eq!(cached_ids(&h, CacheKind::Active), vec![1]);
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_update_mastery_clamps_and_rejects_nan() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(5)], &[]);

    let err = h
      .repo
      .update_mastery(KnowledgePointRef::Legacy(5), f64::NAN)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidMastery(_)));

    let mut mastered = legacy(5);
    mastered.mastery_level = 1.0;
    Mock::given(method("PUT"))
      .and(path("/api/data/knowledge_point/5"))
      .and(body_json(json!({"mastery_level": 1.0})))
      .respond_with(ResponseTemplate::new(200).set_body_json(&mastered))
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists(&h.server, std::slice::from_ref(&mastered), &[], 1).await;

    h.repo
      .update_mastery(KnowledgePointRef::Legacy(5), 1.7)
      .await
      .unwrap();

    let cached = h.repo.cached(CacheKind::Active).unwrap().unwrap();
    assert_eq!(cached.records[0].mastery_level, 1.0);
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_batch_archive_sends_both_address_spaces() {
    let h = harness(Identity::User(7)).await;
    let mut composite = legacy(30);
    composite.user_id = Some(7);
    composite.sequence_id = Some(3);
    seed(&h, &[legacy(1), legacy(2), composite.clone()], &[]);

    Mock::given(method("POST"))
      .and(path("/api/data/knowledge_points/batch_action"))
      .and(body_json(json!({
        "action": "archive",
        "composite_ids": [{"user_id": 7, "sequence_id": 3}],
        "legacy_ids": [2]
      })))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!({"success": true, "processed_count": 2})),
      )
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists(&h.server, &[legacy(1)], &[archived(2), composite], 1).await;

    let resp = h
      .repo
      .batch_action(
        BatchAction::Archive,
        &[
          KnowledgePointRef::Legacy(2),
          KnowledgePointRef::Composite(CompositeId::new(7, 3)),
          KnowledgePointRef::Invalid,
        ],
      )
      .await
      .unwrap();

    assert!(resp.success);
    assert_eq!(resp.processed_count, 2);
    assert_eq!(cached_ids(&h, CacheKind::Active), vec![1]);
    assert_eq!(cached_ids(&h, CacheKind::Archived), vec![2, 30]);
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_empty_batch_makes_no_requests() {
    let h = harness(Identity::User(1)).await;
    let resp = h
      .repo
      .batch_action(BatchAction::Delete, &[KnowledgePointRef::Invalid])
      .await
      .unwrap();
    assert_eq!(resp.processed_count, 0);
    assert!(h.server.received_requests().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_finalize_session_reconciles() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(1)], &[]);
    let mut reviewed = legacy(1);
    reviewed.correct_count = 1;

    Mock::given(method("POST"))
      .and(path("/api/finalize_session"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists(&h.server, std::slice::from_ref(&reviewed), &[], 1).await;

    let resp = h.repo.finalize_session(json!({"results": []})).await.unwrap();
    assert_eq!(resp["status"], "ok");
    let cached = h.repo.cached(CacheKind::Active).unwrap().unwrap();
    assert_eq!(cached.records[0].correct_count, 1);
    h.server.verify().await;
  }

  fn skipped_reason(sink: &RecordingSink) -> Option<String> {
    sink.events().into_iter().find_map(|e| match e {
      SyncEvent::OptimisticSkipped { reason, .. } => Some(reason),
      _ => None,
    })
  }

  #[tokio::test]
  async fn test_unwritable_cache_goes_remote_only() {
    let storage = FlakyStorage::new();
    let fail_writes = storage.fail_writes.clone();
    let h = harness_with(Identity::User(1), storage).await;
    seed(&h, &[legacy(1), legacy(42)], &[]);
    fail_writes.store(true, Ordering::SeqCst);

    Mock::given(method("POST"))
      .and(path("/api/data/knowledge_point/42/archive"))
      .respond_with(ResponseTemplate::new(500))
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists(&h.server, &[], &[], 0).await;

    let err = h
      .repo
      .archive(KnowledgePointRef::Legacy(42))
      .await
      .unwrap_err();

    assert_eq!(err.as_api().and_then(|e| e.status()), Some(500));
    // Neither set moved: the record is not lost between them.
    assert_eq!(cached_ids(&h, CacheKind::Active), vec![1, 42]);
    assert!(cached_ids(&h, CacheKind::Archived).is_empty());
    assert!(skipped_reason(&h.sink).is_some_and(|r| r.contains("not writable")));
    assert!(!h
      .sink
      .events()
      .iter()
      .any(|e| matches!(e, SyncEvent::OptimisticApplied { .. })));
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_unreadable_cache_skips_optimistic_step() {
    let storage = FlakyStorage::new();
    let fail_loads = storage.fail_loads.clone();
    let h = harness_with(Identity::User(1), storage).await;
    seed(&h, &[legacy(42)], &[]);
    fail_loads.store(true, Ordering::SeqCst);

    Mock::given(method("POST"))
      .and(path("/api/data/knowledge_point/42/archive"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&h.server)
      .await;
    mount_lists(&h.server, &[], &[archived(42)], 1).await;

    h.repo.archive(KnowledgePointRef::Legacy(42)).await.unwrap();

    assert!(skipped_reason(&h.sink).is_some_and(|r| r.contains("unreadable")));
    assert!(h
      .sink
      .events()
      .iter()
      .any(|e| matches!(e, SyncEvent::Reconciled { archived: 1, .. })));

    fail_loads.store(false, Ordering::SeqCst);
    assert!(cached_ids(&h, CacheKind::Active).is_empty());
    assert_eq!(cached_ids(&h, CacheKind::Archived), vec![42]);
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_identity_switch_during_mutation_keeps_lists_out_of_both_namespaces() {
    let h = harness(Identity::User(1)).await;
    seed(&h, &[legacy(42)], &[]);
    Mock::given(method("POST"))
      .and(path("/api/data/knowledge_point/42/archive"))
      .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
      .expect(1)
      .mount(&h.server)
      .await;
    // By the time the refetch runs, requests carry the second user's token.
    for (kind, points) in [
      (CacheKind::Active, vec![legacy(777)]),
      (CacheKind::Archived, vec![archived(888)]),
    ] {
      Mock::given(method("GET"))
        .and(path(list_endpoint(kind).path))
        .and(header("authorization", "Bearer tok-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&points))
        .expect(1)
        .mount(&h.server)
        .await;
    }

    let switch = async {
      tokio::time::sleep(Duration::from_millis(30)).await;
      h.creds.save(CredentialSlot::AccessToken, "tok-b").unwrap();
      h.repo.session().switch_to(Identity::User(2));
    };
    let (result, ()) = tokio::join!(h.repo.archive(KnowledgePointRef::Legacy(42)), switch);
    result.unwrap();

    assert!(h.repo.cached(CacheKind::Active).unwrap().is_none());
    assert!(h.repo.cached(CacheKind::Archived).unwrap().is_none());
    assert!(h.sink.events().iter().any(|e| matches!(
      e,
      SyncEvent::ReconcileFailed {
        namespace: CacheNamespace::User(1),
        after_remote_failure: false,
        error,
        ..
      } if error.contains("identity changed")
    )));

    // The first user keeps its optimistic state, not the second user's lists.
    h.repo.session().switch_to(Identity::User(1));
    assert!(cached_ids(&h, CacheKind::Active).is_empty());
    assert_eq!(cached_ids(&h, CacheKind::Archived), vec![42]);
    h.server.verify().await;
  }

  #[tokio::test]
  async fn test_identity_switch_during_read_is_an_error() {
    let h = harness(Identity::User(1)).await;
    Mock::given(method("GET"))
      .and(path("/api/data/knowledge_points"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(vec![legacy(777)])
          .set_delay(Duration::from_millis(150)),
      )
      .expect(1)
      .mount(&h.server)
      .await;

    let switch = async {
      tokio::time::sleep(Duration::from_millis(30)).await;
      h.repo.session().switch_to(Identity::User(2));
    };
    let (result, ()) = tokio::join!(h.repo.fetch_active(), switch);

    assert!(matches!(
      result.unwrap_err(),
      Error::IdentityChanged {
        started: CacheNamespace::User(1),
        current: CacheNamespace::User(2),
      }
    ));
    assert!(h.repo.cached(CacheKind::Active).unwrap().is_none());
    h.repo.session().switch_to(Identity::User(1));
    assert!(h.repo.cached(CacheKind::Active).unwrap().is_none());
    h.server.verify().await;
  }
}
