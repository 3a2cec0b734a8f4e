//! Wiring: builds every sync component from configuration and hands out
//! shared handles. Nothing in the crate reaches for a global.

use std::sync::Arc;

use crate::api::{ApiClient, Timeouts};
use crate::auth::AuthService;
use crate::cache::{CacheLayer, SqliteStorage};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::knowledge::{EventSink, KnowledgePointRepository, TracingSink};
use crate::session::{Identity, Session};

pub struct SyncContext {
  pub session: Arc<Session>,
  pub repository: KnowledgePointRepository<SqliteStorage>,
  pub auth: AuthService<SqliteStorage>,
}

impl SyncContext {
  /// Build with the default [`TracingSink`].
  pub fn from_config(
    config: &Config,
    credentials: Arc<dyn CredentialStore>,
    identity: Identity,
  ) -> Result<Self> {
    Self::with_sink(config, credentials, identity, Arc::new(TracingSink))
  }

  pub fn with_sink(
    config: &Config,
    credentials: Arc<dyn CredentialStore>,
    identity: Identity,
    events: Arc<dyn EventSink>,
  ) -> Result<Self> {
    let timeouts: Timeouts = config.timeouts.into();
    let api = ApiClient::new(&config.base_url, Arc::clone(&credentials), timeouts)?;

    let storage = match &config.cache_path {
      Some(path) => SqliteStorage::open(path)?,
      None => SqliteStorage::open_default()?,
    };
    let cache = CacheLayer::new(storage);
    let session = Arc::new(Session::new(identity));

    tracing::debug!(base_url = %api.base_url(), ?identity, "sync context ready");

    Ok(Self {
      repository: KnowledgePointRepository::new(
        api.clone(),
        cache.clone(),
        Arc::clone(&session),
        events,
      ),
      auth: AuthService::new(api, credentials, Arc::clone(&session), cache),
      session,
    })
  }
}
