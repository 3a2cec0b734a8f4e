//! The identity the sync layer is currently acting for.

use std::sync::RwLock;

use crate::cache::CacheNamespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
  Guest,
  User(i64),
}

impl Identity {
  pub fn namespace(&self) -> CacheNamespace {
    match self {
      Identity::Guest => CacheNamespace::Guest,
      Identity::User(id) => CacheNamespace::User(*id),
    }
  }
}

/// Shared, switchable identity. Every cache access derives its namespace from
/// here at call time.
#[derive(Debug)]
pub struct Session {
  identity: RwLock<Identity>,
}

impl Session {
  pub fn new(identity: Identity) -> Self {
    Self {
      identity: RwLock::new(identity),
    }
  }

  pub fn guest() -> Self {
    Self::new(Identity::Guest)
  }

  pub fn current(&self) -> Identity {
    match self.identity.read() {
      Ok(identity) => *identity,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  pub fn switch_to(&self, identity: Identity) {
    let mut current = match self.identity.write() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    if *current != identity {
      tracing::info!(from = ?*current, to = ?identity, "switching identity");
      *current = identity;
    }
  }

  pub fn namespace(&self) -> CacheNamespace {
    self.current().namespace()
  }

  /// Run `f` only if `namespace` still belongs to the current identity.
  ///
  /// The identity cannot switch while `f` runs, so `f` must not await or
  /// touch the session itself.
  pub fn while_current<R>(&self, namespace: &CacheNamespace, f: impl FnOnce() -> R) -> Option<R> {
    let identity = match self.identity.read() {
      Ok(identity) => identity,
      Err(poisoned) => poisoned.into_inner(),
    };
    (identity.namespace() == *namespace).then(f)
  }
}
