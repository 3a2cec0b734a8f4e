//! Credential persistence seam.
//!
//! Secure storage of tokens lives outside this crate; the sync layer only needs
//! to save, retrieve and delete a value by named slot.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("credential store error: {0}")]
pub struct CredentialError(pub String);

/// Named slot in the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSlot {
  AccessToken,
  RefreshToken,
}

impl CredentialSlot {
  pub fn key(&self) -> &'static str {
    match self {
      CredentialSlot::AccessToken => "access_token",
      CredentialSlot::RefreshToken => "refresh_token",
    }
  }
}

/// Save/retrieve/delete-by-key interface for tokens.
pub trait CredentialStore: Send + Sync {
  fn save(&self, slot: CredentialSlot, value: &str) -> Result<(), CredentialError>;

  fn retrieve(&self, slot: CredentialSlot) -> Result<Option<String>, CredentialError>;

  fn delete(&self, slot: CredentialSlot) -> Result<(), CredentialError>;
}

/// Process-local credential store.
///
/// Holds tokens for the lifetime of the process only. The CLI seeds it from the
/// environment; applications with a keychain supply their own store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
  slots: RwLock<HashMap<CredentialSlot, String>>,
}

impl MemoryCredentialStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed from `KPSYNC_ACCESS_TOKEN` and `KPSYNC_REFRESH_TOKEN`.
  pub fn from_env() -> Self {
    let store = Self::new();
    if let Ok(mut slots) = store.slots.write() {
      for (slot, var) in [
        (CredentialSlot::AccessToken, "KPSYNC_ACCESS_TOKEN"),
        (CredentialSlot::RefreshToken, "KPSYNC_REFRESH_TOKEN"),
      ] {
        if let Ok(value) = std::env::var(var) {
          if !value.is_empty() {
            slots.insert(slot, value);
          }
        }
      }
    }
    store
  }
}

impl CredentialStore for MemoryCredentialStore {
  fn save(&self, slot: CredentialSlot, value: &str) -> Result<(), CredentialError> {
    let mut slots = self
      .slots
      .write()
      .map_err(|_| CredentialError("lock poisoned".into()))?;
    slots.insert(slot, value.to_string());
    Ok(())
  }

  fn retrieve(&self, slot: CredentialSlot) -> Result<Option<String>, CredentialError> {
    let slots = self
      .slots
      .read()
      .map_err(|_| CredentialError("lock poisoned".into()))?;
    Ok(slots.get(&slot).cloned())
  }

  fn delete(&self, slot: CredentialSlot) -> Result<(), CredentialError> {
    let mut slots = self
      .slots
      .write()
      .map_err(|_| CredentialError("lock poisoned".into()))?;
    slots.remove(&slot);
    Ok(())
  }
}
