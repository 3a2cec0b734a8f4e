//! Identifier resolution across the legacy and composite address spaces.
//!
//! Points created before the id migration carry a single integer id; newer
//! points are addressed by `(owner, sequence)`. Every call site that needs to
//! talk to the server or match a cached record goes through
//! [`KnowledgePointRef`], which makes the "neither id present" case an explicit
//! branch instead of a silent default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::types::KnowledgePoint;

/// Owner that every legacy id is implicitly scoped to.
pub const LEGACY_OWNER_ID: i64 = 1;

/// Path segment used when a reference cannot be resolved. The server rejects
/// it, which surfaces the bad reference instead of touching another record.
const INVALID_SEGMENT: &str = "invalid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeId {
  pub user_id: i64,
  pub sequence_id: i64,
}

impl CompositeId {
  pub fn new(user_id: i64, sequence_id: i64) -> Self {
    Self {
      user_id,
      sequence_id,
    }
  }

  /// Composite address of a pre-migration point.
  pub fn from_legacy(legacy_id: i64) -> Self {
    Self::new(LEGACY_OWNER_ID, legacy_id)
  }
}

/// Sub-resource actions on a single point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointAction {
  Archive,
  Unarchive,
  AiReview,
}

impl PointAction {
  fn suffix(&self) -> &'static str {
    match self {
      PointAction::Archive => "archive",
      PointAction::Unarchive => "unarchive",
      PointAction::AiReview => "ai_review",
    }
  }
}

/// A resolved reference to one knowledge point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnowledgePointRef {
  Composite(CompositeId),
  Legacy(i64),
  Invalid,
}

impl KnowledgePointRef {
  /// Composite wins over legacy; with neither the reference is `Invalid`.
  pub fn resolve(composite: Option<CompositeId>, legacy_id: Option<i64>) -> Self {
    match (composite, legacy_id) {
      (Some(id), _) => KnowledgePointRef::Composite(id),
      (None, Some(id)) => KnowledgePointRef::Legacy(id),
      (None, None) => KnowledgePointRef::Invalid,
    }
  }

  pub fn is_valid(&self) -> bool {
    !matches!(self, KnowledgePointRef::Invalid)
  }

  /// Resource path for this point.
  pub fn path(&self) -> String {
    match self {
      KnowledgePointRef::Composite(id) => format!(
        "/api/v2/data/knowledge_point/{}/{}",
        id.user_id, id.sequence_id
      ),
      KnowledgePointRef::Legacy(id) => format!("/api/data/knowledge_point/{}", id),
      KnowledgePointRef::Invalid => format!("/api/data/knowledge_point/{}", INVALID_SEGMENT),
    }
  }

  pub fn action_path(&self, action: PointAction) -> String {
    format!("{}/{}", self.path(), action.suffix())
  }

  /// Cache matching predicate. Legacy id `n` and `LEGACY_OWNER_ID:n` name the
  /// same point, whichever of the two the cached record carries.
  pub fn matches(&self, point: &KnowledgePoint) -> bool {
    let Some(target) = self.to_composite() else {
      return false;
    };
    point.composite_id() == Some(target)
      || point.legacy_id.map(CompositeId::from_legacy) == Some(target)
  }

  /// The same point addressed in the composite space, if known.
  pub fn to_composite(&self) -> Option<CompositeId> {
    match self {
      KnowledgePointRef::Composite(id) => Some(*id),
      KnowledgePointRef::Legacy(id) => Some(CompositeId::from_legacy(*id)),
      KnowledgePointRef::Invalid => None,
    }
  }
}

impl fmt::Display for KnowledgePointRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KnowledgePointRef::Composite(id) => write!(f, "{}:{}", id.user_id, id.sequence_id),
      KnowledgePointRef::Legacy(id) => write!(f, "{}", id),
      KnowledgePointRef::Invalid => f.write_str(INVALID_SEGMENT),
    }
  }
}

/// Parses `OWNER:SEQ` as composite and a bare integer as legacy.
impl FromStr for KnowledgePointRef {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    let invalid = || Error::InvalidReference(s.to_string());

    match s.split_once(':') {
      Some((owner, seq)) => {
        let user_id = owner.trim().parse().map_err(|_| invalid())?;
        let sequence_id = seq.trim().parse().map_err(|_| invalid())?;
        Ok(KnowledgePointRef::Composite(CompositeId::new(
          user_id,
          sequence_id,
        )))
      }
      None => s
        .parse()
        .map(KnowledgePointRef::Legacy)
        .map_err(|_| invalid()),
    }
  }
}
