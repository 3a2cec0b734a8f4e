use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Cacheable;

use super::ident::{CompositeId, KnowledgePointRef};

/// A recorded language mistake studied via spaced repetition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePoint {
  /// Last-resort id, only meaningful to legacy call sites.
  #[serde(default)]
  pub id: i64,
  #[serde(default)]
  pub user_id: Option<i64>,
  #[serde(default)]
  pub sequence_id: Option<i64>,
  #[serde(default)]
  pub legacy_id: Option<i64>,
  #[serde(default)]
  pub category: String,
  #[serde(default)]
  pub subcategory: String,
  #[serde(default)]
  pub correct_phrase: String,
  #[serde(default)]
  pub explanation: String,
  #[serde(default)]
  pub user_context_sentence: String,
  /// 0.0 to 1.0
  #[serde(default)]
  pub mastery_level: f64,
  #[serde(default)]
  pub mistake_count: u32,
  #[serde(default)]
  pub correct_count: u32,
  #[serde(default)]
  pub next_review_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub is_archived: bool,
  #[serde(default)]
  pub ai_review_notes: Option<String>,
}

impl KnowledgePoint {
  pub fn composite_id(&self) -> Option<CompositeId> {
    match (self.user_id, self.sequence_id) {
      (Some(user_id), Some(sequence_id)) => Some(CompositeId::new(user_id, sequence_id)),
      _ => None,
    }
  }

  /// How this point is addressed on the server.
  pub fn reference(&self) -> KnowledgePointRef {
    KnowledgePointRef::resolve(self.composite_id(), self.legacy_id)
  }

  /// Single-integer id for legacy call sites: sequence id, then legacy id,
  /// then the fallback id.
  pub fn effective_id(&self) -> i64 {
    self
      .sequence_id
      .or(self.legacy_id)
      .unwrap_or(self.id)
  }
}

impl Cacheable for KnowledgePoint {
  fn cache_key(&self) -> String {
    match self.reference() {
      KnowledgePointRef::Invalid => format!("id:{}", self.id),
      r => r.to_string(),
    }
  }

  fn entity_type() -> &'static str {
    "knowledge_point"
  }
}
