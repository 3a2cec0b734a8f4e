//! Request and response bodies for the learning API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::knowledge::{CompositeId, KnowledgePointRef};

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
  pub username: String,
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  #[serde(default)]
  pub username: String,
  #[serde(default)]
  pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
  pub access_token: String,
  #[serde(default)]
  pub refresh_token: Option<String>,
  #[serde(default)]
  pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateResponse {
  #[serde(default)]
  pub valid: bool,
}

// ============================================================================
// Batch actions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
  Archive,
  Unarchive,
  Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchActionRequest {
  pub action: BatchAction,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub composite_ids: Option<Vec<CompositeId>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub legacy_ids: Option<Vec<i64>>,
}

impl BatchActionRequest {
  /// Split references by address space. Invalid references are dropped.
  pub fn new(action: BatchAction, targets: &[KnowledgePointRef]) -> Self {
    let mut composite = Vec::new();
    let mut legacy = Vec::new();
    for target in targets {
      match target {
        KnowledgePointRef::Composite(id) => composite.push(*id),
        KnowledgePointRef::Legacy(id) => legacy.push(*id),
        KnowledgePointRef::Invalid => {}
      }
    }
    Self {
      action,
      composite_ids: (!composite.is_empty()).then_some(composite),
      legacy_ids: (!legacy.is_empty()).then_some(legacy),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.composite_ids.is_none() && self.legacy_ids.is_none()
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchActionResponse {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub processed_count: usize,
  #[serde(default)]
  pub message: Option<String>,
}

// ============================================================================
// Single point
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiReviewResponse {
  #[serde(default)]
  pub overall_assessment: String,
  #[serde(default)]
  pub suggestions: Vec<String>,
  #[serde(default)]
  pub review_notes: Option<String>,
}

// ============================================================================
// Dashboard and calendar
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dashboard {
  #[serde(default)]
  pub total_points: u32,
  #[serde(default)]
  pub due_for_review: u32,
  #[serde(default)]
  pub mastered: u32,
  #[serde(default)]
  pub streak_days: u32,
  // Anything else the server reports
  #[serde(flatten)]
  pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarHeatmap {
  #[serde(default)]
  pub year: i32,
  #[serde(default)]
  pub month: u32,
  /// Review activity keyed by ISO date
  #[serde(default)]
  pub heatmap_data: BTreeMap<String, u32>,
}

// ============================================================================
// Guest practice
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SampleQuestion {
  #[serde(default)]
  pub id: Option<i64>,
  pub new_sentence: String,
  #[serde(rename = "type", default)]
  pub question_type: String,
  #[serde(default)]
  pub hint_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleQuestionsResponse {
  #[serde(default)]
  pub questions: Vec<SampleQuestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuestAnswer {
  pub question_data: serde_json::Value,
  pub user_answer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestFeedback {
  #[serde(default)]
  pub is_generally_correct: bool,
  #[serde(default)]
  pub overall_suggestion: String,
  #[serde(default)]
  pub error_analysis: Vec<serde_json::Value>,
}

// ============================================================================
// Practice sessions (long-running)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StartSessionRequest {
  pub num_review_questions: u32,
  pub num_new_questions: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionResponse {
  #[serde(default)]
  pub questions: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailySummary {
  #[serde(default)]
  pub summary: String,
  #[serde(default)]
  pub total_learning_time_seconds: u64,
  #[serde(default)]
  pub reviewed_count: u32,
}
