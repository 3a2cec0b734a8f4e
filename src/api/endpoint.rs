//! Abstract endpoint descriptions.
//!
//! An [`Endpoint`] says what to call; [`ApiClient`](super::ApiClient) decides
//! how. Every route the app talks to has a constructor here so that method,
//! auth mode and timeout class are fixed per route instead of per call site.

use reqwest::Method;
use serde_json::{json, Value};

use crate::knowledge::{KnowledgePointRef, PointAction};

use super::types::{
  BatchActionRequest, GuestAnswer, LoginRequest, RegisterRequest, StartSessionRequest,
};

/// How a request identifies itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
  /// Bearer token from the credential store, when one is present
  Required,
  /// Explicitly unauthenticated guest route
  Guest,
  None,
}

/// Static per-route timeout class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
  Standard,
  /// AI-assisted review, generation, finalization and summaries
  Extended,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  pub auth: AuthMode,
  pub timeout: TimeoutClass,
}

impl Endpoint {
  fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
      auth: AuthMode::Required,
      timeout: TimeoutClass::Standard,
    }
  }

  fn query(mut self, key: &str, value: impl ToString) -> Self {
    self.query.push((key.to_string(), value.to_string()));
    self
  }

  fn body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  fn auth(mut self, auth: AuthMode) -> Self {
    self.auth = auth;
    self
  }

  fn extended(mut self) -> Self {
    self.timeout = TimeoutClass::Extended;
    self
  }

  // ── Auth ──────────────────────────────────────────────────────────────────

  pub fn login(req: &LoginRequest) -> Self {
    Self::new(Method::POST, "/api/auth/login")
      .body(json!(req))
      .auth(AuthMode::None)
  }

  pub fn register(req: &RegisterRequest) -> Self {
    Self::new(Method::POST, "/api/auth/register")
      .body(json!(req))
      .auth(AuthMode::None)
  }

  pub fn refresh(refresh_token: &str) -> Self {
    Self::new(Method::POST, "/api/auth/refresh")
      .body(json!({ "refresh_token": refresh_token }))
      .auth(AuthMode::None)
  }

  pub fn logout() -> Self {
    Self::new(Method::POST, "/api/auth/logout")
  }

  pub fn me() -> Self {
    Self::new(Method::GET, "/api/auth/me")
  }

  pub fn validate() -> Self {
    Self::new(Method::GET, "/api/auth/validate")
  }

  // ── Knowledge points ──────────────────────────────────────────────────────

  pub fn active_points() -> Self {
    Self::new(Method::GET, "/api/data/knowledge_points")
  }

  pub fn archived_points() -> Self {
    Self::new(Method::GET, "/api/data/archived_knowledge_points")
  }

  pub fn point(target: &KnowledgePointRef) -> Self {
    Self::new(Method::GET, target.path())
  }

  pub fn update_point(target: &KnowledgePointRef, changes: Value) -> Self {
    Self::new(Method::PUT, target.path()).body(changes)
  }

  pub fn delete_point(target: &KnowledgePointRef) -> Self {
    Self::new(Method::DELETE, target.path())
  }

  pub fn archive(target: &KnowledgePointRef) -> Self {
    Self::new(Method::POST, target.action_path(PointAction::Archive))
  }

  pub fn unarchive(target: &KnowledgePointRef) -> Self {
    Self::new(Method::POST, target.action_path(PointAction::Unarchive))
  }

  pub fn ai_review(target: &KnowledgePointRef) -> Self {
    Self::new(Method::POST, target.action_path(PointAction::AiReview)).extended()
  }

  pub fn batch_action(req: &BatchActionRequest) -> Self {
    Self::new(Method::POST, "/api/data/knowledge_points/batch_action").body(json!(req))
  }

  // ── Dashboard ─────────────────────────────────────────────────────────────

  pub fn dashboard() -> Self {
    Self::new(Method::GET, "/api/data/get_dashboard")
  }

  pub fn calendar_heatmap(year: i32, month: u32) -> Self {
    Self::new(Method::GET, "/api/data/get_calendar_heatmap")
      .query("year", year)
      .query("month", month)
  }

  pub fn daily_summary(date: chrono::NaiveDate) -> Self {
    Self::new(Method::GET, "/api/data/daily_summary")
      .query("date", date.format("%Y-%m-%d"))
      .extended()
  }

  // ── Practice sessions ─────────────────────────────────────────────────────

  pub fn start_session(req: &StartSessionRequest) -> Self {
    Self::new(Method::POST, "/api/start_session")
      .body(json!(req))
      .extended()
  }

  pub fn finalize_session(results: Value) -> Self {
    Self::new(Method::POST, "/api/finalize_session")
      .body(results)
      .extended()
  }

  // ── Guest ─────────────────────────────────────────────────────────────────

  pub fn sample_questions(count: u32) -> Self {
    Self::new(Method::GET, "/api/guest/sample_questions")
      .query("count", count)
      .auth(AuthMode::Guest)
  }

  pub fn submit_guest_answer(answer: &GuestAnswer) -> Self {
    Self::new(Method::POST, "/api/guest/submit_answer")
      .body(json!(answer))
      .auth(AuthMode::Guest)
  }
}
