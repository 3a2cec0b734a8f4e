//! Offline-capable sync layer for knowledge point flashcards.
//!
//! [`SyncContext`] wires the pieces together: an [`api::ApiClient`] talking to
//! the learning API, a SQLite-backed [`cache`] holding one snapshot per
//! identity, and the [`knowledge::KnowledgePointRepository`] that serves reads
//! from either and applies mutations optimistically.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod knowledge;
pub mod session;

pub use auth::AuthService;
pub use config::Config;
pub use context::SyncContext;
pub use error::{Error, Result};
pub use knowledge::{CompositeId, KnowledgePoint, KnowledgePointRef, KnowledgePointRepository};
pub use session::{Identity, Session};
