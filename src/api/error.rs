use thiserror::Error;

/// Every way a gateway call can fail. The gateway never recovers on its own.
#[derive(Debug, Error)]
pub enum ApiError {
  /// The request could not be built. A defect in the caller, not a runtime
  /// condition.
  #[error("invalid endpoint {path}: {reason}")]
  InvalidEndpoint { path: String, reason: String },

  /// No response was received (connect, DNS, TLS, timeout).
  #[error("transport failure: {0}")]
  TransportFailure(#[source] reqwest::Error),

  /// The body was not a parseable JSON document.
  #[error("invalid response: {0}")]
  InvalidResponse(String),

  #[error("server returned {status}{}", format_message(.message))]
  ServerError {
    status: u16,
    message: Option<String>,
  },

  /// Valid JSON that did not match the expected shape.
  #[error("failed to decode response: {0}")]
  DecodeFailure(#[source] serde_json::Error),

  #[error("unknown error: {0}")]
  Unknown(String),
}

fn format_message(message: &Option<String>) -> String {
  message
    .as_deref()
    .map(|m| format!(": {}", m))
    .unwrap_or_default()
}

impl ApiError {
  /// True when the failure points at a bug in request construction.
  pub fn is_defect(&self) -> bool {
    matches!(self, ApiError::InvalidEndpoint { .. })
  }

  /// True when the server was never reached.
  pub fn is_transport(&self) -> bool {
    matches!(self, ApiError::TransportFailure(_))
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::ServerError { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Split serde failures into "not JSON at all" and "wrong shape".
  pub(crate) fn from_body_error(e: serde_json::Error) -> Self {
    use serde_json::error::Category;
    match e.classify() {
      Category::Data => ApiError::DecodeFailure(e),
      Category::Syntax | Category::Eof | Category::Io => ApiError::InvalidResponse(e.to_string()),
    }
  }
}
