use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CACHE_CONTROL, EXPIRES, PRAGMA};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use crate::credentials::{CredentialSlot, CredentialStore};

use super::endpoint::{AuthMode, Endpoint, TimeoutClass};
use super::error::ApiError;

const GUEST_HEADER: &str = "X-User-Type";

/// Per-class request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
  pub standard: Duration,
  pub extended: Duration,
}

impl Default for Timeouts {
  fn default() -> Self {
    Self {
      standard: Duration::from_secs(30),
      extended: Duration::from_secs(120),
    }
  }
}

impl Timeouts {
  fn for_class(&self, class: TimeoutClass) -> Duration {
    match class {
      TimeoutClass::Standard => self.standard,
      TimeoutClass::Extended => self.extended,
    }
  }
}

/// HTTP gateway to the learning API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  http: Client,
  base_url: Url,
  credentials: Arc<dyn CredentialStore>,
  timeouts: Timeouts,
}

impl ApiClient {
  pub fn new(
    base_url: &str,
    credentials: Arc<dyn CredentialStore>,
    timeouts: Timeouts,
  ) -> Result<Self, ApiError> {
    let base_url = Url::parse(base_url).map_err(|e| ApiError::InvalidEndpoint {
      path: base_url.to_string(),
      reason: e.to_string(),
    })?;

    // Responses must always reflect current server state.
    let mut headers = HeaderMap::new();
    headers.insert(
      CACHE_CONTROL,
      HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));

    let http = Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| ApiError::Unknown(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      http,
      base_url,
      credentials,
      timeouts,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Resolve base URL + path + query.
  fn url(&self, endpoint: &Endpoint) -> Result<Url, ApiError> {
    let raw = format!(
      "{}{}",
      self.base_url.as_str().trim_end_matches('/'),
      endpoint.path
    );
    let mut url = Url::parse(&raw).map_err(|e| ApiError::InvalidEndpoint {
      path: endpoint.path.clone(),
      reason: e.to_string(),
    })?;
    if !endpoint.query.is_empty() {
      url.query_pairs_mut().extend_pairs(&endpoint.query);
    }
    Ok(url)
  }

  fn request(&self, endpoint: &Endpoint) -> Result<RequestBuilder, ApiError> {
    let url = self.url(endpoint)?;
    let mut req = self
      .http
      .request(endpoint.method.clone(), url)
      .timeout(self.timeouts.for_class(endpoint.timeout));

    match endpoint.auth {
      AuthMode::Required => {
        if let Some(token) = self.access_token() {
          req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
      }
      AuthMode::Guest => {
        req = req.header(GUEST_HEADER, "Guest");
      }
      AuthMode::None => {}
    }

    if let Some(body) = &endpoint.body {
      req = req.json(body);
    }
    Ok(req)
  }

  fn access_token(&self) -> Option<String> {
    match self.credentials.retrieve(CredentialSlot::AccessToken) {
      Ok(token) => token.filter(|t| !t.is_empty()),
      Err(e) => {
        tracing::warn!(error = %e, "could not read access token");
        None
      }
    }
  }

  /// Execute and return the raw body of a 2xx response.
  async fn execute(&self, endpoint: &Endpoint) -> Result<Vec<u8>, ApiError> {
    let req = self.request(endpoint).inspect_err(|e| {
      tracing::error!(path = %endpoint.path, error = %e, "malformed endpoint");
    })?;

    tracing::debug!(method = %endpoint.method, path = %endpoint.path, "sending request");

    let resp = req.send().await.map_err(|e| {
      tracing::warn!(method = %endpoint.method, path = %endpoint.path, error = %e, "request failed");
      classify_send_error(e)
    })?;

    let status = resp.status();
    let body = resp.bytes().await.map_err(ApiError::TransportFailure)?;

    if !status.is_success() {
      let message = extract_message(&body);
      tracing::debug!(
        method = %endpoint.method,
        path = %endpoint.path,
        status = status.as_u16(),
        message = message.as_deref().unwrap_or(""),
        "server rejected request"
      );
      return Err(ApiError::ServerError {
        status: status.as_u16(),
        message,
      });
    }

    Ok(body.to_vec())
  }

  /// Send a request and decode the JSON response.
  pub async fn send<T: DeserializeOwned>(&self, endpoint: &Endpoint) -> Result<T, ApiError> {
    let body = self.execute(endpoint).await?;
    serde_json::from_slice(&body).map_err(ApiError::from_body_error)
  }

  /// Send a request whose response body is irrelevant.
  pub async fn send_no_body(&self, endpoint: &Endpoint) -> Result<(), ApiError> {
    self.execute(endpoint).await.map(|_| ())
  }
}

fn classify_send_error(e: reqwest::Error) -> ApiError {
  if e.is_builder() {
    ApiError::InvalidEndpoint {
      path: e.url().map(|u| u.to_string()).unwrap_or_default(),
      reason: e.to_string(),
    }
  } else if e.is_redirect() {
    ApiError::Unknown(e.to_string())
  } else {
    ApiError::TransportFailure(e)
  }
}

/// Pull a human-readable message out of a JSON error body.
fn extract_message(body: &[u8]) -> Option<String> {
  let value: serde_json::Value = serde_json::from_slice(body).ok()?;
  ["message", "error", "detail"]
    .iter()
    .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
    .map(String::from)
}
