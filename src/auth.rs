//! Sign-in flows. These own the session identity and the token slots.

use std::sync::Arc;

use crate::api::types::{LoginRequest, RegisterRequest, TokenResponse, User, ValidateResponse};
use crate::api::{ApiClient, Endpoint};
use crate::cache::{CacheLayer, CacheStorage, SqliteStorage};
use crate::credentials::{CredentialError, CredentialSlot, CredentialStore};
use crate::error::Result;
use crate::session::{Identity, Session};

pub struct AuthService<S: CacheStorage = SqliteStorage> {
  api: ApiClient,
  credentials: Arc<dyn CredentialStore>,
  session: Arc<Session>,
  cache: CacheLayer<S>,
}

impl<S: CacheStorage> AuthService<S> {
  pub fn new(
    api: ApiClient,
    credentials: Arc<dyn CredentialStore>,
    session: Arc<Session>,
    cache: CacheLayer<S>,
  ) -> Self {
    Self {
      api,
      credentials,
      session,
      cache,
    }
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<User> {
    let req = LoginRequest {
      email: email.to_string(),
      password: password.to_string(),
    };
    let tokens: TokenResponse = self.api.send(&Endpoint::login(&req)).await?;
    self.establish(tokens).await
  }

  pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
    let req = RegisterRequest {
      username: username.to_string(),
      email: email.to_string(),
      password: password.to_string(),
    };
    let tokens: TokenResponse = self.api.send(&Endpoint::register(&req)).await?;
    self.establish(tokens).await
  }

  /// Exchange the stored refresh token for a new token pair.
  pub async fn refresh(&self) -> Result<()> {
    let refresh_token = self
      .credentials
      .retrieve(CredentialSlot::RefreshToken)?
      .filter(|t| !t.is_empty())
      .ok_or_else(|| CredentialError("no refresh token stored".to_string()))?;

    let tokens: TokenResponse = self.api.send(&Endpoint::refresh(&refresh_token)).await?;
    self.store_tokens(&tokens)?;
    if let Some(user) = tokens.user {
      self.session.switch_to(Identity::User(user.id));
    }
    tracing::debug!("access token refreshed");
    Ok(())
  }

  /// Sign out: tell the server, forget the tokens, drop every cached
  /// snapshot and fall back to the guest identity. Returns how many snapshots
  /// were removed.
  ///
  /// The server call is best-effort; local state is cleared regardless.
  pub async fn logout(&self) -> Result<usize> {
    if let Err(e) = self.api.send_no_body(&Endpoint::logout()).await {
      tracing::warn!(error = %e, "server logout failed, clearing local state anyway");
    }

    self.credentials.delete(CredentialSlot::AccessToken)?;
    self.credentials.delete(CredentialSlot::RefreshToken)?;
    let cleared = self.cache.clear_all()?;
    self.session.switch_to(Identity::Guest);

    tracing::info!(cleared, "logged out");
    Ok(cleared)
  }

  pub async fn me(&self) -> Result<User> {
    Ok(self.api.send(&Endpoint::me()).await?)
  }

  /// Whether the stored access token is still accepted. A 401 means no.
  pub async fn validate(&self) -> Result<bool> {
    match self.api.send::<ValidateResponse>(&Endpoint::validate()).await {
      Ok(resp) => Ok(resp.valid),
      Err(e) if e.status() == Some(401) => Ok(false),
      Err(e) => Err(e.into()),
    }
  }

  async fn establish(&self, tokens: TokenResponse) -> Result<User> {
    self.store_tokens(&tokens)?;
    let user = match tokens.user {
      Some(user) => user,
      None => self.me().await?,
    };
    self.session.switch_to(Identity::User(user.id));
    tracing::info!(user_id = user.id, "signed in");
    Ok(user)
  }

  fn store_tokens(&self, tokens: &TokenResponse) -> Result<()> {
    self
      .credentials
      .save(CredentialSlot::AccessToken, &tokens.access_token)?;
    if let Some(refresh) = &tokens.refresh_token {
      self.credentials.save(CredentialSlot::RefreshToken, refresh)?;
    }
    Ok(())
  }
}
