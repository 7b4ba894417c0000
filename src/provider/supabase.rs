//! Supabase GoTrue + PostgREST adapter.
//!
//! Thin HTTP wrapper over `/auth/v1/*` and the `profiles` table. Response
//! parsing lives in pure functions for testability. The adapter keeps the
//! current session in memory and announces every change on its
//! [`SessionEvents`] channel, mirroring the hosted client's auth-state
//! listener.
//!
//! ERROR HANDLING
//! ==============
//! A 401/403 while validating the stored session means the session is dead:
//! it is dropped and `SIGNED_OUT` is emitted instead of surfacing an error.
//! Sign-out always clears local state even if the logout call fails.

#[cfg(test)]
#[path = "supabase_test.rs"]
mod supabase_test;

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AuthChangeEvent, AuthProvider, ProviderError, Session, SessionEvents, SessionSubscription, SessionUser};
use crate::config::PortalConfig;
use crate::state::auth::Role;

// =============================================================================
// CLIENT
// =============================================================================

pub struct SupabaseAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: Mutex<Option<Session>>,
    events: SessionEvents,
}

impl SupabaseAuth {
    /// Build an adapter for the project described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn from_config(config: &PortalConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http.request_secs))
            .connect_timeout(Duration::from_secs(config.http.connect_secs))
            .build()
            .map_err(|e| ProviderError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.supabase_url.clone(),
            anon_key: config.anon_key.clone(),
            session: Mutex::new(None),
            events: SessionEvents::new(),
        })
    }

    /// The session currently held in memory, without contacting the provider.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.lock_session().clone()
    }

    /// Seed a session obtained elsewhere (e.g. tokens passed on the command line).
    pub fn restore(&self, session: Session) {
        debug!(user_id = %session.user.id, "restoring stored session");
        *self.lock_session() = Some(session.clone());
        self.events.emit(AuthChangeEvent::SignedIn, Some(session));
    }

    /// Email/password sign-in.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] when the credentials are rejected or the
    /// provider cannot be reached.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        let request = self
            .http
            .post(token_endpoint(&self.base_url, "password"))
            .bearer_auth(&self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }));
        let body = self.send(request).await?;
        let session = parse_token_response(&body, unix_now())?;

        info!(user_id = %session.user.id, "signed in");
        *self.lock_session() = Some(session.clone());
        self.events.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Adopt tokens issued elsewhere (e.g. passed on the command line).
    ///
    /// The access token is validated first; if the provider rejects it and a
    /// refresh token is available, the refresh token is exchanged instead.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] when neither token yields a session.
    pub async fn restore_from_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Session, ProviderError> {
        match self.fetch_user(access_token).await {
            Ok(user) => {
                let session = Session {
                    access_token: access_token.to_owned(),
                    refresh_token: refresh_token.map(str::to_owned),
                    expires_at: None,
                    user,
                };
                self.restore(session.clone());
                Ok(session)
            }
            Err(e @ ProviderError::Response { status: 401 | 403, .. }) => match refresh_token {
                Some(token) => {
                    debug!("access token rejected; exchanging refresh token");
                    self.exchange_refresh_token(token).await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Exchange the stored refresh token for a new session.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotSignedIn`] without a refresh token. A
    /// rejected refresh token also signs the session out.
    pub async fn refresh_session(&self) -> Result<Session, ProviderError> {
        let refresh_token = self
            .lock_session()
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or(ProviderError::NotSignedIn)?;
        self.exchange_refresh_token(&refresh_token).await
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        let request = self
            .http
            .post(token_endpoint(&self.base_url, "refresh_token"))
            .bearer_auth(&self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }));

        match self.send(request).await {
            Ok(body) => {
                let session = parse_token_response(&body, unix_now())?;
                debug!(user_id = %session.user.id, expires_at = ?session.expires_at, "session refreshed");
                *self.lock_session() = Some(session.clone());
                self.events.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
                Ok(session)
            }
            Err(e @ ProviderError::Response { status: 400 | 401 | 403, .. }) => {
                warn!(error = %e, "refresh token rejected; signing out");
                self.drop_session();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Revoke the session remotely and clear it locally.
    pub async fn sign_out(&self) {
        let access_token = self.lock_session().as_ref().map(|s| s.access_token.clone());
        if let Some(token) = access_token {
            let request = self.http.post(logout_endpoint(&self.base_url)).bearer_auth(token);
            if let Err(e) = self.send(request).await {
                warn!(error = %e, "remote logout failed; clearing local session anyway");
            }
        }
        info!("signed out");
        self.drop_session();
    }

    fn drop_session(&self) {
        *self.lock_session() = None;
        self.events.emit(AuthChangeEvent::SignedOut, None);
    }

    fn holds_token(&self, access_token: &str) -> bool {
        self.lock_session().as_ref().is_some_and(|s| s.access_token == access_token)
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        // A poisoned lock only means a panic mid-assignment; the Option is still whole.
        self.session.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<SessionUser, ProviderError> {
        let request = self.http.get(user_endpoint(&self.base_url)).bearer_auth(access_token);
        let body = self.send(request).await?;
        parse_user_response(&body)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, ProviderError> {
        let response = request
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(ProviderError::Response { status, body: text });
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl AuthProvider for SupabaseAuth {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        let Some(stored) = self.session() else {
            return Ok(None);
        };

        let session = if stored.is_expired_at(unix_now()) {
            if stored.refresh_token.is_none() {
                debug!("stored session expired without a refresh token");
                self.drop_session();
                return Ok(None);
            }
            self.refresh_session().await?
        } else {
            stored
        };

        // The lock is released while validating; sign-out or a refresh may
        // replace the session meanwhile. Only write back over the token we checked.
        match self.fetch_user(&session.access_token).await {
            Ok(user) => {
                if session.user == user {
                    return Ok(Some(session));
                }
                let updated = {
                    let mut stored = self.lock_session();
                    match stored.as_mut() {
                        Some(current) if current.access_token == session.access_token => {
                            current.user = user;
                            Some(current.clone())
                        }
                        _ => None,
                    }
                };
                match updated {
                    Some(current) => {
                        self.events.emit(AuthChangeEvent::UserUpdated, Some(current.clone()));
                        Ok(Some(current))
                    }
                    None => {
                        debug!("session replaced during validation; keeping the newer one");
                        Ok(self.session())
                    }
                }
            }
            Err(ProviderError::Response { status: 401 | 403, .. }) => {
                if self.holds_token(&session.access_token) {
                    warn!("stored session rejected by provider; signing out");
                    self.drop_session();
                    Ok(None)
                } else {
                    debug!("stale access token rejected; keeping the newer session");
                    Ok(self.session())
                }
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> SessionSubscription {
        self.events.subscribe()
    }

    async fn user_role(&self, user_id: Uuid) -> Result<Option<Role>, ProviderError> {
        let bearer = self
            .lock_session()
            .as_ref()
            .map_or_else(|| self.anon_key.clone(), |s| s.access_token.clone());
        let request = self
            .http
            .get(profile_role_endpoint(&self.base_url, user_id))
            .bearer_auth(bearer)
            .header("Accept", "application/json");
        let body = self.send(request).await?;
        parse_profile_role(&body)
    }
}

// =============================================================================
// ENDPOINTS
// =============================================================================

fn user_endpoint(base_url: &str) -> String {
    format!("{base_url}/auth/v1/user")
}

fn token_endpoint(base_url: &str, grant_type: &str) -> String {
    format!("{base_url}/auth/v1/token?grant_type={grant_type}")
}

fn logout_endpoint(base_url: &str) -> String {
    format!("{base_url}/auth/v1/logout")
}

fn profile_role_endpoint(base_url: &str, user_id: Uuid) -> String {
    format!("{base_url}/rest/v1/profiles?id=eq.{user_id}&select=role")
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    expires_at: Option<u64>,
    user: SessionUser,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    role: Option<String>,
}

fn parse_token_response(body: &str, now_secs: u64) -> Result<Session, ProviderError> {
    let resp: TokenResponse = serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    let expires_at = resp
        .expires_at
        .or_else(|| resp.expires_in.map(|secs| now_secs.saturating_add(secs)));
    Ok(Session { access_token: resp.access_token, refresh_token: resp.refresh_token, expires_at, user: resp.user })
}

fn parse_user_response(body: &str) -> Result<SessionUser, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// First profile row's role. Unknown role names resolve to `None`.
fn parse_profile_role(body: &str) -> Result<Option<Role>, ProviderError> {
    let rows: Vec<ProfileRow> = serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    let Some(raw) = rows.into_iter().next().and_then(|row| row.role) else {
        return Ok(None);
    };
    match raw.parse::<Role>() {
        Ok(role) => Ok(Some(role)),
        Err(e) => {
            warn!(error = %e, "profile carries an unrecognised role");
            Ok(None)
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
