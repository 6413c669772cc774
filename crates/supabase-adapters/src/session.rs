//! GoTrue-backed session service.
//!
//! Holds the current session in memory (optionally mirrored to a JSON file),
//! refreshes expired access tokens on read and publishes every transition on
//! the lifecycle feed, including the ones it causes itself.

use crate::error::{parse_gotrue_error, summarize_response_body, SupabaseError, SupabaseResult};
use async_trait::async_trait;
use auth_sync_core::{
    Identity, LifecycleEvent, LifecycleFeed, LifecycleSubscription, ServiceError, SessionService,
};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Refresh this long before the access token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// GoTrue's default access token lifetime, used when a callback omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// GoTrue token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: UserResponse,
}

/// GoTrue user object.
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl From<UserResponse> for Identity {
    fn from(user: UserResponse) -> Self {
        Identity {
            subject_id: user.id,
            email: user.email.unwrap_or_default(),
            first_name: user.user_metadata.first_name,
            last_name: user.user_metadata.last_name,
        }
    }
}

/// Session held by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

impl StoredSession {
    fn from_token_response(data: TokenResponse) -> Self {
        Self {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            expires_at: Utc::now() + Duration::seconds(data.expires_in),
            identity: data.user.into(),
        }
    }

    /// True when the access token is expired or about to expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

/// Tokens carried in the fragment of an email-confirmation redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    /// `signup`, `recovery`, `magiclink`, ...
    pub kind: Option<String>,
}

/// Parse the session out of a redirect URL like
/// `https://app/auth/callback#access_token=...&refresh_token=...&expires_in=3600&type=signup`.
///
/// An error fragment (`#error=...&error_code=...&error_description=...`) is
/// surfaced as an API error so expired links classify like any other failure.
pub fn parse_callback_url(callback_url: &str) -> SupabaseResult<CallbackTokens> {
    let url = url::Url::parse(callback_url)?;
    let fragment = url
        .fragment()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| SupabaseError::InvalidCallback("URL has no fragment".to_string()))?;

    let mut access_token = None;
    let mut refresh_token = None;
    let mut expires_in = None;
    let mut kind = None;
    let mut error = None;
    let mut error_code = None;
    let mut error_description = None;

    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        let value = value.into_owned();
        match key.as_ref() {
            "access_token" => access_token = Some(value),
            "refresh_token" => refresh_token = Some(value),
            "expires_in" => expires_in = value.parse::<i64>().ok(),
            "type" => kind = Some(value),
            "error" => error = Some(value),
            "error_code" => error_code = Some(value),
            "error_description" => error_description = Some(value),
            _ => {}
        }
    }

    if error.is_some() || error_code.is_some() {
        return Err(SupabaseError::Api {
            status: None,
            code: error_code.or(error),
            message: error_description.unwrap_or_else(|| "Callback returned an error".to_string()),
        });
    }

    match (access_token, refresh_token) {
        (Some(access_token), Some(refresh_token)) => Ok(CallbackTokens {
            access_token,
            refresh_token,
            expires_in: expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            kind,
        }),
        _ => Err(SupabaseError::InvalidCallback(
            "missing access_token or refresh_token".to_string(),
        )),
    }
}

/// Session service over the Supabase GoTrue REST API.
pub struct SupabaseSessionService {
    http_client: Client,
    supabase_url: String,
    supabase_publishable_key: String,
    session: Mutex<Option<StoredSession>>,
    refresh_lock: tokio::sync::Mutex<()>,
    session_file: Option<PathBuf>,
    /// Bumped every time a new session is stored.
    session_epoch: AtomicU64,
    /// `session_epoch` at the last `SignedOut` this service emitted.
    signed_out_epoch: AtomicU64,
    feed: LifecycleFeed,
}

impl SupabaseSessionService {
    /// Create a new session service.
    ///
    /// # Arguments
    /// * `supabase_url` - The Supabase project URL (e.g., `https://xyz.supabase.co`)
    /// * `supabase_publishable_key` - The project's publishable (anon) key
    pub fn new(
        supabase_url: impl Into<String>,
        supabase_publishable_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client: Client::new(),
            supabase_url: supabase_url.into().trim_end_matches('/').to_string(),
            supabase_publishable_key: supabase_publishable_key.into(),
            session: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            session_file: None,
            session_epoch: AtomicU64::new(0),
            signed_out_epoch: AtomicU64::new(0),
            feed: LifecycleFeed::default(),
        }
    }

    /// Mirror the session to `path`, restoring it if the file exists.
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match load_session_file(&path) {
            Ok(Some(session)) => {
                debug!(user_id = %session.identity.subject_id, "Restored persisted session");
                *self.session.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(session);
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable session file"),
        }
        self.session_file = Some(path);
        self
    }

    /// Project URL without a trailing slash.
    pub fn supabase_url(&self) -> &str {
        &self.supabase_url
    }

    pub fn supabase_publishable_key(&self) -> &str {
        &self.supabase_publishable_key
    }

    /// Access token of the current session, without refreshing.
    pub fn access_token(&self) -> Option<String> {
        self.current().map(|s| s.access_token)
    }

    /// Identity of the current session, without refreshing.
    pub fn current_identity(&self) -> Option<Identity> {
        self.current().map(|s| s.identity)
    }

    /// Sign in with email and password. Emits `SignedIn`.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ServiceError> {
        let login_url = format!("{}/auth/v1/token?grant_type=password", self.supabase_url);

        debug!(url = %login_url, email = %email, "Attempting email/password login");

        let response = self
            .http_client
            .post(&login_url)
            .header("apikey", &self.supabase_publishable_key)
            .header("Content-Type", "application/json")
            .json(&PasswordRequest { email, password })
            .send()
            .await
            .map_err(SupabaseError::from)?;

        let data: TokenResponse = read_gotrue_json(response, "Login failed").await?;
        let session = StoredSession::from_token_response(data);
        let identity = session.identity.clone();
        self.store_session(Some(session));

        info!(user_id = %identity.subject_id, "Login successful");
        self.feed.emit(LifecycleEvent::signed_in(identity.clone()));
        Ok(identity)
    }

    /// Establish the session carried by an email-confirmation redirect. Emits `SignedIn`.
    pub async fn set_session_from_url(&self, callback_url: &str) -> Result<Identity, ServiceError> {
        let tokens = parse_callback_url(callback_url)?;
        debug!(kind = ?tokens.kind, "Setting session from callback");

        let identity = self.fetch_user(&tokens.access_token).await?;
        self.store_session(Some(StoredSession {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: Utc::now() + Duration::seconds(tokens.expires_in),
            identity: identity.clone(),
        }));

        info!(user_id = %identity.subject_id, "Session established from callback");
        self.feed.emit(LifecycleEvent::signed_in(identity.clone()));
        Ok(identity)
    }

    fn current(&self) -> Option<StoredSession> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_session(&self, session: Option<StoredSession>) {
        if let Some(path) = &self.session_file {
            let result = match &session {
                Some(session) => save_session_file(path, session),
                None => remove_session_file(path),
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Failed to persist session");
            }
        }
        let mut current = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_some() {
            self.session_epoch.fetch_add(1, Ordering::SeqCst);
        }
        *current = session;
    }

    /// Verify an access token via `/auth/v1/user`.
    async fn fetch_user(&self, access_token: &str) -> SupabaseResult<Identity> {
        let user_url = format!("{}/auth/v1/user", self.supabase_url);

        debug!(url = %user_url, "Verifying session with Supabase");

        let response = self
            .http_client
            .get(&user_url)
            .header("apikey", &self.supabase_publishable_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        let user: UserResponse = read_gotrue_json(response, "Session verification failed").await?;
        Ok(user.into())
    }

    /// Exchange the refresh token for a new session. Emits `TokenRefreshed`.
    async fn refresh(&self, refresh_token: &str) -> SupabaseResult<StoredSession> {
        let refresh_url = format!(
            "{}/auth/v1/token?grant_type=refresh_token",
            self.supabase_url
        );

        debug!(url = %refresh_url, "Refreshing token");

        let response = self
            .http_client
            .post(&refresh_url)
            .header("apikey", &self.supabase_publishable_key)
            .header("Content-Type", "application/json")
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let data: TokenResponse = read_gotrue_json(response, "Token refresh failed").await?;
        let session = StoredSession::from_token_response(data);
        self.store_session(Some(session.clone()));

        info!(user_id = %session.identity.subject_id, "Token refreshed successfully");
        self.feed
            .emit(LifecycleEvent::token_refreshed(session.identity.clone()));
        Ok(session)
    }
}

#[async_trait]
impl SessionService for SupabaseSessionService {
    async fn get_session(&self) -> Result<Option<Identity>, ServiceError> {
        let Some(session) = self.current() else {
            return Ok(None);
        };
        if !session.is_expired_at(Utc::now()) {
            return Ok(Some(session.identity));
        }

        // Rotated refresh tokens are single-use; serialize refreshes
        let _refreshing = self.refresh_lock.lock().await;
        let Some(session) = self.current() else {
            return Ok(None);
        };
        if !session.is_expired_at(Utc::now()) {
            return Ok(Some(session.identity));
        }

        let refreshed = self.refresh(&session.refresh_token).await?;
        Ok(Some(refreshed.identity))
    }

    async fn sign_out(&self) -> Result<(), ServiceError> {
        if let Some(session) = self.current() {
            let logout_url = format!("{}/auth/v1/logout", self.supabase_url);

            let response = self
                .http_client
                .post(&logout_url)
                .header("apikey", &self.supabase_publishable_key)
                .header("Authorization", format!("Bearer {}", session.access_token))
                .send()
                .await
                .map_err(SupabaseError::from)?;

            let status = response.status();
            // The server already forgot the session; finish locally
            let already_gone = matches!(status.as_u16(), 401 | 403 | 404);
            if !status.is_success() && !already_gone {
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, body_summary = %summarize_response_body(&body), "Logout failed");
                return Err(parse_gotrue_error(status.as_u16(), &body).into());
            }
        }

        self.store_session(None);
        self.signed_out_epoch
            .store(self.session_epoch.load(Ordering::SeqCst), Ordering::SeqCst);
        info!("Logged out");
        self.feed.emit(LifecycleEvent::signed_out());
        Ok(())
    }

    fn subscribe(&self) -> LifecycleSubscription {
        self.feed.subscribe()
    }

    fn clear_cached_session(&self) {
        // A session stored after the last SignedOut belongs to a newer sign-in
        if self.session_epoch.load(Ordering::SeqCst) > self.signed_out_epoch.load(Ordering::SeqCst)
        {
            debug!("Keeping session established after sign-out");
            return;
        }
        if self.current().is_some() || self.session_file.as_deref().is_some_and(Path::exists) {
            debug!("Clearing cached session");
            self.store_session(None);
        }
    }
}

async fn read_gotrue_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
) -> SupabaseResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body_summary = %summarize_response_body(&body), "{}", context);
        return Err(parse_gotrue_error(status.as_u16(), &body));
    }
    Ok(response.json().await?)
}

fn load_session_file(path: &Path) -> SupabaseResult<Option<StoredSession>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

fn save_session_file(path: &Path, session: &StoredSession) -> SupabaseResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(session)?)?;
    Ok(())
}

fn remove_session_file(path: &Path) -> SupabaseResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
