//! Client-side session: the current bearer token and user profile, kept in
//! memory, persisted to the [`Store`] and mirrored into a cookie for route
//! gating.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::exact_url;
use crate::config::Config;
use crate::error::{extract_detail, ApiError, AuthError, StorageError};
use crate::models::{LoginRequest, LoginResponse, Session, SignupRequest, UserProfile};
use crate::store::Store;

pub const TOKEN_KEY: &str = "auth_token";
pub const USER_KEY: &str = "auth_user";
pub const SESSION_COOKIE: &str = "auth_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// Explicit sign-out.
    Logout,
    /// A request was rejected with 401.
    Expired,
    /// The persisted session was removed by someone else.
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    SignedOut(SignOutReason),
    Closed,
}

/// Single source of truth for who is signed in. Clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<Option<Session>>,
    /// A rejected token still on disk because clearing it failed.
    stale_token: Mutex<Option<String>>,
    store: Store,
    http: reqwest::Client,
    base_url: Url,
    logout_timeout: Duration,
    cookie_max_age: time::Duration,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Restores any persisted session from `store`.
    pub fn init(config: &Config, store: Store, http: reqwest::Client) -> Result<Self, StorageError> {
        let removed = store.cleanup_expired_cookies()?;
        if removed > 0 {
            debug!(removed, "Removed expired cookies");
        }

        let state = load(&store)?;
        info!(authenticated = state.is_some(), "Session manager initialized");

        let (events, _) = broadcast::channel(16);
        Ok(SessionManager {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                stale_token: Mutex::new(None),
                store,
                http,
                base_url: config.api_url.clone(),
                logout_timeout: config.logout_timeout,
                cookie_max_age: config.cookie_max_age,
                events,
            }),
        })
    }

    /// Announces shutdown to subscribers; watchers stop on it.
    pub fn teardown(&self) {
        info!("Session manager shutting down");
        self.publish(SessionEvent::Closed);
    }

    /// Registers a new account. Does not sign in.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<UserProfile, AuthError> {
        let body = SignupRequest {
            email,
            password,
            name,
        };
        let user: UserProfile = self.post_credentials("/auth/signup", &body, "Signup").await?;
        info!(user_id = %user.id, "Signed up");
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let body = LoginRequest { email, password };
        let response: LoginResponse = self.post_credentials("/auth/login", &body, "Login").await?;

        let session = Session {
            user: response.user,
            token: response.access_token,
        };
        let user_json = serde_json::to_string(&session.user)
            .map_err(|err| AuthError::InvalidResponse(err.to_string()))?;

        {
            let mut state = self.write();
            self.inner.store.put_all(
                &[(TOKEN_KEY, session.token.as_str()), (USER_KEY, user_json.as_str())],
                &self.cookie_for(&session.token),
            )?;
            *state = Some(session.clone());
            *self.stale_token() = None;
        }

        info!(user_id = %session.user.id, "Signed in");
        self.publish(SessionEvent::SignedIn {
            user_id: session.user.id.clone(),
        });
        Ok(session)
    }

    /// Clears the local session, then tells the server on a best-effort
    /// basis. Only a failure to clear durable storage is reported.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let (previous, cleared) = {
            let mut state = self.write();
            let previous = state.take();
            let cleared = self
                .inner
                .store
                .remove_all(&[TOKEN_KEY, USER_KEY], SESSION_COOKIE);
            if let (Err(_), Some(session)) = (&cleared, &previous) {
                *self.stale_token() = Some(session.token.clone());
            }
            (previous, cleared)
        };

        if let Some(session) = previous {
            info!(user_id = %session.user.id, "Signed out");
            self.publish(SessionEvent::SignedOut(SignOutReason::Logout));
            self.notify_server_logout(&session.token).await;
        }

        cleared.map_err(AuthError::from)
    }

    pub fn get_session(&self) -> Option<Session> {
        self.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.read().as_ref().map(|session| session.token.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Drops the session if it still holds `token`. Returns whether anything
    /// was cleared; a token that is no longer active is ignored.
    ///
    /// If durable storage cannot be cleared, the token is remembered and the
    /// clear is retried by [`SessionManager::reload`], which never restores
    /// that token.
    pub fn invalidate(&self, token: &str) -> bool {
        {
            let mut state = self.write();
            if state.as_ref().map(|session| session.token.as_str()) != Some(token) {
                return false;
            }
            *state = None;
            if let Err(err) = self
                .inner
                .store
                .remove_all(&[TOKEN_KEY, USER_KEY], SESSION_COOKIE)
            {
                error!(%err, "Failed to clear persisted session, will retry on reload");
                *self.stale_token() = Some(token.to_string());
            }
        }

        warn!("Session invalidated after authorization failure");
        self.publish(SessionEvent::SignedOut(SignOutReason::Expired));
        true
    }

    /// Re-reads durable storage. Returns `true` when the active session
    /// changed as a result.
    pub fn reload(&self) -> Result<bool, StorageError> {
        let event = {
            let mut state = self.write();
            self.clear_stale()?;
            let stored = load(&self.inner.store)?;

            let current_token = state.as_ref().map(|session| session.token.as_str());
            let stored_token = stored.as_ref().map(|session| session.token.as_str());
            if current_token == stored_token {
                return Ok(false);
            }

            let event = match &stored {
                Some(session) => SessionEvent::SignedIn {
                    user_id: session.user.id.clone(),
                },
                None => SessionEvent::SignedOut(SignOutReason::External),
            };
            *state = stored;
            event
        };

        debug!(?event, "Session changed in storage");
        self.publish(event);
        Ok(true)
    }

    /// Polls storage every `every` until [`SessionManager::teardown`].
    pub fn watch_store(&self, every: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        let mut events = self.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = manager.reload() {
                            warn!(%err, "Failed to reload session");
                        }
                    }
                    event = events.recv() => match event {
                        Ok(SessionEvent::Closed) | Err(broadcast::error::RecvError::Closed) => break,
                        _ => {}
                    },
                }
            }
        })
    }

    /// The cookie mirroring the token, if it has not expired.
    pub fn session_cookie(&self) -> Option<Cookie<'static>> {
        match self.inner.store.cookie(SESSION_COOKIE) {
            Ok(cookie) => cookie,
            Err(err) => {
                warn!(%err, "Failed to read session cookie");
                None
            }
        }
    }

    /// Cookie that clears the mirrored token.
    pub fn removal_cookie() -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, ""))
            .path("/")
            .max_age(time::Duration::seconds(0))
            .build()
    }

    fn cookie_for(&self, token: &str) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token.to_string()))
            .path("/")
            .same_site(SameSite::Lax)
            .max_age(self.inner.cookie_max_age)
            .build()
    }

    async fn post_credentials<B, T>(&self, endpoint: &str, body: &B, action: &str) -> Result<T, AuthError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = exact_url(&self.inner.base_url, endpoint)
            .map_err(|err| AuthError::InvalidRequest(err.to_string()))?;

        let response = self
            .inner
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| AuthError::Network(ApiError::from_transport(&err).to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AuthError::Network(ApiError::from_transport(&err).to_string()))?;

        if !status.is_success() {
            let message = extract_detail(&bytes)
                .unwrap_or_else(|| format!("{action} failed: {}", status.as_u16()));
            warn!(status = status.as_u16(), %message, "{action} rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&bytes).map_err(|err| AuthError::InvalidResponse(err.to_string()))
    }

    async fn notify_server_logout(&self, token: &str) {
        let Ok(url) = exact_url(&self.inner.base_url, "/auth/logout") else {
            return;
        };
        let result = self
            .inner
            .http
            .post(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.inner.logout_timeout)
            .send()
            .await;
        match result {
            Ok(response) => debug!(status = %response.status(), "Server logout"),
            Err(err) => debug!(%err, "Server logout failed, ignoring"),
        }
    }

    /// Retries clearing a rejected token left in storage. Fails while the
    /// token is still there.
    fn clear_stale(&self) -> Result<(), StorageError> {
        let mut stale = self.stale_token();
        let Some(token) = stale.as_deref() else {
            return Ok(());
        };
        if self.inner.store.get(TOKEN_KEY)?.as_deref() == Some(token) {
            self.inner
                .store
                .remove_all(&[TOKEN_KEY, USER_KEY], SESSION_COOKIE)?;
            info!("Cleared rejected session from storage");
        }
        *stale = None;
        Ok(())
    }

    fn stale_token(&self) -> MutexGuard<'_, Option<String>> {
        self.inner
            .stale_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.inner
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.inner
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reads the persisted session. Anything incomplete or unreadable counts as
/// no session and is removed.
fn load(store: &Store) -> Result<Option<Session>, StorageError> {
    let token = store.get(TOKEN_KEY)?;
    let user = store.get(USER_KEY)?;

    let session = match (token, user) {
        (None, None) => return Ok(None),
        (Some(token), Some(user)) if !token.is_empty() => {
            match serde_json::from_str::<UserProfile>(&user) {
                Ok(user) => Some(Session { user, token }),
                Err(err) => {
                    warn!(%err, "Discarding unreadable persisted user");
                    None
                }
            }
        }
        _ => {
            warn!("Discarding incomplete persisted session");
            None
        }
    };

    if session.is_none() {
        store.remove_all(&[TOKEN_KEY, USER_KEY], SESSION_COOKIE)?;
    }
    Ok(session)
}
