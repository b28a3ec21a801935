//! Per-user session registry.
//!
//! Created once at startup and shared through `AppState`. Sessions enter the
//! registry when a user signs in through this service, when a bearer token is
//! verified against GoTrue, or when the auth event stream reports a sign-in or
//! refresh. Sign-out events drop the matching entry.

use crate::backend::AuthBackend;
use crate::supabase::SupabaseError;
use crate::supabase::auth::{AuthEvent, Session, User};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a token verified through `get_user` is trusted without asking
/// GoTrue again.
pub const VERIFIED_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEntry {
    pub user: User,
    pub expires_at: Option<i64>,
    #[serde(skip)]
    pub refresh_token: Option<String>,
}

impl SessionEntry {
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| at <= Utc::now().timestamp())
            .unwrap_or(false)
    }
}

impl From<&Session> for SessionEntry {
    fn from(session: &Session) -> Self {
        Self {
            user: session.user.clone(),
            expires_at: session.expires_at,
            refresh_token: Some(session.refresh_token.clone()),
        }
    }
}

type Registry = Arc<RwLock<HashMap<String, SessionEntry>>>;

pub struct SessionStore {
    auth: Arc<dyn AuthBackend>,
    entries: Registry,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    /// Subscribes to the auth event stream. Must run inside a Tokio runtime.
    pub fn start(auth: Arc<dyn AuthBackend>) -> Self {
        let entries: Registry = Arc::default();
        let events = auth.subscribe();
        let listener = tokio::spawn(listen(events, entries.clone()));
        info!(target = "bicimarket.session", "session store started");
        Self {
            auth,
            entries,
            listener: Mutex::new(Some(listener)),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SupabaseError> {
        let session = self.auth.sign_in_with_password(email, password).await?;
        apply(&self.entries, &AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, SupabaseError> {
        let session = self.auth.refresh_session(refresh_token).await?;
        self.write().retain(|_, entry| entry.refresh_token.as_deref() != Some(refresh_token));
        apply(&self.entries, &AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    /// Forgets the token locally even when GoTrue rejects the logout.
    pub async fn sign_out(&self, access_token: &str) -> Result<(), SupabaseError> {
        self.write().remove(access_token);
        self.auth.sign_out(access_token).await
    }

    /// Resolves a bearer token to its user, asking GoTrue only for tokens the
    /// registry does not hold or holds past their expiry.
    pub async fn authenticate(&self, access_token: &str) -> Result<User, SupabaseError> {
        if let Some(entry) = self.current(access_token) {
            if !entry.is_expired() {
                return Ok(entry.user);
            }
            self.write().remove(access_token);
        }
        let user = self.auth.get_user(access_token).await?;
        debug!(target = "bicimarket.session", user_id = %user.id, "token verified");
        let mut entries = self.write();
        entries.retain(|_, entry| !entry.is_expired());
        entries.insert(
            access_token.to_string(),
            SessionEntry {
                user: user.clone(),
                expires_at: Some(Utc::now().timestamp() + VERIFIED_TTL_SECS),
                refresh_token: None,
            },
        );
        Ok(user)
    }

    pub fn current(&self, access_token: &str) -> Option<SessionEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(access_token)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops following auth events. Entries already held stay usable.
    pub fn shutdown(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = listener.take() {
            task.abort();
            info!(target = "bicimarket.session", "session store stopped");
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn listen(mut events: Receiver<AuthEvent>, entries: Registry) {
    loop {
        match events.recv().await {
            Ok(event) => apply(&entries, &event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(target = "bicimarket.session", skipped, "auth events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn apply(entries: &RwLock<HashMap<String, SessionEntry>>, event: &AuthEvent) {
    let mut entries = entries.write().unwrap_or_else(|e| e.into_inner());
    entries.retain(|_, entry| !entry.is_expired());
    if let AuthEvent::SignedOut { access_token } = event {
        entries.remove(access_token);
    } else if let Some(session) = event.session() {
        if session.is_expired() {
            debug!(target = "bicimarket.session", "ignoring already expired session");
            return;
        }
        entries.insert(session.access_token.clone(), SessionEntry::from(session));
    }
}
