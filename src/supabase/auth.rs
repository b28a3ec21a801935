use super::{SupabaseClient, SupabaseError};
use crate::backend::AuthBackend;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    pub(crate) fn stamped(mut self) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(Utc::now().timestamp() + self.expires_in as i64);
        }
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| at <= Utc::now().timestamp())
            .unwrap_or(false)
    }
}

/// Notification delivered to session subscribers on login, logout and refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut { access_token: String },
    TokenRefreshed(Session),
}

impl AuthEvent {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => Some(session),
            AuthEvent::SignedOut { .. } => None,
        }
    }
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

impl SupabaseClient {
    async fn token_request<B: Serialize + ?Sized>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<Session, SupabaseError> {
        let url = format!("{}/auth/v1/token", self.base_url);
        let request = self
            .http
            .post(url)
            .query(&[("grant_type", grant_type)])
            .json(body);
        // GoTrue answers a bad password or a spent refresh token with 400.
        let response = Self::send(request).await.map_err(|err| match err {
            SupabaseError::Status { status: 400, message } => SupabaseError::InvalidGrant(message),
            other => other,
        })?;
        let session: Session = response
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))?;
        Ok(session.stamped())
    }
}

#[async_trait]
impl AuthBackend for SupabaseClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SupabaseError> {
        let session = self
            .token_request("password", &PasswordGrant { email, password })
            .await?;
        info!(target = "bicimarket.auth", user_id = %session.user.id, "signed in");
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn get_user(&self, access_token: &str) -> Result<User, SupabaseError> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let request = self.authorized(self.http.get(url), Some(access_token));
        Self::send(request)
            .await?
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, SupabaseError> {
        let session = self
            .token_request("refresh_token", &RefreshGrant { refresh_token })
            .await?;
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), SupabaseError> {
        let url = format!("{}/auth/v1/logout", self.base_url);
        let request = self.authorized(self.http.post(url), Some(access_token));
        Self::send(request).await?;
        self.emit(AuthEvent::SignedOut {
            access_token: access_token.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
