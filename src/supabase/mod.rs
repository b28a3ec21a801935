pub mod auth;
pub mod query;
pub mod storage;

use crate::backend::Backend;
use crate::config::STORAGE_BUCKET;
use crate::http::build_backend_client;
use async_trait::async_trait;
use auth::AuthEvent;
use query::{SelectQuery, Table};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    anon_key: String,
    bucket: String,
    http: Client,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
    /// GoTrue rejected a password or refresh grant.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
}

impl SupabaseError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            SupabaseError::InvalidGrant(_) | SupabaseError::Status { status: 401 | 403, .. }
        )
    }
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str, bucket: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            bucket: bucket.to_string(),
            http: build_backend_client(anon_key),
            events,
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY")
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self::new(&base_url, &anon_key, &STORAGE_BUCKET))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        let token = access_token.unwrap_or(&self.anon_key);
        request.bearer_auth(token)
    }

    async fn send(request: RequestBuilder) -> Result<Response, SupabaseError> {
        let response = request
            .send()
            .await
            .map_err(|err| SupabaseError::Request(err.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(300)
            .collect();
        Err(SupabaseError::Status { status, message })
    }

    pub(crate) fn emit(&self, event: AuthEvent) {
        // No receivers simply means nobody is tracking the session yet.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Backend for SupabaseClient {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, SupabaseError> {
        let started = Instant::now();
        let url = format!("{}/rest/v1/{}", self.base_url, query.table.as_str());
        let request = self.authorized(self.http.get(url), None).query(&query.to_pairs());
        let response = Self::send(request).await?;
        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))?;
        crate::metrics::backend_elapsed(query.table.as_str(), started.elapsed().as_millis());
        debug!(
            target = "bicimarket.supabase",
            table = query.table.as_str(),
            rows = rows.len(),
            "select completed"
        );
        Ok(rows)
    }

    async fn insert(
        &self,
        table: Table,
        row: Value,
        access_token: &str,
    ) -> Result<Value, SupabaseError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table.as_str());
        let request = self
            .authorized(self.http.post(url), Some(access_token))
            .header("Prefer", "return=representation")
            .json(&vec![row]);
        let response = Self::send(request).await?;
        let mut stored: Vec<Value> = response
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))?;
        stored
            .pop()
            .ok_or_else(|| SupabaseError::Deserialize("insert returned no rows".into()))
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        access_token: &str,
    ) -> Result<String, SupabaseError> {
        storage::upload_object(self, path, bytes, content_type, access_token).await
    }

    async fn remove(&self, paths: &[String], access_token: &str) -> Result<(), SupabaseError> {
        storage::remove_objects(self, paths, access_token).await
    }

    fn public_url(&self, path: &str) -> Option<String> {
        storage::public_object_url(&self.base_url, &self.bucket, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_failures_count_as_unauthorized() {
        let bad_filter = SupabaseError::Status {
            status: 400,
            message: "failed to parse filter".into(),
        };
        assert!(!bad_filter.is_unauthorized());
        assert!(SupabaseError::InvalidGrant("Invalid login credentials".into()).is_unauthorized());
        let expired = SupabaseError::Status {
            status: 401,
            message: "JWT expired".into(),
        };
        assert!(expired.is_unauthorized());
    }
}
