//! Seams between the marketplace logic and the hosted backend.
//!
//! `SupabaseClient` implements both traits for production; tests use the
//! in-memory fake in [`testing`].

use crate::supabase::{
    SupabaseError,
    auth::{AuthEvent, Session, User},
    query::{SelectQuery, Table},
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, SupabaseError>;

    /// Inserts one row as the given user and returns the stored representation.
    async fn insert(
        &self,
        table: Table,
        row: Value,
        access_token: &str,
    ) -> Result<Value, SupabaseError>;

    /// Uploads an object into the image bucket and returns its storage path.
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        access_token: &str,
    ) -> Result<String, SupabaseError>;

    async fn remove(&self, paths: &[String], access_token: &str) -> Result<(), SupabaseError>;

    fn public_url(&self, path: &str) -> Option<String>;
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SupabaseError>;

    async fn get_user(&self, access_token: &str) -> Result<User, SupabaseError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, SupabaseError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), SupabaseError>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

pub async fn fetch_rows<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &SelectQuery,
) -> Result<Vec<T>, SupabaseError> {
    backend
        .select(query)
        .await?
        .into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|err| SupabaseError::Deserialize(err.to_string()))
        })
        .collect()
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::supabase::query::Filter;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Select(Table),
        Insert(Table),
        Upload(String),
        Remove(Vec<String>),
    }

    /// Evaluates queries against in-memory rows and records every call.
    #[derive(Default)]
    pub struct MemoryBackend {
        tables: Mutex<HashMap<Table, Vec<Value>>>,
        failing_tables: HashSet<Table>,
        failing_uploads: HashSet<String>,
        fail_inserts: bool,
        calls: Mutex<Vec<Call>>,
    }

    impl MemoryBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_rows(self, table: Table, rows: Vec<Value>) -> Self {
            self.tables.lock().unwrap().insert(table, rows);
            self
        }

        pub fn failing(mut self, table: Table) -> Self {
            self.failing_tables.insert(table);
            self
        }

        /// Uploads whose path ends with `file_name` fail.
        pub fn failing_upload(mut self, file_name: &str) -> Self {
            self.failing_uploads.insert(file_name.to_string());
            self
        }

        pub fn failing_inserts(mut self) -> Self {
            self.fail_inserts = true;
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn rows(&self, table: Table) -> Vec<Value> {
            self.tables
                .lock()
                .unwrap()
                .get(&table)
                .cloned()
                .unwrap_or_default()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn text(row: &Value, column: &str) -> Option<String> {
        match row.get(column)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn number(row: &Value, column: &str) -> Option<f64> {
        row.get(column).and_then(Value::as_f64)
    }

    fn matches(row: &Value, filter: &Filter) -> bool {
        match filter {
            Filter::Eq { column, value } => text(row, column).as_deref() == Some(value.as_str()),
            Filter::Contains { column, fragment } => text(row, column)
                .map(|v| v.to_lowercase().contains(&fragment.to_lowercase()))
                .unwrap_or(false),
            Filter::EqIgnoreCase { column, value } => text(row, column)
                .map(|v| v.to_lowercase() == value.to_lowercase())
                .unwrap_or(false),
            Filter::In { column, values } => text(row, column)
                .map(|v| values.contains(&v))
                .unwrap_or(false),
            Filter::Gte { column, value } => {
                matches!((number(row, column), value.parse::<f64>()), (Some(a), Ok(b)) if a >= b)
            }
            Filter::Lte { column, value } => {
                matches!((number(row, column), value.parse::<f64>()), (Some(a), Ok(b)) if a <= b)
            }
            Filter::Or(members) => members.iter().any(|m| matches(row, m)),
        }
    }

    #[async_trait]
    impl Backend for MemoryBackend {
        async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, SupabaseError> {
            self.record(Call::Select(query.table));
            if self.failing_tables.contains(&query.table) {
                return Err(SupabaseError::Request("connection reset".into()));
            }
            let mut rows: Vec<Value> = self
                .rows(query.table)
                .into_iter()
                .filter(|row| query.filters.iter().all(|f| matches(row, f)))
                .collect();
            if let Some(order) = &query.order {
                rows.sort_by_key(|row| text(row, order.column).unwrap_or_default());
                if !order.ascending {
                    rows.reverse();
                }
            }
            if let Some(limit) = query.limit {
                rows.truncate(limit);
            }
            Ok(rows)
        }

        async fn insert(
            &self,
            table: Table,
            row: Value,
            _access_token: &str,
        ) -> Result<Value, SupabaseError> {
            self.record(Call::Insert(table));
            if self.fail_inserts {
                return Err(SupabaseError::Status {
                    status: 403,
                    message: "row-level security".into(),
                });
            }
            self.tables
                .lock()
                .unwrap()
                .entry(table)
                .or_default()
                .push(row.clone());
            Ok(row)
        }

        async fn upload(
            &self,
            path: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
            _access_token: &str,
        ) -> Result<String, SupabaseError> {
            self.record(Call::Upload(path.to_string()));
            if self.failing_uploads.iter().any(|name| path.ends_with(name)) {
                return Err(SupabaseError::Status {
                    status: 413,
                    message: "payload too large".into(),
                });
            }
            Ok(path.to_string())
        }

        async fn remove(&self, paths: &[String], _access_token: &str) -> Result<(), SupabaseError> {
            self.record(Call::Remove(paths.to_vec()));
            Ok(())
        }

        fn public_url(&self, path: &str) -> Option<String> {
            crate::supabase::storage::public_object_url("https://demo.supabase.co", "bike-images", path)
        }
    }

    /// GoTrue stand-in: one account per email, opaque numbered tokens.
    pub struct MemoryAuth {
        events: broadcast::Sender<AuthEvent>,
        accounts: HashMap<String, (String, User)>,
        sessions: Mutex<Vec<Session>>,
        issued: Mutex<u64>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl MemoryAuth {
        pub fn new() -> Self {
            let (events, _) = broadcast::channel(16);
            Self {
                events,
                accounts: HashMap::new(),
                sessions: Mutex::new(Vec::new()),
                issued: Mutex::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_account(mut self, email: &str, password: &str, id: Uuid) -> Self {
            let user = User {
                id,
                email: Some(email.to_string()),
            };
            self.accounts
                .insert(email.to_string(), (password.to_string(), user));
            self
        }

        pub fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        /// Publishes an event as if another client of the same project
        /// changed auth state.
        pub fn emit(&self, event: AuthEvent) {
            let _ = self.events.send(event);
        }

        fn issue(&self, user: User, expires_in: u64) -> Session {
            let mut issued = self.issued.lock().unwrap();
            *issued += 1;
            let session = Session {
                access_token: format!("access-{issued}"),
                refresh_token: format!("refresh-{issued}"),
                expires_in,
                expires_at: None,
                user,
            }
            .stamped();
            self.sessions.lock().unwrap().push(session.clone());
            session
        }

        fn unauthorized() -> SupabaseError {
            SupabaseError::Status {
                status: 401,
                message: "invalid JWT".into(),
            }
        }
    }

    #[async_trait]
    impl AuthBackend for MemoryAuth {
        async fn sign_in_with_password(
            &self,
            email: &str,
            password: &str,
        ) -> Result<Session, SupabaseError> {
            self.calls.lock().unwrap().push("sign_in");
            let user = match self.accounts.get(email) {
                Some((expected, user)) if expected == password => user.clone(),
                _ => {
                    return Err(SupabaseError::InvalidGrant(
                        "Invalid login credentials".into(),
                    ));
                }
            };
            let session = self.issue(user, 3600);
            self.emit(AuthEvent::SignedIn(session.clone()));
            Ok(session)
        }

        async fn get_user(&self, access_token: &str) -> Result<User, SupabaseError> {
            self.calls.lock().unwrap().push("get_user");
            self.sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.access_token == access_token)
                .map(|s| s.user.clone())
                .ok_or_else(Self::unauthorized)
        }

        async fn refresh_session(&self, refresh_token: &str) -> Result<Session, SupabaseError> {
            self.calls.lock().unwrap().push("refresh");
            let previous = {
                let mut sessions = self.sessions.lock().unwrap();
                let position = sessions
                    .iter()
                    .position(|s| s.refresh_token == refresh_token)
                    .ok_or_else(Self::unauthorized)?;
                sessions.remove(position)
            };
            let session = self.issue(previous.user, 3600);
            self.emit(AuthEvent::TokenRefreshed(session.clone()));
            Ok(session)
        }

        async fn sign_out(&self, access_token: &str) -> Result<(), SupabaseError> {
            self.calls.lock().unwrap().push("sign_out");
            self.sessions
                .lock()
                .unwrap()
                .retain(|s| s.access_token != access_token);
            self.emit(AuthEvent::SignedOut {
                access_token: access_token.to_string(),
            });
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
            self.events.subscribe()
        }
    }
}
