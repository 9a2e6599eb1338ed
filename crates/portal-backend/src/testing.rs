//! In-crate fakes shared by the unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use portal_core::{
    AuthStateChange, AuthStateChannel, AuthStateStream, RawError, ResilienceConfig, RetryPolicy,
    Session, User, UserMetadata,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    connectivity::{ConnectivityMonitor, ReachabilityProbe},
    service::{BackendService, SignUpOutcome, TableQuery},
};

pub(crate) fn test_config() -> ResilienceConfig {
    ResilienceConfig {
        retry_policy: RetryPolicy::default(),
        attempt_timeout: Duration::from_secs(15),
        debounce_window: Duration::from_secs(3),
        monitor_interval: Duration::from_secs(5),
        probe_timeout: Duration::from_secs(5),
        fallback_probe_urls: Vec::new(),
    }
}

pub(crate) fn monitor_with(probe: &Arc<FakeProbe>) -> ConnectivityMonitor {
    ConnectivityMonitor::new(probe.clone(), Vec::new(), &test_config())
}

pub(crate) struct FakeProbe {
    name: String,
    pub online: AtomicBool,
    hang: bool,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(name: &str, online: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            online: AtomicBool::new(online),
            hang: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn hanging(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            online: AtomicBool::new(true),
            hang: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<(), RawError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RawError::transport("probe target unreachable"))
        }
    }
}

pub(crate) fn user(id: &str, full_name: Option<&str>) -> User {
    User {
        id: id.to_owned(),
        email: Some(format!("{id}@campus.test")),
        metadata: UserMetadata {
            full_name: full_name.map(str::to_owned),
            role: Some("teacher".to_owned()),
            phone_number: None,
            faculty_id: None,
        },
    }
}

pub(crate) fn session_for(user: &User) -> Session {
    Session {
        access_token: format!("access-{}", user.id),
        refresh_token: Some(format!("refresh-{}", user.id)),
        expires_at: None,
        user: user.clone(),
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<RawError>>,
    hanging: HashSet<String>,
    accounts: HashMap<String, (String, User)>,
    session: Option<Session>,
    tables: HashMap<String, Vec<Value>>,
    uploads: Vec<(String, String, usize)>,
}

/// Scriptable backend: records every call, serves queued failures first,
/// and keeps tables as plain JSON rows.
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
    channel: AuthStateChannel,
    emit_on_sign_in: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            channel: AuthStateChannel::default(),
            emit_on_sign_in: AtomicBool::new(true),
        })
    }

    pub fn with_account(self: &Arc<Self>, email: &str, password: &str, user: User) -> Arc<Self> {
        self.lock()
            .accounts
            .insert(email.to_owned(), (password.to_owned(), user));
        self.clone()
    }

    pub fn set_emit_on_sign_in(&self, emit: bool) {
        self.emit_on_sign_in.store(emit, Ordering::SeqCst);
    }

    pub fn set_session(&self, session: Option<Session>) {
        self.lock().session = session;
    }

    /// Fail the next call of `operation` with `error`. Queued errors are
    /// consumed in order.
    pub fn fail_next(&self, operation: &str, error: RawError) {
        self.lock()
            .failures
            .entry(operation.to_owned())
            .or_default()
            .push_back(error);
    }

    /// Make every call of `operation` hang until cancelled.
    pub fn hang(&self, operation: &str) {
        self.lock().hanging.insert(operation.to_owned());
    }

    pub fn put_row(&self, table: &str, row: Value) {
        self.lock().tables.entry(table.to_owned()).or_default().push(row);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn emit(&self, change: AuthStateChange) {
        self.channel.emit(change);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.lock().uploads.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, operation: &str, cancel: &CancellationToken) -> Result<(), RawError> {
        let (queued, hang) = {
            let mut state = self.lock();
            state.calls.push(operation.to_owned());
            let queued = state
                .failures
                .get_mut(operation)
                .and_then(VecDeque::pop_front);
            (queued, state.hanging.contains(operation))
        };

        if hang {
            cancel.cancelled().await;
            return Err(RawError::transport("cancelled"));
        }
        match queued {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn matches(row: &Value, query: &TableQuery) -> bool {
    query.filters().iter().all(|(column, expected)| {
        match row.get(column) {
            Some(Value::String(actual)) => actual == expected,
            Some(other) => other.to_string() == *expected,
            None => false,
        }
    })
}

#[async_trait]
impl BackendService for FakeBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
        cancel: CancellationToken,
    ) -> Result<Session, RawError> {
        self.enter("sign_in", &cancel).await?;
        let session = {
            let mut state = self.lock();
            let user = match state.accounts.get(email) {
                Some((expected, user)) if expected == password => user.clone(),
                _ => {
                    return Err(RawError::coded("invalid_credentials", "Invalid login credentials")
                        .with_status(400));
                }
            };
            let session = session_for(&user);
            state.session = Some(session.clone());
            session
        };
        if self.emit_on_sign_in.load(Ordering::SeqCst) {
            self.channel.emit(AuthStateChange::SignedIn(session.clone()));
        }
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
        cancel: CancellationToken,
    ) -> Result<SignUpOutcome, RawError> {
        self.enter("sign_up", &cancel).await?;
        let mut state = self.lock();
        if state.accounts.contains_key(email) {
            return Err(RawError::coded("user_already_exists", "User already registered")
                .with_status(422));
        }
        let user = User {
            id: format!("user-{}", state.accounts.len() + 1),
            email: Some(email.to_owned()),
            metadata: metadata.clone(),
        };
        state
            .accounts
            .insert(email.to_owned(), (password.to_owned(), user.clone()));
        Ok(SignUpOutcome {
            user: Some(user),
            session: None,
        })
    }

    async fn get_session(&self, cancel: CancellationToken) -> Result<Option<Session>, RawError> {
        self.enter("get_session", &cancel).await?;
        Ok(self.lock().session.clone())
    }

    fn on_auth_state_change(&self) -> AuthStateStream {
        self.channel.subscribe()
    }

    async fn sign_out(&self, cancel: CancellationToken) -> Result<(), RawError> {
        self.enter("sign_out", &cancel).await?;
        self.lock().session = None;
        self.channel.emit(AuthStateChange::SignedOut);
        Ok(())
    }

    async fn select(
        &self,
        table: &str,
        query: &TableQuery,
        cancel: CancellationToken,
    ) -> Result<Vec<Value>, RawError> {
        self.enter("select", &cancel).await?;
        let state = self.lock();
        let mut rows: Vec<Value> = state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| matches(row, query)).cloned().collect())
            .unwrap_or_default();
        if let Some(limit) = query.row_limit() {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn count(
        &self,
        table: &str,
        query: &TableQuery,
        cancel: CancellationToken,
    ) -> Result<u64, RawError> {
        self.enter("count", &cancel).await?;
        let state = self.lock();
        let count = state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| matches(row, query)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn insert(
        &self,
        table: &str,
        rows: Value,
        cancel: CancellationToken,
    ) -> Result<(), RawError> {
        self.enter("insert", &cancel).await?;
        let mut state = self.lock();
        let target = state.tables.entry(table.to_owned()).or_default();
        match rows {
            Value::Array(rows) => target.extend(rows),
            row => target.push(row),
        }
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        query: &TableQuery,
        patch: Value,
        cancel: CancellationToken,
    ) -> Result<(), RawError> {
        self.enter("update", &cancel).await?;
        let mut state = self.lock();
        let Value::Object(fields) = patch else {
            return Ok(());
        };
        for row in state.tables.entry(table.to_owned()).or_default().iter_mut() {
            if matches(row, query)
                && let Value::Object(existing) = row
            {
                for (key, value) in &fields {
                    existing.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        object_path: &str,
        bytes: &[u8],
        _content_type: &str,
        cancel: CancellationToken,
    ) -> Result<(), RawError> {
        self.enter("upload", &cancel).await?;
        self.lock()
            .uploads
            .push((bucket.to_owned(), object_path.to_owned(), bytes.len()));
        Ok(())
    }

    fn public_url(&self, bucket: &str, object_path: &str) -> String {
        format!("https://files.campus.test/{bucket}/{object_path}")
    }

    async fn health_check(&self, cancel: CancellationToken) -> Result<(), RawError> {
        self.enter("health_check", &cancel).await
    }
}
