//! HTTP adapter for a hosted auth + table + object-storage service.
//!
//! Auth goes through `/auth/v1`, tables through `/rest/v1/{table}` using
//! `col=eq.value` filters, and blobs through `/storage/v1/object`. Session
//! material is persisted under [`SESSION_KEY`] in the auth cache so a
//! restart can restore it.

use std::{
    sync::{PoisonError, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use portal_core::{
    AuthStateChange, AuthStateChannel, AuthStateStream, RawError, Session, User, UserMetadata,
};
use portal_platform::AuthCache;
use reqwest::{Client, Method, RequestBuilder, Response, header};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::service::{BackendService, SignUpOutcome, TableQuery};

/// Cache key holding the serialized [`Session`].
pub const SESSION_KEY: &str = "session";

#[derive(Debug, Clone)]
pub struct RestBackendConfig {
    pub base_url: Url,
    /// Public client key sent as `apikey` on every request.
    pub anon_key: String,
}

impl RestBackendConfig {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, RestConfigError> {
        let parsed = Url::parse(base_url.trim()).map_err(|err| RestConfigError::InvalidUrl {
            url: base_url.to_owned(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RestConfigError::UnsupportedScheme(parsed.scheme().to_owned()));
        }

        let anon_key = anon_key.into();
        if anon_key.trim().is_empty() {
            return Err(RestConfigError::MissingAnonKey);
        }
        Ok(Self {
            base_url: parsed,
            anon_key,
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RestConfigError {
    #[error("invalid backend url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("backend url must use http or https, got '{0}'")]
    UnsupportedScheme(String),
    #[error("anon key must not be empty")]
    MissingAnonKey,
}

pub struct RestBackend {
    client: Client,
    base_url: Url,
    anon_key: String,
    cache: AuthCache,
    session: RwLock<Option<Session>>,
    channel: AuthStateChannel,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    expires_at: Option<u64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|expires_in| unix_now().saturating_add(expires_in))
        });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

impl RestBackend {
    /// Build the adapter and restore any session persisted in `cache`.
    pub fn new(client: Client, config: RestBackendConfig, cache: AuthCache) -> Self {
        let mut base_url = config.base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let session = load_session(&cache);
        if let Some(session) = &session {
            debug!(user_id = %session.user_id(), "loaded persisted session");
        }

        Self {
            client,
            base_url,
            anon_key: config.anon_key,
            cache,
            session: RwLock::new(session),
            channel: AuthStateChannel::default(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Session currently held by the adapter.
    pub fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url, RawError> {
        self.base_url
            .join(path)
            .map_err(|err| RawError::coded("invalid_url", format!("invalid endpoint '{path}': {err}")))
    }

    fn bearer(&self) -> String {
        self.current_session()
            .map(|session| session.access_token)
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    fn replace_session(&self, session: Option<Session>) {
        match &session {
            Some(session) => match serde_json::to_string(session) {
                Ok(encoded) => {
                    if let Err(err) = self.cache.set(SESSION_KEY, &encoded) {
                        warn!(error = %err, "failed persisting session");
                    }
                }
                Err(err) => warn!(error = %err, "failed encoding session"),
            },
            None => {
                if let Err(err) = self.cache.remove(SESSION_KEY) {
                    warn!(error = %err, "failed removing persisted session");
                }
            }
        }
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Send `request`, racing it against `cancel`. Non-2xx answers are
    /// parsed into a [`RawError`].
    async fn send(
        &self,
        request: RequestBuilder,
        cancel: CancellationToken,
    ) -> Result<Response, RawError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RawError::coded("cancelled", "request cancelled"));
            }
            response = request.send() => response.map_err(map_reqwest_error)?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => String::new(),
            body = response.text() => body.unwrap_or_default(),
        };
        Err(RawError::from_http_body(status.as_u16(), &body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: CancellationToken,
    ) -> Result<T, RawError> {
        let response = self.send(request, cancel.clone()).await?;
        tokio::select! {
            _ = cancel.cancelled() => Err(RawError::coded("cancelled", "request cancelled")),
            decoded = response.json::<T>() => decoded.map_err(map_reqwest_error),
        }
    }

    async fn refresh(&self, refresh_token: &str, cancel: CancellationToken) -> Result<Session, RawError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "refresh_token");
        let token: TokenResponse = self
            .send_json(
                self.request(Method::POST, url)
                    .json(&json!({ "refresh_token": refresh_token })),
                cancel,
            )
            .await?;
        Ok(token.into_session())
    }

    fn table_url(&self, table: &str, query: &TableQuery) -> Result<Url, RawError> {
        let mut url = self.endpoint(&format!("rest/v1/{table}"))?;
        let pairs = query.to_query_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }
}

#[async_trait]
impl BackendService for RestBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
        cancel: CancellationToken,
    ) -> Result<Session, RawError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let token: TokenResponse = self
            .send_json(
                self.request(Method::POST, url)
                    .json(&json!({ "email": email, "password": password })),
                cancel,
            )
            .await?;

        let session = token.into_session();
        self.replace_session(Some(session.clone()));
        info!(user_id = %session.user_id(), "password sign-in accepted");
        self.channel.emit(AuthStateChange::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
        cancel: CancellationToken,
    ) -> Result<SignUpOutcome, RawError> {
        let url = self.endpoint("auth/v1/signup")?;
        let body: Value = self
            .send_json(
                self.request(Method::POST, url).json(&json!({
                    "email": email,
                    "password": password,
                    "data": metadata,
                })),
                cancel,
            )
            .await?;

        // Auto-confirmed projects answer with a full session, others with
        // the bare user awaiting confirmation.
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)
                .map_err(|err| RawError::coded("invalid_response", err.to_string()))?;
            let session = token.into_session();
            self.replace_session(Some(session.clone()));
            self.channel.emit(AuthStateChange::SignedIn(session.clone()));
            return Ok(SignUpOutcome {
                user: Some(session.user.clone()),
                session: Some(session),
            });
        }

        let user_value = body.get("user").cloned().unwrap_or(body);
        let user = if user_value.get("id").is_some() {
            Some(
                serde_json::from_value::<User>(user_value)
                    .map_err(|err| RawError::coded("invalid_response", err.to_string()))?,
            )
        } else {
            None
        };
        Ok(SignUpOutcome { user, session: None })
    }

    async fn get_session(&self, cancel: CancellationToken) -> Result<Option<Session>, RawError> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        if !session.is_expired_at(SystemTime::now()) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            self.replace_session(None);
            self.channel.emit(AuthStateChange::SignedOut);
            return Err(RawError::coded("session_expired", "session expired"));
        };

        match self.refresh(&refresh_token, cancel).await {
            Ok(refreshed) => {
                self.replace_session(Some(refreshed.clone()));
                debug!(user_id = %refreshed.user_id(), "session refreshed");
                self.channel.emit(AuthStateChange::TokenRefreshed(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(err) if err.status.is_some_and(|status| (400..500).contains(&status)) => {
                warn!(status = ?err.status, code = ?err.code, "refresh token rejected");
                self.replace_session(None);
                self.channel.emit(AuthStateChange::SignedOut);
                Err(RawError::coded(
                    "session_expired",
                    err.message.unwrap_or_else(|| "refresh token rejected".to_owned()),
                )
                .with_status(401))
            }
            Err(err) => Err(err),
        }
    }

    fn on_auth_state_change(&self) -> AuthStateStream {
        self.channel.subscribe()
    }

    async fn sign_out(&self, cancel: CancellationToken) -> Result<(), RawError> {
        if self.current_session().is_none() {
            return Ok(());
        }

        let url = self.endpoint("auth/v1/logout")?;
        let outcome = self.send(self.request(Method::POST, url), cancel).await;
        self.replace_session(None);
        self.channel.emit(AuthStateChange::SignedOut);
        outcome.map(|_| ())
    }

    async fn select(
        &self,
        table: &str,
        query: &TableQuery,
        cancel: CancellationToken,
    ) -> Result<Vec<Value>, RawError> {
        let url = self.table_url(table, query)?;
        self.send_json(
            self.request(Method::GET, url)
                .header(header::ACCEPT, "application/json"),
            cancel,
        )
        .await
    }

    async fn count(
        &self,
        table: &str,
        query: &TableQuery,
        cancel: CancellationToken,
    ) -> Result<u64, RawError> {
        let url = self.table_url(table, query)?;
        let response = self
            .send(
                self.request(Method::HEAD, url).header("Prefer", "count=exact"),
                cancel,
            )
            .await?;

        response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| RawError::coded("invalid_response", "missing row count in Content-Range"))
    }

    async fn insert(
        &self,
        table: &str,
        rows: Value,
        cancel: CancellationToken,
    ) -> Result<(), RawError> {
        let url = self.endpoint(&format!("rest/v1/{table}"))?;
        self.send(
            self.request(Method::POST, url)
                .header("Prefer", "return=minimal")
                .json(&rows),
            cancel,
        )
        .await
        .map(|_| ())
    }

    async fn update(
        &self,
        table: &str,
        query: &TableQuery,
        patch: Value,
        cancel: CancellationToken,
    ) -> Result<(), RawError> {
        let url = self.table_url(table, query)?;
        self.send(
            self.request(Method::PATCH, url)
                .header("Prefer", "return=minimal")
                .json(&patch),
            cancel,
        )
        .await
        .map(|_| ())
    }

    async fn upload(
        &self,
        bucket: &str,
        object_path: &str,
        bytes: &[u8],
        content_type: &str,
        cancel: CancellationToken,
    ) -> Result<(), RawError> {
        let url = self.endpoint(&format!("storage/v1/object/{bucket}/{object_path}"))?;
        self.send(
            self.request(Method::POST, url)
                .header(header::CONTENT_TYPE, content_type)
                .header("x-upsert", "false")
                .body(bytes.to_vec()),
            cancel,
        )
        .await
        .map(|_| ())
    }

    fn public_url(&self, bucket: &str, object_path: &str) -> String {
        let path = format!("storage/v1/object/public/{bucket}/{object_path}");
        self.base_url
            .join(&path)
            .map(String::from)
            .unwrap_or_else(|_| format!("{}{path}", self.base_url))
    }

    async fn health_check(&self, cancel: CancellationToken) -> Result<(), RawError> {
        let url = self.endpoint("auth/v1/health")?;
        self.send(
            self.client.get(url).header("apikey", &self.anon_key),
            cancel,
        )
        .await
        .map(|_| ())
    }
}

fn load_session(cache: &AuthCache) -> Option<Session> {
    let raw = match cache.get(SESSION_KEY) {
        Ok(raw) => raw?,
        Err(err) => {
            warn!(error = %err, "failed reading persisted session");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(session) => Some(session),
        Err(err) => {
            warn!(error = %err, "discarding unreadable persisted session");
            None
        }
    }
}

/// Total from a `Content-Range` value such as `0-9/42` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

fn map_reqwest_error(err: reqwest::Error) -> RawError {
    if err.is_timeout() {
        RawError::timeout(err.to_string())
    } else if err.is_decode() {
        RawError::coded("invalid_response", err.to_string())
    } else {
        let raw = RawError::transport(err.to_string());
        match err.status() {
            Some(status) => raw.with_status(status.as_u16()),
            None => raw,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use portal_core::{ClassifiedError, classify};
    use portal_platform::{DurableStore, InMemoryDurableStore, auth_cache};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header as header_eq, method, path, query_param},
    };

    use super::*;

    const ANON: &str = "anon-key";

    fn backend(server: &MockServer, store: &Arc<InMemoryDurableStore>) -> RestBackend {
        let base_url = Url::parse(&server.uri()).expect("mock server url");
        RestBackend::new(
            Client::new(),
            RestBackendConfig {
                base_url,
                anon_key: ANON.to_owned(),
            },
            auth_cache(store.clone()),
        )
    }

    fn token_body(user_id: &str) -> Value {
        json!({
            "access_token": format!("jwt-{user_id}"),
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "user": {
                "id": user_id,
                "email": "ada@campus.test",
                "user_metadata": { "full_name": "Ada", "role": "teacher" }
            }
        })
    }

    #[tokio::test]
    async fn password_sign_in_persists_and_emits_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header_eq("apikey", ANON))
            .and(body_partial_json(json!({ "email": "ada@campus.test" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("u1")))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryDurableStore::default());
        let adapter = backend(&server, &store);
        let mut events = adapter.on_auth_state_change();

        let session = adapter
            .sign_in_with_password("ada@campus.test", "pw", CancellationToken::new())
            .await
            .expect("sign-in should succeed");

        assert_eq!(session.user_id(), "u1");
        assert_eq!(session.user.metadata.full_name.as_deref(), Some("Ada"));
        assert!(session.expires_at.is_some());
        assert!(store.get("portal.auth.session").expect("get").is_some());
        assert!(matches!(
            events.recv().await.expect("event"),
            AuthStateChange::SignedIn(_)
        ));

        let restored = backend(&server, &store);
        assert_eq!(restored.current_session(), Some(session));
    }

    #[tokio::test]
    async fn error_bodies_become_classifiable_raw_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": 400,
                "error_code": "invalid_credentials",
                "msg": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryDurableStore::default());
        let err = backend(&server, &store)
            .sign_in_with_password("ada@campus.test", "bad", CancellationToken::new())
            .await
            .expect_err("must fail");

        assert_eq!(err.status, Some(400));
        assert_eq!(classify(&err), ClassifiedError::InvalidCredentials);
    }

    #[tokio::test]
    async fn select_renders_filters_and_count_reads_content_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", "eq.u1"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "u1", "role": "student", "full_name": "Ada" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/rest/v1/profiles"))
            .and(header_eq("Prefer", "count=exact"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-range", "0-0/1"))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryDurableStore::default());
        let adapter = backend(&server, &store);
        let query = TableQuery::new().eq("id", "u1");

        let rows = adapter
            .select("profiles", &query.clone().limit(1), CancellationToken::new())
            .await
            .expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(
            adapter
                .count("profiles", &query, CancellationToken::new())
                .await
                .expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn unique_violation_keeps_constraint_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"profiles_email_key\"",
                "details": "Key (email)=(ada@campus.test) already exists."
            })))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryDurableStore::default());
        let err = backend(&server, &store)
            .insert("profiles", json!({ "id": "u1" }), CancellationToken::new())
            .await
            .expect_err("conflict");

        assert_eq!(
            classify(&err),
            ClassifiedError::DuplicateRecord("email".to_owned())
        );
    }

    #[tokio::test]
    async fn cancellation_abandons_in_flight_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryDurableStore::default());
        let adapter = backend(&server, &store);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), adapter.health_check(cancel))
            .await
            .expect("cancellation should return promptly")
            .expect_err("cancelled");
        assert_eq!(err.code.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn expired_session_is_refreshed_on_restore() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_partial_json(json!({ "refresh_token": "stale-refresh" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("u1")))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryDurableStore::default());
        let stale = Session {
            access_token: "old".to_owned(),
            refresh_token: Some("stale-refresh".to_owned()),
            expires_at: Some(1),
            user: User {
                id: "u1".to_owned(),
                email: None,
                metadata: UserMetadata::default(),
            },
        };
        store
            .set(
                "portal.auth.session",
                &serde_json::to_string(&stale).expect("encode"),
            )
            .expect("seed");

        let adapter = backend(&server, &store);
        let session = adapter
            .get_session(CancellationToken::new())
            .await
            .expect("refresh")
            .expect("session");
        assert_eq!(session.access_token, "jwt-u1");
    }

    #[tokio::test]
    async fn rejected_refresh_reports_expired_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid Refresh Token: Already Used"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryDurableStore::default());
        let stale = Session {
            access_token: "old".to_owned(),
            refresh_token: Some("used-refresh".to_owned()),
            expires_at: Some(1),
            user: User {
                id: "u1".to_owned(),
                email: None,
                metadata: UserMetadata::default(),
            },
        };
        store
            .set(
                "portal.auth.session",
                &serde_json::to_string(&stale).expect("encode"),
            )
            .expect("seed");

        let adapter = backend(&server, &store);
        let mut events = adapter.on_auth_state_change();
        let err = adapter
            .get_session(CancellationToken::new())
            .await
            .expect_err("refresh must be rejected");

        assert_eq!(err.code.as_deref(), Some("session_expired"));
        assert_eq!(classify(&err), ClassifiedError::SessionExpired);
        assert!(adapter.current_session().is_none());
        assert!(store.get("portal.auth.session").expect("get").is_none());
        assert_eq!(events.recv().await.expect("event"), AuthStateChange::SignedOut);
    }

    #[tokio::test]
    async fn sign_out_clears_persisted_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("u1")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header_eq("authorization", "Bearer jwt-u1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryDurableStore::default());
        let adapter = backend(&server, &store);
        adapter
            .sign_in_with_password("ada@campus.test", "pw", CancellationToken::new())
            .await
            .expect("sign-in");

        adapter
            .sign_out(CancellationToken::new())
            .await
            .expect("sign-out");
        assert!(adapter.current_session().is_none());
        assert!(store.get("portal.auth.session").expect("get").is_none());
    }

    #[test]
    fn config_rejects_bad_urls_and_keys() {
        assert!(matches!(
            RestBackendConfig::new("not a url", ANON),
            Err(RestConfigError::InvalidUrl { .. })
        ));
        assert_eq!(
            RestBackendConfig::new("ftp://files.example", ANON).expect_err("scheme"),
            RestConfigError::UnsupportedScheme("ftp".to_owned())
        );
        assert_eq!(
            RestBackendConfig::new("https://project.example.co", "  ").expect_err("key"),
            RestConfigError::MissingAnonKey
        );
    }

    #[test]
    fn public_urls_and_content_ranges() {
        let store = Arc::new(InMemoryDurableStore::default());
        let adapter = RestBackend::new(
            Client::new(),
            RestBackendConfig {
                base_url: Url::parse("https://project.example.co").expect("url"),
                anon_key: ANON.to_owned(),
            },
            auth_cache(store),
        );
        assert_eq!(
            adapter.public_url("avatars", "u1/a.png"),
            "https://project.example.co/storage/v1/object/public/avatars/u1/a.png"
        );
        assert_eq!(parse_content_range_total("0-9/42"), Some(42));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
    }
}
