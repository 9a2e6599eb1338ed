use async_trait::async_trait;
use portal_core::{AuthStateStream, RawError, Session, User, UserMetadata};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Equality/ordering filter for table reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    filters: Vec<(String, String)>,
    order: Option<(String, bool)>,
    limit: Option<usize>,
}

impl TableQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `column == value`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    pub fn order(&self) -> Option<(&str, bool)> {
        self.order
            .as_ref()
            .map(|(column, ascending)| (column.as_str(), *ascending))
    }

    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Query-string pairs in the table API's filter syntax.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|(column, value)| (column.clone(), format!("eq.{value}")))
            .collect();
        if let Some((column, ascending)) = &self.order {
            let direction = if *ascending { "asc" } else { "desc" };
            pairs.push(("order".to_owned(), format!("{column}.{direction}")));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_owned(), limit.to_string()));
        }
        pairs
    }
}

/// Result of a sign-up call.
///
/// `session` is present only when the backend signs the account in
/// immediately (no email confirmation required).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignUpOutcome {
    pub user: Option<User>,
    pub session: Option<Session>,
}

/// Contract of the remote auth + data + storage service.
///
/// Every call takes the attempt's cancellation token; implementations must
/// abandon in-flight work once it fires.
#[async_trait]
pub trait BackendService: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
        cancel: CancellationToken,
    ) -> Result<Session, RawError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
        cancel: CancellationToken,
    ) -> Result<SignUpOutcome, RawError>;

    async fn get_session(&self, cancel: CancellationToken) -> Result<Option<Session>, RawError>;

    /// Subscribe to session changes. Dropping the stream unsubscribes.
    fn on_auth_state_change(&self) -> AuthStateStream;

    async fn sign_out(&self, cancel: CancellationToken) -> Result<(), RawError>;

    async fn select(
        &self,
        table: &str,
        query: &TableQuery,
        cancel: CancellationToken,
    ) -> Result<Vec<Value>, RawError>;

    /// Number of rows matching `query`, without transferring them.
    async fn count(
        &self,
        table: &str,
        query: &TableQuery,
        cancel: CancellationToken,
    ) -> Result<u64, RawError>;

    async fn insert(
        &self,
        table: &str,
        rows: Value,
        cancel: CancellationToken,
    ) -> Result<(), RawError>;

    async fn update(
        &self,
        table: &str,
        query: &TableQuery,
        patch: Value,
        cancel: CancellationToken,
    ) -> Result<(), RawError>;

    async fn upload(
        &self,
        bucket: &str,
        object_path: &str,
        bytes: &[u8],
        content_type: &str,
        cancel: CancellationToken,
    ) -> Result<(), RawError>;

    fn public_url(&self, bucket: &str, object_path: &str) -> String;

    /// Lightweight reachability check against the service itself.
    async fn health_check(&self, cancel: CancellationToken) -> Result<(), RawError>;
}
