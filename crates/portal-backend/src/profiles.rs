use std::sync::Arc;

use portal_core::{ClassifiedError, Profile, ProfileUpdate, RequestFailure};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::{
    executor::ResilientRequestExecutor,
    service::{BackendService, TableQuery},
};

pub const PROFILES_TABLE: &str = "profiles";

/// Outcome of looking up a user's profile row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileLookup {
    Found(Profile),
    /// The query succeeded and returned no row.
    NotFound,
    /// The row could not be read; callers fall back to a default profile.
    TransientFailure(ClassifiedError),
}

/// Outcome of the guarded create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A row already existed, or a concurrent insert won the race.
    AlreadyExists,
    Failed(ClassifiedError),
}

/// Profile table access through the resilient executor.
#[derive(Clone)]
pub struct ProfileStore {
    backend: Arc<dyn BackendService>,
    executor: ResilientRequestExecutor,
}

impl ProfileStore {
    pub fn new(backend: Arc<dyn BackendService>, executor: ResilientRequestExecutor) -> Self {
        Self { backend, executor }
    }

    pub async fn fetch(&self, user_id: &str) -> ProfileLookup {
        let query = by_id(user_id).limit(1);
        let backend = &self.backend;
        let rows = match self
            .executor
            .execute("profiles.fetch", |cancel| backend.select(PROFILES_TABLE, &query, cancel))
            .await
        {
            Ok(rows) => rows,
            Err(failure) => return ProfileLookup::TransientFailure(failure.error),
        };

        let Some(row) = rows.into_iter().next() else {
            return ProfileLookup::NotFound;
        };
        match serde_json::from_value::<Profile>(row) {
            Ok(profile) => ProfileLookup::Found(profile),
            Err(err) => {
                warn!(user_id, error = %err, "profile row is malformed");
                ProfileLookup::TransientFailure(ClassifiedError::Unknown(format!(
                    "malformed profile row: {err}"
                )))
            }
        }
    }

    pub async fn count(&self, user_id: &str) -> Result<u64, RequestFailure> {
        let query = by_id(user_id);
        let backend = &self.backend;
        self.executor
            .execute("profiles.count", |cancel| backend.count(PROFILES_TABLE, &query, cancel))
            .await
    }

    pub async fn insert(&self, profile: &Profile) -> Result<(), RequestFailure> {
        let row = profile_row(profile);
        let backend = &self.backend;
        self.executor
            .execute("profiles.insert", |cancel| {
                backend.insert(PROFILES_TABLE, row.clone(), cancel)
            })
            .await
    }

    pub async fn update(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), RequestFailure> {
        let query = by_id(user_id);
        let patch = update_patch(update);
        let backend = &self.backend;
        self.executor
            .execute("profiles.update", |cancel| {
                backend.update(PROFILES_TABLE, &query, patch.clone(), cancel)
            })
            .await
    }

    /// Insert `profile` unless a row with its id already exists.
    ///
    /// Check-then-insert: two first sign-ins for the same user can both
    /// see zero rows. The losing insert surfaces as a duplicate and is
    /// reported as [`CreateOutcome::AlreadyExists`].
    pub async fn create_if_missing(&self, profile: &Profile) -> CreateOutcome {
        match self.count(&profile.id).await {
            Ok(0) => {}
            Ok(existing) => {
                debug!(user_id = %profile.id, existing, "profile row already present");
                return CreateOutcome::AlreadyExists;
            }
            Err(failure) => return CreateOutcome::Failed(failure.error),
        }

        match self.insert(profile).await {
            Ok(()) => CreateOutcome::Created,
            Err(failure) => match failure.error {
                ClassifiedError::DuplicateRecord(field) => {
                    debug!(user_id = %profile.id, field, "profile row created concurrently");
                    CreateOutcome::AlreadyExists
                }
                error => CreateOutcome::Failed(error),
            },
        }
    }
}

fn by_id(user_id: &str) -> TableQuery {
    TableQuery::new().eq("id", user_id)
}

fn profile_row(profile: &Profile) -> Value {
    json!({
        "id": profile.id,
        "role": profile.role.as_str(),
        "full_name": profile.full_name,
        "phone_number": profile.phone_number,
    })
}

fn update_patch(update: &ProfileUpdate) -> Value {
    let mut patch = Map::new();
    if let Some(full_name) = &update.full_name {
        patch.insert("full_name".to_owned(), Value::String(full_name.clone()));
    }
    if let Some(role) = update.role {
        patch.insert("role".to_owned(), Value::String(role.as_str().to_owned()));
    }
    if let Some(phone_number) = &update.phone_number {
        patch.insert("phone_number".to_owned(), Value::String(phone_number.clone()));
    }
    Value::Object(patch)
}
