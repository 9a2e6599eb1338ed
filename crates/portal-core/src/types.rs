use std::{fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Placeholder display name when neither the backend nor the cache knows one.
pub const PLACEHOLDER_FULL_NAME: &str = "User";

/// Session lifecycle phase reported to the application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session is present.
    #[default]
    Unauthenticated,
    /// A sign-in request is in flight.
    Authenticating,
    /// A session exists and the profile row is being resolved.
    ProfileLoading,
    /// Session and profile are both available.
    Ready,
    /// Unrecoverable auth failure; local state was cleared.
    Error,
}

impl SessionPhase {
    /// Whether the UI should render a loading indicator.
    pub fn is_loading(self) -> bool {
        matches!(self, Self::Authenticating | Self::ProfileLoading)
    }
}

/// Application role stored on the profile row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Data attached to the account at sign-up time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Kept as text: older accounts may carry values outside [`Role`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faculty_id: Option<String>,
}

impl UserMetadata {
    /// Role from metadata when it names a known role.
    pub fn parsed_role(&self) -> Option<Role> {
        self.role.as_deref().and_then(|value| value.parse().ok())
    }

    /// Non-blank display name from metadata.
    pub fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Authenticated identity as issued by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "user_metadata")]
    pub metadata: UserMetadata,
}

/// Opaque session material plus the user it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default)]
    pub expires_at: Option<u64>,
    pub user: User,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Whether the access token is past its expiry at `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        now.duration_since(SystemTime::UNIX_EPOCH)
            .map(|since_epoch| since_epoch.as_secs() >= expires_at)
            .unwrap_or(false)
    }
}

/// Application-level user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub role: Role,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl Profile {
    /// Profile synthesized when the backend has no usable row.
    ///
    /// Name precedence: sign-up metadata, then `cached_name`, then
    /// [`PLACEHOLDER_FULL_NAME`].
    pub fn default_for(user: &User, cached_name: Option<&str>) -> Self {
        let full_name = user
            .metadata
            .display_name()
            .or_else(|| cached_name.map(str::trim).filter(|value| !value.is_empty()))
            .unwrap_or(PLACEHOLDER_FULL_NAME)
            .to_owned();

        Self {
            id: user.id.clone(),
            role: user.metadata.parsed_role().unwrap_or_default(),
            full_name,
            phone_number: user.metadata.phone_number.clone(),
        }
    }

    /// Merge a partial update into this profile.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(full_name) = &update.full_name {
            self.full_name = full_name.clone();
        }
        if let Some(role) = update.role {
            self.role = role;
        }
        if let Some(phone_number) = &update.phone_number {
            self.phone_number = Some(phone_number.clone());
        }
    }
}

/// Partial profile update; `None` fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.role.is_none() && self.phone_number.is_none()
    }
}

/// Push notification from the auth service's session stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuthStateChange {
    /// Session known at subscription time, if any.
    InitialSession(Option<Session>),
    /// A new session was established.
    SignedIn(Session),
    /// Session material was refreshed for the same user.
    TokenRefreshed(Session),
    /// User attributes changed for the same user.
    UserUpdated(Session),
    /// The session ended (sign-out or expiry).
    SignedOut,
}

/// Which endpoint answered the last connectivity probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Reachability {
    /// No probe has completed yet.
    #[default]
    Unknown,
    /// The backend answered.
    Backend,
    /// Only a general-purpose endpoint answered; the backend may be down.
    InternetOnly,
    /// Nothing answered.
    Offline,
}

impl Reachability {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Backend | Self::InternetOnly)
    }
}

/// Cached connectivity state owned by the connectivity monitor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub online: bool,
    pub reachability: Reachability,
    pub last_checked_at: Option<SystemTime>,
}

impl Default for ConnectionStatus {
    /// Optimistically online until the first probe says otherwise.
    fn default() -> Self {
        Self {
            online: true,
            reachability: Reachability::Unknown,
            last_checked_at: None,
        }
    }
}

/// Consistent view of the session layer for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub profile: Option<Profile>,
    pub loading: bool,
    pub is_online: bool,
    pub phase: SessionPhase,
}
