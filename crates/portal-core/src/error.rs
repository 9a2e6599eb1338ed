use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::SessionPhase;

const EMAIL_CONSTRAINTS: &[&str] = &[
    "profiles_email_key",
    "users_email_key",
    "professors_email_key",
    "teacher_requests_email_key",
    "email_unique",
    "unique_email",
];

const PHONE_CONSTRAINTS: &[&str] = &[
    "profiles_phone_number_key",
    "phone_number_key",
    "unique_phone",
];

/// Field name reported when a uniqueness violation names no known constraint.
pub const UNKNOWN_FIELD: &str = "unknown";

/// Unclassified error as produced by transports and backend adapters.
///
/// Every field is optional because the shape depends on the failing layer:
/// transport failures carry only a code and message, HTTP failures carry the
/// status and whatever the error body exposed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawError {
    /// HTTP-like status code when the failure came from a response.
    pub status: Option<u16>,
    /// Machine-readable code (`invalid_credentials`, `23505`, ...).
    pub code: Option<String>,
    /// Raw human-readable message. Never shown to end users directly.
    pub message: Option<String>,
    /// Violated constraint identifier, when the body exposed one.
    pub constraint: Option<String>,
}

impl RawError {
    /// Connection-level failure before any response was received.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: Some("network_error".to_owned()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Failure caused by an elapsed deadline.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            code: Some("timeout".to_owned()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Error with only a code and a message.
    pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Attach an HTTP-like status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Parse a non-2xx response body.
    ///
    /// Understands the auth service shape (`error_code`/`msg`, or the older
    /// `error`/`error_description`) and the table API shape
    /// (`code`/`message`/`details`). Non-JSON bodies become the message.
    pub fn from_http_body(status: u16, body: &str) -> Self {
        let mut raw = Self {
            status: Some(status),
            ..Self::default()
        };

        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
            let trimmed = body.trim();
            if !trimmed.is_empty() {
                raw.message = Some(trimmed.to_owned());
            }
            return raw;
        };

        let text = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };

        raw.code = text("error_code").or_else(|| text("code")).or_else(|| text("error"));
        raw.message = text("message")
            .or_else(|| text("msg"))
            .or_else(|| text("error_description"))
            .or_else(|| text("error"));
        raw.constraint = text("constraint")
            .or_else(|| raw.message.as_deref().and_then(constraint_from_message))
            .or_else(|| text("details").as_deref().and_then(column_from_details));
        raw
    }
}

/// Stable error taxonomy surfaced to callers of the session layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum ClassifiedError {
    /// Wrong email/password pair.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// No account exists for the identifier.
    #[error("user not found")]
    UserNotFound,
    /// Account exists but its email address is unverified.
    #[error("email not confirmed")]
    EmailNotConfirmed,
    /// Uniqueness violation on the named field.
    #[error("duplicate record: {0}")]
    DuplicateRecord(String),
    /// Backend or network unreachable.
    #[error("network unavailable")]
    NetworkUnavailable,
    /// Request deadline elapsed.
    #[error("request timed out")]
    RequestTimeout,
    /// Session token expired or is no longer accepted.
    #[error("session expired")]
    SessionExpired,
    /// Anything else, with the raw message kept for diagnostics.
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Affordance the UI should offer next to a failure message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Offer a "retry connection" action.
    RetryConnection,
    /// Ask the user to re-check what they typed.
    CheckCredentials,
    /// Send the user back to the sign-in form.
    SignInAgain,
    /// Nothing the user can fix locally.
    ContactSupport,
}

impl ClassifiedError {
    /// Whether the request executor may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable | Self::RequestTimeout)
    }

    /// Whether the error means connectivity rather than the request itself.
    pub fn is_connectivity(&self) -> bool {
        self.is_retryable()
    }

    /// Display-ready message. Raw backend text never appears here.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Incorrect email or password.".to_owned(),
            Self::UserNotFound => "No account was found for this email.".to_owned(),
            Self::EmailNotConfirmed => {
                "Your email is not confirmed yet. Please check your inbox.".to_owned()
            }
            Self::DuplicateRecord(field) => match field.as_str() {
                "email" => "This email is already registered.".to_owned(),
                "phone_number" => "This phone number is already registered.".to_owned(),
                _ => "This record already exists.".to_owned(),
            },
            Self::NetworkUnavailable => {
                "Cannot reach the server. Check your internet connection and try again.".to_owned()
            }
            Self::RequestTimeout => "The server took too long to respond. Please try again.".to_owned(),
            Self::SessionExpired => "Your session has expired. Please sign in again.".to_owned(),
            Self::Unknown(_) => "Something went wrong. Please try again later.".to_owned(),
        }
    }

    /// Affordance matching this error.
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::NetworkUnavailable | Self::RequestTimeout => RecoveryAction::RetryConnection,
            Self::InvalidCredentials
            | Self::UserNotFound
            | Self::EmailNotConfirmed
            | Self::DuplicateRecord(_) => RecoveryAction::CheckCredentials,
            Self::SessionExpired => RecoveryAction::SignInAgain,
            Self::Unknown(_) => RecoveryAction::ContactSupport,
        }
    }
}

/// Map a raw error onto the taxonomy. Rules are checked in order.
pub fn classify(raw: &RawError) -> ClassifiedError {
    let code = raw.code.as_deref().unwrap_or_default().to_ascii_lowercase();
    let message = raw.message.as_deref().unwrap_or_default().to_lowercase();
    let status = raw.status;

    if is_uniqueness_violation(status, &code, &message) {
        return ClassifiedError::DuplicateRecord(duplicate_field(raw, &code, &message).to_owned());
    }

    // Legacy auth bodies pair `invalid_grant` with a more specific description.
    if code == "user_not_found" || message.contains("user not found") {
        return ClassifiedError::UserNotFound;
    }

    if code == "email_not_confirmed" || message.contains("email not confirmed") {
        return ClassifiedError::EmailNotConfirmed;
    }

    if matches!(code.as_str(), "invalid_credentials" | "invalid_grant")
        || message.contains("invalid login credentials")
        || message.contains("invalid grant")
    {
        return ClassifiedError::InvalidCredentials;
    }

    if matches!(code.as_str(), "timeout" | "request_timeout")
        || matches!(status, Some(408 | 504))
        || message.contains("timeout")
        || message.contains("timed out")
    {
        return ClassifiedError::RequestTimeout;
    }

    if matches!(
        code.as_str(),
        "fetch_error" | "network_error" | "connection_error"
    ) || matches!(status, Some(500..=599))
        || ["fetch", "network", "connection", "dns", "failed to send request"]
            .iter()
            .any(|needle| message.contains(needle))
    {
        return ClassifiedError::NetworkUnavailable;
    }

    if matches!(
        code.as_str(),
        "session_expired" | "session_not_found" | "refresh_token_not_found" | "bad_jwt"
    ) || status == Some(401)
        || message.contains("jwt expired")
        || message.contains("token has expired")
        || message.contains("invalid jwt")
    {
        return ClassifiedError::SessionExpired;
    }

    let raw_message = raw
        .message
        .clone()
        .or_else(|| raw.code.clone())
        .unwrap_or_else(|| "unknown error".to_owned());
    ClassifiedError::Unknown(raw_message)
}

fn is_uniqueness_violation(status: Option<u16>, code: &str, message: &str) -> bool {
    status == Some(409)
        || matches!(
            code,
            "23505" | "user_already_exists" | "email_exists" | "phone_exists"
        )
        || message.contains("duplicate key")
        || message.contains("unique constraint")
        || message.contains("already registered")
}

fn duplicate_field(raw: &RawError, code: &str, message: &str) -> &'static str {
    match code {
        "user_already_exists" | "email_exists" => return "email",
        "phone_exists" => return "phone_number",
        _ => {}
    }

    let identifier = raw
        .constraint
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| message.to_owned());

    if EMAIL_CONSTRAINTS.iter().any(|name| identifier.contains(name))
        || identifier.contains("email")
    {
        "email"
    } else if PHONE_CONSTRAINTS.iter().any(|name| identifier.contains(name))
        || identifier.contains("phone")
    {
        "phone_number"
    } else {
        UNKNOWN_FIELD
    }
}

/// Extract `name` from `... violates unique constraint "name"`.
fn constraint_from_message(message: &str) -> Option<String> {
    let lowered = message.to_ascii_lowercase();
    let start = lowered.find("constraint")?;
    let rest = &message[start..];
    let open = rest.find('"')?;
    let tail = &rest[open + 1..];
    let close = tail.find('"')?;
    Some(tail[..close].to_owned()).filter(|name| !name.is_empty())
}

/// Extract `column` from `Key (column)=(value) already exists.`
fn column_from_details(details: &str) -> Option<String> {
    let start = details.find("Key (")? + "Key (".len();
    let end = details[start..].find(')')?;
    Some(details[start..start + end].to_owned()).filter(|name| !name.is_empty())
}

/// Final failure of a resilient request, annotated for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RequestFailure {
    /// Classification of the last failed attempt.
    pub error: ClassifiedError,
    /// Attempts actually started; zero when the offline pre-check failed.
    pub attempts: u32,
    /// Start of the first attempt, if one was made.
    pub first_attempt_at: Option<SystemTime>,
    /// Moment the executor gave up.
    pub failed_at: SystemTime,
}

impl RequestFailure {
    /// Failure raised before any attempt because connectivity is down.
    pub fn offline() -> Self {
        Self {
            error: ClassifiedError::NetworkUnavailable,
            attempts: 0,
            first_attempt_at: None,
            failed_at: SystemTime::now(),
        }
    }
}

impl From<RequestFailure> for ClassifiedError {
    fn from(failure: RequestFailure) -> Self {
        failure.error
    }
}

/// Rejected session lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot run '{action}' while session is {current:?}")]
pub struct TransitionError {
    /// Phase the machine was in.
    pub current: SessionPhase,
    /// Attempted action.
    pub action: String,
}

impl TransitionError {
    pub fn new(current: SessionPhase, action: impl Into<String>) -> Self {
        Self {
            current,
            action: action.into(),
        }
    }
}
