//! Core contract of the portal session layer.
//!
//! This crate defines the error taxonomy and classifier, the retry policy,
//! the session lifecycle state machine and the data model shared by the
//! runtime crate and application frontends.

/// Auth-state change fan-out channel.
pub mod channel;
/// Resilience tuning values and defaults.
pub mod config;
/// Error taxonomy, raw error parsing and classification.
pub mod error;
/// Exponential backoff policy used by the request executor.
pub mod retry;
/// Session lifecycle state machine.
pub mod state_machine;
/// Session, profile and connectivity data model.
pub mod types;

pub use channel::{AuthStateChannel, AuthStateStream};
pub use config::ResilienceConfig;
pub use error::{
    ClassifiedError, RawError, RecoveryAction, RequestFailure, TransitionError, classify,
};
pub use retry::{PolicyError, RetryPolicy};
pub use state_machine::{SessionStateMachine, SessionTrigger};
pub use types::{
    AuthStateChange, ConnectionStatus, Profile, ProfileUpdate, Reachability, Role, Session,
    SessionPhase, SessionSnapshot, User, UserMetadata,
};
