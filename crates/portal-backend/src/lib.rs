//! Runtime of the portal session layer.
//!
//! [`ConnectivityMonitor`] keeps a debounced reachability status,
//! [`ResilientRequestExecutor`] wraps backend calls with timeouts and
//! backoff, and [`SessionManager`] drives sign-in and profile bootstrap on
//! top of both. [`RestBackend`] is the HTTP implementation of
//! [`BackendService`].

pub mod connectivity;
pub mod executor;
pub mod profiles;
pub mod rest;
pub mod service;
pub mod session;
pub mod storage;

#[cfg(test)]
mod testing;

pub use connectivity::{BackendProbe, ConnectivityMonitor, HttpProbe, ReachabilityProbe};
pub use executor::ResilientRequestExecutor;
pub use profiles::{CreateOutcome, PROFILES_TABLE, ProfileLookup, ProfileStore};
pub use rest::{RestBackend, RestBackendConfig, RestConfigError};
pub use service::{BackendService, SignUpOutcome, TableQuery};
pub use session::SessionManager;
pub use storage::{ResilientStorage, unique_object_path};
