//! Authentication and profile lifecycle.
//!
//! [`SessionManager`] applies direct call results and auth-stream
//! notifications through one transition routine. Shared state lives behind
//! a short lock that is never held across an await; every await is followed
//! by a generation check before results are published.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use portal_core::{
    AuthStateChange, ClassifiedError, Profile, ProfileUpdate, Session, SessionPhase,
    SessionSnapshot, SessionStateMachine, SessionTrigger, User, UserMetadata,
};
use portal_platform::AuthCache;
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    connectivity::ConnectivityMonitor,
    executor::ResilientRequestExecutor,
    profiles::{CreateOutcome, ProfileLookup, ProfileStore},
    service::BackendService,
};

/// Cache key of the display-name backup.
pub const FULL_NAME_KEY: &str = "full_name";

#[derive(Debug, Default)]
struct SessionState {
    machine: SessionStateMachine,
    session: Option<Session>,
    profile: Option<Profile>,
    /// Bumped whenever the session is replaced or cleared.
    generation: u64,
}

impl SessionState {
    fn clear(&mut self) {
        self.session = None;
        self.profile = None;
        self.generation += 1;
    }

    fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(Session::user_id)
    }
}

struct BackgroundTasks {
    stop: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct SessionInner {
    backend: Arc<dyn BackendService>,
    executor: ResilientRequestExecutor,
    connectivity: ConnectivityMonitor,
    profiles: ProfileStore,
    cache: AuthCache,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            tasks.stop.cancel();
            for handle in tasks.handles {
                handle.abort();
            }
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn BackendService>,
        executor: ResilientRequestExecutor,
        cache: AuthCache,
    ) -> Self {
        let connectivity = executor.connectivity().clone();
        let profiles = ProfileStore::new(backend.clone(), executor.clone());
        let (snapshot_tx, _) = watch::channel(SessionSnapshot {
            is_online: connectivity.snapshot().online,
            ..SessionSnapshot::default()
        });

        Self {
            inner: Arc::new(SessionInner {
                backend,
                executor,
                connectivity,
                profiles,
                cache,
                state: Mutex::new(SessionState::default()),
                snapshot_tx,
                tasks: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to auth-state notifications and connectivity changes, then
    /// restore an existing session.
    ///
    /// Listener tasks are started once; later calls only repeat the restore.
    pub async fn start(&self) {
        self.spawn_listeners();

        let backend = &self.inner.backend;
        let restored = self
            .inner
            .executor
            .execute("auth.get_session", |cancel| backend.get_session(cancel))
            .await;

        match restored {
            Ok(Some(session)) => {
                info!(user_id = %session.user_id(), "restoring existing session");
                self.establish_session(session).await;
            }
            Ok(None) => debug!("no existing session to restore"),
            Err(failure) if failure.error == ClassifiedError::SessionExpired => {
                self.invalidate("stored session rejected");
            }
            Err(failure) => {
                warn!(error = %failure, "session restore failed");
            }
        }
    }

    /// Stop the listener tasks. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let tasks = lock(&self.inner.tasks).take();
        if let Some(tasks) = tasks {
            tasks.stop.cancel();
            for handle in tasks.handles {
                handle.abort();
            }
            debug!("session listeners stopped");
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, ClassifiedError> {
        if !self.inner.connectivity.status() {
            warn!("sign-in rejected: offline");
            return Err(ClassifiedError::NetworkUnavailable);
        }

        {
            let mut state = lock(&self.inner.state);
            state
                .machine
                .apply(SessionTrigger::SignInRequested)
                .map_err(|err| ClassifiedError::Unknown(err.to_string()))?;
            self.publish(&state);
        }

        let backend = &self.inner.backend;
        let session = match self
            .inner
            .executor
            .execute("auth.sign_in", |cancel| {
                backend.sign_in_with_password(email, password, cancel)
            })
            .await
        {
            Ok(session) => session,
            Err(failure) => {
                let replaced_session = {
                    let mut state = lock(&self.inner.state);
                    if state.machine.phase() != SessionPhase::Authenticating {
                        return Err(failure.error);
                    }
                    // The previous session does not survive a failed re-sign-in.
                    let had_session = state.session.is_some();
                    if had_session {
                        state.clear();
                    }
                    let _ = state.machine.apply(SessionTrigger::SignInFailed);
                    self.publish(&state);
                    had_session
                };
                if replaced_session {
                    self.clear_cache();
                }
                return Err(failure.error);
            }
        };

        let user = session.user.clone();
        if let Some(name) = user.metadata.display_name() {
            self.cache_full_name(name);
        }
        info!(user_id = %user.id, "signed in");

        self.establish_session(session).await;
        let settled = self.wait_until_settled().await;
        if settled.phase == SessionPhase::Ready
            && settled.user.as_ref().is_some_and(|current| current.id == user.id)
        {
            Ok(user)
        } else {
            debug!(phase = ?settled.phase, "session ended before sign-in settled");
            Err(ClassifiedError::SessionExpired)
        }
    }

    /// Register an account. The session phase is left to the auth stream.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: UserMetadata,
    ) -> Result<Option<User>, ClassifiedError> {
        if !self.inner.connectivity.status() {
            warn!("sign-up rejected: offline");
            return Err(ClassifiedError::NetworkUnavailable);
        }

        let backend = &self.inner.backend;
        let outcome = self
            .inner
            .executor
            .execute("auth.sign_up", |cancel| {
                backend.sign_up(email, password, &metadata, cancel)
            })
            .await?;

        if let Some(name) = metadata.display_name() {
            self.cache_full_name(name);
        }
        info!(
            user_id = outcome.user.as_ref().map(|user| user.id.as_str()).unwrap_or("pending"),
            signed_in = outcome.session.is_some(),
            "account registered"
        );
        Ok(outcome.user)
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile, ClassifiedError> {
        let (user, generation, current) = {
            let state = lock(&self.inner.state);
            let Some(session) = &state.session else {
                return Err(ClassifiedError::SessionExpired);
            };
            (session.user.clone(), state.generation, state.profile.clone())
        };

        if update.is_empty() {
            return Ok(current.unwrap_or_else(|| self.default_profile(&user)));
        }

        if let Err(failure) = self.inner.profiles.update(&user.id, &update).await {
            if failure.error == ClassifiedError::SessionExpired {
                self.invalidate("profile update rejected session");
            }
            return Err(failure.error);
        }

        let profile = {
            let mut state = lock(&self.inner.state);
            if state.generation != generation {
                debug!(user_id = %user.id, "session changed during profile update");
                return Err(ClassifiedError::SessionExpired);
            }
            let mut profile = state
                .profile
                .take()
                .unwrap_or_else(|| self.default_profile(&user));
            profile.apply(&update);
            state.profile = Some(profile.clone());
            self.publish(&state);
            profile
        };

        if update.full_name.is_some() {
            self.cache_full_name(&profile.full_name);
        }
        info!(user_id = %user.id, "profile updated");
        Ok(profile)
    }

    /// Clear local state first, then end the remote session. Remote
    /// failures are logged and absorbed.
    pub async fn sign_out(&self) {
        self.clear_local("signed out");

        let backend = &self.inner.backend;
        match self
            .inner
            .executor
            .execute("auth.sign_out", |cancel| backend.sign_out(cancel))
            .await
        {
            Ok(()) => debug!("remote session ended"),
            Err(failure) => warn!(error = %failure, "remote sign-out failed"),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    async fn handle_auth_change(&self, change: AuthStateChange) {
        match change {
            AuthStateChange::InitialSession(Some(session)) | AuthStateChange::SignedIn(session) => {
                self.establish_session(session).await;
            }
            AuthStateChange::InitialSession(None) => debug!("auth stream reports no session"),
            AuthStateChange::TokenRefreshed(session) | AuthStateChange::UserUpdated(session) => {
                let replaced = {
                    let mut state = lock(&self.inner.state);
                    if state.user_id() == Some(session.user_id()) {
                        state.session = Some(session.clone());
                        self.publish(&state);
                        true
                    } else {
                        false
                    }
                };
                if replaced {
                    debug!(user_id = %session.user_id(), "session material replaced");
                } else {
                    self.establish_session(session).await;
                }
            }
            AuthStateChange::SignedOut => {
                let active = {
                    let state = lock(&self.inner.state);
                    state.session.is_some() || state.machine.phase() != SessionPhase::Unauthenticated
                };
                if active {
                    self.clear_local("session ended remotely");
                }
            }
        }
    }

    /// Adopt `session` and bootstrap its profile. A session for the user
    /// already loading or ready only replaces the stored material.
    async fn establish_session(&self, session: Session) {
        let user = session.user.clone();
        let generation = {
            let mut state = lock(&self.inner.state);
            let phase = state.machine.phase();
            if state.user_id() == Some(user.id.as_str())
                && matches!(phase, SessionPhase::ProfileLoading | SessionPhase::Ready)
            {
                state.session = Some(session);
                self.publish(&state);
                return;
            }

            state.session = Some(session);
            state.profile = None;
            state.generation += 1;
            let _ = state.machine.apply(SessionTrigger::SessionEstablished);
            self.publish(&state);
            state.generation
        };

        self.bootstrap_profile(user, generation).await;
    }

    async fn bootstrap_profile(&self, user: User, generation: u64) {
        let profile = match self.inner.profiles.fetch(&user.id).await {
            ProfileLookup::Found(profile) => {
                self.cache_full_name(&profile.full_name);
                profile
            }
            ProfileLookup::TransientFailure(error) => {
                warn!(user_id = %user.id, %error, "profile fetch failed; using default profile");
                self.default_profile(&user)
            }
            ProfileLookup::NotFound => {
                let profile = self.default_profile(&user);
                match self.inner.profiles.create_if_missing(&profile).await {
                    CreateOutcome::Created => info!(user_id = %user.id, "profile row created"),
                    CreateOutcome::AlreadyExists => {}
                    CreateOutcome::Failed(error) => {
                        warn!(user_id = %user.id, %error, "profile create failed; using default profile");
                    }
                }
                profile
            }
        };

        let mut state = lock(&self.inner.state);
        if state.generation != generation || state.user_id() != Some(user.id.as_str()) {
            debug!(user_id = %user.id, "discarding stale profile bootstrap");
            return;
        }
        state.profile = Some(profile);
        if let Err(err) = state.machine.apply(SessionTrigger::ProfileResolved) {
            warn!(error = %err, "profile resolved outside of profile loading");
        }
        self.publish(&state);
    }

    fn default_profile(&self, user: &User) -> Profile {
        let cached = self.cached_full_name();
        Profile::default_for(user, cached.as_deref())
    }

    fn clear_local(&self, reason: &str) {
        {
            let mut state = lock(&self.inner.state);
            state.clear();
            let _ = state.machine.apply(SessionTrigger::SignedOut);
            self.publish(&state);
        }
        self.clear_cache();
        info!(reason, "local session cleared");
    }

    /// Unrecoverable auth failure: clear everything and enter the error phase.
    fn invalidate(&self, reason: &str) {
        {
            let mut state = lock(&self.inner.state);
            state.clear();
            state.machine.on_fatal();
            self.publish(&state);
        }
        self.clear_cache();
        warn!(reason, "session invalidated");
    }

    fn clear_cache(&self) {
        if let Err(err) = self.inner.cache.clear() {
            warn!(error = %err, "failed clearing auth cache");
        }
    }

    fn cached_full_name(&self) -> Option<String> {
        match self.inner.cache.get(FULL_NAME_KEY) {
            Ok(name) => name,
            Err(err) => {
                warn!(error = %err, "failed reading cached display name");
                None
            }
        }
    }

    fn cache_full_name(&self, name: &str) {
        if let Err(err) = self.inner.cache.set(FULL_NAME_KEY, name) {
            warn!(error = %err, "failed caching display name");
        }
    }

    async fn wait_until_settled(&self) -> SessionSnapshot {
        let mut snapshot_rx = self.subscribe();
        match snapshot_rx
            .wait_for(|snapshot| snapshot.phase != SessionPhase::ProfileLoading)
            .await
        {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Publish a snapshot built from `state`. Callers hold the state lock so
    /// published values are never interleaved.
    fn publish(&self, state: &SessionState) {
        let next = SessionSnapshot {
            user: state.session.as_ref().map(|session| session.user.clone()),
            profile: state.profile.clone(),
            loading: state.machine.phase().is_loading(),
            is_online: self.inner.connectivity.snapshot().online,
            phase: state.machine.phase(),
        };
        self.inner.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn spawn_listeners(&self) {
        let mut tasks = lock(&self.inner.tasks);
        if tasks.is_some() {
            return;
        }

        let stop = CancellationToken::new();
        let mut auth_rx = self.inner.backend.on_auth_state_change();
        let mut status_rx = self.inner.connectivity.subscribe();

        let weak = Arc::downgrade(&self.inner);
        let auth_stop = stop.child_token();
        let auth_task = tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = auth_stop.cancelled() => break,
                    change = auth_rx.recv() => change,
                };
                match change {
                    Ok(change) => {
                        let Some(manager) = upgrade(&weak) else {
                            break;
                        };
                        manager.handle_auth_change(change).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth state stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let status_stop = stop.child_token();
        let status_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = status_stop.cancelled() => break,
                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let Some(manager) = upgrade(&weak) else {
                            break;
                        };
                        let state = lock(&manager.inner.state);
                        manager.publish(&state);
                    }
                }
            }
        });

        *tasks = Some(BackgroundTasks {
            stop,
            handles: vec![auth_task, status_task],
        });
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("snapshot", &*self.inner.snapshot_tx.borrow())
            .finish()
    }
}

fn upgrade(weak: &Weak<SessionInner>) -> Option<SessionManager> {
    weak.upgrade().map(|inner| SessionManager { inner })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
