use crate::{error::TransitionError, types::SessionPhase};

/// Inputs that move the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTrigger {
    /// A direct sign-in call started.
    SignInRequested,
    /// A session became available (sign-in result, stream, or restore).
    SessionEstablished,
    /// The direct sign-in call failed.
    SignInFailed,
    /// Profile bootstrap finished, with a fetched or synthesized profile.
    ProfileResolved,
    /// Local state was cleared by sign-out or an external session end.
    SignedOut,
}

impl SessionTrigger {
    fn action(self) -> &'static str {
        match self {
            Self::SignInRequested => "sign_in",
            Self::SessionEstablished => "establish_session",
            Self::SignInFailed => "sign_in_failed",
            Self::ProfileResolved => "resolve_profile",
            Self::SignedOut => "sign_out",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    phase: SessionPhase,
}

impl SessionStateMachine {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn apply(&mut self, trigger: SessionTrigger) -> Result<SessionPhase, TransitionError> {
        use SessionPhase::*;

        match trigger {
            SessionTrigger::SignInRequested => {
                self.transition_from_any_of(&[Unauthenticated, Ready, Error], Authenticating, trigger)
            }
            SessionTrigger::SessionEstablished => {
                self.phase = ProfileLoading;
                Ok(ProfileLoading)
            }
            SessionTrigger::SignInFailed => {
                self.transition_from_any_of(&[Authenticating], Unauthenticated, trigger)
            }
            SessionTrigger::ProfileResolved => {
                self.transition_from_any_of(&[ProfileLoading], Ready, trigger)
            }
            SessionTrigger::SignedOut => {
                self.phase = Unauthenticated;
                Ok(Unauthenticated)
            }
        }
    }

    /// Enter the terminal error phase from anywhere.
    pub fn on_fatal(&mut self) -> SessionPhase {
        self.phase = SessionPhase::Error;
        self.phase
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[SessionPhase],
        next: SessionPhase,
        trigger: SessionTrigger,
    ) -> Result<SessionPhase, TransitionError> {
        if !expected.contains(&self.phase) {
            return Err(TransitionError::new(self.phase, trigger.action()));
        }
        self.phase = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_happy_path_state_transitions() {
        let mut sm = SessionStateMachine::default();
        assert_eq!(sm.phase(), SessionPhase::Unauthenticated);

        sm.apply(SessionTrigger::SignInRequested)
            .expect("sign in must start");
        assert_eq!(sm.phase(), SessionPhase::Authenticating);

        sm.apply(SessionTrigger::SessionEstablished)
            .expect("session must establish");
        assert_eq!(sm.phase(), SessionPhase::ProfileLoading);

        sm.apply(SessionTrigger::ProfileResolved)
            .expect("profile must resolve");
        assert_eq!(sm.phase(), SessionPhase::Ready);

        sm.apply(SessionTrigger::SignedOut).expect("sign out works");
        assert_eq!(sm.phase(), SessionPhase::Unauthenticated);
    }

    #[test]
    fn failed_sign_in_returns_to_unauthenticated() {
        let mut sm = SessionStateMachine::default();
        sm.apply(SessionTrigger::SignInRequested)
            .expect("sign in must start");
        sm.apply(SessionTrigger::SignInFailed)
            .expect("failure must be accepted");
        assert_eq!(sm.phase(), SessionPhase::Unauthenticated);
    }

    #[test]
    fn rejects_profile_resolution_without_session() {
        let mut sm = SessionStateMachine::default();
        let err = sm
            .apply(SessionTrigger::ProfileResolved)
            .expect_err("profile cannot resolve without a session");
        assert_eq!(err.current, SessionPhase::Unauthenticated);
        assert_eq!(err.action, "resolve_profile");
    }

    #[test]
    fn rejects_concurrent_sign_in() {
        let mut sm = SessionStateMachine::default();
        sm.apply(SessionTrigger::SignInRequested)
            .expect("sign in must start");
        assert!(sm.apply(SessionTrigger::SignInRequested).is_err());
    }

    #[test]
    fn stream_session_can_arrive_in_any_phase() {
        let mut sm = SessionStateMachine::default();
        sm.on_fatal();
        sm.apply(SessionTrigger::SessionEstablished)
            .expect("stream session must be accepted after error");
        assert_eq!(sm.phase(), SessionPhase::ProfileLoading);
    }

    #[test]
    fn error_is_reachable_from_any_phase_and_left_by_sign_out() {
        let mut sm = SessionStateMachine::default();
        sm.apply(SessionTrigger::SignInRequested)
            .expect("sign in must start");
        assert_eq!(sm.on_fatal(), SessionPhase::Error);
        sm.apply(SessionTrigger::SignedOut).expect("sign out works");
        assert_eq!(sm.phase(), SessionPhase::Unauthenticated);
    }
}
