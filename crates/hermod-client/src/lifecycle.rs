use hermod_core::ClientError;

/// Session state driven by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No credential has been obtained yet.
    Unauthenticated,
    /// A login flow is currently running.
    Authenticating,
    /// The poll loop is live (or ready to start).
    Polling,
    /// A protocol error halted the session.
    Faulted,
    /// The session was stopped deliberately.
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticating => "authenticating",
            SessionState::Polling => "polling",
            SessionState::Faulted => "faulted",
            SessionState::Stopped => "stopped",
        }
    }
}

/// Transition table for [`SessionState`].
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    state: SessionState,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self {
            state: SessionState::Unauthenticated,
        }
    }
}

impl SessionLifecycle {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Enter the login flow.
    pub fn begin_login(&mut self) -> Result<(), ClientError> {
        self.transition_from(SessionState::Unauthenticated, SessionState::Authenticating, "login")
    }

    /// Resolve the login flow; success arms the poll loop.
    pub fn on_login_result(&mut self, success: bool) -> Result<(), ClientError> {
        let next = if success {
            SessionState::Polling
        } else {
            SessionState::Unauthenticated
        };
        self.transition_from(SessionState::Authenticating, next, "resolve login")
    }

    /// Require the poll loop to be startable.
    pub fn require_polling(&self, action: &'static str) -> Result<(), ClientError> {
        if self.state != SessionState::Polling {
            return Err(ClientError::InvalidTransition {
                state: self.state.as_str(),
                action,
            });
        }
        Ok(())
    }

    /// Halt the session on a fatal protocol condition.
    pub fn fault(&mut self) {
        self.state = SessionState::Faulted;
    }

    /// Stop the session deliberately.
    pub fn stop(&mut self) {
        self.state = SessionState::Stopped;
    }

    fn transition_from(
        &mut self,
        expected: SessionState,
        next: SessionState,
        action: &'static str,
    ) -> Result<(), ClientError> {
        if self.state != expected {
            return Err(ClientError::InvalidTransition {
                state: self.state.as_str(),
                action,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_happy_path_transitions() {
        let mut lifecycle = SessionLifecycle::default();
        assert_eq!(lifecycle.state(), SessionState::Unauthenticated);

        lifecycle.begin_login().expect("login must be allowed");
        assert_eq!(lifecycle.state(), SessionState::Authenticating);

        lifecycle
            .on_login_result(true)
            .expect("resolution must be allowed");
        assert_eq!(lifecycle.state(), SessionState::Polling);

        lifecycle.stop();
        assert_eq!(lifecycle.state(), SessionState::Stopped);
    }

    #[test]
    fn failed_login_returns_to_unauthenticated() {
        let mut lifecycle = SessionLifecycle::default();
        lifecycle.begin_login().expect("login must be allowed");
        lifecycle
            .on_login_result(false)
            .expect("resolution must be allowed");
        assert_eq!(lifecycle.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn rejects_polling_before_login() {
        let lifecycle = SessionLifecycle::default();
        let err = lifecycle
            .require_polling("run")
            .expect_err("polling must require a session");
        match err {
            ClientError::InvalidTransition { state, action } => {
                assert_eq!(state, "unauthenticated");
                assert_eq!(action, "run");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_login() {
        let mut lifecycle = SessionLifecycle::default();
        lifecycle.begin_login().expect("first login must work");
        assert!(lifecycle.begin_login().is_err());
    }

    #[test]
    fn fault_halts_from_polling() {
        let mut lifecycle = SessionLifecycle::default();
        lifecycle.begin_login().expect("login must be allowed");
        lifecycle.on_login_result(true).expect("resolution must work");
        lifecycle.fault();
        assert_eq!(lifecycle.state(), SessionState::Faulted);
        assert!(lifecycle.require_polling("run").is_err());
    }
}
