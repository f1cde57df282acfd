//! Supervisor states and the failure policy of each step
//!
//! Startup is a straight line of states. Every state is entered by one
//! handler in the supervisor; what happens when that handler fails is
//! decided here, by [`State::failure_policy`], rather than inline.

use nix::sys::signal::Signal;
use std::fmt;
use std::process::ExitStatus;

/// Why the supervisor started shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// A termination signal arrived
    Signal(Signal),
    /// A child terminated without being asked to
    ChildExited { name: String, status: ExitStatus },
}

/// Supervisor lifecycle states, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Init,
    DirsReady,
    DnsApplied,
    DaemonAStarted,
    DaemonAReady,
    AuthApplied,
    AuthSkipped,
    SettingsApplied,
    IdentityAwaited,
    DaemonBStarted,
    Supervising,
    ShuttingDown(ShutdownCause),
    Exited(ShutdownCause),
}

/// What a failed transition into a state means for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and carry on from the state anyway
    BestEffort,
    /// Tear down whatever was started and abort
    Fatal,
}

impl State {
    /// Policy applied when the handler entering this state fails
    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            State::DaemonAStarted | State::DaemonAReady | State::DaemonBStarted => {
                FailurePolicy::Fatal
            }
            State::Init
            | State::DirsReady
            | State::DnsApplied
            | State::AuthApplied
            | State::AuthSkipped
            | State::SettingsApplied
            | State::IdentityAwaited
            | State::Supervising
            | State::ShuttingDown(_)
            | State::Exited(_) => FailurePolicy::BestEffort,
        }
    }

    /// States before supervision proper, which a signal may interrupt
    pub fn is_startup(&self) -> bool {
        !matches!(
            self,
            State::Supervising | State::ShuttingDown(_) | State::Exited(_)
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Init => write!(f, "init"),
            State::DirsReady => write!(f, "dirs-ready"),
            State::DnsApplied => write!(f, "dns-applied"),
            State::DaemonAStarted => write!(f, "tailscaled-started"),
            State::DaemonAReady => write!(f, "tailscaled-ready"),
            State::AuthApplied => write!(f, "auth-applied"),
            State::AuthSkipped => write!(f, "auth-skipped"),
            State::SettingsApplied => write!(f, "settings-applied"),
            State::IdentityAwaited => write!(f, "identity-awaited"),
            State::DaemonBStarted => write!(f, "adguard-started"),
            State::Supervising => write!(f, "supervising"),
            State::ShuttingDown(_) => write!(f, "shutting-down"),
            State::Exited(_) => write!(f, "exited"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_daemon_launch_and_readiness_are_fatal() {
        let fatal = [State::DaemonAStarted, State::DaemonAReady, State::DaemonBStarted];
        for state in fatal {
            assert_eq!(state.failure_policy(), FailurePolicy::Fatal, "{state}");
        }

        let best_effort = [
            State::DirsReady,
            State::DnsApplied,
            State::AuthApplied,
            State::AuthSkipped,
            State::SettingsApplied,
            State::IdentityAwaited,
        ];
        for state in best_effort {
            assert_eq!(state.failure_policy(), FailurePolicy::BestEffort, "{state}");
        }
    }

    #[test]
    fn test_startup_states() {
        assert!(State::Init.is_startup());
        assert!(State::DaemonBStarted.is_startup());
        assert!(!State::Supervising.is_startup());
        assert!(!State::ShuttingDown(ShutdownCause::Signal(Signal::SIGTERM)).is_startup());
    }
}
