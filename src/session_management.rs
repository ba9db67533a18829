//! Session management core module.
//!
//! This module provides the types and submodules that carry one proxied
//! session from setup to teardown:
//! - [`session_manager`]: connects to the target and runs the proxy,
//! - [`session_proxy`]: the relay itself (copy flows + control loop),
//! - [`shutdown`]: exactly-once teardown of both channels.

use serde::{Deserialize, Serialize};

/// Submodule for session data structures.
pub mod session;
/// Submodule for session manager implementation.
pub mod session_manager;
/// Submodule for the bidirectional relay.
pub mod session_proxy;
/// Submodule for synchronized channel teardown.
pub mod shutdown;


pub use session::Session;
pub use session_manager::SessionManager;
pub use session_proxy::{ProxyOptions, SessionProxy, SessionRelay};
pub use shutdown::{ShutdownCoordinator, ShutdownGuard};

/// Represents the current status of a session.
///
/// Variants:
/// - `Setup`: connecting to the target and opening the capture.
/// - `Relaying`: both copy flows and the control loop are running.
/// - `Teardown`: channels are closed. Terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Setup,
    Relaying,
    Teardown,
}

impl SessionStatus {
    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Setup, SessionStatus::Relaying)
                | (SessionStatus::Setup, SessionStatus::Teardown)
                | (SessionStatus::Relaying, SessionStatus::Teardown)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStatus::*;

    #[test]
    fn test_status_transitions() {
        assert!(Setup.can_transition_to(Relaying));
        assert!(Setup.can_transition_to(Teardown));
        assert!(Relaying.can_transition_to(Teardown));

        assert!(!Teardown.can_transition_to(Relaying));
        assert!(!Teardown.can_transition_to(Setup));
        assert!(!Relaying.can_transition_to(Setup));
        assert!(!Relaying.can_transition_to(Relaying));
    }
}
