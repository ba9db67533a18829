use crate::session_management::SessionStatus;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Set when setup succeeded and relaying began.
    pub relay_start: Option<DateTime<Utc>>,
    pub capture_path: Option<PathBuf>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time: Utc::now(),
            end_time: None,
            relay_start: None,
            capture_path: None,
            status: SessionStatus::Setup,
        }
    }

    /// Moves to `next` if the transition is allowed. Entering `Relaying`
    /// stamps the relay start, entering `Teardown` the end time.
    pub fn advance(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                "[{}] Ignoring status change {:?} -> {:?}",
                self.id, self.status, next
            );
            return false;
        }
        self.status = next;
        match next {
            SessionStatus::Relaying => self.relay_start = Some(Utc::now()),
            SessionStatus::Teardown => self.end_time = Some(Utc::now()),
            SessionStatus::Setup => {}
        }
        true
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
