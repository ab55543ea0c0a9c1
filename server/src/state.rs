use crate::presence::Presence;
use std::collections::HashMap;

/// Lifecycle of a single match. Ordered; only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStatus {
    NotStarted,
    Running,
    Finished,
}

impl MatchStatus {
    /// Move to `next` if it is later in the lifecycle. Returns true if changed.
    pub fn advance(&mut self, next: MatchStatus) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// State of one match, owned by its match task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchState {
    /// Keyed by presence session id
    pub presences: HashMap<String, Presence>,
    /// Consecutive ticks seen with no presences
    pub empty_ticks: u32,
    pub status: MatchStatus,
}

impl MatchState {
    pub fn new() -> Self {
        Self {
            presences: HashMap::new(),
            empty_ticks: 0,
            status: MatchStatus::NotStarted,
        }
    }

    pub fn size(&self) -> usize {
        self.presences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presences.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.presences.contains_key(session_id)
    }
}

impl Default for MatchState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_empty_and_not_started() {
        let state = MatchState::new();
        assert!(state.is_empty());
        assert_eq!(state.empty_ticks, 0);
        assert_eq!(state.status, MatchStatus::NotStarted);
    }

    #[test]
    fn status_never_moves_backward() {
        let mut status = MatchStatus::NotStarted;
        assert!(status.advance(MatchStatus::Running));
        assert!(!status.advance(MatchStatus::Running));
        assert!(status.advance(MatchStatus::Finished));
        assert!(!status.advance(MatchStatus::Running));
        assert!(!status.advance(MatchStatus::NotStarted));
        assert_eq!(status, MatchStatus::Finished);
    }

    #[test]
    fn status_can_skip_running() {
        let mut status = MatchStatus::NotStarted;
        assert!(status.advance(MatchStatus::Finished));
        assert_eq!(status, MatchStatus::Finished);
    }
}
