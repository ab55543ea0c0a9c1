//! Match coordinator: the per-match lifecycle handler.
//!
//! The host calls these in order, never concurrently for one match:
//! `init` → (`join_attempt` / `join` / `leave` / `tick`)* → `signal`* → `terminate`.
//! The handler never calls out on its own except to the directory and
//! dispatcher it is handed during `terminate`.

use crate::config::{EmptyTickPolicy, MatchConfig};
use crate::directory::{DirectoryError, MatchFilter, MatchParams, SessionDirectory};
use crate::dispatcher::Dispatcher;
use crate::presence::{MatchData, Presence};
use crate::state::{MatchState, MatchStatus};
use match_shared::op_codes;
use match_shared::protocol::encode_migration;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Result of `init`.
#[derive(Debug)]
pub struct MatchInit {
    pub state: MatchState,
    /// Ticks per second
    pub tick_rate: u32,
    /// Listing label, used by directory filters
    pub label: String,
}

/// Admission decision from `join_attempt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDecision {
    pub accept: bool,
    pub reason: String,
}

/// What the host should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    Continue,
    /// Discard the match
    End,
}

pub struct MatchHandler {
    config: MatchConfig,
}

impl MatchHandler {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn init(&self, _params: &MatchParams) -> MatchInit {
        MatchInit {
            state: MatchState::new(),
            tick_rate: self.config.tick_rate,
            label: String::new(),
        }
    }

    /// Admission check before a presence joins. Currently admits everyone.
    pub fn join_attempt(
        &self,
        _state: &MatchState,
        presence: &Presence,
        _metadata: &HashMap<String, String>,
    ) -> JoinDecision {
        tracing::debug!(session_id = %presence.session_id, "join attempt accepted");
        JoinDecision {
            accept: true,
            reason: String::new(),
        }
    }

    pub fn join(&self, state: &mut MatchState, presences: &[Presence]) {
        for presence in presences {
            state
                .presences
                .insert(presence.session_id.clone(), presence.clone());
        }
    }

    pub fn leave(&self, state: &mut MatchState, presences: &[Presence]) {
        for presence in presences {
            state.presences.remove(presence.session_id());
        }
    }

    pub fn tick(&self, state: &mut MatchState, tick: u64, messages: &[MatchData]) -> LoopOutcome {
        state.status.advance(MatchStatus::Running);

        if !messages.is_empty() {
            tracing::trace!(tick, count = messages.len(), "ignoring match data");
        }

        if state.is_empty() {
            state.empty_ticks += 1;
        } else if self.config.empty_tick_policy == EmptyTickPolicy::Reset {
            state.empty_ticks = 0;
        }

        if state.empty_ticks > self.config.empty_tick_limit {
            tracing::info!(tick, empty_ticks = state.empty_ticks, "match empty, ending");
            return LoopOutcome::End;
        }

        LoopOutcome::Continue
    }

    pub fn signal(&self, _state: &mut MatchState, data: &str) -> String {
        format!("signal received: {}", data)
    }

    /// Redirect remaining presences to another match before shutdown.
    ///
    /// Returns `None` when no migration target could be found or the
    /// notification could not be built.
    pub async fn terminate(
        &self,
        directory: &dyn SessionDirectory,
        dispatcher: &dyn Dispatcher,
        state: MatchState,
        grace_seconds: u32,
    ) -> Option<MatchState> {
        tracing::debug!(grace_seconds, "match will terminate");

        let target = match self.find_migration_target(directory, grace_seconds).await {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(error = %e, "no migration target, presences not redirected");
                return None;
            }
        };

        let data = match encode_migration(&target, self.config.migration_format) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode migration message");
                return None;
            }
        };

        if let Err(e) =
            dispatcher.broadcast_message(op_codes::MATCH_MIGRATION, data, None, None, true)
        {
            tracing::warn!(error = %e, "migration broadcast failed");
        } else {
            tracing::info!(migrate_to = %target, presences = state.size(), "presences redirected");
        }

        Some(state)
    }

    async fn find_migration_target(
        &self,
        directory: &dyn SessionDirectory,
        grace_seconds: u32,
    ) -> Result<String, DirectoryError> {
        let migration = &self.config.migration;
        let filter = MatchFilter {
            label: migration.label.clone(),
            min_size: migration.min_size,
            max_size: migration.max_size,
            authoritative: migration.authoritative,
            query: migration.query.clone(),
        };

        let available = within_grace(grace_seconds, directory.list(&filter, 1)).await?;
        if let Some(listing) = available.into_iter().next() {
            return Ok(listing.match_id);
        }

        within_grace(
            grace_seconds,
            directory.create(&migration.fallback_module, MatchParams::new()),
        )
        .await
    }
}

/// Bound a directory call by the grace period. With zero grace only a call
/// that is ready on its first poll succeeds.
async fn within_grace<T>(
    grace_seconds: u32,
    call: impl Future<Output = Result<T, DirectoryError>>,
) -> Result<T, DirectoryError> {
    tokio::time::timeout(Duration::from_secs(grace_seconds as u64), call)
        .await
        .map_err(|_| DirectoryError::Timeout)?
}
