use crate::directory::MatchParams;
use crate::dispatcher::{ChannelDispatcher, MatchBroadcast};
use crate::handler::{JoinDecision, LoopOutcome, MatchHandler};
use crate::presence::{MatchData, Presence};
use crate::registry::MatchRegistry;
use crate::state::MatchStatus;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Commands from sockets and admin calls to a match task
pub enum MatchCommand {
    JoinAttempt {
        presence: Presence,
        metadata: HashMap<String, String>,
        response: oneshot::Sender<JoinDecision>,
    },
    Join {
        presences: Vec<Presence>,
    },
    Leave {
        presences: Vec<Presence>,
    },
    /// Buffered and handed to the next tick
    Data(MatchData),
    Signal {
        data: String,
        response: oneshot::Sender<String>,
    },
    Terminate {
        grace_seconds: u32,
        /// Resolves with whether presences were redirected
        done: Option<oneshot::Sender<bool>>,
    },
}

/// Run one match until it ends or is terminated. Owns the match state.
pub async fn run_match(
    match_id: String,
    handler: MatchHandler,
    params: MatchParams,
    mut cmd_rx: mpsc::Receiver<MatchCommand>,
    broadcast_tx: broadcast::Sender<MatchBroadcast>,
    registry: MatchRegistry,
) {
    let init = handler.init(&params);
    let mut state = init.state;
    registry.update_label(&match_id, init.label);

    let dispatcher = ChannelDispatcher::new(broadcast_tx);
    let tick_duration = Duration::from_secs_f64(1.0 / init.tick_rate as f64);
    let mut tick_interval = tokio::time::interval(tick_duration);
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut tick: u64 = 0;
    let mut inbound: Vec<MatchData> = Vec::new();
    let mut done_tx = None;

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                tick += 1;
                let messages = std::mem::take(&mut inbound);
                if handler.tick(&mut state, tick, &messages) == LoopOutcome::End {
                    break;
                }
            }

            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    MatchCommand::JoinAttempt { presence, metadata, response } => {
                        let decision = handler.join_attempt(&state, &presence, &metadata);
                        if !decision.accept {
                            tracing::info!(session_id = %presence.session_id, reason = %decision.reason, "join rejected");
                        }
                        let _ = response.send(decision);
                    }
                    MatchCommand::Join { presences } => {
                        handler.join(&mut state, &presences);
                        registry.update_size(&match_id, state.size());
                        for p in &presences {
                            tracing::info!(session_id = %p.session_id, user_id = %p.user_id, "presence joined");
                        }
                    }
                    MatchCommand::Leave { presences } => {
                        handler.leave(&mut state, &presences);
                        registry.update_size(&match_id, state.size());
                        for p in &presences {
                            tracing::info!(session_id = %p.session_id, "presence left");
                        }
                    }
                    MatchCommand::Data(data) => inbound.push(data),
                    MatchCommand::Signal { data, response } => {
                        let reply = handler.signal(&mut state, &data);
                        let _ = response.send(reply);
                    }
                    MatchCommand::Terminate { grace_seconds, done } => {
                        registry.mark_closing(&match_id);
                        let current = std::mem::take(&mut state);
                        let result = handler
                            .terminate(&registry, &dispatcher, current, grace_seconds)
                            .await;
                        let migrated = result.is_some();
                        if let Some(returned) = result {
                            state = returned;
                        }
                        if let Some(done) = done {
                            done_tx = Some((done, migrated));
                        }
                        break;
                    }
                }
            }

            else => break,
        }
    }

    state.status.advance(MatchStatus::Finished);
    registry.remove(&match_id);
    if let Some((done, migrated)) = done_tx {
        let _ = done.send(migrated);
    }

    tracing::info!(ticks = tick, status = ?state.status, "match ended");
}
