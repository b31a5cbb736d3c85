//! Ranked-submission sub-game handlers and the timers that drive each round.
//!
//! Both the animation delay and the answering deadline run as spawned tasks holding only a
//! weak room handle. Every callback re-checks the round id before touching the room, so a
//! superseded timer that slipped past cancellation does nothing.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    sync::Mutex,
    time::{Instant, sleep},
};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::SessionUpdate,
    dto::{
        now_millis,
        room::{LeaderboardEntry, SubmissionBreakdown, duration_millis},
        ws::{ClientMessage, ServerMessage, StartQuestionRequest},
    },
    error::ServiceError,
    services::persistence::PersistCommand,
    state::{
        RoomHandle, SharedState,
        room::{GameMode, Room},
        sequence::{Question, SequencePhase, Standing},
    },
};

/// Entries shown to players next to their personal result.
const RESULT_TOP: usize = 3;

/// Apply a `sequence:*` host action to a locked room.
pub fn handle_host(
    state: &SharedState,
    handle: &RoomHandle,
    room: &mut Room,
    message: ClientMessage,
) -> Result<(), ServiceError> {
    match message {
        ClientMessage::SequenceSwitchMode => switch_mode(state, room),
        ClientMessage::SequenceStartQuestion(request) => {
            start_question(state, handle, room, request)
        }
        ClientMessage::SequenceReveal => {
            if room.sequence.phase() != SequencePhase::Answering {
                debug!(code = %room.code, phase = ?room.sequence.phase(), "reveal ignored outside answering");
                return Ok(());
            }
            reveal(state, room, None);
            Ok(())
        }
        ClientMessage::SequenceShowLeaderboard => {
            let standings = room.sequence.show_leaderboard()?;
            broadcast(
                room,
                &ServerMessage::SequenceLeaderboard {
                    leaderboard: entries(standings),
                },
            );
            Ok(())
        }
        ClientMessage::SequenceEndGame => {
            let standings = room.sequence.end_game();
            info!(code = %room.code, players = standings.len(), "sequence game complete");
            broadcast(
                room,
                &ServerMessage::SequenceGameComplete {
                    leaderboard: entries(standings),
                },
            );
            Ok(())
        }
        ClientMessage::SequenceReset => {
            room.sequence.reset();
            broadcast(room, &ServerMessage::SequenceReset);
            Ok(())
        }
        ClientMessage::SequenceResetScores => {
            room.sequence.reset_scores();
            broadcast(room, &ServerMessage::SequenceScoresReset);
            Ok(())
        }
        other => {
            debug!(code = %room.code, message = ?other, "not a sequence host action");
            Ok(())
        }
    }
}

/// Record a player's ordering for the running round.
pub fn submit(room: &mut Room, player_id: &str, sequence: Vec<String>) {
    let Some(name) = room.players.get(player_id).map(|player| player.name.clone()) else {
        return;
    };

    match room.sequence.submit(player_id, sequence, Instant::now()) {
        Ok(elapsed) => {
            room.sequence.ensure_tracked(player_id, &name);
            let elapsed_ms = duration_millis(elapsed);
            room.send_to_player(player_id, &ServerMessage::SequenceSubmitted { elapsed_ms });

            let submitted_count = room
                .sequence
                .round()
                .map_or(0, |round| round.submissions().len());
            room.send_to_host(&ServerMessage::SequencePlayerSubmitted {
                player_id: player_id.to_string(),
                name,
                elapsed_ms,
                submitted_count,
            });
        }
        Err(err) => {
            debug!(code = %room.code, player_id = %player_id, error = %err, "submission rejected");
            room.send_to_player(
                player_id,
                &ServerMessage::SequenceSubmissionRejected {
                    reason: err.reason().to_string(),
                },
            );
        }
    }
}

fn switch_mode(state: &SharedState, room: &mut Room) -> Result<(), ServiceError> {
    if room.mode == GameMode::Sequence {
        return Err(ServiceError::InvalidState(
            "sequence mode is already active".into(),
        ));
    }

    room.mode = GameMode::Sequence;
    room.seed_sequence_ledger();
    state.persist(PersistCommand::UpdateSession {
        session_id: room.session_id,
        update: SessionUpdate {
            mode: Some(GameMode::Sequence.into()),
            ..SessionUpdate::default()
        },
    });
    info!(code = %room.code, "switched to sequence mode");

    broadcast(
        room,
        &ServerMessage::SequenceModeActivated {
            phase: room.sequence.phase(),
            leaderboard: entries(room.sequence.leaderboard()),
        },
    );
    Ok(())
}

fn start_question(
    state: &SharedState,
    handle: &RoomHandle,
    room: &mut Room,
    request: StartQuestionRequest,
) -> Result<(), ServiceError> {
    if room.mode != GameMode::Sequence {
        return Err(ServiceError::InvalidState(
            "sequence mode is not active".into(),
        ));
    }
    request
        .validate()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    let round_id = room.sequence.start_question(Question {
        prompt: request.prompt,
        items: request.items,
        correct_order: request.correct_order,
        index: request.index,
        total: request.total,
    })?;
    let Some(question) = room.sequence.round().map(|round| round.question.clone()) else {
        return Ok(());
    };

    let animation = state.config().sequence.animation;
    let animation_ms = duration_millis(animation);
    room.broadcast_players(&ServerMessage::SequenceAnimating {
        index: question.index,
        total: question.total,
        item_count: question.items.len(),
        animation_ms,
        prompt: None,
        items: None,
        correct_order: None,
    });
    room.send_to_host(&ServerMessage::SequenceAnimating {
        index: question.index,
        total: question.total,
        item_count: question.items.len(),
        animation_ms,
        prompt: Some(question.prompt),
        items: Some(question.items),
        correct_order: Some(question.correct_order),
    });
    info!(code = %room.code, round = %round_id, index = question.index, "sequence question started");

    let task = tokio::spawn(finish_animation(
        state.clone(),
        Arc::downgrade(handle),
        round_id,
        animation,
    ));
    room.sequence.timers_mut().arm_animation(task.abort_handle());
    Ok(())
}

async fn finish_animation(
    state: SharedState,
    room: Weak<Mutex<Room>>,
    round_id: Uuid,
    delay: Duration,
) {
    sleep(delay).await;
    let Some(handle) = room.upgrade() else {
        return;
    };
    let mut room = handle.lock().await;
    if !is_active_round(&room, round_id) {
        return;
    }
    room.sequence.timers_mut().disarm_animation();
    open_answering(&state, &handle, &mut room, round_id);
}

fn open_answering(state: &SharedState, handle: &RoomHandle, room: &mut Room, round_id: Uuid) {
    let duration = state.config().sequence.answer_duration;
    if room
        .sequence
        .begin_answering(round_id, Instant::now(), duration)
        .is_none()
    {
        debug!(code = %room.code, round = %round_id, "round moved on before answering opened");
        return;
    }
    let Some(question) = room.sequence.round().map(|round| round.question.clone()) else {
        return;
    };

    let duration_ms = duration_millis(duration);
    let deadline = now_millis().saturating_add(i64::try_from(duration_ms).unwrap_or(i64::MAX));
    broadcast(
        room,
        &ServerMessage::SequenceAnswering {
            prompt: question.prompt,
            items: question.items,
            deadline,
            duration_ms,
        },
    );
    debug!(code = %room.code, round = %round_id, deadline, "answering opened");

    let task = tokio::spawn(close_answering(
        state.clone(),
        Arc::downgrade(handle),
        round_id,
        duration,
    ));
    room.sequence.timers_mut().arm_deadline(task.abort_handle());
}

async fn close_answering(
    state: SharedState,
    room: Weak<Mutex<Room>>,
    round_id: Uuid,
    delay: Duration,
) {
    sleep(delay).await;
    let Some(handle) = room.upgrade() else {
        return;
    };
    let mut room = handle.lock().await;
    if !is_active_round(&room, round_id) {
        return;
    }
    room.sequence.timers_mut().disarm_deadline();
    debug!(code = %room.code, round = %round_id, "answering deadline reached");
    reveal(&state, &mut room, Some(round_id));
}

fn is_active_round(room: &Room, round_id: Uuid) -> bool {
    room.sequence
        .round()
        .is_some_and(|round| round.id == round_id)
}

/// Score the round and push results. Returns `false` when the round was already revealed.
fn reveal(state: &SharedState, room: &mut Room, expected_round: Option<Uuid>) -> bool {
    let Some(outcome) = room.sequence.reveal(expected_round, &state.config().sequence) else {
        return false;
    };
    let correct_order = room
        .sequence
        .round()
        .map(|round| round.question.correct_order.clone())
        .unwrap_or_default();

    let session_id = room.session_id;
    for result in outcome.results.iter().filter(|result| result.points != 0) {
        if let Some(player) = room.players.get_mut(&result.player_id) {
            player.score = player.score.saturating_add(result.points);
        }
        state.persist(PersistCommand::ScoreDelta {
            session_id,
            player_id: result.player_id.clone(),
            delta: result.points,
        });
    }

    let standings = room.sequence.leaderboard();
    let top = entries(standings.iter().take(RESULT_TOP).cloned().collect());

    for player in room.players.values() {
        let Some(connection) = &player.connection else {
            continue;
        };
        let result = outcome.result_for(&player.id);
        connection.send(&ServerMessage::SequenceResult {
            correct: result.is_some_and(|result| result.correct),
            rank: result.and_then(|result| result.rank),
            is_winner: result.is_some_and(|result| result.is_winner),
            points: result.map_or(0, |result| result.points),
            score: room.sequence.ledger_score(&player.id).unwrap_or(0),
            correct_order: correct_order.clone(),
            top: top.clone(),
        });
    }

    let results = outcome
        .results
        .iter()
        .map(|result| {
            let name = room
                .players
                .get(&result.player_id)
                .map(|player| player.name.clone())
                .or_else(|| {
                    standings
                        .iter()
                        .find(|standing| standing.player_id == result.player_id)
                        .map(|standing| standing.name.clone())
                })
                .unwrap_or_default();
            SubmissionBreakdown::new(result, name)
        })
        .collect();
    room.send_to_host(&ServerMessage::SequenceResults {
        correct_order,
        results,
        winner: outcome.winner.clone(),
        leaderboard: entries(standings),
    });

    info!(
        code = %room.code,
        submissions = outcome.results.len(),
        winner = ?outcome.winner,
        "sequence round revealed"
    );
    true
}

fn entries(standings: Vec<Standing>) -> Vec<LeaderboardEntry> {
    standings.into_iter().map(LeaderboardEntry::from).collect()
}

fn broadcast(room: &Room, message: &ServerMessage) {
    room.broadcast_players(message);
    room.send_to_host(message);
}
