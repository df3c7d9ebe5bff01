//! Synchronization controller
//!
//! The single writer of the [`SessionMirror`]. Two ways in:
//!
//! 1. **Full import** ([`SyncController::import_state`]): replace the whole mirror from a
//!    snapshot. Idempotent. The first import announces `Connected`.
//! 2. **Incremental tick** ([`SyncController::apply_tick`]): apply one resolved turn, but
//!    only when it directly follows the local turn. Anything else is a desync: nothing is
//!    touched and a fresh snapshot is requested. The `download` response re-establishes the
//!    turn cursor through a full import.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::{Clock, ClockSettings};
use crate::error::{SimulationError, TransportError};
use crate::message::ClientMessage;
use crate::notify::{Notification, NotificationBus, SessionNotification};
use crate::session::{SessionMirror, SessionSnapshot, UserProfile};
use crate::simulation::Simulation;
use crate::transport::{Transport, NORMAL_CLOSURE};

/// Close reason sent when the session reaches `ended`
pub const SESSION_ENDED_REASON: &str = "Game ended";

/// Applies server state to the local mirror
pub struct SyncController<S: Simulation> {
    simulation: Arc<S>,
    mirror: SessionMirror<S>,
    transport: Transport,
    bus: Arc<NotificationBus<SessionNotification<S>>>,
    dropped_frames: u64,
    desyncs: u64,
    finished: bool,
}

impl<S: Simulation> SyncController<S> {
    pub fn new(
        session_id: impl Into<String>,
        simulation: Arc<S>,
        transport: Transport,
        bus: Arc<NotificationBus<SessionNotification<S>>>,
        clock: ClockSettings,
    ) -> Self {
        let tick_bus = Arc::clone(&bus);
        // The observer must be in place before the first tick is spawned
        let mut local_clock = Clock::new(ClockSettings {
            auto_start: false,
            ..clock
        })
        .with_observer(Arc::new(move |count| {
            tick_bus.emit(Notification::LocalTick { count });
        }));
        if clock.auto_start {
            local_clock.start(None);
        }

        Self {
            simulation,
            mirror: SessionMirror::new(session_id, local_clock),
            transport,
            bus,
            dropped_frames: 0,
            desyncs: 0,
            finished: false,
        }
    }

    pub fn mirror(&self) -> &SessionMirror<S> {
        &self.mirror
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    /// Turn cursor of the current game snapshot
    pub fn turn(&self) -> Option<u64> {
        self.mirror.game().map(|game| self.simulation.turn(game))
    }

    /// Frames dropped as unknown, malformed or arriving after the session ended
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Ticks rejected because they did not follow the local turn
    pub fn desyncs(&self) -> u64 {
        self.desyncs
    }

    pub(crate) fn set_transport(&mut self, transport: Transport) {
        self.transport = transport;
    }

    /// Replace the mirror wholesale from a snapshot
    ///
    /// The game is decoded before anything is touched, so a snapshot the engine rejects leaves
    /// the mirror as it was.
    pub fn import_state(&mut self, snapshot: SessionSnapshot) -> Result<(), SimulationError> {
        let game = match &snapshot.game {
            Some(json) if !json.is_null() => Some(self.simulation.decode_game(json)?),
            _ => None,
        };
        let pending: HashMap<String, S::Command> = game
            .as_ref()
            .map(|game| self.simulation.pending_commands(game).into_iter().collect())
            .unwrap_or_default();

        let first_import = self.mirror.status().is_none();
        debug!(
            status = %snapshot.status,
            users = snapshot.users.len(),
            clients = snapshot.clients.len(),
            "Importing session state"
        );
        self.mirror.replace(snapshot, game, pending);

        if first_import {
            info!("Session {} synchronized", self.mirror.session_id());
            self.bus.emit(Notification::Connected);
        }
        Ok(())
    }

    /// Full import followed by `notification`; a rejected snapshot is dropped
    pub fn import_and_notify(&mut self, snapshot: SessionSnapshot, notification: SessionNotification<S>) {
        match self.import_state(snapshot) {
            Ok(()) => self.bus.emit(notification),
            Err(e) => self.drop_frame(format!("snapshot rejected by simulation: {e}")),
        }
    }

    /// Mark one participant ready without a full import
    pub fn mark_ready(&mut self, user: UserProfile) {
        debug!("Participant {} is ready", user.uid);
        self.mirror.set_ready(user.clone());
        self.bus.emit(Notification::UserReady { user });
    }

    /// Apply one incremental turn
    pub async fn apply_tick(
        &mut self,
        turn: u64,
        actions: Vec<Value>,
        command_responses: Option<Vec<Value>>,
    ) {
        let Some(game) = self.mirror.game() else {
            debug!("Tick {} arrived before any game snapshot; ignoring", turn);
            return;
        };

        let local_turn = self.simulation.turn(game);
        if local_turn.checked_add(1) != Some(turn) {
            self.desync(local_turn, turn);
            return;
        }

        let decoded: Result<Vec<S::Action>, SimulationError> = actions
            .iter()
            .map(|action| self.simulation.decode_action(game, action))
            .collect();
        let actions = match decoded {
            Ok(actions) => actions,
            Err(e) => {
                warn!("Could not decode actions for turn {}: {}", turn, e);
                self.request_resync();
                return;
            }
        };

        let notified = actions.clone();
        if let Some(game) = self.mirror.game_mut() {
            if let Err(e) = self.simulation.apply_turn(game, turn, actions).await {
                warn!("Simulation failed to apply turn {}: {}", turn, e);
                self.request_resync();
                return;
            }
        }

        let Some(game) = self.mirror.game() else {
            return;
        };
        if self.simulation.turn(game) != turn {
            warn!(
                "Simulation reported turn {} after applying turn {}",
                self.simulation.turn(game),
                turn
            );
        }

        let command_responses = command_responses
            .unwrap_or_default()
            .iter()
            .filter_map(|json| match self.simulation.decode_command_response(game, json) {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!("Dropping undecodable command response: {}", e);
                    None
                }
            })
            .collect();

        debug!(turn, "Applied turn");
        self.bus.emit(Notification::Tick {
            turn,
            actions: notified,
            command_responses,
        });
    }

    /// Record a frame that was not applied
    pub fn drop_frame(&mut self, reason: String) {
        self.dropped_frames += 1;
        self.bus.emit(Notification::FrameDropped { reason });
    }

    /// Whether no further frames should be applied
    pub fn is_finished(&self) -> bool {
        self.finished || self.mirror.is_ended()
    }

    /// Close the connection once the session has ended
    ///
    /// Returns whether the session is ended.
    pub fn finish_if_ended(&mut self) -> bool {
        if !self.mirror.is_ended() {
            return false;
        }
        self.end_session();
        true
    }

    /// Close the connection for good and stop the local clock
    ///
    /// Later frames are dropped whatever status the mirror holds.
    pub fn end_session(&mut self) {
        self.finished = true;
        self.mirror.stop_clock();
        if !self.transport.is_closed() {
            info!("Session {} ended", self.mirror.session_id());
            self.transport.close(NORMAL_CLOSURE, SESSION_ENDED_REASON);
        }
    }

    /// The transport went away
    pub fn connection_lost(&mut self, code: Option<u16>, reason: String) {
        self.mirror.stop_clock();
        self.bus.emit(Notification::Disconnected { code, reason });
    }

    pub fn stop_clock(&mut self) {
        self.mirror.stop_clock();
    }

    /// Send a frame, logging any failure
    pub fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        self.transport.send_message(message).inspect_err(|e| {
            warn!("Could not send {:?}: {}", message, e);
        })
    }

    fn desync(&mut self, local_turn: u64, server_turn: u64) {
        self.desyncs += 1;
        warn!(
            local_turn,
            server_turn, "Out of sync with server; requesting full state"
        );
        self.request_resync();
        self.bus.emit(Notification::Desync {
            local_turn,
            server_turn,
        });
    }

    fn request_resync(&self) {
        let _ = self.send(&ClientMessage::Download);
    }
}

impl<S: Simulation> std::fmt::Debug for SyncController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncController")
            .field("mirror", &self.mirror)
            .field("dropped_frames", &self.dropped_frames)
            .field("desyncs", &self.desyncs)
            .field("finished", &self.finished)
            .finish()
    }
}
