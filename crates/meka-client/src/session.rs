//! Session mirror
//!
//! The locally-known copy of a remote session: metadata, participant roster, connection
//! roster, pending command index, presentation clock and the decoded game snapshot.
//! Callers only read it; every mutation is made by [`crate::sync::SyncController`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, ClockParams};
use crate::simulation::Simulation;

/// Session lifecycle status
///
/// `open → ready → inprogress ⇄ paused → ended`, with `inprogress → ended` also valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Ready,
    #[serde(alias = "in-progress", alias = "in_progress")]
    InProgress,
    Paused,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Ready => "ready",
            SessionStatus::InProgress => "inprogress",
            SessionStatus::Paused => "paused",
            SessionStatus::Ended => "ended",
        }
    }

    /// `ended` accepts no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Participant profile as served by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_count: Option<u32>,
}

impl UserProfile {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            username: None,
            avatar_url: None,
            email: None,
            elo: None,
            win_count: None,
            loss_count: None,
            draw_count: None,
        }
    }

    /// Username when known, uid otherwise
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.uid)
    }
}

/// Participant roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user: UserProfile,
    #[serde(default)]
    pub is_ready: bool,
}

/// One live connection and the participant owning it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ClientDescriptorWire")]
pub struct ClientDescriptor {
    pub id: String,
    pub user_id: String,
}

/// Servers send the owner either as `userId` or as `user` (an id or a profile object)
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientDescriptorWire {
    id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user: Option<Value>,
}

impl TryFrom<ClientDescriptorWire> for ClientDescriptor {
    type Error = String;

    fn try_from(wire: ClientDescriptorWire) -> Result<Self, Self::Error> {
        let user_id = match (wire.user_id, wire.user) {
            (Some(user_id), _) => user_id,
            (None, Some(Value::String(user_id))) => user_id,
            (None, Some(Value::Object(profile))) => profile
                .get("uid")
                .or_else(|| profile.get("id"))
                .and_then(|id| match id {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .ok_or_else(|| format!("client '{}' has a user without an id", wire.id))?,
            _ => return Err(format!("client '{}' has no owning user", wire.id)),
        };
        Ok(ClientDescriptor {
            id: wire.id,
            user_id,
        })
    }
}

/// Complete serialization of the session, from which the mirror is rebuilt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub game: Option<Value>,
    #[serde(default)]
    pub game_props: Value,
    #[serde(default)]
    pub users: Vec<Participant>,
    #[serde(default)]
    pub clients: Vec<ClientDescriptor>,
    #[serde(default)]
    pub clock: Option<ClockParams>,
    #[serde(default)]
    pub start_at_tick: Option<u64>,
    #[serde(default)]
    pub forfeit_at_tick: Option<u64>,
    #[serde(default)]
    pub winner_id: Option<String>,
}

/// Local mirror of one session
pub struct SessionMirror<S: Simulation> {
    session_id: String,
    status: Option<SessionStatus>,
    game: Option<S::Game>,
    game_props: Value,
    start_at_tick: Option<u64>,
    forfeit_at_tick: Option<u64>,
    winner_id: Option<String>,
    clients: BTreeMap<String, ClientDescriptor>,
    users: BTreeMap<String, Participant>,
    pending_commands: HashMap<String, S::Command>,
    clock: Clock,
}

impl<S: Simulation> SessionMirror<S> {
    pub fn new(session_id: impl Into<String>, clock: Clock) -> Self {
        Self {
            session_id: session_id.into(),
            status: None,
            game: None,
            game_props: Value::Null,
            start_at_tick: None,
            forfeit_at_tick: None,
            winner_id: None,
            clients: BTreeMap::new(),
            users: BTreeMap::new(),
            pending_commands: HashMap::new(),
            clock,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `None` until the first full import
    pub fn status(&self) -> Option<SessionStatus> {
        self.status
    }

    pub fn is_ended(&self) -> bool {
        self.status.is_some_and(|status| status.is_terminal())
    }

    pub fn game(&self) -> Option<&S::Game> {
        self.game.as_ref()
    }

    pub fn game_props(&self) -> &Value {
        &self.game_props
    }

    pub fn start_at_tick(&self) -> Option<u64> {
        self.start_at_tick
    }

    pub fn forfeit_at_tick(&self) -> Option<u64> {
        self.forfeit_at_tick
    }

    pub fn winner_id(&self) -> Option<&str> {
        self.winner_id.as_deref()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Local presentation tick (not the game turn)
    pub fn tick_count(&self) -> u64 {
        self.clock.tick_count()
    }

    pub fn client_list(&self) -> Vec<&ClientDescriptor> {
        self.clients.values().collect()
    }

    pub fn client(&self, client_id: &str) -> Option<&ClientDescriptor> {
        self.clients.get(client_id)
    }

    pub fn user_list(&self) -> Vec<&Participant> {
        self.users.values().collect()
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.users.get(user_id)
    }

    /// Participants whose ready flag is set
    pub fn ready_user_list(&self) -> Vec<&Participant> {
        self.users.values().filter(|p| p.is_ready).collect()
    }

    /// Connections grouped by owning participant
    pub fn user_to_client_map(&self) -> BTreeMap<&str, Vec<&ClientDescriptor>> {
        let mut map: BTreeMap<&str, Vec<&ClientDescriptor>> = BTreeMap::new();
        for client in self.clients.values() {
            map.entry(client.user_id.as_str()).or_default().push(client);
        }
        map
    }

    /// Connections owned by `user_id` (empty when it has none)
    pub fn clients_for_user(&self, user_id: &str) -> Vec<&ClientDescriptor> {
        self.clients
            .values()
            .filter(|client| client.user_id == user_id)
            .collect()
    }

    pub fn pending_command(&self, actor_id: &str) -> Option<&S::Command> {
        self.pending_commands.get(actor_id)
    }

    /// Whether an actor already has a command believed outstanding
    ///
    /// Optimistic local cache, not an authoritative lock.
    pub fn is_actor_committed(&self, actor_id: &str) -> bool {
        self.pending_commands.contains_key(actor_id)
    }

    pub fn pending_command_count(&self) -> usize {
        self.pending_commands.len()
    }

    /// Replace everything from a snapshot in one step
    pub(crate) fn replace(
        &mut self,
        snapshot: SessionSnapshot,
        game: Option<S::Game>,
        pending_commands: HashMap<String, S::Command>,
    ) {
        self.game = game;
        self.status = Some(snapshot.status);
        self.game_props = snapshot.game_props;
        self.start_at_tick = snapshot.start_at_tick;
        self.forfeit_at_tick = snapshot.forfeit_at_tick;
        self.winner_id = snapshot.winner_id;
        self.clients = snapshot
            .clients
            .into_iter()
            .map(|client| (client.id.clone(), client))
            .collect();
        self.users = snapshot
            .users
            .into_iter()
            .map(|participant| (participant.user.uid.clone(), participant))
            .collect();
        self.pending_commands = pending_commands;
        if let Some(clock) = snapshot.clock {
            self.clock.sync_with(clock);
        }
    }

    /// Narrow in-place update: mark one participant ready
    pub(crate) fn set_ready(&mut self, user: UserProfile) {
        let uid = user.uid.clone();
        self.users.insert(
            uid,
            Participant {
                user,
                is_ready: true,
            },
        );
    }

    pub(crate) fn game_mut(&mut self) -> Option<&mut S::Game> {
        self.game.as_mut()
    }

    pub(crate) fn stop_clock(&mut self) {
        self.clock.stop();
    }
}

impl<S: Simulation> fmt::Debug for SessionMirror<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMirror")
            .field("session_id", &self.session_id)
            .field("status", &self.status)
            .field("has_game", &self.game.is_some())
            .field("users", &self.users.len())
            .field("clients", &self.clients.len())
            .field("pending_commands", &self.pending_commands.len())
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::RawSimulation;
    use serde_json::json;

    fn participant(uid: &str, is_ready: bool) -> Participant {
        Participant {
            user: UserProfile::new(uid),
            is_ready,
        }
    }

    fn snapshot(users: Vec<Participant>, clients: Vec<ClientDescriptor>) -> SessionSnapshot {
        SessionSnapshot {
            id: "g-1".to_string(),
            status: SessionStatus::Open,
            game: None,
            game_props: json!({"mapSize": 12}),
            users,
            clients,
            clock: Some(ClockParams {
                tick_time: 100,
                tick_count: 40,
            }),
            start_at_tick: Some(60),
            forfeit_at_tick: None,
            winner_id: None,
        }
    }

    fn client(id: &str, user_id: &str) -> ClientDescriptor {
        ClientDescriptor {
            id: id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    #[test]
    fn test_status_wire_names() {
        let status: SessionStatus = serde_json::from_str("\"inprogress\"").unwrap();
        assert_eq!(status, SessionStatus::InProgress);
        let status: SessionStatus = serde_json::from_str("\"in-progress\"").unwrap();
        assert_eq!(status, SessionStatus::InProgress);
        assert_eq!(serde_json::to_string(&SessionStatus::Ended).unwrap(), "\"ended\"");
        assert!(SessionStatus::Ended.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
    }

    #[test]
    fn test_client_descriptor_owner_forms() {
        let by_user_id: ClientDescriptor =
            serde_json::from_value(json!({"id": "c1", "userId": "u1"})).unwrap();
        let by_user: ClientDescriptor =
            serde_json::from_value(json!({"id": "c1", "user": "u1"})).unwrap();
        let by_profile: ClientDescriptor =
            serde_json::from_value(json!({"id": "c1", "user": {"uid": "u1", "username": "ada"}}))
                .unwrap();
        assert_eq!(by_user_id, client("c1", "u1"));
        assert_eq!(by_user, client("c1", "u1"));
        assert_eq!(by_profile, client("c1", "u1"));

        assert!(serde_json::from_value::<ClientDescriptor>(json!({"id": "c1"})).is_err());
    }

    #[test]
    fn test_snapshot_from_wire() {
        let snapshot: SessionSnapshot = serde_json::from_value(json!({
            "id": "g-9",
            "status": "paused",
            "game": {"turn": 3},
            "gameProps": {"seed": 1},
            "users": [{"user": {"uid": "u1", "avatarUrl": "a.png"}, "isReady": true}],
            "clients": [{"id": "c1", "userId": "u1"}],
            "clock": {"tickTime": 250, "tickCount": 8},
            "forfeitAtTick": 90,
            "winnerId": null
        }))
        .unwrap();

        assert_eq!(snapshot.status, SessionStatus::Paused);
        assert_eq!(snapshot.users[0].user.avatar_url.as_deref(), Some("a.png"));
        assert_eq!(snapshot.forfeit_at_tick, Some(90));
        assert_eq!(snapshot.start_at_tick, None);
        assert_eq!(snapshot.winner_id, None);
    }

    #[test]
    fn test_new_mirror_has_no_status() {
        let mirror: SessionMirror<RawSimulation> = SessionMirror::new("g-1", Clock::default());
        assert_eq!(mirror.status(), None);
        assert!(!mirror.is_ended());
        assert!(mirror.user_list().is_empty());
        assert!(mirror.ready_user_list().is_empty());
    }

    #[test]
    fn test_replace_rebuilds_rosters() {
        let mut mirror: SessionMirror<RawSimulation> = SessionMirror::new("g-1", Clock::default());
        mirror.replace(
            snapshot(
                vec![participant("u1", true), participant("u2", false)],
                vec![client("c1", "u1"), client("c2", "u1"), client("c3", "u2")],
            ),
            None,
            HashMap::new(),
        );

        assert_eq!(mirror.status(), Some(SessionStatus::Open));
        assert_eq!(mirror.game_props()["mapSize"], 12);
        assert_eq!(mirror.start_at_tick(), Some(60));
        assert_eq!(mirror.tick_count(), 40);
        assert_eq!(mirror.user_list().len(), 2);
        assert_eq!(mirror.client_list().len(), 3);

        // Second import replaces rather than merges
        mirror.replace(
            snapshot(vec![participant("u3", false)], vec![]),
            None,
            HashMap::new(),
        );
        assert_eq!(mirror.user_list().len(), 1);
        assert!(mirror.participant("u1").is_none());
        assert!(mirror.client_list().is_empty());
    }

    #[test]
    fn test_ready_user_list_is_ready_subset() {
        let mut mirror: SessionMirror<RawSimulation> = SessionMirror::new("g-1", Clock::default());
        mirror.replace(
            snapshot(
                vec![
                    participant("u1", true),
                    participant("u2", false),
                    participant("u3", true),
                ],
                vec![],
            ),
            None,
            HashMap::new(),
        );

        let ready: Vec<&str> = mirror
            .ready_user_list()
            .iter()
            .map(|p| p.user.uid.as_str())
            .collect();
        assert_eq!(ready, vec!["u1", "u3"]);

        mirror.set_ready(UserProfile::new("u2"));
        assert_eq!(mirror.ready_user_list().len(), 3);
    }

    #[test]
    fn test_clients_grouped_by_user() {
        let mut mirror: SessionMirror<RawSimulation> = SessionMirror::new("g-1", Clock::default());
        mirror.replace(
            snapshot(
                vec![participant("u1", false), participant("u2", false)],
                vec![client("c1", "u1"), client("c2", "u1"), client("c3", "u2")],
            ),
            None,
            HashMap::new(),
        );

        let map = mirror.user_to_client_map();
        assert_eq!(map["u1"].len(), 2);
        assert_eq!(map["u2"].len(), 1);
        assert_eq!(mirror.clients_for_user("u1").len(), 2);
        assert!(mirror.clients_for_user("nobody").is_empty());
        assert_eq!(mirror.client("c3").map(|c| c.user_id.as_str()), Some("u2"));
    }
}
