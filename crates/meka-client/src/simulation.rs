//! Simulation engine boundary
//!
//! The engine owns game semantics (rules, legality, turn resolution). The client only
//! needs to decode snapshots, actions, commands and command responses, encode commands,
//! and apply a resolved turn. [`Simulation`] is that seam; [`RawSimulation`] is a JSON
//! passthrough engine for observers that don't link a real one.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SimulationError;

/// Field carrying the polymorphic command discriminator
pub const COMMAND_KIND_FIELD: &str = "className";

/// Operations the synchronization engine consumes from the simulation engine
pub trait Simulation: Send + Sync + 'static {
    /// Decoded game snapshot
    type Game: Send + Sync + 'static;
    /// Resolved effect applied during a turn
    type Action: Clone + Debug + Send + Sync + 'static;
    /// Intended instruction submitted by a client
    type Command: Clone + Debug + Send + Sync + 'static;
    /// Server verdict on a submitted command
    type CommandResponse: Clone + Debug + Send + Sync + 'static;

    /// Decode a full game snapshot
    fn decode_game(&self, json: &Value) -> Result<Self::Game, SimulationError>;

    /// The snapshot's own turn counter
    fn turn(&self, game: &Self::Game) -> u64;

    /// Decode one action against the current (pre-turn) game
    fn decode_action(&self, game: &Self::Game, json: &Value)
        -> Result<Self::Action, SimulationError>;

    /// Apply a resolved turn, in action order
    fn apply_turn(
        &self,
        game: &mut Self::Game,
        turn: u64,
        actions: Vec<Self::Action>,
    ) -> impl Future<Output = Result<(), SimulationError>> + Send;

    /// Decode a command whose discriminator is `kind`
    fn decode_command(
        &self,
        game: &Self::Game,
        json: &Value,
        kind: &str,
    ) -> Result<Self::Command, SimulationError>;

    /// Encode a command for the wire
    fn encode_command(&self, command: &Self::Command) -> Result<Value, SimulationError>;

    /// Decode a command response attached to a tick
    fn decode_command_response(
        &self,
        game: &Self::Game,
        json: &Value,
    ) -> Result<Self::CommandResponse, SimulationError>;

    /// Commands the snapshot considers outstanding, keyed by the acting unit
    fn pending_commands(&self, _game: &Self::Game) -> Vec<(String, Self::Command)> {
        Vec::new()
    }

    /// Decode a command by reading its `className` discriminator
    fn decode_tagged_command(
        &self,
        game: &Self::Game,
        json: &Value,
    ) -> Result<Self::Command, SimulationError> {
        let kind = command_kind(json)?;
        self.decode_command(game, json, kind)
    }
}

/// Read the `className` discriminator of a serialized command
pub fn command_kind(json: &Value) -> Result<&str, SimulationError> {
    json.get(COMMAND_KIND_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| SimulationError::Decode(format!("command has no '{COMMAND_KIND_FIELD}'")))
}

/// Function decoding one command kind
pub type CommandDecoder<G, C> = fn(&G, &Value) -> Result<C, SimulationError>;

/// Maps a command discriminator to its decoder
pub struct CommandRegistry<G, C> {
    decoders: HashMap<String, CommandDecoder<G, C>>,
}

impl<G, C> CommandRegistry<G, C> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder, replacing any previous one for `kind`
    pub fn register(&mut self, kind: impl Into<String>, decoder: CommandDecoder<G, C>) {
        self.decoders.insert(kind.into(), decoder);
    }

    /// Builder form of [`CommandRegistry::register`]
    pub fn with(mut self, kind: impl Into<String>, decoder: CommandDecoder<G, C>) -> Self {
        self.register(kind, decoder);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    pub fn decode(&self, game: &G, json: &Value, kind: &str) -> Result<C, SimulationError> {
        let decoder = self
            .decoders
            .get(kind)
            .ok_or_else(|| SimulationError::UnknownCommand(kind.to_string()))?;
        decoder(game, json)
    }
}

impl<G, C> Default for CommandRegistry<G, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Game snapshot kept as JSON, with the turn counter lifted out
#[derive(Debug, Clone, PartialEq)]
pub struct RawGame {
    pub turn: u64,
    pub state: Value,
    /// Actions applied by the most recent turn
    pub last_actions: Vec<Value>,
}

/// Command kept as JSON, with its discriminator lifted out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCommand {
    #[serde(rename = "className", default)]
    pub kind: String,
    #[serde(rename = "unitId", default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

/// Passthrough engine: keeps everything as JSON and only tracks the turn
#[derive(Debug, Clone, Default)]
pub struct RawSimulation;

impl Simulation for RawSimulation {
    type Game = RawGame;
    type Action = Value;
    type Command = RawCommand;
    type CommandResponse = Value;

    fn decode_game(&self, json: &Value) -> Result<RawGame, SimulationError> {
        let turn = match json.get("turn") {
            None | Some(Value::Null) => 0,
            Some(turn) => turn
                .as_u64()
                .ok_or_else(|| SimulationError::Decode(format!("invalid turn: {turn}")))?,
        };
        Ok(RawGame {
            turn,
            state: json.clone(),
            last_actions: Vec::new(),
        })
    }

    fn turn(&self, game: &RawGame) -> u64 {
        game.turn
    }

    fn decode_action(&self, _game: &RawGame, json: &Value) -> Result<Value, SimulationError> {
        Ok(json.clone())
    }

    async fn apply_turn(
        &self,
        game: &mut RawGame,
        turn: u64,
        actions: Vec<Value>,
    ) -> Result<(), SimulationError> {
        game.turn = turn;
        if let Value::Object(state) = &mut game.state {
            state.insert("turn".to_string(), Value::from(turn));
        }
        game.last_actions = actions;
        Ok(())
    }

    fn decode_command(
        &self,
        _game: &RawGame,
        json: &Value,
        kind: &str,
    ) -> Result<RawCommand, SimulationError> {
        let mut command: RawCommand = serde_json::from_value(json.clone())
            .map_err(|e| SimulationError::Decode(e.to_string()))?;
        command.kind = kind.to_string();
        Ok(command)
    }

    fn encode_command(&self, command: &RawCommand) -> Result<Value, SimulationError> {
        serde_json::to_value(command).map_err(|e| SimulationError::Encode(e.to_string()))
    }

    fn decode_command_response(
        &self,
        _game: &RawGame,
        json: &Value,
    ) -> Result<Value, SimulationError> {
        Ok(json.clone())
    }
}
