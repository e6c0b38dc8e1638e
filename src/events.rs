//! Inbound event normalization and dispatch
//!
//! The push channel delivers loosely-typed envelopes whose event names and
//! payload fields vary in casing and wording between backend deployments.
//! This module folds those shapes into one tagged [`GameEvent`] per logical
//! event: each logical field is resolved through an ordered alias table
//! (first present, non-null value wins), and each logical event is
//! recognized both under its several wire names and nested inside a generic
//! `message` envelope carrying a sub-type tag.
//!
//! The [`Dispatcher`] routes normalized events to subscribers in
//! registration order; a failing handler is logged and never prevents the
//! handlers after it from running.

use enum_map::{Enum, EnumMap};
use heck::ToSnakeCase;
use serde_json::{Map, Value};
use thiserror::Error;

/// A raw inbound event as delivered by the push channel
#[derive(Debug, Clone)]
pub struct RawEnvelope {
    /// The wire event name
    pub name: String,
    /// The untyped payload
    pub payload: Value,
}

impl RawEnvelope {
    /// Creates an envelope from a wire name and payload
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Wire names under which a player-joined event may arrive
const PLAYER_JOINED_NAMES: &[&str] = &["PlayerJoined", "playerJoined", "player_joined"];

/// Wire names under which a game-started event may arrive
const GAME_STARTED_NAMES: &[&str] = &["GameStarted", "gameStarted", "game_started"];

/// Wire names of the generic message envelope wrapping a tagged sub-event
const MESSAGE_ENVELOPE_NAMES: &[&str] = &["message", "Message", "ReceiveMessage"];

/// Alias keys carrying the sub-type tag inside a generic message envelope
const TYPE_TAG_ALIASES: &[&str] = &["type", "event", "messageType", "kind"];

/// Alias keys carrying the nested payload inside a generic message envelope
const BODY_ALIASES: &[&str] = &["payload", "data", "body"];

/// Alias keys for a player's server-assigned id
const PLAYER_ID_ALIASES: &[&str] = &["id", "playerId", "player_id"];

/// Alias keys for a player's nickname
const NICKNAME_ALIASES: &[&str] = &["nickname", "name", "playerName", "player_name"];

/// Alias keys for a player's avatar reference
const AVATAR_ALIASES: &[&str] = &["avatar", "avatarRef", "avatar_ref", "avatarUrl"];

/// Alias keys for a player's team name
const TEAM_NAME_ALIASES: &[&str] = &["teamName", "team_name", "team", "groupName"];

/// The kind of a logical event, without its payload
///
/// Used to key handler registration in the [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum EventKind {
    /// A player joined the session
    PlayerJoined,
    /// The host started the game
    GameStarted,
}

/// Normalized payload of a player-joined event
///
/// Fields absent from the wire payload stay `None`; downstream components
/// decide the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerJoined {
    /// Server-assigned player id, if already known
    pub id: Option<u64>,
    /// Display name the player joined with
    pub nickname: Option<String>,
    /// Reference to the player's chosen avatar
    pub avatar: Option<String>,
    /// Team the player belongs to, in team mode
    pub team_name: Option<String>,
}

/// A normalized logical event
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum GameEvent {
    /// A player joined the session
    PlayerJoined(PlayerJoined),
    /// The host started the game
    GameStarted,
}

impl GameEvent {
    /// Returns the kind of this event without its payload
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PlayerJoined(_) => EventKind::PlayerJoined,
            Self::GameStarted => EventKind::GameStarted,
        }
    }
}

/// Checks whether a wire name denotes one of the given candidates
///
/// Exact matches are tried first; a snake-case fold catches novel casings
/// of a known name.
fn matches_name(name: &str, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| *c == name)
        || candidates
            .iter()
            .any(|c| c.to_snake_case() == name.to_snake_case())
}

/// Resolves a logical field from an ordered alias table
///
/// The first alias present with a non-null value wins. When no alias
/// matches exactly, keys are compared after a snake-case fold so unseen
/// casings of a known alias still resolve.
fn resolve<'a>(map: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    for alias in aliases {
        if let Some(value) = map.get(*alias) {
            if !value.is_null() {
                return Some(value);
            }
        }
    }

    for alias in aliases {
        let folded = alias.to_snake_case();
        if let Some(value) = map
            .iter()
            .find(|(k, _)| k.to_snake_case() == folded)
            .map(|(_, v)| v)
        {
            if !value.is_null() {
                return Some(value);
            }
        }
    }

    None
}

/// Extracts a string field through its alias table
fn resolve_string(map: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    resolve(map, aliases).and_then(|v| v.as_str()).map(str::to_owned)
}

/// Extracts a numeric id that may arrive as a JSON number or numeric string
fn resolve_id(map: &Map<String, Value>, aliases: &[&str]) -> Option<u64> {
    resolve(map, aliases).and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

/// Normalizes a raw envelope into a logical event
///
/// Returns `None` for events the core does not recognize; the caller is
/// expected to log and drop those.
pub fn normalize(envelope: &RawEnvelope) -> Option<GameEvent> {
    normalize_named(&envelope.name, &envelope.payload)
}

fn normalize_named(name: &str, payload: &Value) -> Option<GameEvent> {
    if matches_name(name, PLAYER_JOINED_NAMES) {
        let map = payload.as_object();
        return Some(GameEvent::PlayerJoined(PlayerJoined {
            id: map.and_then(|m| resolve_id(m, PLAYER_ID_ALIASES)),
            nickname: map.and_then(|m| resolve_string(m, NICKNAME_ALIASES)),
            avatar: map.and_then(|m| resolve_string(m, AVATAR_ALIASES)),
            team_name: map.and_then(|m| resolve_string(m, TEAM_NAME_ALIASES)),
        }));
    }

    if matches_name(name, GAME_STARTED_NAMES) {
        return Some(GameEvent::GameStarted);
    }

    if matches_name(name, MESSAGE_ENVELOPE_NAMES) {
        let map = payload.as_object()?;
        let tag = resolve_string(map, TYPE_TAG_ALIASES)?;
        // The sub-event's fields may sit in a nested body or directly
        // alongside the tag.
        let body = resolve(map, BODY_ALIASES).unwrap_or(payload);
        return normalize_named(&tag, body);
    }

    None
}

/// Error reported by an event handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event handler failed: {0}")]
pub struct HandlerError(pub String);

/// A subscriber callback for one logical event kind
pub type Handler = Box<dyn FnMut(&GameEvent) -> Result<(), HandlerError> + Send>;

/// Routes normalized events to registered subscribers
///
/// Handlers are invoked synchronously, in registration order, on the
/// calling context. Handler failures are isolated: they are logged and the
/// remaining handlers still run.
#[derive(Default)]
pub struct Dispatcher {
    handlers: EnumMap<EventKind, Vec<Handler>>,
}

impl std::fmt::Debug for Dispatcher {
    /// Debug formatting that reports handler counts rather than closures
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field(
                "handler_counts",
                &self
                    .handlers
                    .iter()
                    .map(|(kind, v)| (kind, v.len()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a logical event kind
    ///
    /// Multiple handlers may be registered per kind; they run in
    /// registration order.
    pub fn subscribe(&mut self, kind: EventKind, handler: Handler) {
        self.handlers[kind].push(handler);
    }

    /// Normalizes a raw envelope and dispatches the resulting event
    ///
    /// # Returns
    ///
    /// The normalized event if the envelope was recognized, `None` otherwise
    pub fn dispatch(&mut self, envelope: &RawEnvelope) -> Option<GameEvent> {
        match normalize(envelope) {
            Some(event) => {
                self.dispatch_event(&event);
                Some(event)
            }
            None => {
                tracing::debug!(name = %envelope.name, "dropping unrecognized event");
                None
            }
        }
    }

    /// Dispatches an already-normalized event to its subscribers
    pub fn dispatch_event(&mut self, event: &GameEvent) {
        for handler in &mut self.handlers[event.kind()] {
            if let Err(e) = handler(event) {
                tracing::warn!(kind = ?event.kind(), error = %e, "event handler failed");
            }
        }
    }
}
