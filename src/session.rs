//! Live session facade
//!
//! [`LiveSession`] is the embedding application's single entry point: it
//! owns the connection manager, the event dispatcher, the roster, and the
//! submission pipeline, and exposes the handful of operations a hosting
//! view needs. All mutable state sits behind one mutex, so push events,
//! poll ticks, and submissions observe each other's effects in a single
//! total order.
//!
//! The session carries no runtime of its own: timers arrive as
//! [`crate::AlarmMessage`] values through [`LiveSession::receive_alarm`],
//! and blocking pauses go through caller-supplied closures.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::CoreOptions;
use crate::connection::{self, ConnectionManager, ConnectionState, Connector};
use crate::events::{Dispatcher, EventKind, GameEvent, PlayerJoined, RawEnvelope};
use crate::roster::{Player, PlayerSnapshot, Roster, Team};
use crate::scoring::Question;
use crate::session_code::SessionCode;
use crate::storage::{self, KeyStore, player_id_key, roster_key};
use crate::submission::{self, AnswerInput, AnswerSink, SubmissionPipeline, SubmitOutcome};

/// Candidate remote method names for starting the game, in preference order
const START_GAME_METHODS: &[&str] = &["StartGame", "startGame", "BeginGame", "start_game"];

/// Whether scores are individual or aggregated per team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    /// Every player scores for themselves
    Solo,
    /// Player scores roll up into team totals
    Team,
}

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Created, players may join, questions not yet running
    Pending,
    /// The host started the game
    Started,
    /// The session was torn down
    Ended,
}

/// Error raised by a [`Backend`] request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("backend request failed: {0}")]
pub struct BackendError(pub String);

/// The request/response side of the platform backend
///
/// Implementations wrap the HTTP client; answer delivery reuses the
/// [`AnswerSink`] contract so the pipeline can replay parked answers
/// against the same backend.
pub trait Backend: AnswerSink {
    /// Fetches the authoritative player listing for a session
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the listing could not be fetched
    /// within the deadline.
    fn fetch_players(
        &self,
        code: SessionCode,
        deadline: Duration,
    ) -> Result<Vec<PlayerSnapshot>, BackendError>;
}

/// Alarm messages scheduled by the session facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Fetch the player listing and merge it into the roster
    PollTick,
}

/// Errors surfaced by the session facade
#[derive(Error, Debug)]
pub enum Error {
    /// The supplied options failed validation
    #[error("invalid session options: {0}")]
    InvalidOptions(#[from] garde::Report),
    /// A push-channel operation failed
    #[error(transparent)]
    Connection(#[from] connection::Error),
    /// An answer submission failed
    #[error(transparent)]
    Submission(#[from] submission::Error),
    /// The local store rejected a write
    #[error(transparent)]
    Storage(#[from] storage::Error),
}

/// Mutable session state behind the facade's mutex
struct Inner<S> {
    phase: SessionPhase,
    roster: Roster,
    dispatcher: Dispatcher,
    store: S,
    active: bool,
}

/// A live quiz session as seen by the hosting view
pub struct LiveSession<C: Connector, B: Backend, S: KeyStore> {
    code: SessionCode,
    mode: SessionMode,
    options: CoreOptions,
    connection: ConnectionManager<C>,
    backend: B,
    pipeline: SubmissionPipeline,
    inner: Mutex<Inner<S>>,
}

impl<C: Connector, B: Backend, S: KeyStore> std::fmt::Debug for LiveSession<C, B, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("code", &self.code)
            .field("mode", &self.mode)
            .field("phase", &self.lock().phase)
            .finish_non_exhaustive()
    }
}

impl<C: Connector, B: Backend, S: KeyStore> LiveSession<C, B, S> {
    /// Creates a session for the given code
    ///
    /// The roster cached by a previous run under the same code is restored
    /// from `store`, so a reloaded hosting view shows players immediately.
    /// Nothing touches the network until [`connect`](Self::connect) or the
    /// first poll tick.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if `options` fails validation.
    pub fn new(
        code: SessionCode,
        mode: SessionMode,
        options: CoreOptions,
        connector: C,
        endpoint: impl Into<String>,
        backend: B,
        store: S,
    ) -> Result<Self, Error> {
        options.validate()?;

        let roster = match store.get(&roster_key(code)) {
            Some(cached) => serde_json::from_str(&cached).unwrap_or_else(|error| {
                tracing::warn!(%code, %error, "discarding unreadable cached roster");
                Roster::new()
            }),
            None => Roster::new(),
        };

        Ok(Self {
            code,
            connection: ConnectionManager::new(connector, endpoint, &options),
            pipeline: SubmissionPipeline::from_options(&options),
            mode,
            options,
            backend,
            inner: Mutex::new(Inner {
                phase: SessionPhase::Pending,
                roster,
                dispatcher: Dispatcher::new(),
                store,
                active: true,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The code addressing this session
    pub fn code(&self) -> SessionCode {
        self.code
    }

    /// The scoring mode of this session
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// The current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    /// Whether the push channel is live
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Whether the session runs without a push channel, on polling alone
    pub fn is_degraded(&self) -> bool {
        self.connection.is_degraded()
    }

    /// The current push-channel state
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// A snapshot of the reconciled roster
    pub fn roster(&self) -> Vec<Player> {
        self.lock().roster.players().to_vec()
    }

    /// The current team grouping, sorted by team name
    pub fn teams(&self) -> Vec<Team> {
        self.lock().roster.teams()
    }

    /// Opens the push channel
    ///
    /// A failure is not fatal: the session stays usable on polling alone
    /// and background reconnects keep running through `schedule`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if every transport failed.
    pub fn connect<F: FnMut(crate::AlarmMessage, Duration)>(
        &self,
        schedule: F,
    ) -> Result<(), Error> {
        self.connection.connect(schedule)?;
        Ok(())
    }

    /// Reports an unexpected push-channel closure
    pub fn notify_closed<F: FnMut(crate::AlarmMessage, Duration)>(&self, schedule: F) {
        self.connection.notify_closed(schedule);
    }

    /// Registers a callback for player-joined events
    ///
    /// Callbacks run synchronously while the session lock is held and must
    /// not call back into the session.
    pub fn on_player_joined<F: FnMut(&PlayerJoined) + Send + 'static>(&self, mut callback: F) {
        self.lock().dispatcher.subscribe(
            EventKind::PlayerJoined,
            Box::new(move |event| {
                if let GameEvent::PlayerJoined(joined) = event {
                    callback(joined);
                }
                Ok(())
            }),
        );
    }

    /// Registers a callback for the game-started event
    ///
    /// Callbacks run synchronously while the session lock is held and must
    /// not call back into the session.
    pub fn on_game_started<F: FnMut() + Send + 'static>(&self, mut callback: F) {
        self.lock().dispatcher.subscribe(
            EventKind::GameStarted,
            Box::new(move |_| {
                callback();
                Ok(())
            }),
        );
    }

    /// Writes the current roster to the local cache
    fn cache_roster(&self, inner: &mut Inner<S>) {
        match serde_json::to_string(&inner.roster) {
            Ok(serialized) => {
                if let Err(error) = inner.store.set(&roster_key(self.code), &serialized) {
                    tracing::warn!(code = %self.code, %error, "failed to cache roster");
                }
            }
            Err(error) => {
                tracing::warn!(code = %self.code, %error, "failed to serialize roster");
            }
        }
    }

    /// Feeds one raw push-channel event through normalization, state
    /// updates, and subscriber callbacks
    ///
    /// Unrecognized events are logged and dropped. Roster and phase are
    /// updated before callbacks run, so a callback reading the session
    /// observes the event's effect.
    pub fn handle_raw_event(&self, envelope: &RawEnvelope) {
        let Some(event) = crate::events::normalize(envelope) else {
            tracing::debug!(name = %envelope.name, "dropping unrecognized event");
            return;
        };

        let inner = &mut *self.lock();
        match &event {
            GameEvent::PlayerJoined(joined) => {
                if inner.roster.apply_join(joined).is_some() {
                    self.cache_roster(inner);
                }
            }
            GameEvent::GameStarted => {
                if inner.phase == SessionPhase::Pending {
                    inner.phase = SessionPhase::Started;
                }
            }
        }
        inner.dispatcher.dispatch_event(&event);
    }

    /// Runs one roster poll and schedules the next tick
    ///
    /// Poll failures are logged and skipped; the loop keeps running until
    /// [`teardown`](Self::teardown). Call this once to start the loop;
    /// subsequent ticks arrive through [`receive_alarm`](Self::receive_alarm).
    pub fn poll_tick<F: FnMut(crate::AlarmMessage, Duration)>(&self, mut schedule: F) {
        let inner = &mut *self.lock();
        if !inner.active {
            return;
        }

        match self
            .backend
            .fetch_players(self.code, self.options.network_deadline)
        {
            Ok(snapshot) => {
                inner.roster.apply_snapshot(&snapshot);
                self.cache_roster(inner);
            }
            Err(error) => {
                tracing::warn!(code = %self.code, %error, "roster poll failed");
            }
        }

        schedule(
            crate::AlarmMessage::from(AlarmMessage::PollTick),
            self.options.poll_interval,
        );
    }

    /// Handles a scheduled alarm, routing it to the owning component
    pub fn receive_alarm<F: FnMut(crate::AlarmMessage, Duration)>(
        &self,
        message: crate::AlarmMessage,
        schedule: F,
    ) {
        match message {
            crate::AlarmMessage::Connection(message) => {
                self.connection.receive_alarm(message, schedule);
            }
            crate::AlarmMessage::Session(AlarmMessage::PollTick) => {
                self.poll_tick(schedule);
            }
        }
    }

    /// Starts the game for every participant
    ///
    /// The start command cascades through the known remote method names;
    /// on success the local phase advances and game-started callbacks run,
    /// without waiting for the event to echo back over the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the channel is down or no candidate
    /// method was accepted.
    pub fn start_game<W: FnMut(Duration)>(&self, wait: W) -> Result<(), Error> {
        self.connection
            .invoke(START_GAME_METHODS, &json!({"sessionCode": self.code}), wait)?;

        let inner = &mut *self.lock();
        if inner.phase == SessionPhase::Pending {
            inner.phase = SessionPhase::Started;
        }
        inner.dispatcher.dispatch_event(&GameEvent::GameStarted);
        Ok(())
    }

    /// Submits a player's answer for a question
    ///
    /// In team mode the player's current team is attached to the record so
    /// team totals can be recomputed server-side. See
    /// [`SubmissionPipeline::submit`] for delivery and fallback behavior.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submission`] if the input is invalid or the local
    /// fallback write failed.
    pub fn submit_answer<D: FnMut(Duration)>(
        &self,
        input: &AnswerInput,
        question: &Question,
        delay: D,
    ) -> Result<SubmitOutcome, Error> {
        let inner = &mut *self.lock();
        let team_name = match self.mode {
            SessionMode::Team => inner.roster.team_of(input.player_id),
            SessionMode::Solo => None,
        };

        let outcome = self.pipeline.submit(
            &self.backend,
            &mut inner.store,
            input,
            question,
            team_name,
            delay,
        )?;
        Ok(outcome)
    }

    /// Replays answers parked by earlier failed submissions
    ///
    /// Intended to be called when connectivity returns. Returns the number
    /// of answers delivered.
    pub fn flush_pending<D: FnMut(Duration)>(&self, delay: D) -> usize {
        let inner = &mut *self.lock();
        self.pipeline
            .flush_pending(&self.backend, &mut inner.store, delay)
    }

    /// Persists the local player's server-assigned id
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store rejected the write.
    pub fn remember_player_id(&self, player_id: u64) -> Result<(), Error> {
        self.lock()
            .store
            .set(&player_id_key(self.code), &player_id.to_string())?;
        Ok(())
    }

    /// Recalls the local player's server-assigned id from a previous run
    pub fn recall_player_id(&self) -> Option<u64> {
        self.lock()
            .store
            .get(&player_id_key(self.code))
            .and_then(|value| value.parse().ok())
    }

    /// Ends the session
    ///
    /// Closes the push channel and stops the poll loop; alarms that fire
    /// after teardown are no-ops.
    pub fn teardown(&self) {
        {
            let inner = &mut *self.lock();
            inner.active = false;
            inner.phase = SessionPhase::Ended;
        }
        self.connection.disconnect();
    }
}
