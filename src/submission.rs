//! Answer submission pipeline
//!
//! This module guarantees that an answer a player gave is never silently
//! lost. Submissions are validated, scored locally for optimistic
//! feedback, and then pushed upstream through an ordered cascade of
//! delivery strategies; when every strategy fails, the answer is parked in
//! the local store and replayed by [`SubmissionPipeline::flush_pending`]
//! once connectivity returns. Each answer carries a unique submission id
//! so the backend can deduplicate replays.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

use crate::config::CoreOptions;
use crate::constants::submission::ID_SUFFIX_LENGTH;
use crate::scoring::{self, AnswerChoice, Question};
use crate::storage::{self, KeyStore, PENDING_PREFIX, pending_key};

/// Errors surfaced by the submission pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// The answer failed validation and was never scored or sent
    #[error("invalid answer: {0}")]
    InvalidAnswer(#[from] garde::Report),
    /// Upstream delivery failed and the local fallback write also failed
    #[error("answer could not be delivered or cached: {0}")]
    Storage(#[from] storage::Error),
}

/// An upstream delivery shape for a scored answer
///
/// The backend's answer endpoint has gone through several shapes; the
/// pipeline tries them in configured order and stops at the first one the
/// backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitStrategy {
    /// Minimal query-style payload keyed by ids only
    CompactQuery,
    /// Payload nested under the player resource
    PlayerScoped,
    /// Flat generic payload with every field inline
    Generic,
    /// Full canonical answer resource
    CanonicalResource,
}

/// An answer as entered by a player, before validation
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct AnswerInput {
    /// Server-assigned id of the answering player
    #[garde(range(min = 1))]
    pub player_id: u64,
    /// Id of the question being answered
    #[garde(skip)]
    pub question_id: u64,
    /// The option the player chose, or the timeout sentinel
    #[garde(skip)]
    pub choice: AnswerChoice,
    /// Seconds the player took to answer; negative values are rejected
    #[garde(range(min = 0))]
    pub response_time_seconds: i64,
}

/// A validated, scored answer ready for upstream delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Unique id used by the backend to deduplicate replayed deliveries
    pub submission_id: String,
    /// Server-assigned id of the answering player
    pub player_id: u64,
    /// Id of the question answered
    pub question_id: u64,
    /// The recorded choice
    pub choice: AnswerChoice,
    /// Seconds the player took to answer
    pub response_time_seconds: u64,
    /// Whether the choice matched the question's correct option
    pub is_correct: bool,
    /// Locally computed points for optimistic display
    pub computed_score: u64,
    /// The player's team at submission time, if any
    pub team_name: Option<String>,
}

/// An answer parked locally after every delivery strategy failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubmission {
    /// The undelivered answer
    pub record: AnswerRecord,
    /// When the answer was parked
    pub stored_at: SystemTime,
}

/// Error raised by an [`AnswerSink`] for a single delivery attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The backend does not accept this delivery shape
    #[error("delivery shape rejected")]
    ShapeRejected,
    /// The delivery failed for transport or server reasons
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Upstream destination for scored answers
///
/// One attempt per call; the pipeline owns retry and fallback ordering.
pub trait AnswerSink {
    /// Delivers one answer using the given strategy
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the backend rejected or could not receive
    /// the delivery.
    fn submit_answer(
        &self,
        strategy: SubmitStrategy,
        record: &AnswerRecord,
        deadline: Duration,
    ) -> Result<(), SinkError>;
}

/// How a submission concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The backend accepted the answer
    Recorded {
        /// The strategy that succeeded
        strategy: SubmitStrategy,
        /// The delivered record
        record: AnswerRecord,
    },
    /// Every strategy failed; the answer is parked for later replay
    CachedLocally {
        /// The parked record
        record: AnswerRecord,
    },
}

impl SubmitOutcome {
    /// The record produced by this submission, delivered or parked
    pub fn record(&self) -> &AnswerRecord {
        match self {
            Self::Recorded { record, .. } | Self::CachedLocally { record } => record,
        }
    }
}

/// Builds a submission id unique per attempt
///
/// Replays of a parked answer keep the id from its first attempt, so the
/// backend counts a delivered-then-replayed answer once.
fn make_submission_id(player_id: u64, question_id: u64) -> String {
    let millis = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(ID_SUFFIX_LENGTH)
        .collect();
    format!("{player_id}-{question_id}-{millis}-{suffix}")
}

/// Delivers scored answers upstream with ordered fallback and a durable
/// local safety net
#[derive(Debug, Clone)]
pub struct SubmissionPipeline {
    strategies: Vec<SubmitStrategy>,
    strategy_delay: Duration,
    deadline: Duration,
}

impl SubmissionPipeline {
    /// Creates a pipeline from the session options
    pub fn from_options(options: &CoreOptions) -> Self {
        Self {
            strategies: options.strategies.clone(),
            strategy_delay: options.strategy_delay,
            deadline: options.network_deadline,
        }
    }

    /// Tries each configured strategy in order, pausing between attempts
    ///
    /// Returns the strategy that succeeded, or `None` if all were tried.
    fn deliver<B: AnswerSink, D: FnMut(Duration)>(
        &self,
        sink: &B,
        record: &AnswerRecord,
        delay: &mut D,
    ) -> Option<SubmitStrategy> {
        for (index, strategy) in self.strategies.iter().copied().enumerate() {
            if index > 0 {
                delay(self.strategy_delay);
            }
            match sink.submit_answer(strategy, record, self.deadline) {
                Ok(()) => return Some(strategy),
                Err(error) => {
                    tracing::warn!(
                        submission_id = %record.submission_id,
                        ?strategy,
                        %error,
                        "delivery strategy failed"
                    );
                }
            }
        }
        None
    }

    /// Validates, scores, and delivers one answer
    ///
    /// The answer is scored locally before any network attempt so the
    /// interface can show feedback immediately. If every delivery strategy
    /// fails, the scored record is written to the local store for later
    /// replay and the submission still counts as concluded.
    ///
    /// # Arguments
    ///
    /// * `sink` - Upstream destination for the scored answer
    /// * `store` - Local store receiving the record if delivery fails
    /// * `input` - The raw answer as entered
    /// * `question` - The question being answered
    /// * `team_name` - The player's team at submission time, if any
    /// * `delay` - Sleeps between consecutive strategy attempts
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidAnswer`] if the input fails validation
    /// * [`Error::Storage`] if delivery failed and the fallback write to
    ///   the local store also failed
    pub fn submit<B: AnswerSink, S: KeyStore, D: FnMut(Duration)>(
        &self,
        sink: &B,
        store: &mut S,
        input: &AnswerInput,
        question: &Question,
        team_name: Option<String>,
        mut delay: D,
    ) -> Result<SubmitOutcome, Error> {
        input.validate()?;

        let correct = scoring::is_correct(&input.choice, question);
        // Non-negative after validation.
        let response_time_seconds = input.response_time_seconds as u64;
        let record = AnswerRecord {
            submission_id: make_submission_id(input.player_id, input.question_id),
            player_id: input.player_id,
            question_id: input.question_id,
            choice: input.choice.clone(),
            response_time_seconds,
            is_correct: correct,
            computed_score: scoring::score(correct, response_time_seconds, question),
            team_name,
        };

        if let Some(strategy) = self.deliver(sink, &record, &mut delay) {
            return Ok(SubmitOutcome::Recorded { strategy, record });
        }

        let pending = PendingSubmission {
            record: record.clone(),
            stored_at: SystemTime::now(),
        };
        let serialized = serde_json::to_string(&pending)
            .map_err(|e| storage::Error::WriteFailed(e.to_string()))?;
        store.set(&pending_key(&record.submission_id), &serialized)?;
        tracing::warn!(
            submission_id = %record.submission_id,
            "all delivery strategies failed, answer parked locally"
        );

        Ok(SubmitOutcome::CachedLocally { record })
    }

    /// Replays every parked answer, removing the ones that get through
    ///
    /// Records that no longer parse are dropped with a warning since they
    /// can never be delivered. Returns the number of answers delivered.
    pub fn flush_pending<B: AnswerSink, S: KeyStore, D: FnMut(Duration)>(
        &self,
        sink: &B,
        store: &mut S,
        mut delay: D,
    ) -> usize {
        let pending_keys: Vec<String> = store
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(PENDING_PREFIX))
            .collect();

        let mut delivered = 0;
        for key in pending_keys {
            let Some(serialized) = store.get(&key) else {
                continue;
            };
            let pending: PendingSubmission = match serde_json::from_str(&serialized) {
                Ok(pending) => pending,
                Err(error) => {
                    tracing::warn!(%key, %error, "dropping unreadable parked answer");
                    store.remove(&key);
                    continue;
                }
            };

            if self.deliver(sink, &pending.record, &mut delay).is_some() {
                store.remove(&key);
                delivered += 1;
            }
        }
        delivered
    }
}
