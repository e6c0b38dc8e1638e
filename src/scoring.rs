//! Deterministic answer scoring
//!
//! This module contains the pure scoring functions shared by solo and team
//! play. The same formula is used for optimistic local feedback at
//! submission time and for aggregate team totals, so the two can never
//! disagree. Nothing in this module performs I/O or touches shared state.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize};

/// Sentinel string recorded when a player ran out of time without answering
const TIMEOUT_SENTINEL: &str = "timeout";

/// A question as fetched from the backend
///
/// Questions are immutable for the duration of the session once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Unique question identifier
    pub id: u64,
    /// Key of the correct answer option
    #[serde(alias = "correctOption", alias = "correct_option_key")]
    pub correct_option: String,
    /// Time allowed for answering, in seconds
    #[serde(alias = "timeLimitSeconds", alias = "timeLimit")]
    pub time_limit_seconds: u64,
    /// Points awarded for an instant correct answer
    #[serde(alias = "baseScore")]
    pub base_score: u64,
}

/// The option a player chose for a question
///
/// A player either selects one of the question's option keys or runs out
/// of time, which is recorded with a dedicated sentinel so the backend can
/// distinguish "answered wrong" from "never answered".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerChoice {
    /// The player picked the option with this key
    Selected(String),
    /// The player ran out of time without answering
    Timeout,
}

impl Display for AnswerChoice {
    /// Formats the choice as its wire representation
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Selected(key) => f.write_str(key),
            Self::Timeout => f.write_str(TIMEOUT_SENTINEL),
        }
    }
}

impl FromStr for AnswerChoice {
    type Err = std::convert::Infallible;

    /// Parses a choice from its wire representation
    ///
    /// Any string other than the timeout sentinel is taken as an option key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s == TIMEOUT_SENTINEL {
            Self::Timeout
        } else {
            Self::Selected(s.to_owned())
        })
    }
}

impl Serialize for AnswerChoice {
    /// Serializes the choice as its wire string
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AnswerChoice {
    /// Deserializes a choice from its wire string
    fn deserialize<D>(deserializer: D) -> Result<AnswerChoice, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().expect("parsing a choice cannot fail"))
    }
}

/// Determines whether a choice is the correct answer for a question
///
/// A timed-out answer is never correct.
pub fn is_correct(choice: &AnswerChoice, question: &Question) -> bool {
    match choice {
        AnswerChoice::Selected(key) => *key == question.correct_option,
        AnswerChoice::Timeout => false,
    }
}

/// Computes the score for a single answer
///
/// Incorrect answers score zero. Correct answers earn the question's base
/// score scaled down linearly with response time: an instant answer earns
/// the full base score, an answer at the time limit earns half. Response
/// times beyond the limit are clamped to the limit.
///
/// # Arguments
///
/// * `correct` - Whether the answer was correct
/// * `response_time_seconds` - Seconds the player took to answer
/// * `question` - The question being scored
///
/// # Returns
///
/// The points earned, in `[round(base/2), base]` for correct answers
pub fn score(correct: bool, response_time_seconds: u64, question: &Question) -> u64 {
    if !correct {
        return 0;
    }

    let ratio = if question.time_limit_seconds == 0 {
        1.0
    } else {
        (response_time_seconds as f64 / question.time_limit_seconds as f64).min(1.0)
    };
    let multiplier = 1.0 - ratio * 0.5;

    (question.base_score as f64 * multiplier).round() as u64
}

/// Aggregate score for one team
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeamScore {
    /// Sum of all member scores
    pub total: u64,
    /// Individual contribution per player id
    pub by_player: HashMap<u64, u64>,
}

/// Aggregates per-answer scores into team totals
///
/// Answers by players without a team assignment are skipped. Alongside the
/// team total, a per-player breakdown is kept so the interface can show
/// individual contribution.
///
/// # Arguments
///
/// * `scores` - `(player_id, points)` pairs, one per scored answer
/// * `team_of` - Resolves a player id to their team name, if any
///
/// # Returns
///
/// A map from team name to that team's aggregate score
pub fn team_totals<I, F>(scores: I, team_of: F) -> HashMap<String, TeamScore>
where
    I: IntoIterator<Item = (u64, u64)>,
    F: Fn(u64) -> Option<String>,
{
    scores
        .into_iter()
        .filter_map(|(player_id, points)| {
            team_of(player_id).map(|team| (team, (player_id, points)))
        })
        .into_group_map()
        .into_iter()
        .map(|(team, members)| {
            let mut team_score = TeamScore::default();
            for (player_id, points) in members {
                team_score.total += points;
                *team_score.by_player.entry(player_id).or_default() += points;
            }
            (team, team_score)
        })
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn question(base_score: u64, time_limit_seconds: u64) -> Question {
        Question {
            id: 1,
            correct_option: "b".to_owned(),
            time_limit_seconds,
            base_score,
        }
    }

    #[test]
    fn test_incorrect_answer_scores_zero() {
        let q = question(100, 30);
        assert_eq!(score(false, 0, &q), 0);
        assert_eq!(score(false, 30, &q), 0);
    }

    #[test]
    fn test_instant_answer_earns_full_points() {
        let q = question(100, 30);
        assert_eq!(score(true, 0, &q), 100);
    }

    #[test]
    fn test_half_time_answer() {
        let q = question(100, 30);
        // 1 - 0.5 * 0.5 = 0.75
        assert_eq!(score(true, 15, &q), 75);
    }

    #[test]
    fn test_full_time_answer_earns_half_points() {
        let q = question(100, 30);
        assert_eq!(score(true, 30, &q), 50);
    }

    #[test]
    fn test_overtime_is_clamped_to_the_limit() {
        let q = question(100, 30);
        assert_eq!(score(true, 90, &q), 50);
    }

    #[test]
    fn test_score_rounds_to_nearest() {
        let q = question(99, 30);
        // 99 * (1 - 0.5 * (10 / 30)) = 82.5
        assert_eq!(score(true, 10, &q), 83);
    }

    #[test]
    fn test_score_stays_within_bounds() {
        let q = question(137, 20);
        for t in 0..=40 {
            let s = score(true, t, &q);
            assert!(s >= (q.base_score as f64 * 0.5).round() as u64);
            assert!(s <= q.base_score);
        }
    }

    #[test]
    fn test_zero_time_limit_earns_half_points() {
        let q = question(100, 0);
        assert_eq!(score(true, 0, &q), 50);
    }

    #[test]
    fn test_is_correct() {
        let q = question(100, 30);
        assert!(is_correct(&AnswerChoice::Selected("b".to_owned()), &q));
        assert!(!is_correct(&AnswerChoice::Selected("a".to_owned()), &q));
        assert!(!is_correct(&AnswerChoice::Timeout, &q));
    }

    #[test]
    fn test_answer_choice_wire_format() {
        assert_eq!(AnswerChoice::Selected("c".to_owned()).to_string(), "c");
        assert_eq!(AnswerChoice::Timeout.to_string(), "timeout");

        let parsed: AnswerChoice = "timeout".parse().unwrap();
        assert_eq!(parsed, AnswerChoice::Timeout);
        let parsed: AnswerChoice = "c".parse().unwrap();
        assert_eq!(parsed, AnswerChoice::Selected("c".to_owned()));
    }

    #[test]
    fn test_answer_choice_serde_round_trip() {
        let serialized = serde_json::to_string(&AnswerChoice::Timeout).unwrap();
        assert_eq!(serialized, "\"timeout\"");
        let back: AnswerChoice = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, AnswerChoice::Timeout);
    }

    #[test]
    fn test_team_totals_sums_and_breaks_down() {
        let team_of = |id: u64| match id {
            1 | 2 => Some("Reds".to_owned()),
            3 => Some("Blues".to_owned()),
            _ => None,
        };

        let totals = team_totals(vec![(1, 75), (2, 50), (3, 100), (4, 10)], team_of);

        assert_eq!(totals.len(), 2);
        let reds = &totals["Reds"];
        assert_eq!(reds.total, 125);
        assert_eq!(reds.by_player[&1], 75);
        assert_eq!(reds.by_player[&2], 50);
        assert_eq!(totals["Blues"].total, 100);
    }

    #[test]
    fn test_team_totals_accumulates_repeat_answers() {
        let team_of = |_| Some("Reds".to_owned());
        let totals = team_totals(vec![(1, 75), (1, 25)], team_of);
        assert_eq!(totals["Reds"].total, 100);
        assert_eq!(totals["Reds"].by_player[&1], 100);
    }

    #[test]
    fn test_question_field_aliases() {
        let q: Question = serde_json::from_str(
            r#"{"id":5,"correctOption":"a","timeLimitSeconds":20,"baseScore":200}"#,
        )
        .unwrap();
        assert_eq!(q.correct_option, "a");
        assert_eq!(q.time_limit_seconds, 20);
        assert_eq!(q.base_score, 200);
    }
}
