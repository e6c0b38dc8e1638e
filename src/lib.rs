//! # Quizlive Session Core
//!
//! This library provides the client-side core of a live quiz session: it
//! keeps one managed connection to the real-time hub, normalizes the
//! loosely-typed events arriving over it, reconciles the player roster
//! from push events and periodic polls, and delivers scored answers
//! upstream with a durable local fallback.
//!
//! The crate performs no I/O of its own. Transports, the backend client,
//! and local storage plug in behind the [`connection::Connector`],
//! [`session::Backend`], and [`storage::KeyStore`] traits, and timers are
//! driven by the embedding application through [`AlarmMessage`].

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]

use serde::{Deserialize, Serialize};

pub mod config;
pub mod connection;
pub mod constants;
pub mod events;
pub mod roster;
pub mod scoring;
pub mod session;
pub mod session_code;
pub mod storage;
pub mod submission;

/// Messages for timed events across the session core
///
/// The core never sleeps or spawns timers itself: components hand one of
/// these to a caller-supplied scheduler together with a delay, and the
/// embedding application delivers it back through
/// [`session::LiveSession::receive_alarm`] once the delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::From, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Push-channel reconnect alarms
    Connection(connection::AlarmMessage),
    /// Session-level alarms, currently roster poll ticks
    Session(session::AlarmMessage),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_message_from_conversions() {
        let alarm: AlarmMessage = connection::AlarmMessage::RetryConnect { attempt: 2 }.into();
        assert!(matches!(
            alarm,
            AlarmMessage::Connection(connection::AlarmMessage::RetryConnect { attempt: 2 })
        ));

        let alarm: AlarmMessage = session::AlarmMessage::PollTick.into();
        assert!(matches!(alarm, AlarmMessage::Session(_)));
    }

    #[test]
    fn test_alarm_message_serde_round_trip() {
        let alarm: AlarmMessage = connection::AlarmMessage::RetryConnect { attempt: 1 }.into();
        let serialized = serde_json::to_string(&alarm).unwrap();
        let back: AlarmMessage = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, alarm);
    }
}
