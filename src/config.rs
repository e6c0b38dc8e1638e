//! Runtime options for the session core
//!
//! Embedding applications tune the session through [`CoreOptions`]; every
//! field is validated against the bounds in [`crate::constants`] before a
//! session accepts it, so timing mistakes (a zero poll interval, an
//! unbounded deadline) are caught at construction instead of in
//! production.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::constants;
use crate::submission::SubmitStrategy;

/// Validates that a duration falls within an inclusive millisecond range
fn validate_duration_millis<const MIN_MS: u64, const MAX_MS: u64>(
    value: &Duration,
    _context: &(),
) -> garde::Result {
    let millis = value.as_millis();
    if millis < u128::from(MIN_MS) {
        return Err(garde::Error::new(format!(
            "must be at least {MIN_MS} milliseconds"
        )));
    }
    if millis > u128::from(MAX_MS) {
        return Err(garde::Error::new(format!(
            "must be at most {MAX_MS} milliseconds"
        )));
    }
    Ok(())
}

/// Validates that a duration falls within an inclusive second range
fn validate_duration_seconds<const MIN_S: u64, const MAX_S: u64>(
    value: &Duration,
    _context: &(),
) -> garde::Result {
    let seconds = value.as_secs();
    if seconds < MIN_S {
        return Err(garde::Error::new(format!("must be at least {MIN_S} seconds")));
    }
    if seconds > MAX_S {
        return Err(garde::Error::new(format!("must be at most {MAX_S} seconds")));
    }
    Ok(())
}

/// Tunable behavior of a live session
///
/// The defaults are the production values; tests shrink the timings to keep
/// runs fast. Options are immutable once handed to a session.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CoreOptions {
    /// Background reconnect attempts before the channel parks in `Failed`
    #[garde(range(min = 1, max = constants::connection::MAX_RETRY_BUDGET))]
    pub retry_budget: u8,
    /// Base backoff between reconnect attempts; grows linearly per attempt
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[garde(custom(validate_duration_millis::<100, 60_000>))]
    pub retry_backoff: Duration,
    /// How long an invoke waits for a reconnect in flight before failing
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[garde(custom(validate_duration_millis::<0, 5_000>))]
    pub invoke_grace: Duration,
    /// Interval between roster poll ticks
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[garde(custom(validate_duration_seconds::<
        { constants::polling::MIN_POLL_INTERVAL },
        { constants::polling::MAX_POLL_INTERVAL },
    >))]
    pub poll_interval: Duration,
    /// Overall deadline for a single network call
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[garde(custom(validate_duration_millis::<
        100,
        { constants::network::MAX_DEADLINE_MS },
    >))]
    pub network_deadline: Duration,
    /// Ordered answer delivery strategies; the first accepted one wins
    #[garde(length(min = 1))]
    pub strategies: Vec<SubmitStrategy>,
    /// Pause between consecutive delivery strategy attempts
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[garde(custom(validate_duration_millis::<
        0,
        { constants::submission::MAX_STRATEGY_DELAY_MS },
    >))]
    pub strategy_delay: Duration,
}

impl Default for CoreOptions {
    /// Production defaults from [`crate::constants`]
    fn default() -> Self {
        Self {
            retry_budget: constants::connection::DEFAULT_RETRY_BUDGET,
            retry_backoff: Duration::from_millis(constants::connection::DEFAULT_RETRY_BACKOFF_MS),
            invoke_grace: Duration::from_millis(constants::connection::DEFAULT_INVOKE_GRACE_MS),
            poll_interval: Duration::from_secs(constants::polling::DEFAULT_POLL_INTERVAL),
            network_deadline: Duration::from_millis(constants::network::DEFAULT_DEADLINE_MS),
            strategies: vec![
                SubmitStrategy::CompactQuery,
                SubmitStrategy::PlayerScoped,
                SubmitStrategy::Generic,
                SubmitStrategy::CanonicalResource,
            ],
            strategy_delay: Duration::from_millis(
                constants::submission::DEFAULT_STRATEGY_DELAY_MS,
            ),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        CoreOptions::default().validate().unwrap();
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let options = CoreOptions {
            poll_interval: Duration::ZERO,
            ..CoreOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_oversized_poll_interval_is_rejected() {
        let options = CoreOptions {
            poll_interval: Duration::from_secs(3_600),
            ..CoreOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_zero_retry_budget_is_rejected() {
        let options = CoreOptions {
            retry_budget: 0,
            ..CoreOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_excessive_retry_budget_is_rejected() {
        let options = CoreOptions {
            retry_budget: constants::connection::MAX_RETRY_BUDGET + 1,
            ..CoreOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_empty_strategy_list_is_rejected() {
        let options = CoreOptions {
            strategies: Vec::new(),
            ..CoreOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_unbounded_deadline_is_rejected() {
        let options = CoreOptions {
            network_deadline: Duration::from_secs(300),
            ..CoreOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_serde_uses_plain_numbers() {
        let options = CoreOptions::default();
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["retry_backoff"], 2_000);
        assert_eq!(value["poll_interval"], 7);

        let back: CoreOptions = serde_json::from_value(value).unwrap();
        assert_eq!(back, options);
    }
}
