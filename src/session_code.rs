//! Session code generation and management
//!
//! This module provides the opaque identity used to address a live session.
//! Codes are short decimal numbers so a host can read them out loud, and
//! they serialize as strings to survive backends that mangle large JSON
//! numbers. The code is the partition key for every roster, storage, and
//! event lookup in the crate.

use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

/// Minimum value for generated session codes (six decimal digits)
const MIN_VALUE: u32 = 100_000;
/// Upper bound (exclusive) for generated session codes
const MAX_VALUE: u32 = 1_000_000;

/// A unique identifier for a live session
///
/// Session codes are generated randomly within a fixed range so they always
/// display as six decimal digits. The code is immutable once a session is
/// created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionCode(u32);

impl SessionCode {
    /// Creates a new random session code
    ///
    /// The code is generated within the valid range to ensure it displays
    /// as a 6-digit decimal number for easy communication.
    pub fn new() -> Self {
        Self(fastrand::u32(MIN_VALUE..MAX_VALUE))
    }
}

impl Default for SessionCode {
    /// Creates a new random session code (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionCode {
    /// Formats the session code as a 6-digit decimal number
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

impl Serialize for SessionCode {
    /// Serializes the session code as a decimal string
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionCode {
    /// Deserializes a session code from a decimal string
    fn deserialize<D>(deserializer: D) -> Result<SessionCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SessionCode::from_str(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

impl FromStr for SessionCode {
    type Err = ParseIntError;

    /// Parses a session code from a decimal string representation
    ///
    /// # Errors
    ///
    /// Returns a `ParseIntError` if the string cannot be parsed as a
    /// decimal number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_session_code_new_in_range() {
        for _ in 0..100 {
            let code = SessionCode::new();
            assert!(code.0 >= MIN_VALUE);
            assert!(code.0 < MAX_VALUE);
        }
    }

    #[test]
    fn test_session_code_display_format() {
        assert_eq!(SessionCode(MIN_VALUE).to_string(), "100000");
        assert_eq!(SessionCode(123_456).to_string(), "123456");
        assert_eq!(SessionCode(MAX_VALUE - 1).to_string(), "999999");
    }

    #[test]
    fn test_session_code_from_str() {
        let code = SessionCode::from_str("123456").unwrap();
        assert_eq!(code.0, 123_456);
    }

    #[test]
    fn test_session_code_from_str_invalid() {
        assert!(SessionCode::from_str("not a code").is_err());
        assert!(SessionCode::from_str("").is_err());
    }

    #[test]
    fn test_session_code_serialization() {
        let code = SessionCode(123_456);
        let serialized = serde_json::to_string(&code).unwrap();
        assert_eq!(serialized, "\"123456\"");

        let deserialized: SessionCode = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, code);
    }

    #[test]
    fn test_session_code_deserialization_error() {
        // Number instead of string
        let result: Result<SessionCode, _> = serde_json::from_str("123456");
        assert!(result.is_err());
    }
}
