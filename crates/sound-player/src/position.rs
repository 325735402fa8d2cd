//! Hour/minute/second playback positions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A playback position split into `hour:minute:second`.
///
/// Values built through [`PlaybackPosition::from_seconds`] always keep
/// `minute` and `second` below 60.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlaybackPosition {
    pub hour: u64,
    pub minute: u64,
    pub second: u64,
}

impl PlaybackPosition {
    pub fn new(hour: u64, minute: u64, second: u64) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// Split an elapsed-seconds count into hours, minutes and seconds.
    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            hour: seconds / 3600,
            minute: (seconds / 60) % 60,
            second: seconds % 60,
        }
    }

    /// Total elapsed seconds. Saturates instead of overflowing for hand-built values.
    pub fn to_seconds(&self) -> u64 {
        self.hour
            .saturating_mul(3600)
            .saturating_add(self.minute.saturating_mul(60))
            .saturating_add(self.second)
    }
}

impl From<Duration> for PlaybackPosition {
    fn from(value: Duration) -> Self {
        Self::from_seconds(value.as_secs())
    }
}

impl fmt::Display for PlaybackPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Error returned when a position string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsePositionError {
    #[error("empty position")]
    Empty,
    #[error("too many fields in position: {0}")]
    TooManyFields(String),
    #[error("invalid number in position: {0}")]
    InvalidNumber(String),
    #[error("{field} out of range (must be < 60): {value}")]
    OutOfRange { field: &'static str, value: u64 },
}

impl FromStr for PlaybackPosition {
    type Err = ParsePositionError;

    /// Accepts `SS`, `M:SS` and `H:MM:SS`. A lone field may exceed 59 and is
    /// treated as a plain seconds count.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParsePositionError::Empty);
        }
        let fields = s
            .split(':')
            .map(|part| {
                part.trim()
                    .parse::<u64>()
                    .map_err(|_| ParsePositionError::InvalidNumber(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let check = |field: &'static str, value: u64| {
            if value < 60 {
                Ok(value)
            } else {
                Err(ParsePositionError::OutOfRange { field, value })
            }
        };

        match fields.as_slice() {
            [seconds] => Ok(Self::from_seconds(*seconds)),
            [minute, second] => {
                let second = check("second", *second)?;
                Ok(Self::from_seconds(minute.saturating_mul(60).saturating_add(second)))
            }
            [hour, minute, second] => Ok(Self::new(
                *hour,
                check("minute", *minute)?,
                check("second", *second)?,
            )),
            _ => Err(ParsePositionError::TooManyFields(s.to_string())),
        }
    }
}
