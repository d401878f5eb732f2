//! Syslog-style severity model stamped onto every outbound record.
//!
//! Severities are ordered numerically with `0` as the most urgent
//! (`Emergency`) and `7` as the least (`Debug`). The emission gate admits a
//! record when its numeric level is at or below the configured minimum, so
//! lowering the minimum level silences the chattier end of the scale.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The eight GELF severity levels, carried in the `level` field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Informational = 6,
    Debug = 7,
}

/// All severities in wire order, most urgent first.
pub const ALL_SEVERITIES: [Severity; 8] = [
    Severity::Emergency,
    Severity::Alert,
    Severity::Critical,
    Severity::Error,
    Severity::Warning,
    Severity::Notice,
    Severity::Informational,
    Severity::Debug,
];

impl Severity {
    /// Returns the numeric wire value (`0..=7`).
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maps a numeric wire value back to a severity.
    pub fn from_u8(value: u8) -> Option<Severity> {
        ALL_SEVERITIES.get(usize::from(value)).copied()
    }

    /// Returns the lower-case canonical name.
    pub const fn label(self) -> &'static str {
        match self {
            Severity::Emergency => "emergency",
            Severity::Alert => "alert",
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Informational => "informational",
            Severity::Debug => "debug",
        }
    }

    /// Emission gate: treating `self` as the configured minimum level,
    /// returns whether a record at `candidate` should be shipped.
    pub fn admits(self, candidate: Severity) -> bool {
        candidate.as_u8() <= self.as_u8()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a severity name or number cannot be recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised severity `{0}`")]
pub struct ParseSeverityError(pub String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    /// Parses canonical names, the common aliases (`warn`, `info`, `log`,
    /// `err`, `crit`), and bare numeric levels. Matching is
    /// case-insensitive.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalised = value.trim().to_ascii_lowercase();
        if let Ok(number) = normalised.parse::<u8>() {
            return Severity::from_u8(number).ok_or_else(|| ParseSeverityError(value.to_string()));
        }
        match normalised.as_str() {
            "emergency" | "emerg" => Ok(Severity::Emergency),
            "alert" => Ok(Severity::Alert),
            "critical" | "crit" => Ok(Severity::Critical),
            "error" | "err" => Ok(Severity::Error),
            "warning" | "warn" => Ok(Severity::Warning),
            "notice" => Ok(Severity::Notice),
            "informational" | "info" | "log" => Ok(Severity::Informational),
            "debug" => Ok(Severity::Debug),
            _ => Err(ParseSeverityError(value.to_string())),
        }
    }
}
