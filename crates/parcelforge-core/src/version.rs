//! Four-part provider versions.
//!
//! Versions are packed into a single `u64`, sixteen bits per part
//! (`major.minor.build.revision`), so ordering is a plain integer compare.

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A totally ordered `major.minor.build.revision` version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderVersion(u64);

impl ProviderVersion {
    /// The version assigned when nothing else is known: `0.0.0.1`.
    pub const MINIMUM: ProviderVersion = ProviderVersion(1);

    /// The unset version (`0.0.0.0`).
    pub const UNSET: ProviderVersion = ProviderVersion(0);

    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self(
            (u64::from(major) << 48)
                | (u64::from(minor) << 32)
                | (u64::from(build) << 16)
                | u64::from(revision),
        )
    }

    pub fn major(&self) -> u16 {
        ((self.0 >> 48) & 0xFFFF) as u16
    }

    pub fn minor(&self) -> u16 {
        ((self.0 >> 32) & 0xFFFF) as u16
    }

    pub fn build(&self) -> u16 {
        ((self.0 >> 16) & 0xFFFF) as u16
    }

    pub fn revision(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// `true` for `0.0.0.0`.
    pub fn is_unset(&self) -> bool {
        self.0 == 0
    }

    /// Lenient parse. Missing or non-numeric parts become zero, so this never fails.
    ///
    /// A short string carrying a pre-release dash (`"1-a"`) sorts just below
    /// the corresponding release.
    pub fn parse_lenient(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return Self::UNSET;
        }

        let mut parts = [0u16; 4];
        for (slot, part) in parts.iter_mut().zip(input.split('.')) {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            *slot = digits.parse().unwrap_or(0);
        }

        let release = Self::new(parts[0], parts[1], parts[2], 0);
        if input.len() <= 3 && input.contains('-') {
            return Self(release.0.saturating_sub(1));
        }
        Self::new(parts[0], parts[1], parts[2], parts[3])
    }

    /// Encode a timestamp as `year.month.day.seconds-of-day`.
    ///
    /// Seconds past 65535 saturate; the result still orders by date.
    pub fn from_timestamp<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> Self {
        let seconds = timestamp.num_seconds_from_midnight().min(u32::from(u16::MAX));
        Self::new(
            timestamp.year().clamp(0, i32::from(u16::MAX)) as u16,
            timestamp.month() as u16,
            timestamp.day() as u16,
            seconds as u16,
        )
    }

    /// Return `self` unless it is unset, in which case `fallback`.
    pub fn or(self, fallback: ProviderVersion) -> ProviderVersion {
        if self.is_unset() {
            fallback
        } else {
            self
        }
    }
}

impl fmt::Display for ProviderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major(),
            self.minor(),
            self.build(),
            self.revision()
        )
    }
}

impl FromStr for ProviderVersion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_lenient(s))
    }
}

impl From<&str> for ProviderVersion {
    fn from(s: &str) -> Self {
        Self::parse_lenient(s)
    }
}

impl Serialize for ProviderVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProviderVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}
