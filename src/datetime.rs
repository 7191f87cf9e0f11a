//! UTC timestamps with millisecond resolution.
//!
//! Server timestamps arrive as ISO8601 in JSON bodies and as RFC7231 in
//! `Date` headers. Everything stored in the datastore uses the ISO8601 form
//! `YYYY-MM-DDTHH:MM:SS.mmmZ`.

use std::fmt;

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

const ISO8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const RFC7231_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Signed span of time in milliseconds.
pub type Duration = TimeDelta;

/// A UTC instant truncated to whole milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime(chrono::DateTime<Utc>);

impl DateTime {
    /// The Unix epoch. Used as "unset".
    pub fn zero() -> Self {
        Self(chrono::DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_millis(Utc::now().timestamp_millis())
    }

    /// Whether this is the epoch value returned by [`DateTime::zero`].
    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Instant `ms` milliseconds after the epoch. Saturates to the epoch when
    /// out of range.
    pub fn from_millis(ms: i64) -> Self {
        chrono::DateTime::<Utc>::from_timestamp_millis(ms)
            .map(Self)
            .unwrap_or_else(Self::zero)
    }

    /// Milliseconds since the epoch.
    pub fn millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Parses an RFC3339/ISO8601 timestamp, e.g. `2019-01-14T17:22:23.168Z`.
    /// Sub-millisecond digits are dropped.
    pub fn from_iso8601(s: &str) -> Option<Self> {
        chrono::DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| Self::from_millis(dt.timestamp_millis()))
    }

    /// Parses an HTTP `Date` header value, e.g. `Wed, 03 Oct 2018 18:41:43 GMT`.
    pub fn from_rfc7231(s: &str) -> Option<Self> {
        chrono::DateTime::parse_from_rfc2822(s.trim())
            .ok()
            .map(|dt| Self::from_millis(dt.timestamp_millis()))
    }

    /// ISO8601 with millisecond precision and a `Z` suffix.
    pub fn to_iso8601(&self) -> String {
        self.0.format(ISO8601_FORMAT).to_string()
    }

    /// HTTP `Date` header form.
    pub fn to_rfc7231(&self) -> String {
        self.0.format(RFC7231_FORMAT).to_string()
    }

    /// `self - other`.
    pub fn diff(&self, other: &DateTime) -> Duration {
        Duration::milliseconds(self.millis() - other.millis())
    }

    /// `self + d`, saturating.
    pub fn add(&self, d: Duration) -> Self {
        Self::from_millis(self.millis().saturating_add(d.num_milliseconds()))
    }

    /// `self - d`, saturating.
    pub fn sub(&self, d: Duration) -> Self {
        Self::from_millis(self.millis().saturating_sub(d.num_milliseconds()))
    }
}

impl Default for DateTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_iso8601(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid ISO8601 timestamp: {raw:?}")))
    }
}
