use std::fmt;
use std::str::FromStr;

use snafu::Snafu;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum TimestampParseError {
    #[snafu(display("Invalid RFC-3339 timestamp `{input}`"))]
    Rfc3339 { input: String },
}

/// A wall-clock instant, always UTC.
///
/// Wraps [`OffsetDateTime`] but only ever holds the UTC offset; parsing
/// converts whatever offset the wire carried, and strings without an offset
/// are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    pub const UNIX_EPOCH: Self = Self(OffsetDateTime::UNIX_EPOCH);

    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn from_unix_seconds(secs: i64) -> Self {
        Self(
            OffsetDateTime::from_unix_timestamp(secs)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH)
                .to_offset(UtcOffset::UTC),
        )
    }

    pub fn from_unix_micros(micros: i64) -> Self {
        Self(
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH)
                .to_offset(UtcOffset::UTC),
        )
    }

    pub fn parse_rfc3339(s: &str) -> Result<Self, TimestampParseError> {
        let dt = OffsetDateTime::parse(s, &Rfc3339).map_err(|_| TimestampParseError::Rfc3339 {
            input: s.to_owned(),
        })?;
        Ok(Self(dt.to_offset(UtcOffset::UTC)))
    }

    pub fn to_rfc3339(self) -> String {
        self.0.format(&Rfc3339).expect("UTC formats")
    }

    /// The UTC calendar day this instant falls on, as `YYYY-MM-DD`.
    ///
    /// Used for the `created_date` day-bucket column of the post index.
    pub fn day_bucket(self) -> String {
        self.0
            .format(format_description!("[year]-[month]-[day]"))
            .expect("UTC formats")
    }

    pub fn unix_seconds(self) -> i64 {
        self.0.unix_timestamp()
    }

    /// Microseconds since the epoch; what the index stores so that rows
    /// order correctly regardless of fractional-second precision.
    pub fn unix_micros(self) -> i64 {
        (self.0.unix_timestamp_nanos() / 1_000) as i64
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d))
    }

    pub fn saturating_sub(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d))
    }

    pub fn elapsed_since(self, earlier: Self) -> Duration {
        self.0 - earlier.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_rfc3339(s)
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(dt: OffsetDateTime) -> Self {
        Self(dt.to_offset(UtcOffset::UTC))
    }
}

impl serde::Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> serde::Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse_rfc3339(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalises_to_utc() {
        let a = Timestamp::parse_rfc3339("2026-01-01T12:00:00+02:00").unwrap();
        let b = Timestamp::parse_rfc3339("2026-01-01T10:00:00Z").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_rfc3339(), "2026-01-01T10:00:00Z");
    }

    #[test]
    fn naive_timestamps_are_rejected() {
        assert!(Timestamp::parse_rfc3339("2026-01-01T12:00:00").is_err());
        assert!(Timestamp::parse_rfc3339("2026-01-01").is_err());
    }

    #[test]
    fn day_bucket_is_utc_day() {
        let ts = Timestamp::parse_rfc3339("2026-01-01T23:30:00-02:00").unwrap();
        assert_eq!(ts.day_bucket(), "2026-01-02");
    }

    #[test]
    fn ordering_matches_instant_order() {
        let early = Timestamp::parse_rfc3339("2026-01-01T00:10:00Z").unwrap();
        let late = Timestamp::parse_rfc3339("2026-01-01T12:00:00Z").unwrap();
        assert!(early < late);
    }
}
