//! Serde helpers shared by configuration and persisted records.
//!
//! Durations are written as whole milliseconds so config files and
//! persisted job snapshots stay readable and language-neutral.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// `Duration` as a `u64` millisecond count.
///
/// ```rust
/// use std::time::Duration;
///
/// use scribeflow_common::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct PollSettings {
///     #[serde(with = "duration_millis")]
///     base_interval: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    /// Serialize a `Duration` as milliseconds.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize milliseconds into a `Duration`.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// `Option<Duration>` as an optional millisecond count (`null` when absent).
pub mod option_duration_millis {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    /// Serialize an optional `Duration` as milliseconds or `null`.
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional milliseconds into an optional `Duration`.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Timings {
        #[serde(with = "duration_millis")]
        base_interval: Duration,
        #[serde(default, with = "option_duration_millis")]
        retry_after: Option<Duration>,
    }

    /// Durations are written as plain millisecond integers.
    #[test]
    fn test_duration_written_as_millis() {
        let timings = Timings {
            base_interval: Duration::from_millis(1500),
            retry_after: Some(Duration::from_secs(2)),
        };

        let json = serde_json::to_string(&timings).unwrap();
        assert_eq!(json, r#"{"base_interval":1500,"retry_after":2000}"#);
    }

    /// A missing optional duration deserializes to `None`.
    #[test]
    fn test_missing_optional_duration_is_none() {
        let timings: Timings = serde_json::from_str(r#"{"base_interval":10}"#).unwrap();

        assert_eq!(timings.base_interval, Duration::from_millis(10));
        assert_eq!(timings.retry_after, None);
    }

    /// An explicit `null` round-trips as `None`.
    #[test]
    fn test_null_optional_duration() {
        let timings = Timings { base_interval: Duration::ZERO, retry_after: None };

        let json = serde_json::to_string(&timings).unwrap();
        assert!(json.contains("\"retry_after\":null"));

        let back: Timings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, timings);
    }

    /// Non-numeric values are rejected.
    #[test]
    fn test_rejects_non_numeric_duration() {
        let result: Result<Timings, _> = serde_json::from_str(r#"{"base_interval":"soon"}"#);
        assert!(result.is_err());
    }
}
