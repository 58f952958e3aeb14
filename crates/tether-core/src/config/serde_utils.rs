//! Serde helpers for configuration files

/// `Duration` as a number of seconds
///
/// Whole durations are written as integers; fractional ones as floats so
/// sub-second heartbeat settings survive a save/load cycle. Both forms are
/// accepted on input.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "tether_core::config::serde_utils::duration_secs")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(SecondsVisitor)
    }

    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative number of seconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(v).map_err(E::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        #[serde(with = "duration_secs")]
        timeout: Duration,
    }

    #[test]
    fn test_whole_seconds() {
        let config = TestConfig {
            timeout: Duration::from_secs(30),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"timeout":30}"#);

        let parsed: TestConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_fractional_seconds() {
        let parsed: TestConfig = serde_json::from_str(r#"{"timeout":0.25}"#).unwrap();
        assert_eq!(parsed.timeout, Duration::from_millis(250));

        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, r#"{"timeout":0.25}"#);
    }

    #[test]
    fn test_negative_rejected() {
        assert!(serde_json::from_str::<TestConfig>(r#"{"timeout":-1}"#).is_err());
        assert!(serde_json::from_str::<TestConfig>(r#"{"timeout":-0.5}"#).is_err());
    }

    #[test]
    fn test_toml_integer() {
        let parsed: TestConfig = toml::from_str("timeout = 45").unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(45));
    }
}
