//! Macro for implementing Display and FromStr for status enums
//!
//! Job statuses, priorities and remote statuses all travel as lowercase
//! strings in logs, config files and persisted snapshots. This macro keeps
//! the two conversions in one place.
//!
//! # Example
//!
//! ```rust
//! use scribeflow_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Stage {
//!     Queued,
//!     Running,
//!     Done,
//! }
//!
//! impl_domain_status_conversions!(Stage {
//!     Queued => "queued",
//!     Running => "running",
//!     Done => "done",
//! });
//!
//! assert_eq!("RUNNING".parse::<Stage>(), Ok(Stage::Running));
//! ```

/// Implements Display and FromStr traits for status enums
///
/// - Display writes the given lowercase string
/// - FromStr parses case-insensitively and names the enum on failure
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        Waiting,
        HalfDone,
    }

    impl_domain_status_conversions!(Phase {
        Waiting => "waiting",
        HalfDone => "half_done",
    });

    #[test]
    fn test_display_conversion() {
        assert_eq!(Phase::Waiting.to_string(), "waiting");
        assert_eq!(Phase::HalfDone.to_string(), "half_done");
    }

    #[test]
    fn test_fromstr_ignores_case() {
        assert_eq!(Phase::from_str("WAITING").unwrap(), Phase::Waiting);
        assert_eq!(Phase::from_str("Half_Done").unwrap(), Phase::HalfDone);
    }

    #[test]
    fn test_fromstr_invalid() {
        let result = Phase::from_str("later");
        assert_eq!(result.unwrap_err(), "Invalid Phase: later");
        assert!(Phase::from_str("").is_err());
    }
}
