//! Conversions between infrastructure errors and domain errors.

use scribeflow_domain::OrchestratorError;

use super::InfraError;

/* -------------------------------------------------------------------------- */
/* external errors → InfraError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for InfraError {
    fn from(error: toml::de::Error) -> Self {
        Self::Config(format!("Invalid TOML format: {error}"))
    }
}

impl From<tokio::task::JoinError> for InfraError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::TaskJoin(error.to_string())
    }
}

/* -------------------------------------------------------------------------- */
/* InfraError → OrchestratorError */
/* -------------------------------------------------------------------------- */

impl From<InfraError> for OrchestratorError {
    fn from(error: InfraError) -> Self {
        match error {
            InfraError::Orchestrator(inner) => inner,
            InfraError::Config(message) => Self::Config(message),
            other => Self::Persistence(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_persistence() {
        let err = InfraError::io("/tmp/x.json", std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"));

        let mapped = OrchestratorError::from(err);

        assert!(matches!(mapped, OrchestratorError::Persistence(ref m) if m.contains("/tmp/x.json")));
    }

    #[test]
    fn test_wrapped_orchestrator_error_unwraps() {
        let err = InfraError::from(OrchestratorError::QueueFull { capacity: 3 });
        assert_eq!(OrchestratorError::from(err), OrchestratorError::QueueFull { capacity: 3 });
    }

    #[test]
    fn test_json_error_is_serialization() {
        let err: InfraError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, InfraError::Serialization(_)));
    }
}
