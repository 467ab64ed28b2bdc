//! Port interfaces for the orchestrator's collaborators
//!
//! The remote transcription service is reached through three ports
//! ([`SubmissionGateway`], [`StatusQuery`], [`ResultFetcher`]); the rest
//! cover validation, credentials, notifications and persistence. Infra
//! provides concrete adapters; `testing` provides in-memory fakes.

use std::fmt;

use async_trait::async_trait;
use scribeflow_common::ServiceError;
use scribeflow_domain::{
    FailedJobRecord, JobId, ManagedJob, Result, ResultFile, StatusReport, SubmissionReceipt,
    TranscriptionRequest,
};

use crate::events::RecoveryNotification;

/* -------------------------------------------------------------------------- */
/* Credentials */
/* -------------------------------------------------------------------------- */

/// Subscription credentials for the remote service.
///
/// `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub region: Option<String>,
    key: String,
}

impl Credentials {
    /// Credentials for `key` with no region.
    pub fn new<K: Into<String>>(key: K) -> Self {
        Self { region: None, key: key.into() }
    }

    #[must_use]
    pub fn with_region<R: Into<String>>(mut self, region: R) -> Self {
        self.region = Some(region.into());
        self
    }

    /// The raw key. Never log it.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("region", &self.region).field("key", &"[REDACTED]").finish()
    }
}

/// Supplies credentials for each outbound call.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> std::result::Result<Credentials, ServiceError>;
}

/// Fixed credentials.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    /// Always supply `credentials`.
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> std::result::Result<Credentials, ServiceError> {
        Ok(self.0.clone())
    }
}

/* -------------------------------------------------------------------------- */
/* Remote service */
/* -------------------------------------------------------------------------- */

/// Creates jobs on the remote service.
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    /// Submit a request; `config` is the caller's opaque job configuration.
    async fn submit(
        &self,
        request: &TranscriptionRequest,
        config: &serde_json::Value,
        credentials: &Credentials,
    ) -> std::result::Result<SubmissionReceipt, ServiceError>;
}

/// Reads the status of a remote job.
#[async_trait]
pub trait StatusQuery: Send + Sync {
    async fn query_status(
        &self,
        external_id: &str,
        credentials: &Credentials,
    ) -> std::result::Result<StatusReport, ServiceError>;
}

/// Lists and downloads the artifacts of a finished remote job.
#[async_trait]
pub trait ResultFetcher: Send + Sync {
    async fn list_result_files(
        &self,
        external_id: &str,
        credentials: &Credentials,
    ) -> std::result::Result<Vec<ResultFile>, ServiceError>;

    async fn download_file(
        &self,
        file: &ResultFile,
        credentials: &Credentials,
    ) -> std::result::Result<Vec<u8>, ServiceError>;
}

/* -------------------------------------------------------------------------- */
/* Validation */
/* -------------------------------------------------------------------------- */

/// Outcome of request validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    /// An outcome with no errors.
    pub fn valid() -> Self {
        Self::default()
    }

    /// `true` when no errors were found.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a request before it is queued.
pub trait RequestValidator: Send + Sync {
    fn validate(&self, request: &TranscriptionRequest) -> ValidationOutcome;
}

/// Structural checks only: at least one http(s) content URL, a locale and
/// a display name.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicRequestValidator;

impl RequestValidator for BasicRequestValidator {
    fn validate(&self, request: &TranscriptionRequest) -> ValidationOutcome {
        let mut errors = Vec::new();

        if request.display_name.trim().is_empty() {
            errors.push("display name must not be empty".to_string());
        }
        if request.locale.trim().is_empty() {
            errors.push("locale must not be empty".to_string());
        }
        if request.content_urls.is_empty() {
            errors.push("at least one content URL is required".to_string());
        }
        for url in &request.content_urls {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                errors.push(format!("content URL '{url}' must use http or https"));
            }
        }

        ValidationOutcome { errors }
    }
}

/* -------------------------------------------------------------------------- */
/* Notifications */
/* -------------------------------------------------------------------------- */

/// Receives recovery notifications. Delivery is best effort: errors are
/// logged and never fail orchestration.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &RecoveryNotification) -> std::result::Result<(), ServiceError>;
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify(&self, _notification: &RecoveryNotification) -> std::result::Result<(), ServiceError> {
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* Persistence */
/* -------------------------------------------------------------------------- */

/// Durable storage for job snapshots and parked failure records.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_job(&self, job: &ManagedJob) -> Result<()>;
    async fn remove_job(&self, id: &JobId) -> Result<()>;
    async fn load_jobs(&self) -> Result<Vec<ManagedJob>>;

    /// Records are keyed by the id of the job they were parked for.
    async fn save_failed(&self, record: &FailedJobRecord) -> Result<()>;
    async fn remove_failed(&self, id: &JobId) -> Result<()>;
    async fn load_failed(&self) -> Result<Vec<FailedJobRecord>>;
}

/* -------------------------------------------------------------------------- */
/* Recovery */
/* -------------------------------------------------------------------------- */

/// Queues a fresh job for a parked record. Implemented by the scheduler.
#[async_trait]
pub trait JobResubmitter: Send + Sync {
    async fn resubmit(&self, record: &FailedJobRecord) -> Result<JobId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(urls: Vec<String>) -> TranscriptionRequest {
        TranscriptionRequest::new("call.wav", "en-US", urls)
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new("super-secret").with_region("westeurope");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("westeurope"));
        assert_eq!(creds.key(), "super-secret");
    }

    #[test]
    fn test_basic_validator_accepts_well_formed_request() {
        let outcome = BasicRequestValidator.validate(&request(vec!["https://blob/call.wav".into()]));
        assert!(outcome.is_valid());
    }

    #[test]
    fn test_basic_validator_collects_every_error() {
        let mut req = request(vec!["ftp://blob/call.wav".into()]);
        req.locale = String::new();
        let outcome = BasicRequestValidator.validate(&req);
        assert_eq!(outcome.errors.len(), 2);

        let outcome = BasicRequestValidator.validate(&request(vec![]));
        assert_eq!(outcome.errors, vec!["at least one content URL is required".to_string()]);
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let provider = StaticCredentials::new(Credentials::new("k"));
        assert_eq!(provider.credentials().await.unwrap().key(), "k");
    }
}
