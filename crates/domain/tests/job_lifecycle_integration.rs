//! Integration tests for the job lifecycle model
//!
//! Walks managed jobs through realistic lifecycles and checks the history
//! and failed-record invariants callers rely on.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use scribeflow_common::{classify, ServiceError};
use scribeflow_domain::{
    FailedJobRecord, FailureReport, JobPriority, JobStatus, ManagedJob, TranscriptionRequest,
    TranscriptionResult,
};

fn request() -> TranscriptionRequest {
    TranscriptionRequest::new("interview.mp3", "de-DE", vec!["https://storage/interview.mp3".into()])
        .with_property("diarizationEnabled", "true")
}

// ============================================================================
// Lifecycle Integration Tests
// ============================================================================

/// Test a job that fails once on a network error, retries and completes
///
/// Scenario: status polling times out, the job is resubmitted and finishes
#[test]
fn test_retry_then_complete_closes_history() {
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp");
    let job = ManagedJob::new(request(), JobPriority::High, serde_json::Value::Null, t0)
        .mark_submitted(t0 + ChronoDuration::seconds(1))
        .and_then(|j| j.mark_processing("remote-a", t0 + ChronoDuration::seconds(2)))
        .and_then(|j| j.retry("network timeout", t0 + ChronoDuration::seconds(30)))
        .and_then(|j| j.mark_processing("remote-b", t0 + ChronoDuration::seconds(31)))
        .and_then(|j| j.complete(TranscriptionResult::default(), t0 + ChronoDuration::seconds(90)))
        .expect("valid lifecycle");

    assert_eq!(job.status(), JobStatus::Completed);
    assert!(job.retry_count() >= 1);

    // Nothing follows the terminal entry
    let last = job.history().last().expect("history is never empty");
    assert_eq!(last.status, JobStatus::Completed);
    let terminal_entries = job.history().iter().filter(|e| e.status.is_terminal()).count();
    assert_eq!(terminal_entries, 1);

    // Timestamps in the history never go backwards
    assert!(job.history().windows(2).all(|w| w[0].at <= w[1].at));
}

/// Test building a failed-job record from a classified failure
///
/// Validates that the record carries the classification and due-ness logic
#[test]
fn test_failed_record_due_logic() {
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp");
    let error = ServiceError::remote_status(503, "service unavailable");
    let classification = classify(&error);

    let job = ManagedJob::new(request(), JobPriority::Normal, serde_json::Value::Null, t0)
        .mark_submitted(t0)
        .and_then(|j| {
            j.fail(
                FailureReport {
                    category: classification.category,
                    message: error.to_string(),
                    retry_possible: true,
                    suggested_action: Some(classification.suggestion.clone()),
                },
                t0,
            )
        })
        .expect("valid lifecycle");

    let record = FailedJobRecord {
        job,
        error,
        classification,
        attempts: 1,
        retry_after: t0 + ChronoDuration::minutes(5),
        failed_at: t0,
        resubmitted_as: None,
    };

    assert!(!record.is_due(t0, 3));
    assert!(record.is_due(t0 + ChronoDuration::minutes(5), 3));
    assert!(!record.is_due(t0 + ChronoDuration::minutes(5), 1));

    // A record already being re-attempted is never due twice
    let in_flight = FailedJobRecord { resubmitted_as: Some("job-2".into()), ..record.clone() };
    assert!(!in_flight.is_due(t0 + ChronoDuration::hours(1), 3));

    let json = serde_json::to_string(&record).expect("serialize record");
    let back: FailedJobRecord = serde_json::from_str(&json).expect("deserialize record");
    assert_eq!(back, record);
}
