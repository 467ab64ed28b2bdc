//! Domain types and models

pub mod job;
pub mod recovery;
pub mod remote;
pub mod request;
pub mod stats;
pub mod transcript;

pub use job::{FailureReport, JobId, JobPriority, JobStatus, ManagedJob, StatusEntry};
pub use recovery::{FailedJobRecord, RecoveryStrategy};
pub use remote::{
    QuotaUsage, RemoteFailure, RemoteJobStatus, ResultFile, ResultFileKind, StatusReport,
    SubmissionReceipt,
};
pub use request::TranscriptionRequest;
pub use stats::{JobLocation, JobSnapshot, RecoveryStatistics, SchedulerStatistics};
pub use transcript::{
    ticks_to_duration, RawAlternative, RawPhrase, RawTranscript, RawWord, SpeakerStatistics,
    TranscriptSegment, TranscriptionResult, WordTiming,
};
