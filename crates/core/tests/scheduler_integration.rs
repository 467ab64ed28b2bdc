//! Integration tests for job scheduling through the public orchestrator API
//!
//! Covers priority ordering, concurrency slots, cancellation and
//! retention against in-memory service fakes.

use std::sync::Arc;
use std::time::Duration;

use scribeflow_common::MockClock;
use scribeflow_core::testing::{
    fast_config, sample_request, sample_transcript, test_credentials, wait_until, InMemoryResultFetcher,
    ScriptedGateway, ScriptedStatusQuery,
};
use scribeflow_core::{Collaborators, Orchestrator, OrchestratorEvent};
use scribeflow_domain::{
    JobId, JobLocation, JobPriority, JobStatus, OrchestratorConfig, RemoteJobStatus, StatusReport,
};

struct Fixture {
    orchestrator: Orchestrator<MockClock>,
    gateway: Arc<ScriptedGateway>,
    clock: MockClock,
}

fn fixture(config: OrchestratorConfig, status: ScriptedStatusQuery) -> Fixture {
    let clock = MockClock::new();
    let gateway = Arc::new(ScriptedGateway::new());
    let collaborators = Collaborators::new(
        gateway.clone(),
        Arc::new(status),
        Arc::new(InMemoryResultFetcher::new(sample_transcript())),
        test_credentials(),
    );
    let orchestrator = Orchestrator::with_clock(config, collaborators, clock.clone()).expect("valid config");
    Fixture { orchestrator, gateway, clock }
}

fn single_slot() -> OrchestratorConfig {
    let mut config = fast_config();
    config.scheduler.max_concurrent_jobs = 1;
    config
}

async fn submit(f: &Fixture, name: &str, priority: JobPriority) -> JobId {
    f.orchestrator.submit(sample_request(name), priority, serde_json::Value::Null).await.expect("submit")
}

async fn run_to_terminal(f: &Fixture, id: &JobId) -> bool {
    wait_until(Duration::from_secs(30), || {
        f.orchestrator.tick();
        f.orchestrator.status(id).is_some_and(|s| s.job.is_terminal())
    })
    .await
}

// ===== Priority Ordering =====

/// Validates tier ordering with FIFO tie-break inside a tier.
///
/// # Test Steps
/// 1. Queue A(normal), B(high), C(normal) with one slot
/// 2. Drive ticks until every job completes
///
/// # Assertions
/// - Confirms the gateway saw B, then A, then C
#[tokio::test(start_paused = true)]
async fn test_dequeue_order_follows_priority_then_fifo() {
    let f = fixture(single_slot(), ScriptedStatusQuery::succeeding());
    let a = submit(&f, "A", JobPriority::Normal).await;
    let b = submit(&f, "B", JobPriority::High).await;
    let c = submit(&f, "C", JobPriority::Normal).await;

    for id in [&b, &a, &c] {
        assert!(run_to_terminal(&f, id).await);
    }

    assert_eq!(f.gateway.submitted(), vec!["B", "A", "C"]);
    let stats = f.orchestrator.statistics();
    assert_eq!(stats.total_completed, 3);
    assert_eq!(stats.queued, 0);
}

/// Validates that an urgent job overtakes earlier normal jobs when a slot
/// frees.
///
/// # Test Steps
/// 1. Occupy the only slot with a job that never finishes
/// 2. Queue five normal jobs, then one urgent job
/// 3. Cancel the running job and tick once
///
/// # Assertions
/// - Confirms the urgent job is the one dispatched
#[tokio::test(start_paused = true)]
async fn test_urgent_job_preempts_queued_normals() {
    let f = fixture(single_slot(), ScriptedStatusQuery::new(vec![StatusReport::new(RemoteJobStatus::Running)]));
    let running = submit(&f, "running", JobPriority::Normal).await;
    assert_eq!(f.orchestrator.tick(), 1);
    assert!(wait_until(Duration::from_secs(5), || f.gateway.calls() == 1).await);

    for i in 0..5 {
        submit(&f, &format!("normal-{i}"), JobPriority::Normal).await;
    }
    let urgent = submit(&f, "urgent", JobPriority::Urgent).await;
    assert_eq!(f.orchestrator.tick(), 0);

    assert!(f.orchestrator.cancel(&running).await);
    assert_eq!(f.orchestrator.tick(), 1);

    assert_eq!(f.orchestrator.status(&urgent).unwrap().location, JobLocation::Active);
    assert!(wait_until(Duration::from_secs(5), || f.gateway.calls() == 2).await);
    assert_eq!(f.gateway.submitted().last().map(String::as_str), Some("urgent"));
    assert_eq!(f.orchestrator.statistics().queued, 5);
    f.orchestrator.shutdown();
}

// ===== Lifecycle Events =====

#[tokio::test(start_paused = true)]
async fn test_lifecycle_events_in_order() {
    let f = fixture(single_slot(), ScriptedStatusQuery::succeeding());
    let mut rx = f.orchestrator.subscribe();
    let id = submit(&f, "events", JobPriority::Normal).await;
    assert!(run_to_terminal(&f, &id).await);

    let mut transitions = Vec::new();
    let mut saw_progress = false;
    let mut saw_completed = false;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.job_id(), &id);
        match event {
            OrchestratorEvent::JobStatusChanged { to, .. } => transitions.push(to),
            OrchestratorEvent::JobProgress { .. } => saw_progress = true,
            OrchestratorEvent::JobCompleted { segments, .. } => {
                saw_completed = true;
                assert_eq!(segments, 2);
            }
            _ => {}
        }
    }

    assert_eq!(transitions, vec![JobStatus::Submitted, JobStatus::Processing, JobStatus::Completed]);
    assert!(saw_progress);
    assert!(saw_completed);
}

// ===== Cancellation and Retention =====

#[tokio::test(start_paused = true)]
async fn test_cancelled_job_is_evicted_after_retention() {
    let mut config = single_slot();
    config.scheduler.retention = Duration::from_secs(300);
    let f = fixture(config, ScriptedStatusQuery::succeeding());
    let id = submit(&f, "short-lived", JobPriority::Low).await;

    assert!(f.orchestrator.cancel(&id).await);
    assert_eq!(f.orchestrator.status(&id).unwrap().location, JobLocation::Cancelled);

    f.clock.advance(Duration::from_secs(301));
    assert_eq!(f.orchestrator.cleanup().await, 1);
    assert!(f.orchestrator.status(&id).is_none());
    assert_eq!(f.orchestrator.statistics().total_cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_limit() {
    let mut config = fast_config();
    config.scheduler.max_concurrent_jobs = 2;
    let f = fixture(config, ScriptedStatusQuery::succeeding());
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(submit(&f, &format!("job-{i}"), JobPriority::Normal).await);
    }

    let all_done = wait_until(Duration::from_secs(30), || {
        f.orchestrator.tick();
        assert!(f.orchestrator.statistics().active <= 2);
        ids.iter().all(|id| f.orchestrator.status(id).is_some_and(|s| s.job.is_terminal()))
    })
    .await;

    assert!(all_done);
    assert_eq!(f.orchestrator.statistics().total_completed, 6);
}

// ===== Multi-threaded Runtime =====

/// Validates the full pipeline on a real multi-threaded runtime with jobs
/// submitted from several tasks at once.
///
/// # Test Steps
/// 1. Submit twelve jobs from four concurrent tasks
/// 2. Tick from the test task until every job is terminal
///
/// # Assertions
/// - Confirms every job completes exactly once
/// - Confirms concurrency stayed within the configured limit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_on_multi_thread_runtime() {
    let mut config = fast_config();
    config.scheduler.max_concurrent_jobs = 3;
    let gateway = Arc::new(ScriptedGateway::new());
    let collaborators = Collaborators::new(
        gateway.clone(),
        Arc::new(ScriptedStatusQuery::succeeding()),
        Arc::new(InMemoryResultFetcher::new(sample_transcript())),
        test_credentials(),
    );
    let orchestrator = Orchestrator::new(config, collaborators).expect("valid config");

    let mut submitters = Vec::new();
    for worker in 0..4 {
        let orchestrator = orchestrator.clone();
        submitters.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..3 {
                let request = sample_request(&format!("w{worker}-{i}"));
                ids.push(orchestrator.submit(request, JobPriority::Normal, serde_json::Value::Null).await.unwrap());
            }
            ids
        }));
    }
    let mut ids = Vec::new();
    for handle in submitters {
        ids.extend(handle.await.unwrap());
    }
    assert_eq!(ids.len(), 12);

    let all_done = wait_until(Duration::from_secs(20), || {
        orchestrator.tick();
        assert!(orchestrator.statistics().active <= 3);
        ids.iter().all(|id| orchestrator.status(id).is_some_and(|s| s.job.status() == JobStatus::Completed))
    })
    .await;

    assert!(all_done);
    assert_eq!(gateway.calls(), 12);
    assert_eq!(orchestrator.statistics().total_completed, 12);
}
