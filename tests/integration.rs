use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use todos_resilience::{
    BreakerError, BreakerResult, CircuitBreaker, FailureCountPolicy, Outcome, RecordingSink,
    RollingWindow, State, UpstreamError,
};

// Custom error type that implements Error trait
#[derive(Debug)]
struct TestError(String);

impl TestError {
    fn new(msg: &str) -> Self {
        TestError(msg.to_string())
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test error: {}", self.0)
    }
}

impl Error for TestError {}

const NAME: &str = "test";

fn breaker(sink: &Arc<RecordingSink>) -> CircuitBreaker<TestError> {
    CircuitBreaker::<TestError>::builder(NAME)
        .timeout(Duration::from_millis(100))
        .error_threshold_percentage(50.0)
        .volume_threshold(4)
        .reset_timeout(Duration::from_secs(1))
        .rolling_window(Duration::from_secs(10), 10)
        .probe_limit(2)
        .consecutive_successes(2)
        .sink(sink.clone())
        .build()
}

async fn succeed(breaker: &CircuitBreaker<TestError>) -> BreakerResult<u32, TestError> {
    breaker.call(|| async { Ok::<_, TestError>(1) }).await
}

async fn fail(breaker: &CircuitBreaker<TestError>) -> BreakerResult<u32, TestError> {
    breaker
        .call(|| async { Err::<u32, _>(TestError::new("boom")) })
        .await
}

async fn trip(breaker: &CircuitBreaker<TestError>) {
    for _ in 0..4 {
        let _ = fail(breaker).await;
    }
    assert_eq!(breaker.current_state(), State::Open);
}

#[tokio::test(start_paused = true)]
async fn test_trips_once_volume_and_failure_ratio_are_reached() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = breaker(&sink);

    assert_eq!(breaker.current_state(), State::Closed);

    // Below the volume threshold nothing happens, however bad the ratio
    for _ in 0..3 {
        let result = fail(&breaker).await;
        assert!(matches!(
            result,
            Err(BreakerError::Upstream(UpstreamError::Failed(_)))
        ));
    }
    assert_eq!(breaker.current_state(), State::Closed);

    let _ = fail(&breaker).await;
    assert_eq!(breaker.current_state(), State::Open);

    let status = breaker.status();
    assert_eq!(status.trips, 1);
    assert_eq!(status.window.total, 4);
    assert_eq!(status.window.failures, 4);
    assert_eq!(sink.transitions(NAME), vec![(State::Closed, State::Open)]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_ratio_must_exceed_threshold() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = breaker(&sink);

    assert!(succeed(&breaker).await.is_ok());
    assert!(succeed(&breaker).await.is_ok());
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;

    // 50% of 4 calls is not above 50%
    assert_eq!(breaker.current_state(), State::Closed);

    let _ = fail(&breaker).await;
    assert_eq!(breaker.current_state(), State::Open);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_rejects_without_calling() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = breaker(&sink);
    trip(&breaker).await;

    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    let result = breaker
        .call(move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, TestError>(())
        })
        .await;

    assert!(matches!(result, Err(BreakerError::Open { ref breaker }) if breaker == NAME));
    assert!(!invoked.load(Ordering::SeqCst));
    assert_eq!(breaker.status().window.rejections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = breaker(&sink);
    trip(&breaker).await;

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    // The state only changes when the next call arrives
    assert_eq!(breaker.current_state(), State::Open);

    let result = fail(&breaker).await;
    assert!(matches!(result, Err(BreakerError::Upstream(_))));
    assert_eq!(breaker.current_state(), State::Open);
    assert_eq!(breaker.status().trips, 2);
    assert_eq!(
        sink.transitions(NAME),
        vec![
            (State::Closed, State::Open),
            (State::Open, State::HalfOpen),
            (State::HalfOpen, State::Open),
        ]
    );

    // The cool-down restarted with the failed trial
    assert!(matches!(
        succeed(&breaker).await,
        Err(BreakerError::Open { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_trial_successes_close_the_circuit() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = breaker(&sink);
    trip(&breaker).await;

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(succeed(&breaker).await.unwrap(), 1);
    assert_eq!(breaker.current_state(), State::HalfOpen);
    assert_eq!(breaker.status().half_open_successes, 1);

    assert_eq!(succeed(&breaker).await.unwrap(), 1);
    assert_eq!(breaker.current_state(), State::Closed);

    // Closing clears the window
    let status = breaker.status();
    assert_eq!(status.window.total, 0);
    assert_eq!(status.trips, 1);
    assert_eq!(
        sink.transitions(NAME).last(),
        Some(&(State::HalfOpen, State::Closed))
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure_and_leaves_operation_running() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = breaker(&sink);

    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let result = breaker
        .call(move || async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, TestError>(())
        })
        .await;

    let timeout = Duration::from_millis(100);
    assert!(matches!(
        result,
        Err(BreakerError::Upstream(UpstreamError::TimedOut(after))) if after == timeout
    ));
    assert_eq!(breaker.status().window.timeouts, 1);
    assert!(!finished.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_half_open_limits_concurrent_trials() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = CircuitBreaker::<TestError>::builder(NAME)
        .timeout(Duration::from_millis(100))
        .volume_threshold(1)
        .reset_timeout(Duration::from_secs(1))
        .probe_limit(1)
        .consecutive_successes(1)
        .sink(sink.clone())
        .build();

    let _ = fail(&breaker).await;
    assert_eq!(breaker.current_state(), State::Open);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let trial = {
        let breaker = breaker.clone();
        tokio::spawn(async move {
            breaker
                .call(move || async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, TestError>(7)
                })
                .await
        })
    };
    started_rx.await.unwrap();

    assert_eq!(breaker.current_state(), State::HalfOpen);
    assert!(matches!(
        succeed(&breaker).await,
        Err(BreakerError::Open { .. })
    ));

    assert_eq!(trial.await.unwrap().unwrap(), 7);
    assert_eq!(breaker.current_state(), State::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_trial_releases_its_slot() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = CircuitBreaker::<TestError>::builder(NAME)
        .timeout(Duration::from_secs(1))
        .volume_threshold(1)
        .reset_timeout(Duration::from_secs(1))
        .probe_limit(1)
        .consecutive_successes(1)
        .sink(sink.clone())
        .build();

    let _ = fail(&breaker).await;
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    // The caller gives up before the trial completes
    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        breaker.call(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, TestError>(0)
        }),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(breaker.current_state(), State::HalfOpen);

    assert!(succeed(&breaker).await.is_ok());
    assert_eq!(breaker.current_state(), State::Closed);
}

#[tokio::test]
async fn test_circuit_breaker_manual_control() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = breaker(&sink);

    // Force open
    assert!(breaker.force_open());
    assert_eq!(breaker.current_state(), State::Open);

    // Check that calls are rejected when open
    assert!(matches!(
        succeed(&breaker).await,
        Err(BreakerError::Open { .. })
    ));

    // Trying to open again should return false (no change)
    assert!(!breaker.force_open());

    // Force closed
    assert!(breaker.force_closed());
    assert_eq!(breaker.current_state(), State::Closed);
    assert!(succeed(&breaker).await.is_ok());

    // Trying to close again should return false (no change)
    assert!(!breaker.force_closed());
}

#[tokio::test]
async fn test_custom_policy() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = CircuitBreaker::<TestError>::builder(NAME)
        .sink(sink.clone())
        .build_with_policy(FailureCountPolicy::new(2, 1));

    for expected in [State::Closed, State::Open] {
        let result = breaker
            .call(|| async { Err::<(), _>(TestError::new("boom")) })
            .await;
        assert!(result.is_err());
        assert_eq!(breaker.current_state(), expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_trip_exactly_once() {
    let sink = Arc::new(RecordingSink::new());
    let breaker = CircuitBreaker::<TestError>::builder(NAME)
        .timeout(Duration::from_secs(5))
        .volume_threshold(4)
        .reset_timeout(Duration::from_secs(60))
        .sink(sink.clone())
        .build();

    let calls: Vec<_> = (0..64)
        .map(|_| {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| async { Err::<(), _>(TestError::new("down")) })
                    .await
            })
        })
        .collect();

    for call in calls {
        assert!(call.await.unwrap().is_err());
    }

    let status = breaker.status();
    assert_eq!(status.state, State::Open);
    assert_eq!(status.trips, 1);
    assert_eq!(status.window.total + status.window.rejections, 64);
    assert_eq!(sink.transitions(NAME), vec![(State::Closed, State::Open)]);
}

#[tokio::test(start_paused = true)]
async fn test_rolling_window_evicts_old_buckets() {
    let mut window = RollingWindow::new(Duration::from_secs(10), 10);

    window.record(Outcome::Failure);
    window.record(Outcome::Timeout);
    window.record(Outcome::Success);
    window.record(Outcome::Rejected);

    let counts = window.counts();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.failed(), 2);
    assert_eq!(counts.rejections, 1);
    assert!((counts.failure_percentage() - 200.0 / 3.0).abs() < 1e-9);

    tokio::time::advance(Duration::from_secs(6)).await;
    window.record(Outcome::Success);
    assert_eq!(window.counts().total, 4);

    // The first bucket has left the window, the second has not
    tokio::time::advance(Duration::from_secs(5)).await;
    let counts = window.counts();
    assert_eq!(counts.total, 1);
    assert_eq!(counts.successes, 1);

    window.clear();
    assert_eq!(window.counts().total, 0);
}
