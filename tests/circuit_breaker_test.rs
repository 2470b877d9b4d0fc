// Circuit breaker behaviour under concurrency and state changes

use mq_relay::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerState,
};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, PartialEq)]
enum CallError {
    Breaker(CircuitBreakerError),
    Failed,
}

impl From<CircuitBreakerError> for CallError {
    fn from(err: CircuitBreakerError) -> Self {
        CallError::Breaker(err)
    }
}

fn quick_breaker(name: &str) -> CircuitBreaker {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(1)
        .success_threshold(1)
        .half_open_max_requests(1)
        .open_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    CircuitBreaker::new(name, config)
}

async fn fail(cb: &CircuitBreaker) {
    let _ = cb.call(|| async { Err::<(), _>(CallError::Failed) }).await;
}

#[tokio::test]
async fn test_clones_share_state() {
    let cb = quick_breaker("cb_test_clones");
    let other = cb.clone();

    fail(&other).await;

    assert_eq!(cb.state(), CircuitBreakerState::Open);
    assert_eq!(cb.name(), "cb_test_clones");
}

#[tokio::test]
async fn test_half_open_admits_limited_probes() {
    let cb = quick_breaker("cb_test_probes");
    fail(&cb).await;
    sleep(Duration::from_millis(80)).await;
    assert_eq!(cb.state(), CircuitBreakerState::HalfOpen);

    let prober = cb.clone();
    let probe = tokio::spawn(async move {
        prober
            .call(|| async {
                sleep(Duration::from_millis(100)).await;
                Ok::<_, CallError>("probe")
            })
            .await
    });
    sleep(Duration::from_millis(20)).await;

    let rejected = cb.call(|| async { Ok::<_, CallError>("extra") }).await;
    assert!(matches!(
        rejected,
        Err(CallError::Breaker(CircuitBreakerError::Open(_)))
    ));

    assert_eq!(probe.await.unwrap(), Ok("probe"));
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

#[tokio::test]
async fn test_outcome_admitted_before_transition_is_ignored() {
    let cb = quick_breaker("cb_test_generation");

    let slow = cb.clone();
    let late_failure = tokio::spawn(async move {
        slow.call(|| async {
            sleep(Duration::from_millis(50)).await;
            Err::<(), _>(CallError::Failed)
        })
        .await
    });
    sleep(Duration::from_millis(10)).await;

    cb.force_open();
    cb.reset();

    assert_eq!(late_failure.await.unwrap(), Err(CallError::Failed));
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

#[tokio::test]
async fn test_stats_track_outcomes() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(5)
        .build()
        .unwrap();
    let cb = CircuitBreaker::new("cb_test_stats", config);

    for _ in 0..3 {
        cb.call(|| async { Ok::<_, CallError>(()) }).await.unwrap();
    }
    fail(&cb).await;

    let stats = cb.stats();
    assert_eq!(stats.name, "cb_test_stats");
    assert_eq!(stats.state, CircuitBreakerState::Closed);
    assert_eq!(stats.counts.requests, 4);
    assert_eq!(stats.counts.total_successes, 3);
    assert_eq!(stats.counts.total_failures, 1);
    assert_eq!(stats.counts.consecutive_failures, 1);
    assert_eq!(stats.transition_count, 0);
}

#[tokio::test]
async fn test_success_resets_failure_run() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .build()
        .unwrap();
    let cb = CircuitBreaker::new("cb_test_run", config);

    for _ in 0..4 {
        fail(&cb).await;
        cb.call(|| async { Ok::<_, CallError>(()) }).await.unwrap();
    }
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

#[test]
fn test_invalid_config_rejected() {
    let err = CircuitBreakerConfig::builder()
        .failure_threshold(0)
        .build()
        .unwrap_err();
    assert!(matches!(err, CircuitBreakerError::InvalidConfig(_)));

    let config = CircuitBreakerConfig {
        open_timeout: Duration::ZERO,
        ..CircuitBreakerConfig::for_kafka_producer()
    };
    assert!(config.validate().is_err());
}
