// End-to-end scenarios through a fully wired Warden

mod common;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, Harness};
use warden_core::classifier::{ErrorContext, ErrorType, RawError};
use warden_core::config::CircuitBreakerConfig;
use warden_core::network_monitor::operation;
use warden_core::transaction_retry::TransactionParams;
use warden_core::{CircuitState, WardenConfig, WardenError};

fn network_failure() -> RawError {
    RawError::new("Failed to fetch").with_code("NETWORK_ERROR")
}

#[tokio::test]
async fn test_breaker_opens_and_recovers_through_half_open() {
    let harness = Harness::new();
    let mut config = WardenConfig::test();
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 3,
        recovery_timeout: Duration::from_secs(30),
        success_threshold: 2,
        half_open_max_calls: 2,
        operation_timeout: None,
    };
    let warden = harness.builder(config).build().unwrap();
    let breaker = warden.breakers().get_or_create("rpc");

    for _ in 0..3 {
        let err = breaker
            .execute(|| async { Err::<(), _>(network_failure()) })
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Network);
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let calls = AtomicU32::new(0);
    let rejected = breaker
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, RawError>(())
        })
        .await;
    assert!(matches!(rejected, Err(WardenError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    harness.clock.advance(Duration::from_secs(31));
    for _ in 0..2 {
        breaker.execute(|| async { Ok::<_, RawError>(()) }).await.unwrap();
    }
    assert_eq!(breaker.state(), CircuitState::Closed);

    // Every failure went through the shared classifier
    assert_eq!(warden.classifier().error_stats().total, 3);
}

#[tokio::test]
async fn test_transaction_retry_escalates_gas_and_reports_progress() {
    let harness = Harness::new();
    let warden = harness.warden();
    let seen = Mutex::new(Vec::new());

    let hash = warden
        .retries()
        .execute_with_retry(
            TransactionParams::new().gas_limit("0x5208").max_fee_per_gas("30000000000"),
            None,
            |params| {
                let attempt = {
                    let mut seen = seen.lock();
                    seen.push(params.clone());
                    seen.len()
                };
                async move {
                    if attempt < 3 {
                        Err(RawError::new("out of gas"))
                    } else {
                        Ok(format!("0x{:064x}", attempt))
                    }
                }
            },
        )
        .await
        .unwrap();

    assert!(hash.starts_with("0x"));
    let seen = seen.into_inner();
    assert_eq!(seen.len(), 3);
    let limits: Vec<u128> = seen
        .iter()
        .map(|p| p.gas_limit_value().unwrap())
        .collect();
    assert!(limits.windows(2).all(|w| w[1] > w[0]), "{:?}", limits);

    let progress = harness
        .notifier
        .snapshot()
        .into_iter()
        .filter(|n| n.message.contains("Retrying transaction"))
        .count();
    assert_eq!(progress, 2);
}

#[tokio::test]
async fn test_user_rejection_is_never_retried() {
    let harness = Harness::new();
    let warden = harness.warden();
    let calls = AtomicU32::new(0);

    let err = warden
        .retries()
        .execute_with_retry(TransactionParams::new(), None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>(RawError::new("User rejected the request").with_code(4001)) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(err, WardenError::TransactionFailed { attempts: 1, .. }));
}

#[tokio::test]
async fn test_offline_requests_replay_in_order_after_reconnect() {
    let harness = Harness::new();
    let warden = harness.warden();
    let network = warden.network().clone();

    harness.probe.set_online(false);
    network.check_quality().await;
    assert!(!network.is_online());

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..3 {
        let order = order.clone();
        let monitor = network.clone();
        handles.push(tokio::spawn(async move {
            monitor
                .queue_request(operation(move || {
                    let order = order.clone();
                    async move {
                        order.lock().push(i);
                        Ok::<_, RawError>(i)
                    }
                }))
                .await
        }));
        let monitor = network.clone();
        eventually(move || monitor.queue_len() == i + 1).await;
    }

    harness.probe.set_online(true);
    network.handle_connectivity_change(true).await;

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), i);
    }
    assert_eq!(*order.lock(), vec![0, 1, 2]);
    assert!(network.is_online());
}

#[tokio::test]
async fn test_rate_limit_denies_overflow_request() {
    let harness = Harness::new();
    let warden = harness.warden();
    let threats = warden.threats();
    let limit = threats.config().max_requests_per_second;

    for i in 0..limit {
        assert!(threats.check_request("load_profile", &format!("/profiles/{}", i)).allowed);
    }
    let denied = threats.check_request("load_profile", "/profiles/extra");
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));
}

#[tokio::test]
async fn test_errors_flow_into_analytics() {
    let harness = Harness::new();
    let warden = harness.warden();

    for i in 0..100 {
        warden.classifier().handle_error(
            RawError::new(format!("Failed to load listing {} from https://api.example.org", i)),
            ErrorContext::new().user(format!("user-{}", i % 5)).component("listings"),
            false,
        );
    }

    let summary = warden.analytics().run_analysis().unwrap();
    assert_eq!(summary.ingested, 100);

    let patterns = warden.analytics().get_error_patterns(5);
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].frequency, 100);
    assert_eq!(patterns[0].affected_users.len(), 5);

    let first = warden.analytics().get_system_health();
    assert_eq!(first, warden.analytics().get_system_health());
    assert!(first.score < 100);
}
