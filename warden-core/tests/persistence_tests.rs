// Snapshots written through redb survive a full rebuild of the Warden

mod common;

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::SwitchableProbe;
use warden_core::abstractions::MockClock;
use warden_core::classifier::{ErrorContext, RawError};
use warden_core::config::CircuitBreakerConfig;
use warden_core::transaction_retry::{RetryStatus, TransactionParams};
use warden_core::{CircuitState, Warden, WardenConfig};

fn config(dir: &TempDir) -> WardenConfig {
    let mut config = WardenConfig::test();
    config.storage.path = Some(dir.path().join("warden.redb"));
    config.storage.namespace = "itest".to_string();
    config.circuit_breakers.insert(
        "ipfs".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 1,
            operation_timeout: None,
            ..Default::default()
        },
    );
    config
}

fn build(dir: &TempDir, clock: &MockClock) -> Warden {
    Warden::builder(config(dir))
        .clock(Arc::new(clock.clone()))
        .probe(Arc::new(SwitchableProbe::online()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = MockClock::new();

    {
        let warden = build(&dir, &clock);
        assert!(warden.snapshots().is_persistent());

        warden.classifier().handle_error(
            RawError::new("Unauthorized").with_status(401),
            ErrorContext::new().user("alice"),
            false,
        );

        let breaker = warden.breakers().get_or_create("ipfs");
        let _ = breaker
            .execute(|| async { Err::<(), _>(RawError::new("ipfs gateway connection reset").with_code("ECONNRESET")) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        warden
            .retries()
            .execute_tracked("tx-1", TransactionParams::new().nonce("7"), None, |_| async {
                Ok::<_, RawError>("0xabc".to_string())
            })
            .await
            .unwrap();

        warden.threats().block(Duration::from_secs(120), "manual review");
        warden.analytics().run_analysis();
        warden.shutdown().await;
    }

    let warden = build(&dir, &clock);
    let summary = warden.restore();

    // The breaker failure was recorded by the shared classifier as well
    assert_eq!(summary.error_reports, 2);
    assert_eq!(summary.circuit_breakers, 1);
    assert_eq!(summary.transaction_retries, 1);
    assert!(summary.threat_block);
    assert!(summary.analytics_records >= 2);

    assert_eq!(warden.breakers().get_or_create("ipfs").state(), CircuitState::Open);
    assert_eq!(warden.retries().state("tx-1").map(|s| s.status), Some(RetryStatus::Success));
    assert!(warden.threats().is_blocked());
    assert!(warden
        .classifier()
        .reports()
        .iter()
        .any(|r| r.context.user_id.as_deref() == Some("alice")));
    assert_eq!(warden.analytics().get_error_patterns(1)[0].frequency, 1);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let dir = TempDir::new().unwrap();
    let clock = MockClock::new();

    {
        let warden = build(&dir, &clock);
        warden
            .classifier()
            .handle_error(RawError::new("Failed to fetch"), ErrorContext::new(), false);
    }

    let mut other = config(&dir);
    other.storage.namespace = "other".to_string();
    let warden = Warden::builder(other)
        .clock(Arc::new(clock.clone()))
        .probe(Arc::new(SwitchableProbe::online()))
        .build()
        .unwrap();
    assert_eq!(warden.restore().error_reports, 0);
}
