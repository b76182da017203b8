// Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use warden_core::abstractions::{BufferedNotifier, MemoryStore, MockClock, PersistencePort};
use warden_core::classifier::RawError;
use warden_core::network_monitor::ConnectivityProbe;
use warden_core::{Warden, WardenBuilder, WardenConfig};

/// Probe whose outcome can be flipped between checks
#[derive(Clone)]
pub struct SwitchableProbe {
    latency: Arc<Mutex<Option<Duration>>>,
}

impl SwitchableProbe {
    pub fn online() -> Self {
        Self {
            latency: Arc::new(Mutex::new(Some(Duration::from_millis(25)))),
        }
    }

    pub fn set_online(&self, online: bool) {
        *self.latency.lock() = online.then(|| Duration::from_millis(25));
    }
}

#[async_trait]
impl ConnectivityProbe for SwitchableProbe {
    async fn probe(&self, endpoint: &str) -> Result<Duration, RawError> {
        match *self.latency.lock() {
            Some(latency) => Ok(latency),
            None => Err(RawError::new(format!("Failed to fetch {}", endpoint)).with_code("NETWORK_ERROR")),
        }
    }
}

pub struct Harness {
    pub clock: MockClock,
    pub probe: SwitchableProbe,
    pub notifier: Arc<BufferedNotifier>,
    pub port: Arc<dyn PersistencePort>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            clock: MockClock::new(),
            probe: SwitchableProbe::online(),
            notifier: Arc::new(BufferedNotifier::default()),
            port: Arc::new(MemoryStore::new()),
        }
    }

    pub fn builder(&self, config: WardenConfig) -> WardenBuilder {
        Warden::builder(config)
            .clock(Arc::new(self.clock.clone()))
            .persistence(self.port.clone())
            .notifier(self.notifier.clone())
            .probe(Arc::new(self.probe.clone()))
    }

    pub fn warden(&self) -> Warden {
        self.builder(WardenConfig::test()).build().unwrap()
    }
}

/// Poll until `condition` holds, giving spawned tasks a chance to run
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
